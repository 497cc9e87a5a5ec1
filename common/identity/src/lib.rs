//! Identity resolution for pseudonymous ingestion.
//!
//! The pieces, leaves first: salted deterministic hashing ([`hash`]), the
//! salt cache ([`salts`]), device fingerprinting ([`fingerprint`]), the
//! session window manager ([`window`]), the single-flight identify lock
//! ([`lock`]), the per-request resolver ([`resolver`]) and the identify
//! decision function ([`identify`]).

pub mod fingerprint;
pub mod hash;
pub mod identify;
pub mod lock;
pub mod resolver;
pub mod salts;
pub mod window;

pub use fingerprint::Fingerprint;
pub use hash::HashError;
pub use identify::{classify, IdentifyCase};
pub use lock::{IdentifyLock, LockGuard};
pub use resolver::{RequestIdentity, Resolved, ResolveError, Resolver};
pub use salts::{SaltCache, SaltError, SaltPair};
pub use window::{SessionWindow, Touch};
