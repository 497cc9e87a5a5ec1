mod event;
mod identity;
mod project;
mod session;
mod time;
mod user;

pub mod jobs;

// Projects
pub use project::Project;
pub use project::ProjectId;

// Identity
pub use identity::IdentityMapping;
pub use identity::Salt;
pub use identity::SaltId;
pub use identity::UserId;

// Rows in the analytical store
pub use event::EventRow;
pub use session::SessionRow;
pub use user::DeviceRow;
pub use user::UserRow;

// Time
pub use time::Clock;
pub use time::FixedClock;
pub use time::SystemClock;

/// Generate a v7 uuid, used for session and event ids so that ids sort by
/// creation time.
pub fn uuid_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
