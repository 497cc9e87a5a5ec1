//! The async half of the pipeline: consumes the jobs the gateway enqueues
//! and applies them to the stores, plus the scheduled salt rotation and the
//! stalled-job sweep.

pub mod config;
pub mod handlers;
pub mod merge;
