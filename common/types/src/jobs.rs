//! Payloads for the async pipeline. The gateway enqueues these and returns;
//! the worker binary registers one handler per queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{EventRow, ProjectId, SessionRow, UserId};

/// Queue names, one per job type so each can run at its own concurrency.
pub mod queues {
    /// Pure inserts, safe at high concurrency.
    pub const DEVICE: &str = "device";
    pub const EVENT: &str = "event";
    /// Mutate one logical row per key, pinned to concurrency 1.
    pub const SESSION: &str = "session";
    pub const USER_CREATE: &str = "user_create";
    pub const USER_UPDATE: &str = "user_update";
    pub const MERGE: &str = "merge";
    pub const SALT: &str = "salt";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceJob {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionJob {
    /// First activity inside a window: insert the initial snapshot.
    Start { session: SessionRow },
    /// Later activity: append a wider snapshot for an existing id. A no-op
    /// when no snapshot exists, so a stale window entry can never fabricate
    /// a session.
    Extend {
        project_id: ProjectId,
        session_id: Uuid,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventJob {
    pub event: EventRow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateUserJob {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub identifier: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateUserJob {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeJob {
    pub project_id: ProjectId,
    /// The orphaned anonymous user whose history folds away.
    pub from_user_id: UserId,
    /// The canonical identified user that absorbs it.
    pub into_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotateSaltJob {
    /// Rotation date (YYYY-MM-DD), also the dedup key so one rotation runs
    /// per period no matter how many workers schedule it.
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Device(DeviceJob),
    Session(SessionJob),
    Event(EventJob),
    CreateUser(CreateUserJob),
    UpdateUser(UpdateUserJob),
    MergeUsers(MergeJob),
    RotateSalt(RotateSaltJob),
}

impl JobPayload {
    pub fn queue(&self) -> &'static str {
        match self {
            JobPayload::Device(_) => queues::DEVICE,
            JobPayload::Session(_) => queues::SESSION,
            JobPayload::Event(_) => queues::EVENT,
            JobPayload::CreateUser(_) => queues::USER_CREATE,
            JobPayload::UpdateUser(_) => queues::USER_UPDATE,
            JobPayload::MergeUsers(_) => queues::MERGE,
            JobPayload::RotateSalt(_) => queues::SALT,
        }
    }

    /// Dedup key within the queue, where redelivery must collapse.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            JobPayload::Event(j) => Some(j.event.id.to_string()),
            JobPayload::CreateUser(j) => Some(j.user_id.to_string()),
            JobPayload::MergeUsers(j) => Some(format!("{}:{}", j.from_user_id, j.into_user_id)),
            JobPayload::RotateSalt(j) => Some(format!("salt:{}", j.date)),
            _ => None,
        }
    }
}
