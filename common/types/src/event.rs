use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{ProjectId, UserId};

/// An immutable behavioral fact in the analytical store.
///
/// The id is caller-supplied (or minted at the gateway) and doubles as the
/// insert job's dedup key, so redelivery overwrites instead of duplicating.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EventRow {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub session_id: Uuid,
    /// Deterministic device id, 16 hex chars. Empty when the request had no
    /// user agent to fingerprint.
    pub device_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Denormalized from the canonical identity at write time.
    pub identifier: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}
