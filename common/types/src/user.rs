use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProjectId, UserId};

/// One snapshot of a user profile in the analytical store, latest wins.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UserRow {
    pub project_id: ProjectId,
    pub id: UserId,
    pub identifier: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// A device seen for a (project, user), inserted at most once per id.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeviceRow {
    pub project_id: ProjectId,
    pub user_id: UserId,
    /// Deterministic hash of (project, user, normalized signature).
    pub id: String,
    pub os_name: String,
    pub os_version: String,
    pub client_name: String,
    pub client_version: String,
    pub client_type: String,
    pub device_type: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceRow {
    /// The normalized signature the device id is derived from.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.os_name,
            self.os_version,
            self.client_name,
            self.client_version,
            self.client_type,
            self.device_type
        )
    }
}
