use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProjectId, UserId};

/// One snapshot of a session in the analytical store.
///
/// Sessions are append-only: "extending" a session inserts a new snapshot
/// for the same id with a larger `ended_at`/`duration_secs`, and reads take
/// the most recently inserted snapshot for an id. At most one session per
/// (project, user) is logically open at a time; openness is decided by the
/// session-window cache, never by these rows.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionRow {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub identifier: Option<String>,
    pub display_name: Option<String>,
    /// First-touch attribution, carried unchanged across snapshots.
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
}

impl SessionRow {
    /// Widen the snapshot to cover `at`, returning whether anything grew.
    pub fn cover(&mut self, at: DateTime<Utc>) -> bool {
        let mut grew = false;
        if at < self.started_at {
            self.started_at = at;
            grew = true;
        }
        if at > self.ended_at {
            self.ended_at = at;
            grew = true;
        }
        if grew {
            self.duration_secs = (self.ended_at - self.started_at).num_seconds();
        }
        grew
    }
}
