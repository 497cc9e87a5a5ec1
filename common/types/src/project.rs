use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = Uuid;

#[derive(Debug, Clone, Default, Deserialize, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// The write token third-party sites send with every request.
    pub token: String,
    /// Registered first-party domain, used to reject same-site hrefs on
    /// outbound-link events. Stored without scheme, e.g. "example.com".
    pub domain: Option<String>,
    /// Client ips that are accepted and silently dropped.
    pub excluded_ips: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn ip_excluded(&self, ip: &str) -> bool {
        self.excluded_ips.iter().any(|x| x == ip)
    }
}
