use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProjectId;

/// A pseudonymous 64-bit user identifier.
///
/// Either deterministically derived from salted request signals, or random
/// (cookie-carried or no-user-agent fallback). Serialized as a decimal
/// string everywhere it crosses a process boundary, since the full u64
/// range does not survive a trip through a JS number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl UserId {
    pub fn random() -> Self {
        UserId(rand_u64())
    }
}

// rand is not a dependency of this crate; ids are random enough built from
// a v4 uuid's low bits.
fn rand_u64() -> u64 {
    let uuid = uuid::Uuid::new_v4();
    u64::from_le_bytes(uuid.as_bytes()[..8].try_into().unwrap())
}

// Postgres has no unsigned 64-bit column; ids are stored bit-cast as BIGINT.
impl TryFrom<i64> for UserId {
    type Error = std::convert::Infallible;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        Ok(UserId(v as u64))
    }
}

impl From<UserId> for i64 {
    fn from(v: UserId) -> i64 {
        v.0 as i64
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(UserId(s.parse()?))
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub type SaltId = i64;

/// A hashing secret. Never mutated; superseded by rotation and pruned once
/// older than the retention window.
#[derive(Debug, Clone, Deserialize, Serialize, sqlx::FromRow)]
pub struct Salt {
    pub id: SaltId,
    /// 16 random bytes, base64-encoded.
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

/// The project-scoped link between an explicit external identifier and the
/// user id it was first identified as. Unique on (project, identifier) and
/// on (project, user). Never updated in place: a changed identifier starts
/// a new anonymous lineage.
#[derive(Debug, Clone, Deserialize, Serialize, sqlx::FromRow)]
pub struct IdentityMapping {
    pub project_id: ProjectId,
    #[sqlx(try_from = "i64")]
    pub user_id: UserId,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}
