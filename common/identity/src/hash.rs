use std::hash::Hasher;

use siphasher::sip::SipHasher24;
use thiserror::Error;

use common_types::{ProjectId, UserId};

#[derive(Debug, Error, PartialEq)]
pub enum HashError {
    #[error("salt must be exactly 16 bytes, but got {0} bytes")]
    InvalidSaltSize(usize),
}

/// Derive the deterministic anonymous id for a request.
///
/// SipHash-2-4 keyed by the 16-byte salt over `project-ip-user_agent`. Pure:
/// identical inputs always map to the same id, and nothing about the raw ip
/// or user agent is recoverable from it once the salt is rotated away.
pub fn anonymous_id(
    salt: &[u8],
    project_id: ProjectId,
    ip: &str,
    user_agent: &str,
) -> Result<UserId, HashError> {
    if salt.len() != 16 {
        return Err(HashError::InvalidSaltSize(salt.len()));
    }

    // Extract the two 64-bit keys from the salt
    let key0 = u64::from_le_bytes(salt[0..8].try_into().unwrap());
    let key1 = u64::from_le_bytes(salt[8..16].try_into().unwrap());

    let input = format!("{project_id}-{ip}-{user_agent}");

    let mut hasher = SipHasher24::new_with_keys(key0, key1);
    hasher.write(input.as_bytes());

    Ok(UserId(hasher.finish()))
}

/// Deterministic device id for a (project, user, normalized signature),
/// rendered as 16 hex chars. Unkeyed on purpose: device identity survives
/// salt rotation.
pub fn device_id(project_id: ProjectId, user_id: UserId, signature: &str) -> String {
    let input = format!("{project_id}-{user_id}-{signature}");

    let mut hasher = SipHasher24::new();
    hasher.write(input.as_bytes());

    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn same_inputs_same_id() {
        let salt = [7u8; 16];
        let project = Uuid::new_v4();

        let a = anonymous_id(&salt, project, "203.0.113.5", "TestAgent/1.0").unwrap();
        let b = anonymous_id(&salt, project, "203.0.113.5", "TestAgent/1.0").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn any_input_change_changes_the_id() {
        let salt = [7u8; 16];
        let other_salt = [8u8; 16];
        let project = Uuid::new_v4();

        let base = anonymous_id(&salt, project, "203.0.113.5", "TestAgent/1.0").unwrap();

        assert_ne!(
            base,
            anonymous_id(&other_salt, project, "203.0.113.5", "TestAgent/1.0").unwrap()
        );
        assert_ne!(
            base,
            anonymous_id(&salt, project, "203.0.113.6", "TestAgent/1.0").unwrap()
        );
        assert_ne!(
            base,
            anonymous_id(&salt, project, "203.0.113.5", "TestAgent/2.0").unwrap()
        );
        assert_ne!(
            base,
            anonymous_id(&salt, Uuid::new_v4(), "203.0.113.5", "TestAgent/1.0").unwrap()
        );
    }

    #[test]
    fn rejects_short_salt() {
        let result = anonymous_id(&[0u8; 8], Uuid::new_v4(), "127.0.0.1", "Mozilla/5.0");
        assert_eq!(result, Err(HashError::InvalidSaltSize(8)));
    }

    #[test]
    fn device_id_is_stable_and_scoped_to_user() {
        let project = Uuid::new_v4();

        let a = device_id(project, UserId(1), "macOS:14.1:Firefox:121:browser:desktop");
        let b = device_id(project, UserId(1), "macOS:14.1:Firefox:121:browser:desktop");
        let c = device_id(project, UserId(2), "macOS:14.1:Firefox:121:browser:desktop");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
