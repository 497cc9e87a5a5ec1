use std::sync::Arc;

use thiserror::Error;

use common_kv::KvError;
use common_store::{AppStore, StoreError};
use common_types::{ProjectId, UserId};

use crate::hash::{self, HashError};
use crate::salts::{SaltCache, SaltError};
use crate::window::SessionWindow;

/// The identity-bearing parts of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    /// Id carried by our own cookie. Trusted, since we set it.
    pub cookie_id: Option<UserId>,
    /// Authoritative external identifier, e.g. from a server-side SDK.
    pub user_identifier: Option<String>,
    /// Client-remembered identifier. Non-authoritative, read paths only.
    pub remembered_identifier: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
    pub allow_cookies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved {
    User(UserId),
    /// Cookies allowed and nothing resolved: the gateway mints a random id
    /// and sets the cookie.
    Deferred,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// An authoritative identifier was supplied but is not mapped. The
    /// caller claimed an already-identified user that does not exist.
    #[error("identifier {0:?} is not identified")]
    UnknownIdentifier(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Salt(#[from] SaltError),
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Decides which user id a request belongs to. First match wins:
/// cookie, authoritative identifier, remembered identifier, cookie-consent
/// deferral, deterministic hash, random fallback.
pub struct Resolver {
    app: Arc<dyn AppStore>,
    salts: Arc<SaltCache>,
    window: Arc<SessionWindow>,
}

impl Resolver {
    pub fn new(app: Arc<dyn AppStore>, salts: Arc<SaltCache>, window: Arc<SessionWindow>) -> Self {
        Resolver { app, salts, window }
    }

    /// `ignore_remembered` is set on the explicit identify path, which must
    /// not take the client-remembered shortcut so a real merge decision
    /// gets made.
    pub async fn resolve(
        &self,
        project_id: ProjectId,
        req: &RequestIdentity,
        ignore_remembered: bool,
    ) -> Result<Resolved, ResolveError> {
        if let Some(id) = req.cookie_id {
            return Ok(Resolved::User(id));
        }

        if let Some(identifier) = &req.user_identifier {
            return match self.app.mapping_by_identifier(project_id, identifier).await? {
                Some(mapping) => Ok(Resolved::User(mapping.user_id)),
                None => Err(ResolveError::UnknownIdentifier(identifier.clone())),
            };
        }

        if !ignore_remembered {
            if let Some(identifier) = &req.remembered_identifier {
                if let Some(mapping) =
                    self.app.mapping_by_identifier(project_id, identifier).await?
                {
                    return Ok(Resolved::User(mapping.user_id));
                }
            }
        }

        if req.allow_cookies {
            return Ok(Resolved::Deferred);
        }

        let Some(user_agent) = req.user_agent.as_deref().filter(|ua| !ua.is_empty()) else {
            // No signal to hash; nothing to link this request to.
            return Ok(Resolved::User(UserId::random()));
        };

        let pair = self.salts.latest().await?;
        let current = hash::anonymous_id(&pair.current.bytes, project_id, &req.ip, user_agent)?;

        // Right after a rotation the same device hashes to a different id.
        // If a session is still open under the previous salt's id, stay on
        // it rather than fragmenting the session.
        if let Some(previous) = &pair.previous {
            let before = hash::anonymous_id(&previous.bytes, project_id, &req.ip, user_agent)?;
            if before != current && self.window.is_open(project_id, before).await? {
                return Ok(Resolved::User(before));
            }
        }

        Ok(Resolved::User(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use common_kv::MemoryKvClient;
    use common_store::{new_salt_material, MemoryAppStore};
    use common_types::IdentityMapping;
    use uuid::Uuid;

    struct Fixture {
        app: Arc<MemoryAppStore>,
        salts: Arc<SaltCache>,
        window: Arc<SessionWindow>,
        resolver: Resolver,
        project: ProjectId,
    }

    fn fixture() -> Fixture {
        let app = Arc::new(MemoryAppStore::new());
        let kv = Arc::new(MemoryKvClient::new());
        let salts = Arc::new(SaltCache::new(app.clone(), Duration::from_secs(60)));
        let window = Arc::new(SessionWindow::new(kv, Duration::from_secs(30 * 60)));
        let resolver = Resolver::new(app.clone(), salts.clone(), window.clone());

        Fixture {
            app,
            salts,
            window,
            resolver,
            project: Uuid::new_v4(),
        }
    }

    fn hashed_request() -> RequestIdentity {
        RequestIdentity {
            ip: "203.0.113.5".to_string(),
            user_agent: Some("Mozilla/5.0 TestAgent/1.0".to_string()),
            allow_cookies: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn cookie_wins_over_everything() {
        let f = fixture();
        let req = RequestIdentity {
            cookie_id: Some(UserId(42)),
            user_identifier: Some("user@example.com".to_string()),
            ..hashed_request()
        };

        let resolved = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(resolved, Resolved::User(UserId(42)));
    }

    #[tokio::test]
    async fn authoritative_identifier_requires_a_mapping() {
        let f = fixture();
        let req = RequestIdentity {
            user_identifier: Some("user@example.com".to_string()),
            ..hashed_request()
        };

        let err = f.resolver.resolve(f.project, &req, false).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnknownIdentifier(_)));

        f.app
            .create_mapping(&IdentityMapping {
                project_id: f.project,
                user_id: UserId(7),
                identifier: "user@example.com".to_string(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let resolved = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(resolved, Resolved::User(UserId(7)));
    }

    #[tokio::test]
    async fn remembered_identifier_is_ignored_on_the_identify_path() {
        let f = fixture();
        f.app
            .create_mapping(&IdentityMapping {
                project_id: f.project,
                user_id: UserId(7),
                identifier: "user@example.com".to_string(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let req = RequestIdentity {
            remembered_identifier: Some("user@example.com".to_string()),
            ..hashed_request()
        };

        let read = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(read, Resolved::User(UserId(7)));

        // With the shortcut off we fall through to the deterministic hash.
        let identify = f.resolver.resolve(f.project, &req, true).await.unwrap();
        assert_ne!(identify, Resolved::User(UserId(7)));
    }

    #[tokio::test]
    async fn unmapped_remembered_identifier_falls_through() {
        let f = fixture();
        let req = RequestIdentity {
            remembered_identifier: Some("nobody@example.com".to_string()),
            ..hashed_request()
        };

        let resolved = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert!(matches!(resolved, Resolved::User(_)));
    }

    #[tokio::test]
    async fn consent_defers_to_the_gateway() {
        let f = fixture();
        let req = RequestIdentity {
            allow_cookies: true,
            ..hashed_request()
        };

        let resolved = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(resolved, Resolved::Deferred);
    }

    #[tokio::test]
    async fn deterministic_hash_is_stable() {
        let f = fixture();
        let req = hashed_request();

        let a = f.resolver.resolve(f.project, &req, false).await.unwrap();
        let b = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_user_agent_gets_a_random_id() {
        let f = fixture();
        let req = RequestIdentity {
            user_agent: None,
            ..hashed_request()
        };

        let a = f.resolver.resolve(f.project, &req, false).await.unwrap();
        let b = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn open_session_survives_a_salt_rotation() {
        let f = fixture();
        let req = hashed_request();

        let Resolved::User(before) = f.resolver.resolve(f.project, &req, false).await.unwrap()
        else {
            panic!("expected a user id");
        };
        f.window.touch(f.project, before).await.unwrap();

        f.app.create_salt(&new_salt_material()).await.unwrap();
        f.salts.invalidate();

        // The window is still open under the previous salt's id, so the
        // resolver sticks with it.
        let after = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_eq!(after, Resolved::User(before));

        // Once the window closes, the current salt takes over.
        f.window.clear(f.project, before).await.unwrap();
        let fresh = f.resolver.resolve(f.project, &req, false).await.unwrap();
        assert_ne!(fresh, Resolved::User(before));
    }
}
