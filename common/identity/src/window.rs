use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use common_kv::{Client, KvError};
use common_types::{uuid_v7, ProjectId, UserId};

/// What happened to the window on a touch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Touch {
    /// No window was open; a new session id was minted.
    Started(Uuid),
    /// A window was open; its TTL was pushed out.
    Extended(Uuid),
}

impl Touch {
    pub fn session_id(&self) -> Uuid {
        match self {
            Touch::Started(id) | Touch::Extended(id) => *id,
        }
    }
}

/// The per-user sliding session window.
///
/// One key per (project, user), holding the open session id with a TTL of
/// the window length. Every event refreshes the TTL, so a session ends only
/// after a full window of silence. No per-session state lives here beyond
/// the id itself.
pub struct SessionWindow {
    kv: Arc<dyn Client>,
    window: Duration,
}

impl SessionWindow {
    pub fn new(kv: Arc<dyn Client>, window: Duration) -> Self {
        SessionWindow { kv, window }
    }

    fn key(project_id: ProjectId, user_id: UserId) -> String {
        format!("session-window:{project_id}:{user_id}")
    }

    /// Record activity: start a session if none is open, otherwise slide the
    /// window forward.
    pub async fn touch(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Touch, KvError> {
        let key = Self::key(project_id, user_id);
        let seconds = self.window.as_secs();

        match self.kv.get(key.clone()).await {
            Ok(raw) => match raw.parse::<Uuid>() {
                Ok(id) => {
                    self.kv.setex(key, id.to_string(), seconds).await?;
                    Ok(Touch::Extended(id))
                }
                // A corrupt value is unrecoverable; start over.
                Err(_) => self.start(key, seconds).await,
            },
            Err(KvError::NotFound) => self.start(key, seconds).await,
            Err(e) => Err(e),
        }
    }

    async fn start(&self, key: String, seconds: u64) -> Result<Touch, KvError> {
        let id = uuid_v7();
        self.kv.setex(key, id.to_string(), seconds).await?;
        Ok(Touch::Started(id))
    }

    /// The open session id, if any, without refreshing the TTL.
    pub async fn open_session(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<Uuid>, KvError> {
        match self.kv.get(Self::key(project_id, user_id)).await {
            Ok(raw) => Ok(raw.parse::<Uuid>().ok()),
            Err(KvError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn is_open(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<bool, KvError> {
        Ok(self.open_session(project_id, user_id).await?.is_some())
    }

    /// Close the window immediately, e.g. on an explicit reset.
    pub async fn clear(&self, project_id: ProjectId, user_id: UserId) -> Result<(), KvError> {
        self.kv.del(Self::key(project_id, user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kv::MemoryKvClient;

    fn window(kv: Arc<MemoryKvClient>) -> SessionWindow {
        SessionWindow::new(kv, Duration::from_secs(30 * 60))
    }

    #[tokio::test]
    async fn second_touch_extends_the_same_session() {
        let kv = Arc::new(MemoryKvClient::new());
        let window = window(kv);
        let project = Uuid::new_v4();

        let first = window.touch(project, UserId(1)).await.unwrap();
        let second = window.touch(project, UserId(1)).await.unwrap();

        let Touch::Started(id) = first else {
            panic!("expected a fresh session, got {first:?}");
        };
        assert_eq!(second, Touch::Extended(id));
    }

    #[tokio::test]
    async fn window_slides_with_activity() {
        let kv = Arc::new(MemoryKvClient::new());
        let window = window(kv.clone());
        let project = Uuid::new_v4();

        let first = window.touch(project, UserId(1)).await.unwrap();

        // 20 minutes of silence keeps the window open, and touching it
        // pushes the deadline another full window out.
        kv.advance(Duration::from_secs(20 * 60));
        let second = window.touch(project, UserId(1)).await.unwrap();
        assert_eq!(second.session_id(), first.session_id());

        kv.advance(Duration::from_secs(25 * 60));
        assert!(window.is_open(project, UserId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn full_window_of_silence_ends_the_session() {
        let kv = Arc::new(MemoryKvClient::new());
        let window = window(kv.clone());
        let project = Uuid::new_v4();

        let first = window.touch(project, UserId(1)).await.unwrap();

        kv.advance(Duration::from_secs(31 * 60));
        assert!(!window.is_open(project, UserId(1)).await.unwrap());

        let next = window.touch(project, UserId(1)).await.unwrap();
        assert!(matches!(next, Touch::Started(_)));
        assert_ne!(next.session_id(), first.session_id());
    }

    #[tokio::test]
    async fn windows_are_scoped_per_user() {
        let kv = Arc::new(MemoryKvClient::new());
        let window = window(kv);
        let project = Uuid::new_v4();

        let a = window.touch(project, UserId(1)).await.unwrap();
        let b = window.touch(project, UserId(2)).await.unwrap();

        assert!(matches!(b, Touch::Started(_)));
        assert_ne!(a.session_id(), b.session_id());
    }

    #[tokio::test]
    async fn clear_closes_immediately() {
        let kv = Arc::new(MemoryKvClient::new());
        let window = window(kv);
        let project = Uuid::new_v4();

        window.touch(project, UserId(1)).await.unwrap();
        window.clear(project, UserId(1)).await.unwrap();

        assert!(!window.is_open(project, UserId(1)).await.unwrap());
    }
}
