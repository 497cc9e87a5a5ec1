use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use common_types::{
    DeviceRow, EventRow, IdentityMapping, Project, ProjectId, Salt, SessionRow, UserId, UserRow,
};

use crate::{AnalyticsStore, AppStore, StoreError};

/// In-memory app store for tests and local runs.
pub struct MemoryAppStore {
    inner: Mutex<AppInner>,
}

#[derive(Default)]
struct AppInner {
    projects: Vec<Project>,
    mappings: Vec<IdentityMapping>,
    salts: Vec<Salt>,
    next_salt_id: i64,
}

impl MemoryAppStore {
    pub fn new() -> Self {
        MemoryAppStore {
            inner: Mutex::new(AppInner {
                next_salt_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn add_project(&self, project: Project) {
        self.lock().projects.push(project);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryAppStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppStore for MemoryAppStore {
    async fn project_by_token(&self, token: &str) -> Result<Option<Project>, StoreError> {
        Ok(self
            .lock()
            .projects
            .iter()
            .find(|p| p.token == token)
            .cloned())
    }

    async fn mapping_by_identifier(
        &self,
        project_id: ProjectId,
        identifier: &str,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        Ok(self
            .lock()
            .mappings
            .iter()
            .find(|m| m.project_id == project_id && m.identifier == identifier)
            .cloned())
    }

    async fn mapping_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        Ok(self
            .lock()
            .mappings
            .iter()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .cloned())
    }

    async fn create_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let taken = inner.mappings.iter().any(|m| {
            m.project_id == mapping.project_id
                && (m.identifier == mapping.identifier || m.user_id == mapping.user_id)
        });
        if taken {
            return Err(StoreError::AlreadyExists);
        }
        inner.mappings.push(mapping.clone());
        Ok(())
    }

    async fn latest_salts(&self, limit: i64) -> Result<Vec<Salt>, StoreError> {
        let inner = self.lock();
        let mut salts = inner.salts.clone();
        salts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        salts.truncate(limit as usize);
        Ok(salts)
    }

    async fn create_salt(&self, salt: &str) -> Result<Salt, StoreError> {
        let mut inner = self.lock();
        let id = inner.next_salt_id;
        inner.next_salt_id += 1;
        let created = Salt {
            id,
            salt: salt.to_owned(),
            created_at: Utc::now(),
        };
        inner.salts.push(created.clone());
        Ok(created)
    }

    async fn cleanup_salts(&self, keep: i64) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut salts = inner.salts.clone();
        salts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let keep_ids: Vec<i64> = salts.iter().take(keep as usize).map(|s| s.id).collect();
        let before = inner.salts.len();
        inner.salts.retain(|s| keep_ids.contains(&s.id));
        Ok((before - inner.salts.len()) as u64)
    }
}

/// In-memory analytical store with the append-only, latest-version-wins
/// semantics of the real backend: every insert appends, reads resolve the
/// most recently inserted row per id, deletes drop every version.
pub struct MemoryAnalyticsStore {
    inner: Mutex<AnalyticsInner>,
}

#[derive(Default)]
struct AnalyticsInner {
    events: Vec<EventRow>,
    sessions: Vec<SessionRow>,
    devices: Vec<DeviceRow>,
    users: Vec<UserRow>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        MemoryAnalyticsStore {
            inner: Mutex::new(AnalyticsInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnalyticsInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryAnalyticsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest version per id, preserving first-seen order of ids.
fn latest_by_id<T: Clone, K: PartialEq>(rows: &[T], key: impl Fn(&T) -> K) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for row in rows {
        if let Some(existing) = out.iter_mut().find(|r| key(r) == key(row)) {
            *existing = row.clone();
        } else {
            out.push(row.clone());
        }
    }
    out
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn insert_event(&self, event: &EventRow) -> Result<(), StoreError> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    async fn insert_events(&self, events: &[EventRow]) -> Result<(), StoreError> {
        self.lock().events.extend_from_slice(events);
        Ok(())
    }

    async fn events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<EventRow>, StoreError> {
        let inner = self.lock();
        let latest = latest_by_id(&inner.events, |e| e.id);
        Ok(latest
            .into_iter()
            .filter(|e| e.project_id == project_id && e.user_id == user_id)
            .collect())
    }

    async fn delete_events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        self.lock()
            .events
            .retain(|e| !(e.project_id == project_id && e.user_id == user_id));
        Ok(())
    }

    async fn insert_session(&self, session: &SessionRow) -> Result<(), StoreError> {
        self.lock().sessions.push(session.clone());
        Ok(())
    }

    async fn insert_sessions(&self, sessions: &[SessionRow]) -> Result<(), StoreError> {
        self.lock().sessions.extend_from_slice(sessions);
        Ok(())
    }

    async fn latest_session(
        &self,
        project_id: ProjectId,
        session_id: Uuid,
    ) -> Result<Option<SessionRow>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .sessions
            .iter()
            .rev()
            .find(|s| s.project_id == project_id && s.id == session_id)
            .cloned())
    }

    async fn sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let inner = self.lock();
        let latest = latest_by_id(&inner.sessions, |s| s.id);
        Ok(latest
            .into_iter()
            .filter(|s| s.project_id == project_id && s.user_id == user_id)
            .collect())
    }

    async fn sessions_in_range(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let inner = self.lock();
        let latest = latest_by_id(&inner.sessions, |s| s.id);
        Ok(latest
            .into_iter()
            .filter(|s| {
                s.project_id == project_id
                    && s.user_id == user_id
                    && s.started_at <= to
                    && s.ended_at >= from
            })
            .collect())
    }

    async fn delete_sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        self.lock()
            .sessions
            .retain(|s| !(s.project_id == project_id && s.user_id == user_id));
        Ok(())
    }

    async fn insert_device_if_absent(&self, device: &DeviceRow) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let exists = inner
            .devices
            .iter()
            .any(|d| d.project_id == device.project_id && d.id == device.id);
        if exists {
            return Ok(false);
        }
        inner.devices.push(device.clone());
        Ok(true)
    }

    async fn devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<DeviceRow>, StoreError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| d.project_id == project_id && d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        self.lock()
            .devices
            .retain(|d| !(d.project_id == project_id && d.user_id == user_id));
        Ok(())
    }

    async fn user_by_id(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<UserRow>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .users
            .iter()
            .rev()
            .find(|u| u.project_id == project_id && u.id == user_id)
            .cloned())
    }

    async fn insert_user(&self, user: &UserRow) -> Result<(), StoreError> {
        self.lock().users.push(user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn session(project: ProjectId, user: UserId, id: Uuid, secs: i64) -> SessionRow {
        let started = Utc::now();
        SessionRow {
            id,
            project_id: project,
            user_id: user,
            started_at: started,
            ended_at: started + chrono::Duration::seconds(secs),
            duration_secs: secs,
            identifier: None,
            display_name: None,
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
        }
    }

    #[tokio::test]
    async fn latest_session_snapshot_wins() {
        let store = MemoryAnalyticsStore::new();
        let project = Uuid::new_v4();
        let user = UserId(7);
        let id = Uuid::now_v7();

        store
            .insert_session(&session(project, user, id, 10))
            .await
            .unwrap();
        store
            .insert_session(&session(project, user, id, 120))
            .await
            .unwrap();

        let latest = store.latest_session(project, id).await.unwrap().unwrap();
        assert_eq!(latest.duration_secs, 120);

        // One logical session, not two.
        let sessions = store.sessions_by_user(project, user).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn mapping_unique_on_both_keys() {
        let store = MemoryAppStore::new();
        let project = Uuid::new_v4();
        let mapping = IdentityMapping {
            project_id: project,
            user_id: UserId(1),
            identifier: "cust-42".to_string(),
            created_at: Utc::now(),
        };
        store.create_mapping(&mapping).await.unwrap();

        // Same identifier, different user.
        let dup_identifier = IdentityMapping {
            user_id: UserId(2),
            ..mapping.clone()
        };
        assert!(matches!(
            store.create_mapping(&dup_identifier).await,
            Err(StoreError::AlreadyExists)
        ));

        // Same user, different identifier.
        let dup_user = IdentityMapping {
            identifier: "cust-43".to_string(),
            ..mapping
        };
        assert!(matches!(
            store.create_mapping(&dup_user).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn user_profile_is_latest_version() {
        let store = MemoryAnalyticsStore::new();
        let project = Uuid::new_v4();
        let user = UserId(9);

        let mut row = UserRow {
            project_id: project,
            id: user,
            identifier: Some("cust-42".to_string()),
            display_name: None,
            attributes: HashMap::new(),
            created_at: Utc::now(),
        };
        store.insert_user(&row).await.unwrap();

        row.display_name = Some("Ada".to_string());
        store.insert_user(&row).await.unwrap();

        let read = store.user_by_id(project, user).await.unwrap().unwrap();
        assert_eq!(read.display_name.as_deref(), Some("Ada"));
    }
}
