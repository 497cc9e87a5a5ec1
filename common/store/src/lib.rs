//! Contracts for the two durable stores the pipeline writes to.
//!
//! The app store is the strongly consistent relational side: projects,
//! identification maps, salts. The analytical store is append-and-query:
//! events, sessions, devices, users, where "updating" a row means inserting
//! a newer version and reads take the most recent one. The production
//! analytical backend is an external system; the in-memory implementation
//! here mirrors its semantics for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use common_types::{
    DeviceRow, EventRow, IdentityMapping, Project, ProjectId, Salt, SessionRow, UserId, UserRow,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AppStore: Send + Sync {
    async fn project_by_token(&self, token: &str) -> Result<Option<Project>, StoreError>;

    async fn mapping_by_identifier(
        &self,
        project_id: ProjectId,
        identifier: &str,
    ) -> Result<Option<IdentityMapping>, StoreError>;

    async fn mapping_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<IdentityMapping>, StoreError>;

    /// Insert a new mapping; `AlreadyExists` when either unique key is
    /// already taken.
    async fn create_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError>;

    /// Salts, newest first. The resolver only ever uses the first two.
    async fn latest_salts(&self, limit: i64) -> Result<Vec<Salt>, StoreError>;

    async fn create_salt(&self, salt: &str) -> Result<Salt, StoreError>;

    /// Delete all but the `keep` most recent salts, returning how many went.
    async fn cleanup_salts(&self, keep: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn insert_event(&self, event: &EventRow) -> Result<(), StoreError>;
    async fn insert_events(&self, events: &[EventRow]) -> Result<(), StoreError>;
    /// All events for a user, most recent version per event id.
    async fn events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<EventRow>, StoreError>;
    async fn delete_events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError>;

    /// Append a session snapshot. Never updates in place.
    async fn insert_session(&self, session: &SessionRow) -> Result<(), StoreError>;
    async fn insert_sessions(&self, sessions: &[SessionRow]) -> Result<(), StoreError>;
    /// The authoritative (most recently inserted) snapshot for a session id.
    async fn latest_session(
        &self,
        project_id: ProjectId,
        session_id: Uuid,
    ) -> Result<Option<SessionRow>, StoreError>;
    /// Latest snapshot per session id belonging to a user.
    async fn sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<SessionRow>, StoreError>;
    /// Latest snapshot per session id whose [started_at, ended_at] interval
    /// intersects [from, to].
    async fn sessions_in_range(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError>;
    async fn delete_sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError>;

    /// Insert unless a device with this id already exists; returns whether
    /// a row was written.
    async fn insert_device_if_absent(&self, device: &DeviceRow) -> Result<bool, StoreError>;
    async fn devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<DeviceRow>, StoreError>;
    async fn delete_devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError>;

    /// Latest profile snapshot for a user id.
    async fn user_by_id(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<UserRow>, StoreError>;
    async fn insert_user(&self, user: &UserRow) -> Result<(), StoreError>;
}

mod analytics_pg;
mod app_pg;
mod memory;

pub use analytics_pg::PgAnalyticsStore;
pub use app_pg::{new_salt_material, PgAppStore};
pub use memory::{MemoryAnalyticsStore, MemoryAppStore};
