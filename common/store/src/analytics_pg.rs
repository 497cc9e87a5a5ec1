use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use common_types::{DeviceRow, EventRow, ProjectId, SessionRow, UserId, UserRow};

use crate::{AnalyticsStore, StoreError};

/// The append-and-query side on Postgres. Rows are never updated: each
/// write appends a new version and reads take the highest `seq` per id.
pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PgEvent {
    id: Uuid,
    project_id: Uuid,
    user_id: i64,
    session_id: Uuid,
    device_id: String,
    name: String,
    created_at: DateTime<Utc>,
    identifier: Option<String>,
    display_name: Option<String>,
    attributes: Json<HashMap<String, Value>>,
}

impl From<PgEvent> for EventRow {
    fn from(r: PgEvent) -> Self {
        EventRow {
            id: r.id,
            project_id: r.project_id,
            user_id: UserId(r.user_id as u64),
            session_id: r.session_id,
            device_id: r.device_id,
            name: r.name,
            created_at: r.created_at,
            identifier: r.identifier,
            display_name: r.display_name,
            attributes: r.attributes.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PgSession {
    id: Uuid,
    project_id: Uuid,
    user_id: i64,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_secs: i64,
    identifier: Option<String>,
    display_name: Option<String>,
    referrer: Option<String>,
    utm_source: Option<String>,
    utm_medium: Option<String>,
    utm_campaign: Option<String>,
}

impl From<PgSession> for SessionRow {
    fn from(r: PgSession) -> Self {
        SessionRow {
            id: r.id,
            project_id: r.project_id,
            user_id: UserId(r.user_id as u64),
            started_at: r.started_at,
            ended_at: r.ended_at,
            duration_secs: r.duration_secs,
            identifier: r.identifier,
            display_name: r.display_name,
            referrer: r.referrer,
            utm_source: r.utm_source,
            utm_medium: r.utm_medium,
            utm_campaign: r.utm_campaign,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PgDevice {
    project_id: Uuid,
    user_id: i64,
    id: String,
    os_name: String,
    os_version: String,
    client_name: String,
    client_version: String,
    client_type: String,
    device_type: String,
    created_at: DateTime<Utc>,
}

impl From<PgDevice> for DeviceRow {
    fn from(r: PgDevice) -> Self {
        DeviceRow {
            project_id: r.project_id,
            user_id: UserId(r.user_id as u64),
            id: r.id,
            os_name: r.os_name,
            os_version: r.os_version,
            client_name: r.client_name,
            client_version: r.client_version,
            client_type: r.client_type,
            device_type: r.device_type,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PgUser {
    project_id: Uuid,
    id: i64,
    identifier: Option<String>,
    display_name: Option<String>,
    attributes: Json<HashMap<String, Value>>,
    created_at: DateTime<Utc>,
}

impl From<PgUser> for UserRow {
    fn from(r: PgUser) -> Self {
        UserRow {
            project_id: r.project_id,
            id: UserId(r.id as u64),
            identifier: r.identifier,
            display_name: r.display_name,
            attributes: r.attributes.0,
            created_at: r.created_at,
        }
    }
}

async fn insert_event_with<'e, E>(executor: E, event: &EventRow) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
INSERT INTO events
    (id, project_id, user_id, session_id, device_id, name, created_at,
     identifier, display_name, attributes)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.id)
    .bind(event.project_id)
    .bind(i64::from(event.user_id))
    .bind(event.session_id)
    .bind(&event.device_id)
    .bind(&event.name)
    .bind(event.created_at)
    .bind(&event.identifier)
    .bind(&event.display_name)
    .bind(Json(&event.attributes))
    .execute(executor)
    .await?;

    Ok(())
}

async fn insert_session_with<'e, E>(executor: E, session: &SessionRow) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
INSERT INTO sessions
    (id, project_id, user_id, started_at, ended_at, duration_secs,
     identifier, display_name, referrer, utm_source, utm_medium, utm_campaign)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(session.id)
    .bind(session.project_id)
    .bind(i64::from(session.user_id))
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(session.duration_secs)
    .bind(&session.identifier)
    .bind(&session.display_name)
    .bind(&session.referrer)
    .bind(&session.utm_source)
    .bind(&session.utm_medium)
    .bind(&session.utm_campaign)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    async fn insert_event(&self, event: &EventRow) -> Result<(), StoreError> {
        insert_event_with(&self.pool, event).await?;
        Ok(())
    }

    async fn insert_events(&self, events: &[EventRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            insert_event_with(&mut *tx, event).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<EventRow>, StoreError> {
        let rows = sqlx::query_as::<_, PgEvent>(
            r#"
SELECT DISTINCT ON (id)
    id, project_id, user_id, session_id, device_id, name, created_at,
    identifier, display_name, attributes
FROM events
WHERE project_id = $1 AND user_id = $2
ORDER BY id, seq DESC
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_events_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM events WHERE project_id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(i64::from(user_id))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_session(&self, session: &SessionRow) -> Result<(), StoreError> {
        insert_session_with(&self.pool, session).await?;
        Ok(())
    }

    async fn insert_sessions(&self, sessions: &[SessionRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for session in sessions {
            insert_session_with(&mut *tx, session).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn latest_session(
        &self,
        project_id: ProjectId,
        session_id: Uuid,
    ) -> Result<Option<SessionRow>, StoreError> {
        let row = sqlx::query_as::<_, PgSession>(
            r#"
SELECT id, project_id, user_id, started_at, ended_at, duration_secs,
       identifier, display_name, referrer, utm_source, utm_medium, utm_campaign
FROM sessions
WHERE project_id = $1 AND id = $2
ORDER BY seq DESC
LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let rows = sqlx::query_as::<_, PgSession>(
            r#"
SELECT DISTINCT ON (id)
    id, project_id, user_id, started_at, ended_at, duration_secs,
    identifier, display_name, referrer, utm_source, utm_medium, utm_campaign
FROM sessions
WHERE project_id = $1 AND user_id = $2
ORDER BY id, seq DESC
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn sessions_in_range(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        // Range-filter on the latest snapshot per id, not on any snapshot.
        let rows = sqlx::query_as::<_, PgSession>(
            r#"
SELECT * FROM (
    SELECT DISTINCT ON (id)
        id, project_id, user_id, started_at, ended_at, duration_secs,
        identifier, display_name, referrer, utm_source, utm_medium, utm_campaign
    FROM sessions
    WHERE project_id = $1 AND user_id = $2
    ORDER BY id, seq DESC
) latest
WHERE latest.started_at <= $4 AND latest.ended_at >= $3
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_sessions_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE project_id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(i64::from(user_id))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_device_if_absent(&self, device: &DeviceRow) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
INSERT INTO devices
    (project_id, user_id, id, os_name, os_version, client_name,
     client_version, client_type, device_type, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT (project_id, id) DO NOTHING
            "#,
        )
        .bind(device.project_id)
        .bind(i64::from(device.user_id))
        .bind(&device.id)
        .bind(&device.os_name)
        .bind(&device.os_version)
        .bind(&device.client_name)
        .bind(&device.client_version)
        .bind(&device.client_type)
        .bind(&device.device_type)
        .bind(device.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<DeviceRow>, StoreError> {
        let rows = sqlx::query_as::<_, PgDevice>(
            r#"
SELECT project_id, user_id, id, os_name, os_version, client_name,
       client_version, client_type, device_type, created_at
FROM devices
WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_devices_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM devices WHERE project_id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(i64::from(user_id))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn user_by_id(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, PgUser>(
            r#"
SELECT project_id, id, identifier, display_name, attributes, created_at
FROM users
WHERE project_id = $1 AND id = $2
ORDER BY seq DESC
LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_user(&self, user: &UserRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO users (project_id, id, identifier, display_name, attributes, created_at)
VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.project_id)
        .bind(i64::from(user.id))
        .bind(&user.identifier)
        .bind(&user.display_name)
        .bind(Json(&user.attributes))
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
