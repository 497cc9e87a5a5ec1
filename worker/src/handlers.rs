use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use metrics::counter;
use tracing::{debug, info, instrument};

use common_identity::Fingerprint;
use common_queue::{Job, JobError, JobHandler};
use common_store::{new_salt_material, AnalyticsStore, AppStore, StoreError};
use common_types::jobs::{
    CreateUserJob, DeviceJob, EventJob, JobPayload, MergeJob, RotateSaltJob, SessionJob,
    UpdateUserJob,
};
use common_types::{Clock, UserRow};

use crate::merge;

/// One handler for every queue: decodes the payload and dispatches on kind.
/// Queue-level concurrency settings, not the handler, decide what may run
/// in parallel.
pub struct PipelineHandler {
    app: Arc<dyn AppStore>,
    analytics: Arc<dyn AnalyticsStore>,
    clock: Arc<dyn Clock>,
    /// Session window used by the merge engine when matching events to
    /// destination sessions. Must match the gateway's.
    session_window: Duration,
    /// How many salts to retain after a rotation.
    salt_keep: i64,
}

impl PipelineHandler {
    pub fn new(
        app: Arc<dyn AppStore>,
        analytics: Arc<dyn AnalyticsStore>,
        clock: Arc<dyn Clock>,
        session_window: Duration,
        salt_keep: i64,
    ) -> Self {
        Self {
            app,
            analytics,
            clock,
            session_window,
            salt_keep,
        }
    }

    async fn device(&self, job: DeviceJob) -> Result<(), StoreError> {
        let row = Fingerprint::parse(&job.user_agent).into_device_row(
            job.project_id,
            job.user_id,
            job.created_at,
        );
        if self.analytics.insert_device_if_absent(&row).await? {
            counter!("worker_devices_created_total").increment(1);
        }
        Ok(())
    }

    async fn session(&self, job: SessionJob) -> Result<(), StoreError> {
        match job {
            SessionJob::Start { session } => self.analytics.insert_session(&session).await,
            SessionJob::Extend {
                project_id,
                session_id,
                at,
            } => {
                // A stale window entry can outlive its session row; without
                // one there is nothing to extend.
                let Some(mut session) = self.analytics.latest_session(project_id, session_id).await?
                else {
                    debug!(%session_id, "extend for unknown session, skipping");
                    return Ok(());
                };
                if session.cover(at) {
                    self.analytics.insert_session(&session).await?;
                }
                Ok(())
            }
        }
    }

    async fn event(&self, job: EventJob) -> Result<(), StoreError> {
        self.analytics.insert_event(&job.event).await?;
        counter!("worker_events_ingested_total").increment(1);
        Ok(())
    }

    async fn create_user(&self, job: CreateUserJob) -> Result<(), StoreError> {
        // Redelivery and duplicate identifies collapse here.
        if self
            .analytics
            .user_by_id(job.project_id, job.user_id)
            .await?
            .is_some()
        {
            return Ok(());
        }
        self.analytics
            .insert_user(&UserRow {
                project_id: job.project_id,
                id: job.user_id,
                identifier: Some(job.identifier),
                display_name: job.display_name,
                attributes: job.attributes,
                created_at: self.clock.now(),
            })
            .await
    }

    async fn update_user(&self, job: UpdateUserJob) -> Result<(), StoreError> {
        let current = self.analytics.user_by_id(job.project_id, job.user_id).await?;

        let mut next = match current {
            Some(user) => user,
            // Anonymous users get a profile row on their first attribute
            // write; the identifier stays empty until they identify.
            None => UserRow {
                project_id: job.project_id,
                id: job.user_id,
                identifier: None,
                display_name: None,
                attributes: Default::default(),
                created_at: self.clock.now(),
            },
        };

        next.attributes.extend(job.attributes);
        if job.display_name.is_some() {
            next.display_name = job.display_name;
        }
        self.analytics.insert_user(&next).await
    }

    async fn merge_users(&self, job: MergeJob) -> Result<(), StoreError> {
        merge::merge_users(
            self.analytics.as_ref(),
            self.app.as_ref(),
            self.session_window,
            job.project_id,
            job.from_user_id,
            job.into_user_id,
        )
        .await?;
        counter!("worker_merges_total").increment(1);
        Ok(())
    }

    async fn rotate_salt(&self, job: RotateSaltJob) -> Result<(), StoreError> {
        let salt = self.app.create_salt(&new_salt_material()).await?;
        let pruned = self.app.cleanup_salts(self.salt_keep).await?;
        info!(date = job.date, salt = salt.id, pruned, "rotated salt");
        counter!("worker_salt_rotations_total").increment(1);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    #[instrument(skip_all, fields(queue = %job.queue, job = job.id))]
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: JobPayload = serde_json::from_value(job.payload.0.clone())
            .map_err(|e| JobError::Fatal(format!("undecodable payload: {e}")))?;

        let result = match payload {
            JobPayload::Device(j) => self.device(j).await,
            JobPayload::Session(j) => self.session(j).await,
            JobPayload::Event(j) => self.event(j).await,
            JobPayload::CreateUser(j) => self.create_user(j).await,
            JobPayload::UpdateUser(j) => self.update_user(j).await,
            JobPayload::MergeUsers(j) => self.merge_users(j).await,
            JobPayload::RotateSalt(j) => self.rotate_salt(j).await,
        };

        result.map_err(|e| JobError::Retryable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use common_store::{MemoryAnalyticsStore, MemoryAppStore};
    use common_types::{uuid_v7, FixedClock, SessionRow, UserId};

    fn at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, minute, 0).unwrap()
    }

    struct Fixture {
        app: Arc<MemoryAppStore>,
        analytics: Arc<MemoryAnalyticsStore>,
        handler: PipelineHandler,
        project_id: Uuid,
    }

    fn fixture() -> Fixture {
        let app = Arc::new(MemoryAppStore::new());
        let analytics = Arc::new(MemoryAnalyticsStore::new());
        let handler = PipelineHandler::new(
            app.clone(),
            analytics.clone(),
            Arc::new(FixedClock(at(0))),
            Duration::minutes(30),
            4,
        );
        Fixture {
            app,
            analytics,
            handler,
            project_id: Uuid::new_v4(),
        }
    }

    fn job(payload: &JobPayload) -> Job {
        Job {
            id: 1,
            queue: payload.queue().to_string(),
            attempt: 1,
            created_at: at(0),
            scheduled_at: at(0),
            started_at: None,
            payload: sqlx::types::Json(serde_json::to_value(payload).unwrap()),
        }
    }

    fn start(project_id: Uuid, user: UserId, minute: u32) -> SessionRow {
        SessionRow {
            id: uuid_v7(),
            project_id,
            user_id: user,
            started_at: at(minute),
            ended_at: at(minute),
            duration_secs: 0,
            identifier: None,
            display_name: None,
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_fatal() {
        let f = fixture();
        let mut bad = job(&JobPayload::RotateSalt(RotateSaltJob {
            date: "2026-03-14".to_string(),
        }));
        bad.payload = sqlx::types::Json(json!({"kind": "no_such_job"}));

        match f.handler.handle(&bad).await {
            Err(JobError::Fatal(_)) => {}
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_extend_only_writes_when_it_grows() {
        let f = fixture();
        let user = UserId(7);
        let session = start(f.project_id, user, 0);
        f.analytics.insert_session(&session).await.unwrap();

        let extend = |minute| {
            job(&JobPayload::Session(SessionJob::Extend {
                project_id: f.project_id,
                session_id: session.id,
                at: at(minute),
            }))
        };

        f.handler.handle(&extend(10)).await.unwrap();
        let latest = f
            .analytics
            .latest_session(f.project_id, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.ended_at, at(10));
        assert_eq!(latest.duration_secs, 600);

        // An out-of-order touch inside the covered span changes nothing.
        f.handler.handle(&extend(5)).await.unwrap();
        let latest = f
            .analytics
            .latest_session(f.project_id, session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.duration_secs, 600);
    }

    #[tokio::test]
    async fn session_extend_without_row_is_a_noop() {
        let f = fixture();
        let extend = job(&JobPayload::Session(SessionJob::Extend {
            project_id: f.project_id,
            session_id: uuid_v7(),
            at: at(10),
        }));

        f.handler.handle(&extend).await.unwrap();
        assert!(f
            .analytics
            .sessions_by_user(f.project_id, UserId(7))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn create_user_is_idempotent() {
        let f = fixture();
        let create = job(&JobPayload::CreateUser(CreateUserJob {
            project_id: f.project_id,
            user_id: UserId(9),
            identifier: "user@example.com".to_string(),
            display_name: Some("Sam".to_string()),
            attributes: HashMap::new(),
        }));

        f.handler.handle(&create).await.unwrap();
        f.handler.handle(&create).await.unwrap();

        let user = f
            .analytics
            .user_by_id(f.project_id, UserId(9))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.identifier.as_deref(), Some("user@example.com"));
        assert_eq!(user.display_name.as_deref(), Some("Sam"));
    }

    #[tokio::test]
    async fn update_user_merges_attributes_into_latest_snapshot() {
        let f = fixture();
        let user = UserId(9);
        f.analytics
            .insert_user(&UserRow {
                project_id: f.project_id,
                id: user,
                identifier: Some("user@example.com".to_string()),
                display_name: Some("Sam".to_string()),
                attributes: HashMap::from([("plan".to_string(), json!("free"))]),
                created_at: at(0),
            })
            .await
            .unwrap();

        let update = job(&JobPayload::UpdateUser(UpdateUserJob {
            project_id: f.project_id,
            user_id: user,
            display_name: None,
            attributes: HashMap::from([
                ("plan".to_string(), json!("paid")),
                ("seats".to_string(), json!(3)),
            ]),
        }));
        f.handler.handle(&update).await.unwrap();

        let latest = f
            .analytics
            .user_by_id(f.project_id, user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.attributes["plan"], json!("paid"));
        assert_eq!(latest.attributes["seats"], json!(3));
        // Absent fields never clobber what is already there.
        assert_eq!(latest.display_name.as_deref(), Some("Sam"));
        assert_eq!(latest.identifier.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn update_user_creates_anonymous_profile_when_missing() {
        let f = fixture();
        let update = job(&JobPayload::UpdateUser(UpdateUserJob {
            project_id: f.project_id,
            user_id: UserId(11),
            display_name: None,
            attributes: HashMap::from([("theme".to_string(), json!("dark"))]),
        }));
        f.handler.handle(&update).await.unwrap();

        let user = f
            .analytics
            .user_by_id(f.project_id, UserId(11))
            .await
            .unwrap()
            .unwrap();
        assert!(user.identifier.is_none());
        assert_eq!(user.attributes["theme"], json!("dark"));
    }

    #[tokio::test]
    async fn rotate_salt_creates_and_prunes() {
        let f = fixture();
        for _ in 0..5 {
            f.handler
                .handle(&job(&JobPayload::RotateSalt(RotateSaltJob {
                    date: "2026-03-14".to_string(),
                })))
                .await
                .unwrap();
        }

        let salts = f.app.latest_salts(10).await.unwrap();
        assert_eq!(salts.len(), 4);
    }

    #[tokio::test]
    async fn device_job_inserts_once_per_fingerprint() {
        let f = fixture();
        let device = job(&JobPayload::Device(DeviceJob {
            project_id: f.project_id,
            user_id: UserId(7),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/121.0.0.0 Safari/537.36"
                .to_string(),
            created_at: at(0),
        }));

        f.handler.handle(&device).await.unwrap();
        f.handler.handle(&device).await.unwrap();

        let devices = f
            .analytics
            .devices_by_user(f.project_id, UserId(7))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].os_name, "Windows");
    }
}
