use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use rand::RngCore;
use sqlx::postgres::{PgPool, PgPoolOptions};

use common_types::{IdentityMapping, Project, ProjectId, Salt, UserId};

use crate::{AppStore, StoreError};

/// The relational side: projects, identification maps, salts.
pub struct PgAppStore {
    pool: PgPool,
}

impl PgAppStore {
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Generate fresh salt material: 16 random bytes, base64.
pub fn new_salt_material() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::STANDARD.encode(bytes)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl AppStore for PgAppStore {
    async fn project_by_token(&self, token: &str) -> Result<Option<Project>, StoreError> {
        let project = sqlx::query_as::<_, Project>(
            r#"
SELECT id, name, token, domain, excluded_ips, created_at
FROM projects
WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn mapping_by_identifier(
        &self,
        project_id: ProjectId,
        identifier: &str,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        let mapping = sqlx::query_as::<_, IdentityMapping>(
            r#"
SELECT project_id, user_id, identifier, created_at
FROM identity_map
WHERE project_id = $1 AND identifier = $2
            "#,
        )
        .bind(project_id)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn mapping_by_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        let mapping = sqlx::query_as::<_, IdentityMapping>(
            r#"
SELECT project_id, user_id, identifier, created_at
FROM identity_map
WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(i64::from(user_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn create_mapping(&self, mapping: &IdentityMapping) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
INSERT INTO identity_map (project_id, user_id, identifier, created_at)
VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(mapping.project_id)
        .bind(i64::from(mapping.user_id))
        .bind(&mapping.identifier)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn latest_salts(&self, limit: i64) -> Result<Vec<Salt>, StoreError> {
        let salts = sqlx::query_as::<_, Salt>(
            r#"
SELECT id, salt, created_at
FROM salts
ORDER BY created_at DESC, id DESC
LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(salts)
    }

    async fn create_salt(&self, salt: &str) -> Result<Salt, StoreError> {
        let created = sqlx::query_as::<_, Salt>(
            r#"
INSERT INTO salts (salt, created_at)
VALUES ($1, NOW())
RETURNING id, salt, created_at
            "#,
        )
        .bind(salt)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn cleanup_salts(&self, keep: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
DELETE FROM salts
WHERE id NOT IN (
    SELECT id FROM salts ORDER BY created_at DESC, id DESC LIMIT $1
)
            "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
