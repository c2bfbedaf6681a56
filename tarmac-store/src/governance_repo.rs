use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tarmac_governor::{BookingLimit, GovernanceError, LimitRepository, OverrideRepository, OverrideRule};
use uuid::Uuid;

use crate::database::{describe, is_unique_violation, label};

fn storage(err: sqlx::Error) -> GovernanceError {
    GovernanceError::Storage(describe("governance", err))
}

pub struct PostgresLimitRepository {
    pool: PgPool,
}

impl PostgresLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LimitRepository for PostgresLimitRepository {
    async fn get(&self, id: Uuid) -> Result<Option<BookingLimit>, GovernanceError> {
        let row = sqlx::query_scalar::<_, Json<BookingLimit>>("SELECT document FROM booking_limits WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|Json(limit)| limit))
    }

    async fn list(&self) -> Result<Vec<BookingLimit>, GovernanceError> {
        let rows = sqlx::query_scalar::<_, Json<BookingLimit>>("SELECT document FROM booking_limits ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(|Json(limit)| limit).collect())
    }

    async fn insert(&self, limit: &BookingLimit) -> Result<(), GovernanceError> {
        sqlx::query(
            r#"
            INSERT INTO booking_limits (id, name, limit_type, period, is_active, version, document, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(limit.id)
        .bind(&limit.name)
        .bind(label(&limit.limit_type))
        .bind(label(&limit.period))
        .bind(limit.is_active)
        .bind(limit.version)
        .bind(Json(limit))
        .bind(limit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                GovernanceError::Invalid(format!("limit {} already exists", limit.id))
            } else {
                storage(err)
            }
        })?;
        Ok(())
    }

    async fn save(&self, limit: &BookingLimit) -> Result<BookingLimit, GovernanceError> {
        let mut saved = limit.clone();
        saved.version += 1;

        let result = sqlx::query(
            r#"
            UPDATE booking_limits
            SET document = $1, is_active = $2, version = $3, updated_at = $4
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(Json(&saved))
        .bind(saved.is_active)
        .bind(saved.version)
        .bind(saved.updated_at)
        .bind(limit.id)
        .bind(limit.version)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 1 {
            return Ok(saved);
        }

        let actual = sqlx::query_scalar::<_, i64>("SELECT version FROM booking_limits WHERE id = $1")
            .bind(limit.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Err(match actual {
            Some(actual) => GovernanceError::VersionConflict {
                limit_id: limit.id,
                expected: limit.version,
                actual,
            },
            None => GovernanceError::LimitNotFound(limit.id),
        })
    }
}

pub struct PostgresOverrideRepository {
    pool: PgPool,
}

impl PostgresOverrideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideRepository for PostgresOverrideRepository {
    async fn get(&self, id: Uuid) -> Result<Option<OverrideRule>, GovernanceError> {
        let row = sqlx::query_scalar::<_, Json<OverrideRule>>("SELECT document FROM override_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|Json(rule)| rule))
    }

    async fn list(&self) -> Result<Vec<OverrideRule>, GovernanceError> {
        let rows =
            sqlx::query_scalar::<_, Json<OverrideRule>>("SELECT document FROM override_rules ORDER BY requested_at")
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;
        Ok(rows.into_iter().map(|Json(rule)| rule).collect())
    }

    async fn put(&self, rule: &OverrideRule) -> Result<(), GovernanceError> {
        sqlx::query(
            r#"
            INSERT INTO override_rules (id, status, requested_by, requested_at, valid_until, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, valid_until = EXCLUDED.valid_until, document = EXCLUDED.document
            "#,
        )
        .bind(rule.id)
        .bind(label(&rule.status))
        .bind(&rule.requested_by)
        .bind(rule.requested_at)
        .bind(rule.valid_until)
        .bind(Json(rule))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
