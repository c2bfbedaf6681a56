use async_trait::async_trait;
use serde_json::json;
use sqlx::types::Json;
use sqlx::PgPool;
use tarmac_core::{CoreError, CoreResult};
use tarmac_order::{Booking, BookingRepository};
use uuid::Uuid;

use crate::database::{describe, is_unique_violation};

pub struct PostgresBookingRepository {
    pool: PgPool,
}

impl PostgresBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> CoreError {
    CoreError::Storage(describe("bookings", err))
}

fn pnr(booking: &Booking) -> Option<&str> {
    booking.pnr.as_ref().map(|p| p.locator.as_str())
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_scalar::<_, Json<Booking>>("SELECT document FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|Json(booking)| booking))
    }

    async fn find_by_reference(&self, client_reference: &str) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_scalar::<_, Json<Booking>>("SELECT document FROM bookings WHERE client_reference = $1")
            .bind(client_reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.map(|Json(booking)| booking))
    }

    async fn find_by_refund(&self, refund_id: Uuid) -> CoreResult<Option<Booking>> {
        let needle = json!([{ "id": refund_id }]);
        let row = sqlx::query_scalar::<_, Json<Booking>>(
            "SELECT document FROM bookings WHERE document -> 'refunds' @> $1 LIMIT 1",
        )
        .bind(needle)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.map(|Json(booking)| booking))
    }

    async fn list(&self, limit: usize) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_scalar::<_, Json<Booking>>(
            "SELECT document FROM bookings ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.into_iter().map(|Json(booking)| booking).collect())
    }

    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings
                (id, client_reference, agent_id, status, pnr, total_amount, currency,
                 version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.client_reference)
        .bind(&booking.agent_id)
        .bind(booking.status.as_str())
        .bind(pnr(booking))
        .bind(booking.total_amount.to_string())
        .bind(&booking.currency)
        .bind(booking.version)
        .bind(Json(booking))
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                CoreError::StateConflict {
                    entity: format!("booking {}", booking.client_reference),
                    from: "existing".into(),
                    to: "new".into(),
                }
            } else {
                storage(err)
            }
        })?;
        Ok(())
    }

    async fn save(&self, booking: &Booking) -> CoreResult<Booking> {
        let mut saved = booking.clone();
        saved.version += 1;

        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET document = $1, status = $2, pnr = $3, version = $4, updated_at = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(Json(&saved))
        .bind(saved.status.as_str())
        .bind(pnr(&saved))
        .bind(saved.version)
        .bind(saved.updated_at)
        .bind(booking.id)
        .bind(booking.version)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 1 {
            return Ok(saved);
        }

        let actual = sqlx::query_scalar::<_, i64>("SELECT version FROM bookings WHERE id = $1")
            .bind(booking.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Err(match actual {
            Some(actual) => tarmac_order::repository::version_conflict(booking, actual),
            None => CoreError::NotFound(format!("booking {}", booking.id)),
        })
    }
}
