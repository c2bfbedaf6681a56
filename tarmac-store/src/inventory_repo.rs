use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::PgPool;
use tarmac_catalog::{FlightInventory, InventoryError, InventoryRepository};
use tarmac_core::FlightDateKey;

use crate::database::{describe, is_unique_violation};

/// Inventory rows as JSON documents, compare-and-set on `version`.
pub struct PostgresInventoryRepository {
    pool: PgPool,
}

impl PostgresInventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> InventoryError {
    InventoryError::Storage(describe("flight_inventory", err))
}

#[async_trait]
impl InventoryRepository for PostgresInventoryRepository {
    async fn get(&self, key: &FlightDateKey) -> Result<Option<FlightInventory>, InventoryError> {
        let row = sqlx::query_scalar::<_, Json<FlightInventory>>(
            "SELECT document FROM flight_inventory WHERE flight_number = $1 AND departure_date = $2",
        )
        .bind(&key.flight_number)
        .bind(key.departure_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.map(|Json(inventory)| inventory))
    }

    async fn find_by_route(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<FlightInventory>, InventoryError> {
        let rows = sqlx::query_scalar::<_, Json<FlightInventory>>(
            r#"
            SELECT document FROM flight_inventory
            WHERE origin = $1 AND destination = $2 AND departure_date = $3
            ORDER BY departure_time, flight_number
            "#,
        )
        .bind(origin.to_ascii_uppercase())
        .bind(destination.to_ascii_uppercase())
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.into_iter().map(|Json(inventory)| inventory).collect())
    }

    async fn list_with_holds(&self) -> Result<Vec<FlightInventory>, InventoryError> {
        let rows = sqlx::query_scalar::<_, Json<FlightInventory>>(
            "SELECT document FROM flight_inventory WHERE document->'holds' <> '{}'::jsonb",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.into_iter().map(|Json(inventory)| inventory).collect())
    }

    async fn insert(&self, inventory: &FlightInventory) -> Result<(), InventoryError> {
        sqlx::query(
            r#"
            INSERT INTO flight_inventory
                (id, flight_number, departure_date, origin, destination, departure_time,
                 status, available_seats, version, document, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(inventory.id)
        .bind(&inventory.key.flight_number)
        .bind(inventory.key.departure_date)
        .bind(&inventory.origin)
        .bind(&inventory.destination)
        .bind(inventory.departure_time)
        .bind(inventory.status.as_str())
        .bind(inventory.available_seats)
        .bind(inventory.version)
        .bind(Json(inventory))
        .bind(inventory.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                InventoryError::AlreadyExists(inventory.key.to_string())
            } else {
                storage(err)
            }
        })?;
        Ok(())
    }

    async fn save(&self, inventory: &FlightInventory) -> Result<FlightInventory, InventoryError> {
        let mut saved = inventory.clone();
        saved.version += 1;

        let result = sqlx::query(
            r#"
            UPDATE flight_inventory
            SET document = $1, status = $2, available_seats = $3, version = $4, updated_at = $5
            WHERE flight_number = $6 AND departure_date = $7 AND version = $8
            "#,
        )
        .bind(Json(&saved))
        .bind(saved.status.as_str())
        .bind(saved.available_seats)
        .bind(saved.version)
        .bind(saved.updated_at)
        .bind(&inventory.key.flight_number)
        .bind(inventory.key.departure_date)
        .bind(inventory.version)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 1 {
            return Ok(saved);
        }

        let actual = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM flight_inventory WHERE flight_number = $1 AND departure_date = $2",
        )
        .bind(&inventory.key.flight_number)
        .bind(inventory.key.departure_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        Err(match actual {
            Some(actual) => InventoryError::VersionConflict {
                key: inventory.key.to_string(),
                expected: inventory.version,
                actual,
            },
            None => InventoryError::NotFound(inventory.key.to_string()),
        })
    }
}
