use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tarmac_core::FlightDateKey;
use tokio::sync::RwLock;

use crate::inventory::{FlightInventory, InventoryError};

/// Storage for flight-date inventory rows.
///
/// `save` is a compare-and-set on `version`: it succeeds only when the
/// stored row still carries the version the caller loaded, and returns the
/// row as stored with the version bumped.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn get(&self, key: &FlightDateKey) -> Result<Option<FlightInventory>, InventoryError>;

    async fn find_by_route(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<FlightInventory>, InventoryError>;

    /// Flights carrying at least one soft hold.
    async fn list_with_holds(&self) -> Result<Vec<FlightInventory>, InventoryError>;

    async fn insert(&self, inventory: &FlightInventory) -> Result<(), InventoryError>;

    async fn save(&self, inventory: &FlightInventory) -> Result<FlightInventory, InventoryError>;
}

#[derive(Default)]
pub struct MemoryInventoryRepository {
    rows: RwLock<HashMap<FlightDateKey, FlightInventory>>,
}

impl MemoryInventoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryRepository for MemoryInventoryRepository {
    async fn get(&self, key: &FlightDateKey) -> Result<Option<FlightInventory>, InventoryError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn find_by_route(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<FlightInventory>, InventoryError> {
        let rows = self.rows.read().await;
        let mut found: Vec<FlightInventory> = rows
            .values()
            .filter(|inv| {
                inv.key.departure_date == date
                    && inv.origin.eq_ignore_ascii_case(origin)
                    && inv.destination.eq_ignore_ascii_case(destination)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.departure_time.cmp(&b.departure_time).then_with(|| a.key.cmp(&b.key)));
        Ok(found)
    }

    async fn list_with_holds(&self) -> Result<Vec<FlightInventory>, InventoryError> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|inv| !inv.holds.is_empty()).cloned().collect())
    }

    async fn insert(&self, inventory: &FlightInventory) -> Result<(), InventoryError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&inventory.key) {
            return Err(InventoryError::AlreadyExists(inventory.key.to_string()));
        }
        rows.insert(inventory.key.clone(), inventory.clone());
        Ok(())
    }

    async fn save(&self, inventory: &FlightInventory) -> Result<FlightInventory, InventoryError> {
        let mut rows = self.rows.write().await;
        let stored = rows
            .get_mut(&inventory.key)
            .ok_or_else(|| InventoryError::NotFound(inventory.key.to_string()))?;

        if stored.version != inventory.version {
            return Err(InventoryError::VersionConflict {
                key: inventory.key.to_string(),
                expected: inventory.version,
                actual: stored.version,
            });
        }

        let mut next = inventory.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}
