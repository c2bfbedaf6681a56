use async_trait::async_trait;
use std::collections::HashMap;
use tarmac_core::{CoreError, CoreResult};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Booking;

/// Booking storage. The whole aggregate is written at once; `save` is a
/// compare-and-set on `version` so concurrent lifecycle calls on one
/// booking cannot both apply.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn find_by_reference(&self, client_reference: &str) -> CoreResult<Option<Booking>>;

    async fn find_by_refund(&self, refund_id: Uuid) -> CoreResult<Option<Booking>>;

    async fn list(&self, limit: usize) -> CoreResult<Vec<Booking>>;

    async fn insert(&self, booking: &Booking) -> CoreResult<()>;

    async fn save(&self, booking: &Booking) -> CoreResult<Booking>;
}

pub fn version_conflict(booking: &Booking, actual: i64) -> CoreError {
    CoreError::StateConflict {
        entity: format!("booking {}", booking.id),
        from: format!("version {}", booking.version),
        to: format!("version {}", actual),
    }
}

#[derive(Default)]
pub struct MemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, client_reference: &str) -> CoreResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .find(|b| b.client_reference == client_reference)
            .cloned())
    }

    async fn find_by_refund(&self, refund_id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .find(|b| b.refunds.iter().any(|r| r.id == refund_id))
            .cloned())
    }

    async fn list(&self, limit: usize) -> CoreResult<Vec<Booking>> {
        let mut bookings: Vec<_> = self.bookings.read().await.values().cloned().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings.truncate(limit);
        Ok(bookings)
    }

    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        let mut bookings = self.bookings.write().await;
        if bookings
            .values()
            .any(|b| b.id == booking.id || b.client_reference == booking.client_reference)
        {
            return Err(CoreError::StateConflict {
                entity: format!("booking {}", booking.client_reference),
                from: "existing".into(),
                to: "new".into(),
            });
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn save(&self, booking: &Booking) -> CoreResult<Booking> {
        let mut bookings = self.bookings.write().await;
        let stored = bookings
            .get_mut(&booking.id)
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", booking.id)))?;
        if stored.version != booking.version {
            return Err(version_conflict(booking, stored.version));
        }
        let mut saved = booking.clone();
        saved.version += 1;
        *stored = saved.clone();
        Ok(saved)
    }
}
