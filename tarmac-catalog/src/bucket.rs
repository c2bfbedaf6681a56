use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tarmac_core::CabinClass;
use tarmac_shared::money::percentage;

use crate::inventory::InventoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    Open,
    Limited,
    Waitlist,
    Closed,
}

/// Booking-class sub-allocation of a flight-date with its own price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBucket {
    pub booking_class: String,
    pub cabin: CabinClass,
    pub total_seats: i32,
    pub available_seats: i32,
    pub booked_seats: i32,
    /// Seats under soft holds, still counted in `available_seats`.
    #[serde(default)]
    pub held_seats: i32,
    #[serde(default)]
    pub waitlist_seats: i32,
    pub current_fare: Decimal,
    pub currency: String,
    pub status: BucketStatus,
    /// Closed by revenue management regardless of counts.
    #[serde(default)]
    pub manually_closed: bool,
    pub target_load_factor: Decimal,
    #[serde(default)]
    pub current_load_factor: Decimal,
    #[serde(default)]
    pub revenue_generated: Decimal,
}

impl FareBucket {
    pub fn new(
        booking_class: impl Into<String>,
        cabin: CabinClass,
        total_seats: i32,
        current_fare: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let mut bucket = Self {
            booking_class: booking_class.into().to_ascii_uppercase(),
            cabin,
            total_seats,
            available_seats: total_seats,
            booked_seats: 0,
            held_seats: 0,
            waitlist_seats: 0,
            current_fare,
            currency: currency.into(),
            status: BucketStatus::Open,
            manually_closed: false,
            target_load_factor: Decimal::new(85, 0),
            current_load_factor: Decimal::ZERO,
            revenue_generated: Decimal::ZERO,
        };
        bucket.refresh(0);
        bucket
    }

    /// Seats a new request may take.
    pub fn sellable(&self) -> i32 {
        self.available_seats - self.held_seats
    }

    pub fn is_open(&self) -> bool {
        !self.manually_closed && self.status != BucketStatus::Closed && self.status != BucketStatus::Waitlist
    }

    pub(crate) fn ensure_sellable(&self, flight: &str, seats: i32) -> Result<(), InventoryError> {
        if !self.is_open() {
            return Err(InventoryError::Unavailable {
                flight: flight.to_string(),
                requested: seats,
                available: self.sellable().max(0),
                reason: format!(
                    "booking class {} is {}",
                    self.booking_class,
                    format!("{:?}", self.status).to_lowercase()
                ),
            });
        }
        if self.sellable() < seats {
            return Err(InventoryError::Unavailable {
                flight: flight.to_string(),
                requested: seats,
                available: self.sellable().max(0),
                reason: format!("booking class {} has {} seats left", self.booking_class, self.sellable().max(0)),
            });
        }
        Ok(())
    }

    pub(crate) fn hold(&mut self, seats: i32) {
        self.held_seats += seats;
    }

    pub(crate) fn unhold(&mut self, seats: i32) {
        self.held_seats = (self.held_seats - seats).max(0);
    }

    /// Sell `seats` in this bucket. `from_hold` converts an existing soft
    /// hold instead of taking fresh availability.
    pub fn book(&mut self, flight: &str, seats: i32, from_hold: bool) -> Result<(), InventoryError> {
        if from_hold {
            self.unhold(seats);
        } else {
            self.ensure_sellable(flight, seats)?;
        }

        if self.booked_seats + seats > self.total_seats {
            return Err(InventoryError::Unavailable {
                flight: flight.to_string(),
                requested: seats,
                available: self.total_seats - self.booked_seats,
                reason: format!("booking class {} is fully booked", self.booking_class),
            });
        }

        self.available_seats -= seats;
        self.booked_seats += seats;
        self.revenue_generated += self.current_fare * Decimal::from(seats);
        Ok(())
    }

    /// Inverse of [`FareBucket::book`]. Counters clamp at their bounds.
    pub fn release(&mut self, seats: i32) {
        self.booked_seats = (self.booked_seats - seats).max(0);
        self.available_seats = (self.available_seats + seats).min(self.total_seats - self.booked_seats);
        self.revenue_generated = (self.revenue_generated - self.current_fare * Decimal::from(seats)).max(Decimal::ZERO);
    }

    pub fn refresh(&mut self, limited_threshold: i32) {
        self.current_load_factor = percentage(Decimal::from(self.booked_seats), Decimal::from(self.total_seats));
        let sellable = self.sellable();
        self.status = if self.manually_closed {
            BucketStatus::Closed
        } else if sellable <= 0 && self.waitlist_seats > 0 {
            BucketStatus::Waitlist
        } else if sellable <= 0 {
            BucketStatus::Closed
        } else if sellable <= limited_threshold {
            BucketStatus::Limited
        } else {
            BucketStatus::Open
        };
    }
}
