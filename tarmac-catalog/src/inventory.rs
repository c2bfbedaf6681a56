use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tarmac_core::sink::InventorySink;
use tarmac_core::{CabinClass, Clock, CoreError, FlightDateKey, SegmentRef};
use tarmac_shared::models::events::InventoryChangedEvent;
use tarmac_shared::money::percentage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bucket::FareBucket;
use crate::repository::InventoryRepository;
use crate::seats::{SeatAssignment, SeatInventory, SeatOccupant, SeatStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Available,
    Limited,
    Waitlist,
    SoldOut,
    Closed,
    Charter,
    CodeShare,
}

impl InventoryStatus {
    /// Set by operations staff rather than derived from counts.
    pub fn is_administrative(&self) -> bool {
        matches!(self, InventoryStatus::Closed | InventoryStatus::Charter | InventoryStatus::CodeShare)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Available => "available",
            InventoryStatus::Limited => "limited",
            InventoryStatus::Waitlist => "waitlist",
            InventoryStatus::SoldOut => "sold_out",
            InventoryStatus::Closed => "closed",
            InventoryStatus::Charter => "charter",
            InventoryStatus::CodeShare => "code_share",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinAllocation {
    pub total: i32,
    pub available: i32,
}

/// What a caller wants out of a flight-date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatRequest {
    pub seats: i32,
    pub cabin: Option<CabinClass>,
    pub booking_class: Option<String>,
}

impl SeatRequest {
    pub fn seats(seats: i32) -> Self {
        Self {
            seats,
            cabin: None,
            booking_class: None,
        }
    }

    pub fn for_segment(segment: &SegmentRef, seats: i32) -> Self {
        Self {
            seats,
            cabin: Some(segment.cabin),
            booking_class: Some(segment.booking_class.clone()),
        }
    }
}

/// Soft hold placed while a booking is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHold {
    pub seats: i32,
    pub cabin: Option<CabinClass>,
    pub booking_class: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SeatHold {
    fn matches(&self, request: &SeatRequest) -> bool {
        self.seats == request.seats && self.cabin == request.cabin && self.booking_class == request.booking_class
    }
}

/// Seat and fare-bucket counters for one flight-date. Owns its seat map and
/// buckets.
///
/// `available_seats` counts unsold seats and may go as low as
/// `-overbooking_limit`. Soft holds do not touch it; they are summed into
/// `reserved_seats` and subtracted when computing what can still be sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightInventory {
    pub id: Uuid,
    pub key: FlightDateKey,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub blocked_seats: i32,
    pub reserved_seats: i32,
    pub waitlist_seats: i32,
    pub overbooking_limit: i32,
    pub load_factor: Decimal,
    pub cabins: BTreeMap<CabinClass, CabinAllocation>,
    pub status: InventoryStatus,
    pub holds: BTreeMap<String, SeatHold>,
    pub buckets: Vec<FareBucket>,
    pub seats: Vec<SeatInventory>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl FlightInventory {
    pub fn new(
        key: FlightDateKey,
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
        total_seats: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            origin: origin.into().to_ascii_uppercase(),
            destination: destination.into().to_ascii_uppercase(),
            departure_time,
            arrival_time,
            total_seats,
            available_seats: total_seats,
            blocked_seats: 0,
            reserved_seats: 0,
            waitlist_seats: 0,
            overbooking_limit: 0,
            load_factor: Decimal::ZERO,
            cabins: BTreeMap::new(),
            status: InventoryStatus::Available,
            holds: BTreeMap::new(),
            buckets: Vec::new(),
            seats: Vec::new(),
            version: 0,
            updated_at: departure_time,
        }
    }

    pub fn with_overbooking(mut self, limit: i32) -> Self {
        self.overbooking_limit = limit;
        self
    }

    /// Takes seats out of sale entirely (crew rest, weight restrictions).
    pub fn with_blocked(mut self, blocked: i32) -> Self {
        self.blocked_seats = blocked;
        self.available_seats = self.total_seats - blocked;
        self
    }

    pub fn with_cabin(mut self, cabin: CabinClass, seats: i32) -> Self {
        self.cabins.insert(
            cabin,
            CabinAllocation {
                total: seats,
                available: seats,
            },
        );
        self
    }

    pub fn with_bucket(mut self, bucket: FareBucket) -> Self {
        self.buckets.push(bucket);
        self
    }

    pub fn with_seat(mut self, seat: SeatInventory) -> Self {
        self.seats.push(seat);
        self
    }

    pub fn booked_seats(&self) -> i32 {
        self.total_seats - self.blocked_seats - self.available_seats
    }

    /// Seats a new request may still take at flight level.
    pub fn sellable(&self) -> i32 {
        self.available_seats - self.reserved_seats + self.overbooking_limit
    }

    pub fn cabin_sellable(&self, cabin: CabinClass) -> Option<i32> {
        let allocation = self.cabins.get(&cabin)?;
        let held: i32 = self
            .holds
            .values()
            .filter(|h| h.cabin == Some(cabin))
            .map(|h| h.seats)
            .sum();
        Some(allocation.available - held + self.overbooking_limit)
    }

    pub fn bucket(&self, booking_class: &str) -> Option<&FareBucket> {
        self.buckets
            .iter()
            .find(|b| b.booking_class.eq_ignore_ascii_case(booking_class))
    }

    fn bucket_mut(&mut self, booking_class: &str) -> Result<&mut FareBucket, InventoryError> {
        let flight = self.key.to_string();
        self.buckets
            .iter_mut()
            .find(|b| b.booking_class.eq_ignore_ascii_case(booking_class))
            .ok_or(InventoryError::UnknownBookingClass {
                flight,
                booking_class: booking_class.to_string(),
            })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.arrival_time - self.departure_time).num_minutes()
    }

    fn unavailable(&self, request: &SeatRequest, available: i32, reason: impl Into<String>) -> InventoryError {
        InventoryError::Unavailable {
            flight: self.key.to_string(),
            requested: request.seats,
            available: available.max(0),
            reason: reason.into(),
        }
    }

    /// Full availability check with the figures of whichever level refused.
    pub fn check(&self, request: &SeatRequest) -> Result<(), InventoryError> {
        if request.seats <= 0 {
            return Err(InventoryError::Invalid(format!(
                "seat count must be positive, got {}",
                request.seats
            )));
        }

        if matches!(
            self.status,
            InventoryStatus::SoldOut | InventoryStatus::Closed | InventoryStatus::Waitlist
        ) {
            return Err(self.unavailable(request, self.sellable(), format!("flight is {}", self.status.as_str())));
        }

        if self.sellable() < request.seats {
            return Err(self.unavailable(request, self.sellable(), "not enough seats on flight"));
        }

        if let Some(cabin) = request.cabin {
            if !self.cabins.is_empty() {
                match self.cabin_sellable(cabin) {
                    None => {
                        return Err(self.unavailable(request, 0, format!("cabin {} not offered", cabin.code())))
                    }
                    Some(left) if left < request.seats => {
                        return Err(self.unavailable(request, left, format!("not enough seats in cabin {}", cabin.code())))
                    }
                    Some(_) => {}
                }
            }
        }

        if let Some(class) = request.booking_class.as_deref() {
            let bucket = self.bucket(class).ok_or_else(|| InventoryError::UnknownBookingClass {
                flight: self.key.to_string(),
                booking_class: class.to_string(),
            })?;
            bucket.ensure_sellable(&self.key.to_string(), request.seats)?;
        }

        Ok(())
    }

    pub fn is_available(&self, request: &SeatRequest) -> bool {
        self.check(request).is_ok()
    }

    /// Place a soft hold. Returns `false` when an identical hold already
    /// exists under `reference`.
    pub fn hold(&mut self, reference: &str, request: &SeatRequest, now: DateTime<Utc>) -> Result<bool, InventoryError> {
        if let Some(existing) = self.holds.get(reference) {
            return if existing.matches(request) {
                Ok(false)
            } else {
                Err(InventoryError::HoldMismatch {
                    reference: reference.to_string(),
                })
            };
        }

        self.check(request)?;

        if let Some(class) = request.booking_class.as_deref() {
            self.bucket_mut(class)?.hold(request.seats);
        }
        self.holds.insert(
            reference.to_string(),
            SeatHold {
                seats: request.seats,
                cabin: request.cabin,
                booking_class: request.booking_class.clone(),
                created_at: now,
            },
        );
        self.reserved_seats += request.seats;
        Ok(true)
    }

    /// Drop a soft hold. Unknown references are a no-op.
    pub fn release_hold(&mut self, reference: &str) -> Option<SeatHold> {
        let hold = self.holds.remove(reference)?;
        if let Some(class) = hold.booking_class.as_deref() {
            if let Ok(bucket) = self.bucket_mut(class) {
                bucket.unhold(hold.seats);
            }
        }
        self.reserved_seats = (self.reserved_seats - hold.seats).max(0);
        Some(hold)
    }

    /// Drop every soft hold placed at or before `cutoff`. Returns the
    /// references released.
    pub fn expire_holds(&mut self, cutoff: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .holds
            .iter()
            .filter(|(_, hold)| hold.created_at <= cutoff)
            .map(|(reference, _)| reference.clone())
            .collect();
        for reference in &stale {
            self.release_hold(reference);
        }
        stale
    }

    /// Confirmed sale. Promotes the hold under `reference` when there is
    /// one, otherwise sells straight from availability.
    pub fn sell(&mut self, reference: Option<&str>, request: &SeatRequest) -> Result<(), InventoryError> {
        let from_hold = match reference.and_then(|r| self.holds.get(r)) {
            Some(hold) if hold.matches(request) => true,
            Some(_) => {
                return Err(InventoryError::HoldMismatch {
                    reference: reference.unwrap_or_default().to_string(),
                })
            }
            None => {
                self.check(request)?;
                false
            }
        };

        if let Some(class) = request.booking_class.as_deref() {
            let flight = self.key.to_string();
            self.bucket_mut(class)?.book(&flight, request.seats, from_hold)?;
        }

        if from_hold {
            if let Some(reference) = reference {
                self.holds.remove(reference);
            }
            self.reserved_seats = (self.reserved_seats - request.seats).max(0);
        }

        self.available_seats -= request.seats;
        if let Some(allocation) = request.cabin.and_then(|c| self.cabins.get_mut(&c)) {
            allocation.available -= request.seats;
        }
        Ok(())
    }

    /// Return sold seats to availability. Clamped: never above capacity.
    pub fn release_sold(&mut self, request: &SeatRequest) {
        self.available_seats = (self.available_seats + request.seats).min(self.total_seats - self.blocked_seats);
        if let Some(allocation) = request.cabin.and_then(|c| self.cabins.get_mut(&c)) {
            allocation.available = (allocation.available + request.seats).min(allocation.total);
        }
        if let Some(class) = request.booking_class.as_deref() {
            if let Ok(bucket) = self.bucket_mut(class) {
                bucket.release(request.seats);
            }
        }
    }

    pub fn seat(&self, seat_number: &str) -> Option<&SeatInventory> {
        self.seats
            .iter()
            .find(|s| s.seat_number.eq_ignore_ascii_case(seat_number))
    }

    fn seat_mut(&mut self, seat_number: &str) -> Result<&mut SeatInventory, InventoryError> {
        let flight = self.key.to_string();
        self.seats
            .iter_mut()
            .find(|s| s.seat_number.eq_ignore_ascii_case(seat_number))
            .ok_or(InventoryError::SeatNotFound {
                flight,
                seat: seat_number.to_string(),
            })
    }

    pub fn assign_seat(
        &mut self,
        seat_number: &str,
        occupant: &SeatOccupant,
        price: Option<Decimal>,
    ) -> Result<SeatInventory, InventoryError> {
        let seat = self.seat_mut(seat_number)?;
        seat.assign(occupant, price)?;
        Ok(seat.clone())
    }

    pub fn release_seat(&mut self, seat_number: &str) -> Result<Option<SeatAssignment>, InventoryError> {
        Ok(self.seat_mut(seat_number)?.release())
    }

    /// Release every seat assigned to `booking_id`.
    pub fn release_booking_seats(&mut self, booking_id: Uuid) -> usize {
        let mut released = 0;
        for seat in self.seats.iter_mut() {
            if seat.assignment.as_ref().map(|a| a.booking_id) == Some(booking_id) {
                seat.release();
                released += 1;
            }
        }
        released
    }

    /// Recompute everything derived from counters. Called before every save.
    pub fn refresh(&mut self, limited_threshold: i32, now: DateTime<Utc>) {
        self.reserved_seats = self.holds.values().map(|h| h.seats).sum();
        self.load_factor = percentage(Decimal::from(self.booked_seats()), Decimal::from(self.total_seats));
        for bucket in self.buckets.iter_mut() {
            bucket.refresh(limited_threshold);
        }

        if !self.status.is_administrative() {
            let sellable = self.sellable();
            self.status = if sellable <= 0 && self.waitlist_seats > 0 {
                InventoryStatus::Waitlist
            } else if sellable <= 0 {
                InventoryStatus::SoldOut
            } else if sellable <= limited_threshold {
                InventoryStatus::Limited
            } else {
                InventoryStatus::Available
            };
        }
        self.updated_at = now;
    }

    pub fn changed_event(&self) -> InventoryChangedEvent {
        InventoryChangedEvent {
            flight_number: self.key.flight_number.clone(),
            departure_date: self.key.departure_date,
            available_seats: self.available_seats,
            reserved_seats: self.reserved_seats,
            occurred_at: self.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Inventory not found: {0}")]
    NotFound(String),

    #[error("Inventory already exists: {0}")]
    AlreadyExists(String),

    #[error("Insufficient inventory on {flight}: requested {requested}, available {available} ({reason})")]
    Unavailable {
        flight: String,
        requested: i32,
        available: i32,
        reason: String,
    },

    #[error("Booking class {booking_class} not sold on {flight}")]
    UnknownBookingClass { flight: String, booking_class: String },

    #[error("Hold {reference} exists with different figures")]
    HoldMismatch { reference: String },

    #[error("Seat {seat} not found on {flight}")]
    SeatNotFound { flight: String, seat: String },

    #[error("Seat {seat} is {status:?}")]
    SeatUnavailable { seat: String, status: SeatStatus },

    #[error("Seat {seat} not assignable: {reason}")]
    SeatIneligible { seat: String, reason: String },

    #[error("Invalid inventory request: {0}")]
    Invalid(String),

    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict { key: String, expected: i64, actual: i64 },

    #[error("Gave up on {key} after {attempts} conflicting updates")]
    Contention { key: String, attempts: u32 },

    #[error("Inventory storage failure: {0}")]
    Storage(String),
}

impl From<InventoryError> for CoreError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Unavailable {
                flight,
                requested,
                available,
                reason,
            } => CoreError::InventoryUnavailable {
                flight,
                requested,
                available,
                reason,
            },
            InventoryError::SeatUnavailable { ref seat, .. } => CoreError::InventoryUnavailable {
                flight: String::new(),
                requested: 1,
                available: 0,
                reason: format!("seat {} taken", seat),
            },
            InventoryError::NotFound(_) | InventoryError::SeatNotFound { .. } => CoreError::NotFound(err.to_string()),
            InventoryError::VersionConflict { .. }
            | InventoryError::Contention { .. }
            | InventoryError::Storage(_) => CoreError::Storage(err.to_string()),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_limited_threshold")]
    pub limited_threshold: i32,
    /// Soft holds older than this are released by `expire_holds`.
    #[serde(default = "default_hold_ttl_seconds")]
    pub hold_ttl_seconds: i64,
}

fn default_max_conflict_retries() -> u32 {
    8
}

fn default_limited_threshold() -> i32 {
    4
}

fn default_hold_ttl_seconds() -> i64 {
    900
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            limited_threshold: default_limited_threshold(),
            hold_ttl_seconds: default_hold_ttl_seconds(),
        }
    }
}

/// Single arbiter of seat counters. Every mutation is a load, change,
/// compare-and-set cycle against the row version, retried on conflict.
pub struct InventoryManager {
    repo: Arc<dyn InventoryRepository>,
    clock: Arc<dyn Clock>,
    config: InventoryConfig,
    sink: Option<Arc<dyn InventorySink>>,
}

impl InventoryManager {
    pub fn new(repo: Arc<dyn InventoryRepository>, clock: Arc<dyn Clock>, config: InventoryConfig) -> Self {
        Self {
            repo,
            clock,
            config,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn InventorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn create(&self, mut inventory: FlightInventory) -> Result<FlightInventory, InventoryError> {
        if inventory.total_seats <= 0 || inventory.overbooking_limit < 0 || inventory.blocked_seats < 0 {
            return Err(InventoryError::Invalid(format!(
                "{}: seat counts must be non-negative with positive capacity",
                inventory.key
            )));
        }
        let cabin_total: i32 = inventory.cabins.values().map(|c| c.total).sum();
        if cabin_total > inventory.total_seats {
            return Err(InventoryError::Invalid(format!(
                "{}: cabins allocate {} of {} seats",
                inventory.key, cabin_total, inventory.total_seats
            )));
        }
        inventory.refresh(self.config.limited_threshold, self.clock.now());
        self.repo.insert(&inventory).await?;
        info!(flight = %inventory.key, seats = inventory.total_seats, "inventory created");
        Ok(inventory)
    }

    pub async fn get(&self, key: &FlightDateKey) -> Result<FlightInventory, InventoryError> {
        self.repo
            .get(key)
            .await?
            .ok_or_else(|| InventoryError::NotFound(key.to_string()))
    }

    pub async fn list_route(
        &self,
        origin: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<FlightInventory>, InventoryError> {
        self.repo.find_by_route(origin, destination, date).await
    }

    /// Fails closed: unknown flights are simply not available.
    pub async fn is_available(&self, key: &FlightDateKey, request: &SeatRequest) -> Result<bool, InventoryError> {
        Ok(match self.repo.get(key).await? {
            Some(inventory) => inventory.is_available(request),
            None => false,
        })
    }

    /// Release soft holds older than the hold TTL on every flight. Returns
    /// how many holds were dropped.
    pub async fn expire_holds(&self) -> Result<usize, InventoryError> {
        let ttl = Duration::seconds(self.config.hold_ttl_seconds);
        let mut expired = 0;
        for flight in self.repo.list_with_holds().await? {
            let mut released = Vec::new();
            self.mutate(&flight.key, |inventory, now| {
                released = inventory.expire_holds(now - ttl);
                Ok(!released.is_empty())
            })
            .await?;
            if !released.is_empty() {
                warn!(flight = %flight.key, references = ?released, "soft holds expired");
                expired += released.len();
            }
        }
        Ok(expired)
    }

    pub async fn reserve_seats(
        &self,
        key: &FlightDateKey,
        reference: &str,
        request: &SeatRequest,
        confirmed: bool,
    ) -> Result<FlightInventory, InventoryError> {
        let result = self
            .mutate(key, |inventory, now| {
                if confirmed {
                    inventory.sell(Some(reference), request).map(|_| true)
                } else {
                    inventory.hold(reference, request, now)
                }
            })
            .await;

        match &result {
            Ok(inventory) => debug!(
                flight = %key,
                reference,
                seats = request.seats,
                confirmed,
                available = inventory.available_seats,
                reserved = inventory.reserved_seats,
                "seats reserved"
            ),
            Err(err) => warn!(flight = %key, reference, seats = request.seats, confirmed, "reservation refused: {}", err),
        }
        result
    }

    pub async fn release_seats(
        &self,
        key: &FlightDateKey,
        reference: &str,
        request: &SeatRequest,
        confirmed: bool,
    ) -> Result<FlightInventory, InventoryError> {
        self.mutate(key, |inventory, _| {
            if confirmed {
                inventory.release_sold(request);
                Ok(true)
            } else {
                Ok(inventory.release_hold(reference).is_some())
            }
        })
        .await
    }

    pub async fn assign_seat(
        &self,
        key: &FlightDateKey,
        seat_number: &str,
        occupant: &SeatOccupant,
        price: Option<Decimal>,
    ) -> Result<SeatInventory, InventoryError> {
        let inventory = self
            .mutate(key, |inventory, _| inventory.assign_seat(seat_number, occupant, price).map(|_| true))
            .await?;
        inventory
            .seat(seat_number)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(seat_number.to_string()))
    }

    pub async fn release_seat(&self, key: &FlightDateKey, seat_number: &str) -> Result<FlightInventory, InventoryError> {
        self.mutate(key, |inventory, _| inventory.release_seat(seat_number).map(|a| a.is_some()))
            .await
    }

    pub async fn release_booking_seats(&self, key: &FlightDateKey, booking_id: Uuid) -> Result<usize, InventoryError> {
        let mut released = 0;
        self.mutate(key, |inventory, _| {
            released = inventory.release_booking_seats(booking_id);
            Ok(released > 0)
        })
        .await?;
        Ok(released)
    }

    /// Administrative status change. `Available` hands control back to the
    /// counters.
    pub async fn set_status(&self, key: &FlightDateKey, status: InventoryStatus) -> Result<FlightInventory, InventoryError> {
        if !status.is_administrative() && status != InventoryStatus::Available {
            return Err(InventoryError::Invalid(format!(
                "{} is derived from seat counts and cannot be set",
                status.as_str()
            )));
        }
        self.mutate(key, |inventory, _| {
            inventory.status = status;
            Ok(true)
        })
        .await
    }

    pub async fn set_bucket_closed(
        &self,
        key: &FlightDateKey,
        booking_class: &str,
        closed: bool,
    ) -> Result<FlightInventory, InventoryError> {
        self.mutate(key, |inventory, _| {
            inventory.bucket_mut(booking_class)?.manually_closed = closed;
            Ok(true)
        })
        .await
    }

    /// `change` returns whether it modified anything; unchanged rows are not
    /// written back.
    async fn mutate<F>(&self, key: &FlightDateKey, mut change: F) -> Result<FlightInventory, InventoryError>
    where
        F: FnMut(&mut FlightInventory, DateTime<Utc>) -> Result<bool, InventoryError>,
    {
        let attempts = self.config.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            let current = self.get(key).await?;
            let mut next = current.clone();
            let now = self.clock.now();
            if !change(&mut next, now)? {
                return Ok(current);
            }
            next.refresh(self.config.limited_threshold, now);

            match self.repo.save(&next).await {
                Ok(saved) => {
                    if let Some(sink) = &self.sink {
                        sink.inventory_changed(saved.changed_event()).await;
                    }
                    return Ok(saved);
                }
                Err(InventoryError::VersionConflict { expected, actual, .. }) => {
                    debug!(flight = %key, attempt, expected, actual, "inventory version conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        warn!(flight = %key, attempts, "inventory contention");
        Err(InventoryError::Contention {
            key: key.to_string(),
            attempts,
        })
    }
}
