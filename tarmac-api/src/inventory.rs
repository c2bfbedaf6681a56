use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tarmac_catalog::{FareBucket, FlightInventory, InventoryStatus, SeatInventory, SeatStatus};
use tarmac_core::{CabinClass, FlightDateKey};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CabinSpec {
    pub cabin: CabinClass,
    pub seats: i32,
}

#[derive(Debug, Deserialize)]
pub struct BucketSpec {
    pub booking_class: String,
    pub cabin: CabinClass,
    pub seats: i32,
    pub fare: Decimal,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct SeatSpec {
    pub seat_number: String,
    pub cabin: CabinClass,
    #[serde(default = "default_seat_status")]
    pub status: SeatStatus,
    #[serde(default)]
    pub is_window: bool,
    #[serde(default)]
    pub is_aisle: bool,
    #[serde(default)]
    pub price: Option<Decimal>,
}

fn default_seat_status() -> SeatStatus {
    SeatStatus::Available
}

/// Load plan for one flight-date.
#[derive(Debug, Deserialize)]
pub struct NewFlight {
    pub flight_number: String,
    pub departure_date: NaiveDate,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub total_seats: i32,
    #[serde(default)]
    pub overbooking_limit: i32,
    #[serde(default)]
    pub blocked_seats: i32,
    #[serde(default)]
    pub cabins: Vec<CabinSpec>,
    #[serde(default)]
    pub buckets: Vec<BucketSpec>,
    #[serde(default)]
    pub seats: Vec<SeatSpec>,
}

impl NewFlight {
    fn into_inventory(self) -> FlightInventory {
        let key = FlightDateKey::new(self.flight_number, self.departure_date);
        let mut inventory = FlightInventory::new(
            key,
            self.origin,
            self.destination,
            self.departure_time,
            self.arrival_time,
            self.total_seats,
        )
        .with_overbooking(self.overbooking_limit)
        .with_blocked(self.blocked_seats);
        for cabin in self.cabins {
            inventory = inventory.with_cabin(cabin.cabin, cabin.seats);
        }
        for b in self.buckets {
            inventory = inventory.with_bucket(FareBucket::new(b.booking_class, b.cabin, b.seats, b.fare, b.currency));
        }
        for s in self.seats {
            let mut seat = SeatInventory::new(s.seat_number, s.cabin, s.status);
            seat.is_window = s.is_window;
            seat.is_aisle = s.is_aisle;
            seat.price = s.price;
            inventory = inventory.with_seat(seat);
        }
        inventory
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignSeat {
    pub booking_id: Uuid,
    pub passenger_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: InventoryStatus,
}

#[derive(Debug, Deserialize)]
pub struct BucketChange {
    pub closed: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/inventory", post(create_flight))
        .route("/v1/inventory/{flight}/{date}", get(get_flight))
        .route("/v1/inventory/{flight}/{date}/status", post(set_status))
        .route("/v1/inventory/{flight}/{date}/buckets/{class}", post(set_bucket))
        .route(
            "/v1/inventory/{flight}/{date}/seats/{seat}",
            post(assign_seat).delete(release_seat),
        )
}

async fn create_flight(
    State(state): State<AppState>,
    Json(req): Json<NewFlight>,
) -> Result<(StatusCode, Json<FlightInventory>), AppError> {
    let inventory = state.inventory.create(req.into_inventory()).await?;
    Ok((StatusCode::CREATED, Json(inventory)))
}

async fn get_flight(
    State(state): State<AppState>,
    Path((flight, date)): Path<(String, NaiveDate)>,
) -> Result<Json<FlightInventory>, AppError> {
    let key = FlightDateKey::new(flight, date);
    Ok(Json(state.inventory.get(&key).await?))
}

async fn set_status(
    State(state): State<AppState>,
    Path((flight, date)): Path<(String, NaiveDate)>,
    Json(req): Json<StatusChange>,
) -> Result<Json<FlightInventory>, AppError> {
    let key = FlightDateKey::new(flight, date);
    Ok(Json(state.inventory.set_status(&key, req.status).await?))
}

async fn set_bucket(
    State(state): State<AppState>,
    Path((flight, date, class)): Path<(String, NaiveDate, String)>,
    Json(req): Json<BucketChange>,
) -> Result<Json<FlightInventory>, AppError> {
    let key = FlightDateKey::new(flight, date);
    Ok(Json(state.inventory.set_bucket_closed(&key, &class, req.closed).await?))
}

async fn assign_seat(
    State(state): State<AppState>,
    Path((flight, date, seat)): Path<(String, NaiveDate, String)>,
    Json(req): Json<AssignSeat>,
) -> Result<Json<SeatInventory>, AppError> {
    let key = FlightDateKey::new(flight, date);
    let seat = state
        .bookings
        .assign_seat(req.booking_id, req.passenger_index, &key, &seat)
        .await?;
    Ok(Json(seat))
}

async fn release_seat(
    State(state): State<AppState>,
    Path((flight, date, seat)): Path<(String, NaiveDate, String)>,
) -> Result<Json<FlightInventory>, AppError> {
    let key = FlightDateKey::new(flight, date);
    Ok(Json(state.inventory.release_seat(&key, &seat).await?))
}
