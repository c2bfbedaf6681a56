use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tarmac_order::{AncillaryBooking, AttachAncillary, Booking, NewBooking, Refund, RefundDecision, RefundRequest};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/tickets", post(issue_tickets))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/void", post(void_tickets))
        .route("/v1/bookings/{id}/refunds", post(request_refund))
        .route("/v1/refunds/{id}/approve", post(approve_refund))
        .route("/v1/refunds/{id}/reject", post(reject_refund))
        .route("/v1/refunds/{id}/process", post(process_refund))
        .route("/v1/bookings/{id}/ancillaries", post(attach_ancillary))
        .route("/v1/bookings/{id}/ancillaries/{ancillary_id}/{action}", post(move_ancillary))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    info!(client_reference = %req.client_reference, itinerary = %req.itinerary_id, "booking requested");
    let booking = state.bookings.create_booking(req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    Ok(Json(state.bookings.list_bookings(limit).await?))
}

async fn get_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.get_booking(id).await?))
}

async fn issue_tickets(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.issue_tickets(id).await?))
}

async fn cancel_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.cancel_booking(id).await?))
}

async fn void_tickets(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.void_tickets(id).await?))
}

async fn request_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Refund>), AppError> {
    let refund = state.bookings.request_refund(id, req).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

async fn approve_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decision): Json<RefundDecision>,
) -> Result<Json<Refund>, AppError> {
    Ok(Json(state.bookings.approve_refund(id, decision).await?))
}

async fn reject_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decision): Json<RefundDecision>,
) -> Result<Json<Refund>, AppError> {
    Ok(Json(state.bookings.reject_refund(id, decision).await?))
}

async fn process_refund(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Refund>, AppError> {
    Ok(Json(state.bookings.process_refund(id).await?))
}

async fn attach_ancillary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachAncillary>,
) -> Result<(StatusCode, Json<AncillaryBooking>), AppError> {
    let ancillary = state.bookings.attach_ancillary(id, req).await?;
    Ok((StatusCode::CREATED, Json(ancillary)))
}

async fn move_ancillary(
    State(state): State<AppState>,
    Path((id, ancillary_id, action)): Path<(Uuid, Uuid, String)>,
) -> Result<Json<AncillaryBooking>, AppError> {
    let orchestrator = &state.bookings;
    let ancillary = match action.as_str() {
        "confirm" => orchestrator.confirm_ancillary(id, ancillary_id).await?,
        "cancel" => orchestrator.cancel_ancillary(id, ancillary_id).await?,
        "use" => orchestrator.mark_ancillary_used(id, ancillary_id).await?,
        "expire" => orchestrator.expire_ancillary(id, ancillary_id).await?,
        "refund" => orchestrator.refund_ancillary(id, ancillary_id).await?,
        other => return Err(AppError::BadRequest(format!("unknown ancillary action {}", other))),
    };
    Ok(Json(ancillary))
}
