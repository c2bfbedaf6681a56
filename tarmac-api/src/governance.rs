use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tarmac_governor::{
    BookingDemand, BookingLimit, LimitAction, LimitEvaluation, LimitPeriod, LimitScope, LimitType, OverrideRequest,
    OverrideRule, SweepReport,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewLimit {
    pub name: String,
    pub limit_type: LimitType,
    pub scope: LimitScope,
    pub limit_value: Decimal,
    pub period: LimitPeriod,
    pub period_start: DateTime<Utc>,
    pub warning_threshold: Option<Decimal>,
    pub critical_threshold: Option<Decimal>,
    pub action_on_limit: Option<LimitAction>,
    #[serde(default)]
    pub override_allowed: bool,
    #[serde(default)]
    pub notification_recipients: Vec<String>,
}

impl NewLimit {
    fn into_limit(self) -> BookingLimit {
        let mut limit = BookingLimit::new(
            self.name,
            self.limit_type,
            self.scope,
            self.limit_value,
            self.period,
            self.period_start,
        );
        if let Some(warning) = self.warning_threshold {
            limit.warning_threshold = warning;
        }
        if let Some(critical) = self.critical_threshold {
            limit.critical_threshold = critical;
        }
        if let Some(action) = self.action_on_limit {
            limit.action_on_limit = action;
        }
        limit.override_allowed = self.override_allowed;
        limit.notification_recipients = self.notification_recipients;
        limit
    }
}

#[derive(Debug, Deserialize)]
pub struct OverrideDecision {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RolloverReport {
    pub reset: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/limits", post(create_limit).get(list_limits))
        .route("/v1/limits/evaluate", post(evaluate))
        .route("/v1/limits/rollover", post(roll_over))
        .route("/v1/limits/{id}", get(get_limit))
        .route("/v1/limits/{id}/reset", post(reset_limit))
        .route("/v1/overrides", post(request_override).get(list_overrides))
        .route("/v1/overrides/sweep", post(sweep_overrides))
        .route("/v1/overrides/{id}", get(get_override))
        .route("/v1/overrides/{id}/approve", post(approve_override))
        .route("/v1/overrides/{id}/reject", post(reject_override))
        .route("/v1/overrides/{id}/cancel", post(cancel_override))
}

async fn create_limit(
    State(state): State<AppState>,
    Json(req): Json<NewLimit>,
) -> Result<(StatusCode, Json<BookingLimit>), AppError> {
    let limit = state.governor.create_limit(req.into_limit()).await?;
    Ok((StatusCode::CREATED, Json(limit)))
}

async fn list_limits(State(state): State<AppState>) -> Result<Json<Vec<BookingLimit>>, AppError> {
    Ok(Json(state.governor.list_limits().await?))
}

async fn get_limit(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<BookingLimit>, AppError> {
    Ok(Json(state.governor.get_limit(id).await?))
}

/// Dry run: how each matching limit would judge the demand.
async fn evaluate(
    State(state): State<AppState>,
    Json(demand): Json<BookingDemand>,
) -> Result<Json<Vec<LimitEvaluation>>, AppError> {
    Ok(Json(state.governor.evaluate(&demand).await?))
}

async fn reset_limit(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<BookingLimit>, AppError> {
    Ok(Json(state.governor.reset_period(id).await?))
}

async fn roll_over(State(state): State<AppState>) -> Result<Json<RolloverReport>, AppError> {
    let reset = state.governor.roll_over_periods().await?;
    Ok(Json(RolloverReport { reset }))
}

async fn request_override(
    State(state): State<AppState>,
    Json(req): Json<OverrideRequest>,
) -> Result<(StatusCode, Json<OverrideRule>), AppError> {
    let rule = state.governor.request_override(req).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_overrides(State(state): State<AppState>) -> Result<Json<Vec<OverrideRule>>, AppError> {
    Ok(Json(state.governor.list_overrides().await?))
}

async fn get_override(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OverrideRule>, AppError> {
    Ok(Json(state.governor.get_override(id).await?))
}

async fn approve_override(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverrideDecision>,
) -> Result<Json<OverrideRule>, AppError> {
    Ok(Json(state.governor.approve_override(id, &req.actor, req.note).await?))
}

async fn reject_override(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverrideDecision>,
) -> Result<Json<OverrideRule>, AppError> {
    Ok(Json(state.governor.reject_override(id, &req.actor, req.note).await?))
}

async fn cancel_override(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverrideDecision>,
) -> Result<Json<OverrideRule>, AppError> {
    Ok(Json(state.governor.cancel_override(id, &req.actor, req.note).await?))
}

async fn sweep_overrides(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.governor.sweep_overrides().await?))
}
