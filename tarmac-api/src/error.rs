use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tarmac_core::CoreError;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Core(err) => match err {
                CoreError::Validation(_) | CoreError::PromoInvalid { .. } => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) | CoreError::FareNotFound(_) => StatusCode::NOT_FOUND,
                CoreError::StateConflict { .. }
                | CoreError::InventoryUnavailable { .. }
                | CoreError::LimitBlocked { .. } => StatusCode::CONFLICT,
                CoreError::OverrideRequired { .. } => StatusCode::PRECONDITION_REQUIRED,
                CoreError::GdsRejected(_) | CoreError::GdsProtocol(_) => StatusCode::BAD_GATEWAY,
                CoreError::GdsUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::GdsCommunication(_) => StatusCode::GATEWAY_TIMEOUT,
                CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Figures the caller needs to decide on a retry.
    fn details(&self) -> Value {
        match self {
            AppError::Core(CoreError::InventoryUnavailable {
                flight,
                requested,
                available,
                reason,
            }) => json!({
                "flight": flight,
                "requested": requested,
                "available": available,
                "reason": reason,
            }),
            AppError::Core(CoreError::LimitBlocked {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            })
            | AppError::Core(CoreError::OverrideRequired {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            }) => json!({
                "limit_id": limit_id,
                "limit_name": limit_name,
                "current_usage": current_usage,
                "requested": requested,
                "limit_value": limit_value,
            }),
            AppError::Core(CoreError::PromoInvalid { code, reason }) => json!({
                "code": code,
                "reason": reason,
            }),
            AppError::Core(CoreError::StateConflict { entity, from, to }) => json!({
                "entity": entity,
                "from": from,
                "to": to,
            }),
            _ => Value::Null,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (kind, message) = match &self {
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::Core(CoreError::Storage(msg)) => {
                tracing::error!("Internal Server Error: {}", msg);
                ("storage", "Internal Server Error".to_string())
            }
            AppError::Core(err) => (err.kind(), err.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
            "details": self.details(),
        }));

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<tarmac_governor::GovernanceError> for AppError {
    fn from(err: tarmac_governor::GovernanceError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<tarmac_catalog::InventoryError> for AppError {
    fn from(err: tarmac_catalog::InventoryError) -> Self {
        AppError::Core(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                CoreError::state_conflict("booking 1", "cancelled", "ticketed"),
                StatusCode::CONFLICT,
            ),
            (
                CoreError::OverrideRequired {
                    limit_id: uuid::Uuid::nil(),
                    limit_name: "daily".into(),
                    current_usage: dec!(900),
                    requested: dec!(200),
                    limit_value: dec!(1000),
                },
                StatusCode::PRECONDITION_REQUIRED,
            ),
            (CoreError::GdsRejected("UC".into()), StatusCode::BAD_GATEWAY),
            (CoreError::GdsUnavailable("open".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CoreError::GdsCommunication("timeout".into()), StatusCode::GATEWAY_TIMEOUT),
            (CoreError::Storage("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_inventory_failure_carries_figures() {
        let err = AppError::from(CoreError::InventoryUnavailable {
            flight: "SV1020@2026-11-01".into(),
            requested: 2,
            available: 0,
            reason: "sold out".into(),
        });
        let details = err.details();
        assert_eq!(details["requested"], 2);
        assert_eq!(details["available"], 0);
    }
}
