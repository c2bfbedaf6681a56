pub mod clock;
pub mod gds;
pub mod search;
pub mod sink;
pub mod types;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{AgentType, CabinClass, FlightDateKey, ItineraryRef, PassengerType, SegmentRef};

/// Why a promo code was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PromoRejection {
    UnknownCode,
    Inactive,
    NotYetValid,
    Expired,
    UsageExhausted,
    PerUserLimitReached,
    BelowMinimum { minimum: Decimal, actual: Decimal },
    NotApplicable,
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromoRejection::UnknownCode => write!(f, "unknown code"),
            PromoRejection::Inactive => write!(f, "inactive"),
            PromoRejection::NotYetValid => write!(f, "not yet valid"),
            PromoRejection::Expired => write!(f, "expired"),
            PromoRejection::UsageExhausted => write!(f, "usage exhausted"),
            PromoRejection::PerUserLimitReached => write!(f, "per-user limit reached"),
            PromoRejection::BelowMinimum { minimum, actual } => {
                write!(f, "booking value {} below minimum {}", actual, minimum)
            }
            PromoRejection::NotApplicable => write!(f, "not applicable to this itinerary"),
        }
    }
}

/// Error taxonomy surfaced by the booking engine. Component crates convert
/// their own errors into this one at the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Inventory unavailable on {flight}: requested {requested}, available {available}")]
    InventoryUnavailable {
        flight: String,
        requested: i32,
        available: i32,
        reason: String,
    },

    #[error("No applicable fare: {0}")]
    FareNotFound(String),

    #[error("Promo code {code} rejected: {reason}")]
    PromoInvalid { code: String, reason: PromoRejection },

    #[error("Booking limit {limit_name} blocks booking: usage {current_usage} + {requested} exceeds {limit_value}")]
    LimitBlocked {
        limit_id: uuid::Uuid,
        limit_name: String,
        current_usage: Decimal,
        requested: Decimal,
        limit_value: Decimal,
    },

    #[error("Booking limit {limit_name} requires an approved override: usage {current_usage} + {requested} exceeds {limit_value}")]
    OverrideRequired {
        limit_id: uuid::Uuid,
        limit_name: String,
        current_usage: Decimal,
        requested: Decimal,
        limit_value: Decimal,
    },

    #[error("GDS communication failed, outcome unknown: {0}")]
    GdsCommunication(String),

    #[error("GDS unavailable, call not attempted: {0}")]
    GdsUnavailable(String),

    #[error("GDS rejected request: {0}")]
    GdsRejected(String),

    #[error("GDS response inconsistent with request: {0}")]
    GdsProtocol(String),

    #[error("Illegal transition of {entity} from {from} to {to}")]
    StateConflict {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn state_conflict(entity: impl Into<String>, from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        CoreError::StateConflict {
            entity: entity.into(),
            from: format!("{:?}", from).to_lowercase(),
            to: format!("{:?}", to).to_lowercase(),
        }
    }

    /// Short machine-readable discriminator for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::InventoryUnavailable { .. } => "inventory_unavailable",
            CoreError::FareNotFound(_) => "fare_not_found",
            CoreError::PromoInvalid { .. } => "promo_invalid",
            CoreError::LimitBlocked { .. } => "limit_blocked",
            CoreError::OverrideRequired { .. } => "override_required",
            CoreError::GdsCommunication(_) => "gds_communication",
            CoreError::GdsUnavailable(_) => "gds_unavailable",
            CoreError::GdsRejected(_) => "gds_rejected",
            CoreError::GdsProtocol(_) => "gds_protocol",
            CoreError::StateConflict { .. } => "state_conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::Storage(_) => "storage",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
