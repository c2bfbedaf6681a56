pub mod governor;
pub mod limits;
pub mod overrides;
pub mod repository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tarmac_core::CoreError;
use uuid::Uuid;

pub use governor::{Admission, AdmittedUsage, BookingGovernor, GovernorConfig, LimitEvaluation, SweepReport};
pub use limits::{BookingDemand, BookingLimit, Decision, LimitAction, LimitPeriod, LimitScope, LimitType, UsageOp};
pub use overrides::{OverrideRequest, OverrideRule, OverrideStatus, OverrideTarget};
pub use repository::{LimitRepository, MemoryLimitRepository, MemoryOverrideRepository, OverrideRepository};

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("Booking limit not found: {0}")]
    LimitNotFound(Uuid),

    #[error("Override not found: {0}")]
    OverrideNotFound(Uuid),

    #[error("Booking limit {limit_name} blocks booking: usage {current_usage} + {requested} exceeds {limit_value}")]
    LimitBlocked {
        limit_id: Uuid,
        limit_name: String,
        current_usage: Decimal,
        requested: Decimal,
        limit_value: Decimal,
    },

    #[error("Booking limit {limit_name} needs an approved override: usage {current_usage} + {requested} exceeds {limit_value}")]
    OverrideRequired {
        limit_id: Uuid,
        limit_name: String,
        current_usage: Decimal,
        requested: Decimal,
        limit_value: Decimal,
    },

    #[error("Period of limit {limit_id} has not ended (ends {period_end:?})")]
    PeriodNotElapsed {
        limit_id: Uuid,
        period_end: Option<DateTime<Utc>>,
    },

    #[error("Override {id} cannot move from {from:?} to {to:?}")]
    OverrideTransition {
        id: Uuid,
        from: OverrideStatus,
        to: OverrideStatus,
    },

    #[error("Override {id} cannot be decided by its requester")]
    SelfApproval { id: Uuid },

    #[error("Invalid governance request: {0}")]
    Invalid(String),

    #[error("Version conflict on limit {limit_id}: expected {expected}, found {actual}")]
    VersionConflict { limit_id: Uuid, expected: i64, actual: i64 },

    #[error("Gave up on limit {limit_id} after {attempts} conflicting updates")]
    Contention { limit_id: Uuid, attempts: u32 },

    #[error("Governance storage failure: {0}")]
    Storage(String),
}

impl From<GovernanceError> for CoreError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::LimitBlocked {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            } => CoreError::LimitBlocked {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            },
            GovernanceError::OverrideRequired {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            } => CoreError::OverrideRequired {
                limit_id,
                limit_name,
                current_usage,
                requested,
                limit_value,
            },
            GovernanceError::LimitNotFound(_) | GovernanceError::OverrideNotFound(_) => {
                CoreError::NotFound(err.to_string())
            }
            GovernanceError::OverrideTransition { from, to, .. } => CoreError::state_conflict("override", from, to),
            GovernanceError::PeriodNotElapsed { .. } => CoreError::StateConflict {
                entity: "booking limit".into(),
                from: "open period".into(),
                to: "next period".into(),
            },
            GovernanceError::SelfApproval { .. } | GovernanceError::Invalid(_) => {
                CoreError::Validation(err.to_string())
            }
            GovernanceError::VersionConflict { .. }
            | GovernanceError::Contention { .. }
            | GovernanceError::Storage(_) => CoreError::Storage(err.to_string()),
        }
    }
}
