use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tarmac_core::FlightDateKey;
use uuid::Uuid;

use crate::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Expired,
    Cancelled,
}

impl OverrideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OverrideStatus::Rejected | OverrideStatus::Expired | OverrideStatus::Cancelled
        )
    }
}

/// The rule an override relaxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum OverrideTarget {
    Limit { limit_id: Uuid },
    Fare { fare_basis: String },
    Inventory { flight: FlightDateKey },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub from: Option<OverrideStatus>,
    pub to: OverrideStatus,
    pub note: Option<String>,
}

/// A time-boxed, approved exception to a booking rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub id: Uuid,
    pub target: OverrideTarget,
    pub reason: String,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub original_value: Option<Decimal>,
    /// For limit overrides, the usage ceiling admitted while active. `None`
    /// lifts the ceiling entirely.
    pub override_value: Option<Decimal>,
    pub status: OverrideStatus,
    pub audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub target: OverrideTarget,
    pub reason: String,
    pub requested_by: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub original_value: Option<Decimal>,
    #[serde(default)]
    pub override_value: Option<Decimal>,
}

impl OverrideRule {
    pub fn request(request: OverrideRequest, now: DateTime<Utc>) -> Result<Self, GovernanceError> {
        if request.reason.trim().is_empty() {
            return Err(GovernanceError::Invalid("override reason is required".into()));
        }
        if request.requested_by.trim().is_empty() {
            return Err(GovernanceError::Invalid("override requester is required".into()));
        }
        if request.valid_until <= request.valid_from {
            return Err(GovernanceError::Invalid(
                "override validity window must end after it starts".into(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            target: request.target,
            reason: request.reason,
            audit: vec![AuditEntry {
                at: now,
                actor: request.requested_by.clone(),
                from: None,
                to: OverrideStatus::Pending,
                note: None,
            }],
            requested_by: request.requested_by,
            approved_by: None,
            requested_at: now,
            decided_at: None,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            original_value: request.original_value,
            override_value: request.override_value,
            status: OverrideStatus::Pending,
        })
    }

    fn transition(
        &mut self,
        to: OverrideStatus,
        actor: &str,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<(), GovernanceError> {
        let allowed = matches!(
            (self.status, to),
            (OverrideStatus::Pending, OverrideStatus::Approved)
                | (OverrideStatus::Pending, OverrideStatus::Rejected)
                | (OverrideStatus::Approved, OverrideStatus::Active)
                | (OverrideStatus::Approved, OverrideStatus::Expired)
                | (OverrideStatus::Active, OverrideStatus::Expired)
                | (OverrideStatus::Pending, OverrideStatus::Cancelled)
                | (OverrideStatus::Approved, OverrideStatus::Cancelled)
                | (OverrideStatus::Active, OverrideStatus::Cancelled)
        );
        if !allowed {
            return Err(GovernanceError::OverrideTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }

        self.audit.push(AuditEntry {
            at: now,
            actor: actor.to_string(),
            from: Some(self.status),
            to,
            note,
        });
        self.status = to;
        Ok(())
    }

    pub fn approve(&mut self, approver: &str, now: DateTime<Utc>, note: Option<String>) -> Result<(), GovernanceError> {
        if approver == self.requested_by {
            return Err(GovernanceError::SelfApproval { id: self.id });
        }
        self.transition(OverrideStatus::Approved, approver, now, note)?;
        self.approved_by = Some(approver.to_string());
        self.decided_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self, approver: &str, now: DateTime<Utc>, note: Option<String>) -> Result<(), GovernanceError> {
        if approver == self.requested_by {
            return Err(GovernanceError::SelfApproval { id: self.id });
        }
        self.transition(OverrideStatus::Rejected, approver, now, note)?;
        self.approved_by = Some(approver.to_string());
        self.decided_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, actor: &str, now: DateTime<Utc>, note: Option<String>) -> Result<(), GovernanceError> {
        self.transition(OverrideStatus::Cancelled, actor, now, note)
    }

    /// Time-driven moves: Approved to Active inside the window, and Approved
    /// or Active to Expired after it. Returns true when the status changed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        let next = match self.status {
            OverrideStatus::Approved | OverrideStatus::Active if now > self.valid_until => OverrideStatus::Expired,
            OverrideStatus::Approved if now >= self.valid_from => OverrideStatus::Active,
            _ => return false,
        };
        self.transition(next, "system", now, None).is_ok()
    }

    /// Whether the override relaxes its rule at `now`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OverrideStatus::Approved | OverrideStatus::Active)
            && self.valid_from <= now
            && now <= self.valid_until
    }

    /// Whether this override admits `projected` usage on limit `limit_id`.
    pub fn covers_limit(&self, limit_id: Uuid, projected: Decimal, now: DateTime<Utc>) -> bool {
        match &self.target {
            OverrideTarget::Limit { limit_id: target } if *target == limit_id => {
                self.is_effective(now) && self.override_value.map_or(true, |ceiling| projected <= ceiling)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn pending(limit_id: Uuid) -> OverrideRule {
        OverrideRule::request(
            OverrideRequest {
                target: OverrideTarget::Limit { limit_id },
                reason: "Hajj group block".into(),
                requested_by: "agent.nasser".into(),
                valid_from: now(),
                valid_until: now() + Duration::days(2),
                original_value: Some(dec!(100000)),
                override_value: Some(dec!(150000)),
            },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_requester_cannot_approve_own_override() {
        let mut rule = pending(Uuid::new_v4());
        assert!(matches!(
            rule.approve("agent.nasser", now(), None),
            Err(GovernanceError::SelfApproval { .. })
        ));
        assert_eq!(rule.status, OverrideStatus::Pending);

        rule.approve("supervisor.huda", now(), Some("ok for season".into())).unwrap();
        assert_eq!(rule.status, OverrideStatus::Approved);
        assert_eq!(rule.approved_by.as_deref(), Some("supervisor.huda"));
        assert_eq!(rule.audit.len(), 2);
    }

    #[test]
    fn test_sweep_activates_then_expires() {
        let mut rule = pending(Uuid::new_v4());
        rule.approve("supervisor.huda", now(), None).unwrap();

        assert!(rule.sweep(now() + Duration::hours(1)));
        assert_eq!(rule.status, OverrideStatus::Active);
        assert!(!rule.sweep(now() + Duration::hours(2)));

        assert!(rule.sweep(now() + Duration::days(3)));
        assert_eq!(rule.status, OverrideStatus::Expired);
        assert!(rule.cancel("supervisor.huda", now() + Duration::days(3), None).is_err());

        let actors: Vec<_> = rule.audit.iter().map(|a| a.to).collect();
        assert_eq!(
            actors,
            vec![
                OverrideStatus::Pending,
                OverrideStatus::Approved,
                OverrideStatus::Active,
                OverrideStatus::Expired
            ]
        );
    }

    #[test]
    fn test_rejected_override_is_final() {
        let mut rule = pending(Uuid::new_v4());
        rule.reject("supervisor.huda", now(), None).unwrap();
        assert!(rule.approve("supervisor.omar", now(), None).is_err());
        assert!(!rule.sweep(now() + Duration::hours(1)));
    }

    #[test]
    fn test_covers_limit_only_within_window_and_ceiling() {
        let limit_id = Uuid::new_v4();
        let mut rule = pending(limit_id);
        assert!(!rule.covers_limit(limit_id, dec!(120000), now()));

        rule.approve("supervisor.huda", now(), None).unwrap();
        assert!(rule.covers_limit(limit_id, dec!(120000), now()));
        assert!(!rule.covers_limit(limit_id, dec!(150001), now()));
        assert!(!rule.covers_limit(Uuid::new_v4(), dec!(120000), now()));
        assert!(!rule.covers_limit(limit_id, dec!(120000), now() + Duration::days(3)));
    }

    #[test]
    fn test_window_must_be_ordered() {
        let result = OverrideRule::request(
            OverrideRequest {
                target: OverrideTarget::Fare {
                    fare_basis: "YOWSV".into(),
                },
                reason: "match competitor".into(),
                requested_by: "agent.nasser".into(),
                valid_from: now(),
                valid_until: now(),
                original_value: None,
                override_value: None,
            },
            now(),
        );
        assert!(matches!(result, Err(GovernanceError::Invalid(_))));
    }
}
