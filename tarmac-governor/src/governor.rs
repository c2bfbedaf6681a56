use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tarmac_core::sink::NotificationSink;
use tarmac_core::Clock;
use tarmac_shared::models::events::{NotificationEvent, NotificationKind};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::limits::{BookingDemand, BookingLimit, Decision, LimitAction, UsageOp};
use crate::overrides::{OverrideRequest, OverrideRule, OverrideTarget};
use crate::repository::{LimitRepository, OverrideRepository};
use crate::GovernanceError;

#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_notification_interval_seconds")]
    pub notification_interval_seconds: i64,
    /// Used when a limit names no recipients of its own.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_notification_interval_seconds() -> i64 {
    3600
}

fn default_max_conflict_retries() -> u32 {
    8
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            notification_interval_seconds: default_notification_interval_seconds(),
            recipients: Vec::new(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitEvaluation {
    pub limit_id: Uuid,
    pub limit_name: String,
    pub decision: Decision,
    pub amount: Decimal,
    pub projected_usage: Decimal,
    pub limit_value: Decimal,
    /// Override that admitted the booking past the ceiling.
    pub override_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmittedUsage {
    pub limit_id: Uuid,
    pub amount: Decimal,
}

/// Usage charged to limits for one booking. Kept on the booking so the
/// exact amounts can be given back on cancel or void.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub reference: String,
    pub usages: Vec<AdmittedUsage>,
    pub evaluations: Vec<LimitEvaluation>,
}

impl Admission {
    pub fn warnings(&self) -> impl Iterator<Item = &LimitEvaluation> {
        self.evaluations
            .iter()
            .filter(|e| matches!(e.decision, Decision::Warning | Decision::CriticalWarning) || e.override_id.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub activated: Vec<Uuid>,
    pub expired: Vec<Uuid>,
}

/// Enforces booking limits and manages the overrides that relax them.
pub struct BookingGovernor {
    limits: Arc<dyn LimitRepository>,
    overrides: Arc<dyn OverrideRepository>,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: GovernorConfig,
}

impl BookingGovernor {
    pub fn new(
        limits: Arc<dyn LimitRepository>,
        overrides: Arc<dyn OverrideRepository>,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: GovernorConfig,
    ) -> Self {
        Self {
            limits,
            overrides,
            notifications,
            clock,
            config,
        }
    }

    fn interval(&self) -> Duration {
        Duration::seconds(self.config.notification_interval_seconds)
    }

    pub async fn create_limit(&self, mut limit: BookingLimit) -> Result<BookingLimit, GovernanceError> {
        limit.validate()?;
        limit.version = 0;
        limit.updated_at = self.clock.now();
        self.limits.insert(&limit).await?;
        info!(limit_id = %limit.id, name = %limit.name, value = %limit.limit_value, "booking limit created");
        Ok(limit)
    }

    pub async fn get_limit(&self, id: Uuid) -> Result<BookingLimit, GovernanceError> {
        self.limits.get(id).await?.ok_or(GovernanceError::LimitNotFound(id))
    }

    pub async fn list_limits(&self) -> Result<Vec<BookingLimit>, GovernanceError> {
        self.limits.list().await
    }

    async fn applicable(&self, demand: &BookingDemand) -> Result<Vec<(BookingLimit, Decimal)>, GovernanceError> {
        Ok(self
            .limits
            .list()
            .await?
            .into_iter()
            .filter(|l| l.is_active && l.scope.matches(demand))
            .map(|l| {
                let amount = demand.amount_for(l.limit_type);
                (l, amount)
            })
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .collect())
    }

    async fn effective_overrides(&self, now: DateTime<Utc>) -> Result<Vec<OverrideRule>, GovernanceError> {
        Ok(self
            .overrides
            .list()
            .await?
            .into_iter()
            .filter(|o| matches!(o.target, OverrideTarget::Limit { .. }) && o.is_effective(now))
            .collect())
    }

    /// Dry run of `admit`: how every matching limit would judge the demand.
    pub async fn evaluate(&self, demand: &BookingDemand) -> Result<Vec<LimitEvaluation>, GovernanceError> {
        let now = self.clock.now();
        let overrides = self.effective_overrides(now).await?;
        let mut evaluations = Vec::new();
        for (mut limit, amount) in self.applicable(demand).await? {
            if limit.period_elapsed(now) {
                limit.reset_for_new_period(now)?;
            }
            evaluations.push(judge(&limit, amount, &overrides, now));
        }
        Ok(evaluations)
    }

    /// Charge the demand to every matching limit, or to none of them.
    ///
    /// Refusals follow the limit's action: `notify` admits and reports,
    /// `block`, `queue` and `redirect` refuse. An effective override admits up
    /// to its ceiling, but only on a limit that allows overrides.
    pub async fn admit(&self, demand: &BookingDemand) -> Result<Admission, GovernanceError> {
        let now = self.clock.now();
        let overrides = self.effective_overrides(now).await?;
        let mut admission = Admission {
            reference: demand.reference.clone(),
            ..Default::default()
        };

        for (limit, amount) in self.applicable(demand).await? {
            let charged = self
                .mutate_limit(limit.id, |limit, now| {
                    let evaluation = judge(limit, amount, &overrides, now);
                    let admitted = evaluation.decision.accepts()
                        || (evaluation.decision == Decision::OverrideRequired && evaluation.override_id.is_some())
                        || limit.action_on_limit == LimitAction::Notify;
                    if !admitted {
                        return Err(refusal(limit, amount, evaluation.decision));
                    }
                    let notification = limit.update_usage(amount, UsageOp::Add, now, self.interval(), &self.config.recipients);
                    Ok((evaluation, notification))
                })
                .await;

            match charged {
                Ok(evaluation) => {
                    admission.usages.push(AdmittedUsage {
                        limit_id: limit.id,
                        amount,
                    });
                    admission.evaluations.push(evaluation);
                }
                Err(err) => {
                    warn!(reference = %demand.reference, limit = %limit.name, "booking refused by limit: {}", err);
                    if let Err(rollback) = self.release(&admission).await {
                        warn!(reference = %demand.reference, "limit rollback incomplete: {}", rollback);
                    }
                    return Err(err);
                }
            }
        }

        debug!(reference = %demand.reference, limits = admission.usages.len(), "booking admitted");
        Ok(admission)
    }

    /// Give back what `admit` charged. Usage never drops below zero.
    pub async fn release(&self, admission: &Admission) -> Result<(), GovernanceError> {
        for usage in &admission.usages {
            self.mutate_limit(usage.limit_id, |limit, now| {
                let notification =
                    limit.update_usage(usage.amount, UsageOp::Subtract, now, self.interval(), &self.config.recipients);
                Ok(((), notification))
            })
            .await?;
        }
        if !admission.usages.is_empty() {
            debug!(reference = %admission.reference, limits = admission.usages.len(), "limit usage released");
        }
        Ok(())
    }

    pub async fn update_usage(&self, limit_id: Uuid, amount: Decimal, op: UsageOp) -> Result<BookingLimit, GovernanceError> {
        if amount < Decimal::ZERO {
            return Err(GovernanceError::Invalid("usage amount must not be negative".into()));
        }
        self.mutate_limit(limit_id, |limit, now| {
            let notification = limit.update_usage(amount, op, now, self.interval(), &self.config.recipients);
            Ok(((), notification))
        })
        .await?;
        self.get_limit(limit_id).await
    }

    pub async fn reset_period(&self, limit_id: Uuid) -> Result<BookingLimit, GovernanceError> {
        let limit = self.get_limit(limit_id).await?;
        if !limit.period_elapsed(self.clock.now()) {
            return Err(GovernanceError::PeriodNotElapsed {
                limit_id,
                period_end: limit.period_end,
            });
        }
        // mutate_limit rolls the elapsed period before the change runs.
        self.mutate_limit(limit_id, |_, _| Ok(((), None))).await?;
        self.get_limit(limit_id).await
    }

    /// Reset every limit whose period has ended. Returns the ids rolled over.
    pub async fn roll_over_periods(&self) -> Result<Vec<Uuid>, GovernanceError> {
        let now = self.clock.now();
        let mut rolled = Vec::new();
        for limit in self.limits.list().await? {
            if limit.period_elapsed(now) {
                self.reset_period(limit.id).await?;
                info!(limit_id = %limit.id, name = %limit.name, "limit period rolled over");
                rolled.push(limit.id);
            }
        }
        Ok(rolled)
    }

    /// Load, change, compare-and-set. An elapsed period is rolled over
    /// before the change sees the row.
    async fn mutate_limit<T, F>(&self, limit_id: Uuid, change: F) -> Result<T, GovernanceError>
    where
        F: Fn(&mut BookingLimit, DateTime<Utc>) -> Result<(T, Option<NotificationEvent>), GovernanceError>,
    {
        let attempts = self.config.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            let mut limit = self.get_limit(limit_id).await?;
            let now = self.clock.now();
            if limit.period_elapsed(now) {
                limit.reset_for_new_period(now)?;
            }
            let (value, notification) = change(&mut limit, now)?;

            match self.limits.save(&limit).await {
                Ok(_) => {
                    if let Some(event) = notification {
                        self.notifications.notify(event).await;
                    }
                    return Ok(value);
                }
                Err(GovernanceError::VersionConflict { expected, actual, .. }) => {
                    debug!(%limit_id, attempt, expected, actual, "limit version conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(GovernanceError::Contention { limit_id, attempts })
    }

    pub async fn request_override(&self, request: OverrideRequest) -> Result<OverrideRule, GovernanceError> {
        if let OverrideTarget::Limit { limit_id } = &request.target {
            let limit = self.get_limit(*limit_id).await?;
            if !limit.overridable() {
                return Err(GovernanceError::Invalid(format!("limit {} does not allow overrides", limit.name)));
            }
        }
        let rule = OverrideRule::request(request, self.clock.now())?;
        self.overrides.put(&rule).await?;
        info!(override_id = %rule.id, requested_by = %rule.requested_by, "override requested");
        self.notify_override(&rule, NotificationKind::OverrideRequested).await;
        Ok(rule)
    }

    pub async fn get_override(&self, id: Uuid) -> Result<OverrideRule, GovernanceError> {
        self.overrides.get(id).await?.ok_or(GovernanceError::OverrideNotFound(id))
    }

    pub async fn list_overrides(&self) -> Result<Vec<OverrideRule>, GovernanceError> {
        self.overrides.list().await
    }

    pub async fn approve_override(&self, id: Uuid, approver: &str, note: Option<String>) -> Result<OverrideRule, GovernanceError> {
        let mut rule = self.get_override(id).await?;
        let now = self.clock.now();
        rule.approve(approver, now, note)?;
        rule.sweep(now);
        self.overrides.put(&rule).await?;
        info!(override_id = %id, approver, "override approved");
        self.notify_override(&rule, NotificationKind::OverrideApproved).await;
        Ok(rule)
    }

    pub async fn reject_override(&self, id: Uuid, approver: &str, note: Option<String>) -> Result<OverrideRule, GovernanceError> {
        let mut rule = self.get_override(id).await?;
        rule.reject(approver, self.clock.now(), note)?;
        self.overrides.put(&rule).await?;
        info!(override_id = %id, approver, "override rejected");
        self.notify_override(&rule, NotificationKind::OverrideRejected).await;
        Ok(rule)
    }

    pub async fn cancel_override(&self, id: Uuid, actor: &str, note: Option<String>) -> Result<OverrideRule, GovernanceError> {
        let mut rule = self.get_override(id).await?;
        rule.cancel(actor, self.clock.now(), note)?;
        self.overrides.put(&rule).await?;
        info!(override_id = %id, actor, "override cancelled");
        Ok(rule)
    }

    /// Apply the time-driven override transitions.
    pub async fn sweep_overrides(&self) -> Result<SweepReport, GovernanceError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        for mut rule in self.overrides.list().await? {
            if rule.sweep(now) {
                self.overrides.put(&rule).await?;
                match rule.status {
                    crate::OverrideStatus::Active => report.activated.push(rule.id),
                    _ => report.expired.push(rule.id),
                }
            }
        }
        if !report.activated.is_empty() || !report.expired.is_empty() {
            info!(activated = report.activated.len(), expired = report.expired.len(), "override sweep");
        }
        Ok(report)
    }

    async fn notify_override(&self, rule: &OverrideRule, kind: NotificationKind) {
        let subject = match &rule.target {
            OverrideTarget::Limit { limit_id } => format!("limit {}", limit_id),
            OverrideTarget::Fare { fare_basis } => format!("fare {}", fare_basis),
            OverrideTarget::Inventory { flight } => format!("inventory {}", flight),
        };
        let verb = match kind {
            NotificationKind::OverrideRequested => "requested",
            NotificationKind::OverrideApproved => "approved",
            _ => "rejected",
        };
        self.notifications
            .notify(NotificationEvent {
                id: Uuid::new_v4(),
                kind,
                subject_id: rule.id,
                subject_name: subject.clone(),
                message: format!("Override on {} {} ({})", subject, verb, rule.reason),
                recipients: self.config.recipients.clone(),
                usage_percentage: None,
                occurred_at: self.clock.now(),
            })
            .await;
    }
}

fn judge(limit: &BookingLimit, amount: Decimal, overrides: &[OverrideRule], now: DateTime<Utc>) -> LimitEvaluation {
    let decision = limit.can_accept(amount);
    let projected_usage = limit.current_usage + amount;
    let override_id = if decision != Decision::OverrideRequired {
        None
    } else {
        overrides
            .iter()
            .find(|o| o.covers_limit(limit.id, projected_usage, now))
            .map(|o| o.id)
    };
    LimitEvaluation {
        limit_id: limit.id,
        limit_name: limit.name.clone(),
        decision,
        amount,
        projected_usage,
        limit_value: limit.limit_value,
        override_id,
    }
}

fn refusal(limit: &BookingLimit, amount: Decimal, decision: Decision) -> GovernanceError {
    if decision == Decision::OverrideRequired {
        GovernanceError::OverrideRequired {
            limit_id: limit.id,
            limit_name: limit.name.clone(),
            current_usage: limit.current_usage,
            requested: amount,
            limit_value: limit.limit_value,
        }
    } else {
        GovernanceError::LimitBlocked {
            limit_id: limit.id,
            limit_name: limit.name.clone(),
            current_usage: limit.current_usage,
            requested: amount,
            limit_value: limit.limit_value,
        }
    }
}
