use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tarmac_shared::models::events::{NotificationEvent, NotificationKind};
use tarmac_shared::money::percentage;
use uuid::Uuid;

use crate::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Seat,
    Revenue,
    Count,
    Time,
    Agent,
    Corporate,
    Group,
}

/// What a limit ceilings. A booking touches every scope it matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum LimitScope {
    Flight { flight_number: String },
    Route { origin: String, destination: String },
    Airline { airline: String },
    Agent { agent_id: String },
    Corporate { client: String },
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPeriod {
    Daily,
    Weekly,
    Monthly,
    /// Lifetime ceiling; never rolls over.
    Total,
}

impl LimitPeriod {
    pub fn next_boundary(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            LimitPeriod::Daily => Some(from + Duration::days(1)),
            LimitPeriod::Weekly => Some(from + Duration::weeks(1)),
            LimitPeriod::Monthly => from.checked_add_months(Months::new(1)),
            LimitPeriod::Total => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitAction {
    Block,
    Notify,
    Override,
    Queue,
    Redirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Ok,
    Warning,
    CriticalWarning,
    OverrideRequired,
    Blocked,
}

impl Decision {
    pub fn accepts(&self) -> bool {
        matches!(self, Decision::Ok | Decision::Warning | Decision::CriticalWarning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOp {
    Add,
    Subtract,
    Reset,
}

/// What one booking consumes, in every unit a limit might count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDemand {
    pub reference: String,
    pub flight_numbers: Vec<String>,
    pub routes: Vec<(String, String)>,
    pub airlines: Vec<String>,
    pub agent_id: String,
    pub corporate_client: Option<String>,
    pub seats: i32,
    pub passengers: u32,
    pub revenue: Decimal,
}

impl BookingDemand {
    /// Amount this demand adds to a limit of `limit_type`.
    pub fn amount_for(&self, limit_type: LimitType) -> Decimal {
        match limit_type {
            LimitType::Seat => Decimal::from(self.seats),
            LimitType::Revenue | LimitType::Agent | LimitType::Corporate => self.revenue,
            LimitType::Count | LimitType::Time => Decimal::ONE,
            LimitType::Group => Decimal::from(self.passengers),
        }
    }
}

impl LimitScope {
    pub fn matches(&self, demand: &BookingDemand) -> bool {
        match self {
            LimitScope::Flight { flight_number } => demand
                .flight_numbers
                .iter()
                .any(|f| f.eq_ignore_ascii_case(flight_number)),
            LimitScope::Route { origin, destination } => demand
                .routes
                .iter()
                .any(|(o, d)| o.eq_ignore_ascii_case(origin) && d.eq_ignore_ascii_case(destination)),
            LimitScope::Airline { airline } => demand.airlines.iter().any(|a| a.eq_ignore_ascii_case(airline)),
            LimitScope::Agent { agent_id } => demand.agent_id == *agent_id,
            LimitScope::Corporate { client } => demand
                .corporate_client
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(client)),
            LimitScope::System => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Warning,
    Critical,
    Exceeded,
}

/// Quota ceiling over one scope and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingLimit {
    pub id: Uuid,
    pub name: String,
    pub limit_type: LimitType,
    pub scope: LimitScope,
    pub limit_value: Decimal,
    pub current_usage: Decimal,
    pub warning_threshold: Decimal,
    pub critical_threshold: Decimal,
    pub action_on_limit: LimitAction,
    pub override_allowed: bool,
    pub period: LimitPeriod,
    pub period_start: DateTime<Utc>,
    pub period_end: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub notification_recipients: Vec<String>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl BookingLimit {
    pub fn new(
        name: impl Into<String>,
        limit_type: LimitType,
        scope: LimitScope,
        limit_value: Decimal,
        period: LimitPeriod,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            limit_type,
            scope,
            limit_value,
            current_usage: Decimal::ZERO,
            warning_threshold: Decimal::new(80, 0),
            critical_threshold: Decimal::new(95, 0),
            action_on_limit: LimitAction::Block,
            override_allowed: false,
            period,
            period_start,
            period_end: period.next_boundary(period_start),
            is_active: true,
            notification_recipients: Vec::new(),
            last_notified_at: None,
            version: 0,
            updated_at: period_start,
        }
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        let invalid = |why: &str| GovernanceError::Invalid(format!("limit {}: {}", self.name, why));
        if self.limit_value <= Decimal::ZERO {
            return Err(invalid("limit value must be positive"));
        }
        if self.current_usage < Decimal::ZERO {
            return Err(invalid("usage cannot be negative"));
        }
        if !(Decimal::ZERO < self.warning_threshold
            && self.warning_threshold <= self.critical_threshold
            && self.critical_threshold <= Decimal::ONE_HUNDRED)
        {
            return Err(invalid("thresholds must satisfy 0 < warning <= critical <= 100"));
        }
        if self.period_end.is_some_and(|end| end <= self.period_start) {
            return Err(invalid("period ends before it starts"));
        }
        Ok(())
    }

    pub fn usage_percentage(&self) -> Decimal {
        percentage(self.current_usage, self.limit_value)
    }

    /// Classify a new booking of `amount` by the usage it would leave behind.
    /// Whether an approved override may lift this limit's ceiling.
    pub fn overridable(&self) -> bool {
        self.override_allowed || self.action_on_limit == LimitAction::Override
    }

    pub fn can_accept(&self, amount: Decimal) -> Decision {
        let projected = self.current_usage + amount;
        if projected > self.limit_value {
            return if self.overridable() {
                Decision::OverrideRequired
            } else {
                Decision::Blocked
            };
        }

        let projected_pct = percentage(projected, self.limit_value);
        if projected_pct >= self.critical_threshold {
            Decision::CriticalWarning
        } else if projected_pct >= self.warning_threshold {
            Decision::Warning
        } else {
            Decision::Ok
        }
    }

    pub fn level(&self) -> Option<UsageLevel> {
        let pct = self.usage_percentage();
        if self.current_usage > self.limit_value {
            Some(UsageLevel::Exceeded)
        } else if pct >= self.critical_threshold {
            Some(UsageLevel::Critical)
        } else if pct >= self.warning_threshold {
            Some(UsageLevel::Warning)
        } else {
            None
        }
    }

    /// Apply a usage change and return the notification it triggers, if any.
    /// Subtraction clamps at zero.
    pub fn update_usage(
        &mut self,
        amount: Decimal,
        op: UsageOp,
        now: DateTime<Utc>,
        interval: Duration,
        fallback_recipients: &[String],
    ) -> Option<NotificationEvent> {
        self.current_usage = match op {
            UsageOp::Add => self.current_usage + amount.max(Decimal::ZERO),
            UsageOp::Subtract => (self.current_usage - amount.max(Decimal::ZERO)).max(Decimal::ZERO),
            UsageOp::Reset => Decimal::ZERO,
        };
        self.updated_at = now;
        self.notification_due(now, interval, fallback_recipients)
    }

    fn notification_due(
        &mut self,
        now: DateTime<Utc>,
        interval: Duration,
        fallback_recipients: &[String],
    ) -> Option<NotificationEvent> {
        let level = self.level()?;
        if self.last_notified_at.is_some_and(|last| now - last < interval) {
            return None;
        }
        self.last_notified_at = Some(now);

        let (kind, label) = match level {
            UsageLevel::Warning => (NotificationKind::LimitWarning, "warning"),
            UsageLevel::Critical => (NotificationKind::LimitCritical, "critical"),
            UsageLevel::Exceeded => (NotificationKind::LimitExceeded, "exceeded"),
        };
        let recipients = if self.notification_recipients.is_empty() {
            fallback_recipients.to_vec()
        } else {
            self.notification_recipients.clone()
        };

        Some(NotificationEvent {
            id: Uuid::new_v4(),
            kind,
            subject_id: self.id,
            subject_name: self.name.clone(),
            message: format!(
                "Booking limit {} {}: usage {} of {} ({}%)",
                self.name,
                label,
                self.current_usage,
                self.limit_value,
                self.usage_percentage()
            ),
            recipients,
            usage_percentage: Some(self.usage_percentage()),
            occurred_at: now,
        })
    }

    pub fn period_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.period_end.is_some_and(|end| end <= now)
    }

    /// Zero the usage and move the window forward. Refused until the
    /// current period has ended.
    pub fn reset_for_new_period(&mut self, now: DateTime<Utc>) -> Result<(), GovernanceError> {
        let Some(end) = self.period_end.filter(|end| *end <= now) else {
            return Err(GovernanceError::PeriodNotElapsed {
                limit_id: self.id,
                period_end: self.period_end,
            });
        };

        let mut start = end;
        let mut next = self.period.next_boundary(start);
        while let Some(boundary) = next.filter(|b| *b <= now) {
            start = boundary;
            next = self.period.next_boundary(start);
        }

        self.period_start = start;
        self.period_end = next;
        self.current_usage = Decimal::ZERO;
        self.last_notified_at = None;
        self.updated_at = now;
        Ok(())
    }
}
