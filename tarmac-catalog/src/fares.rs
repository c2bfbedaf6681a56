use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tarmac_core::{AgentType, CabinClass, PassengerType};
use uuid::Uuid;

use crate::pricing::PricingError;

/// Date window a rule is usable in. Open-ended when `expiry_date` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl Validity {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.effective_date <= day && self.expiry_date.map_or(true, |end| day <= end)
    }

    fn validate(&self, what: &str) -> Result<(), PricingError> {
        match self.expiry_date {
            Some(end) if end < self.effective_date => Err(PricingError::Catalog(format!(
                "{}: expiry {} before effective date {}",
                what, end, self.effective_date
            ))),
            _ => Ok(()),
        }
    }
}

/// Filters a rule applies under. An empty list matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Applicability {
    pub airlines: Vec<String>,
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    pub cabins: Vec<CabinClass>,
    pub booking_classes: Vec<String>,
    pub agent_types: Vec<AgentType>,
    pub corporate_clients: Vec<String>,
}

/// The facts applicability filters are tested against.
#[derive(Debug, Clone, Copy)]
pub struct RuleSubject<'a> {
    pub airline: &'a str,
    pub origin: &'a str,
    pub destination: &'a str,
    pub cabin: CabinClass,
    pub booking_class: &'a str,
    pub agent_type: AgentType,
    pub corporate_client: Option<&'a str>,
}

fn any_or_contains(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

impl Applicability {
    pub fn matches(&self, subject: &RuleSubject<'_>) -> bool {
        any_or_contains(&self.airlines, subject.airline)
            && any_or_contains(&self.origins, subject.origin)
            && any_or_contains(&self.destinations, subject.destination)
            && (self.cabins.is_empty() || self.cabins.contains(&subject.cabin))
            && any_or_contains(&self.booking_classes, subject.booking_class)
            && (self.agent_types.is_empty() || self.agent_types.contains(&subject.agent_type))
            && (self.corporate_clients.is_empty()
                || subject
                    .corporate_client
                    .is_some_and(|c| any_or_contains(&self.corporate_clients, c)))
    }
}

fn check_rate(what: &str, rate: Decimal) -> Result<(), PricingError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(PricingError::Catalog(format!("{}: rate {} outside 0..=100", what, rate)));
    }
    Ok(())
}

fn check_non_negative(what: &str, amount: Decimal) -> Result<(), PricingError> {
    if amount < Decimal::ZERO {
        return Err(PricingError::Catalog(format!("{}: negative amount {}", what, amount)));
    }
    Ok(())
}

fn check_bounds(what: &str, min: Option<Decimal>, max: Option<Decimal>) -> Result<(), PricingError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(PricingError::Catalog(format!("{}: minimum {} above maximum {}", what, min, max)));
        }
    }
    Ok(())
}

/// Published fare for one airline, route, cabin and booking class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fare {
    pub id: Uuid,
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub cabin: CabinClass,
    pub booking_class: String,
    pub fare_basis: String,
    pub base_fare: Decimal,
    pub currency: String,
    #[serde(default)]
    pub child_discount_pct: Decimal,
    #[serde(default)]
    pub infant_discount_pct: Decimal,
    pub validity: Validity,
}

impl Fare {
    pub fn discount_for(&self, passenger_type: PassengerType) -> Decimal {
        match passenger_type {
            PassengerType::Adult => Decimal::ZERO,
            PassengerType::Child => self.child_discount_pct,
            PassengerType::Infant => self.infant_discount_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeBase {
    BaseFare,
    AdjustedFare,
    /// Amount of an earlier component, by code.
    Component(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmountRule {
    Fixed { amount: Decimal },
    Percentage { rate: Decimal, of: ChargeBase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Tax,
    Surcharge,
    Fee,
}

/// Tax, fuel surcharge or fee added on top of the fare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareComponent {
    pub code: String,
    pub name: String,
    pub kind: ComponentKind,
    pub amount: AmountRule,
    /// Passenger types charged. Empty means all.
    #[serde(default)]
    pub passenger_types: Vec<PassengerType>,
    #[serde(default)]
    pub applies: Applicability,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    pub validity: Validity,
}

impl FareComponent {
    pub fn charges(&self, passenger_type: PassengerType) -> bool {
        self.passenger_types.is_empty() || self.passenger_types.contains(&passenger_type)
    }

    pub fn clamp(&self, amount: Decimal) -> Decimal {
        let amount = self.min_amount.map_or(amount, |min| amount.max(min));
        self.max_amount.map_or(amount, |max| amount.min(max))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_value: Decimal,
    #[serde(default)]
    pub max_value: Option<Decimal>,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionKind {
    Percentage { rate: Decimal },
    Fixed { amount: Decimal },
    /// Rate picked by booking value. A value no tier covers earns nothing.
    Tiered { tiers: Vec<CommissionTier> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub id: Uuid,
    pub name: String,
    pub kind: CommissionKind,
    #[serde(default)]
    pub applies: Applicability,
    pub validity: Validity,
    #[serde(default)]
    pub maximum_commission: Option<Decimal>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkupKind {
    Percentage { rate: Decimal },
    Fixed { amount: Decimal },
    /// `base_rate + demand_rate * (load_factor / 100)^2`
    Dynamic { base_rate: Decimal, demand_rate: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupRule {
    pub id: Uuid,
    pub name: String,
    pub kind: MarkupKind,
    #[serde(default)]
    pub applies: Applicability,
    pub validity: Validity,
    #[serde(default)]
    pub min_markup: Option<Decimal>,
    #[serde(default)]
    pub max_markup: Option<Decimal>,
    #[serde(default)]
    pub priority: i32,
}

/// Negotiated amount for a corporate client. Replaces the published fare
/// and passenger discount outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateFare {
    pub id: Uuid,
    pub corporate_client: String,
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub cabin: CabinClass,
    pub negotiated_amount: Decimal,
    pub currency: String,
    pub validity: Validity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromoDiscount {
    Percentage {
        rate: Decimal,
        #[serde(default)]
        max_discount: Option<Decimal>,
    },
    Fixed {
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub discount: PromoDiscount,
    #[serde(default)]
    pub applies: Applicability,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub max_usage: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub max_uses_per_user: Option<u32>,
    #[serde(default)]
    pub per_user_usage: HashMap<String, u32>,
    #[serde(default)]
    pub minimum_booking_value: Option<Decimal>,
}

fn default_true() -> bool {
    true
}

/// All pricing reference data. Loaded once, validated, then shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareCatalog {
    pub fares: Vec<Fare>,
    pub components: Vec<FareComponent>,
    pub commissions: Vec<CommissionRule>,
    pub markups: Vec<MarkupRule>,
    pub corporate_fares: Vec<CorporateFare>,
    pub promo_codes: Vec<PromoCode>,
}

impl FareCatalog {
    pub fn from_json(raw: &str) -> Result<Self, PricingError> {
        let catalog: FareCatalog =
            serde_json::from_str(raw).map_err(|e| PricingError::Catalog(format!("malformed catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), PricingError> {
        for fare in &self.fares {
            let what = format!("fare {} {}-{} {}", fare.airline, fare.origin, fare.destination, fare.booking_class);
            check_non_negative(&what, fare.base_fare)?;
            check_rate(&what, fare.child_discount_pct)?;
            check_rate(&what, fare.infant_discount_pct)?;
            fare.validity.validate(&what)?;
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for component in &self.components {
            let what = format!("component {}", component.code);
            match &component.amount {
                AmountRule::Fixed { amount } => check_non_negative(&what, *amount)?,
                AmountRule::Percentage { rate, of } => {
                    check_rate(&what, *rate)?;
                    if let ChargeBase::Component(code) = of {
                        if !declared.contains(code.as_str()) {
                            return Err(PricingError::Catalog(format!(
                                "{}: references {} which is not declared before it",
                                what, code
                            )));
                        }
                    }
                }
            }
            check_bounds(&what, component.min_amount, component.max_amount)?;
            component.validity.validate(&what)?;
            declared.insert(component.code.as_str());
        }

        for rule in &self.commissions {
            let what = format!("commission {}", rule.name);
            match &rule.kind {
                CommissionKind::Percentage { rate } => check_rate(&what, *rate)?,
                CommissionKind::Fixed { amount } => check_non_negative(&what, *amount)?,
                CommissionKind::Tiered { tiers } => {
                    let mut floor: Option<Decimal> = None;
                    for tier in tiers {
                        check_rate(&what, tier.rate)?;
                        check_bounds(&what, Some(tier.min_value), tier.max_value)?;
                        if floor.is_some_and(|f| tier.min_value < f) {
                            return Err(PricingError::Catalog(format!("{}: tiers out of order", what)));
                        }
                        floor = Some(tier.max_value.unwrap_or(tier.min_value));
                    }
                }
            }
            if let Some(cap) = rule.maximum_commission {
                check_non_negative(&what, cap)?;
            }
            rule.validity.validate(&what)?;
        }

        for rule in &self.markups {
            let what = format!("markup {}", rule.name);
            match &rule.kind {
                MarkupKind::Percentage { rate } => check_rate(&what, *rate)?,
                MarkupKind::Fixed { amount } => check_non_negative(&what, *amount)?,
                MarkupKind::Dynamic { base_rate, demand_rate } => {
                    check_rate(&what, *base_rate)?;
                    check_rate(&what, *demand_rate)?;
                }
            }
            check_bounds(&what, rule.min_markup, rule.max_markup)?;
            rule.validity.validate(&what)?;
        }

        for corporate in &self.corporate_fares {
            let what = format!("corporate fare {}", corporate.corporate_client);
            check_non_negative(&what, corporate.negotiated_amount)?;
            corporate.validity.validate(&what)?;
        }

        let mut codes = HashSet::new();
        for promo in &self.promo_codes {
            let what = format!("promo {}", promo.code);
            if !codes.insert(promo.code.to_ascii_uppercase()) {
                return Err(PricingError::Catalog(format!("{}: duplicate code", what)));
            }
            match &promo.discount {
                PromoDiscount::Percentage { rate, max_discount } => {
                    check_rate(&what, *rate)?;
                    if let Some(cap) = max_discount {
                        check_non_negative(&what, *cap)?;
                    }
                }
                PromoDiscount::Fixed { amount } => check_non_negative(&what, *amount)?,
            }
            if promo.valid_until < promo.valid_from {
                return Err(PricingError::Catalog(format!("{}: window ends before it starts", what)));
            }
        }

        Ok(())
    }
}
