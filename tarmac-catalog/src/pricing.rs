use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tarmac_core::{AgentType, CabinClass, Clock, CoreError, PassengerType, PromoRejection, SegmentRef};
use tarmac_shared::money::{percent_of, round_minor};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fares::{
    AmountRule, ChargeBase, CommissionKind, CommissionRule, ComponentKind, CorporateFare, Fare, FareCatalog,
    MarkupKind, MarkupRule, PromoCode, PromoDiscount, RuleSubject,
};

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("No applicable fare: {0}")]
    FareNotFound(String),

    #[error("Promo code {code} rejected: {reason}")]
    PromoInvalid { code: String, reason: PromoRejection },

    #[error("Itinerary mixes currencies: {expected} and {found}")]
    CurrencyMismatch { expected: String, found: String },

    #[error("Invalid fare catalog: {0}")]
    Catalog(String),
}

impl From<PricingError> for CoreError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::FareNotFound(what) => CoreError::FareNotFound(what),
            PricingError::PromoInvalid { code, reason } => CoreError::PromoInvalid { code, reason },
            other => CoreError::Validation(other.to_string()),
        }
    }
}

/// Everything besides the passenger type that influences a price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingContext {
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub cabin: CabinClass,
    pub booking_class: String,
    pub travel_date: NaiveDate,
    pub agent_type: AgentType,
    pub corporate_client: Option<String>,
    pub user_id: Option<String>,
    /// Flight load factor in percent, feeds dynamic markup.
    pub load_factor: Decimal,
    pub promo_code: Option<String>,
}

impl PricingContext {
    pub fn for_segment(
        segment: &SegmentRef,
        origin: impl Into<String>,
        destination: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        Self {
            airline: segment.flight.airline_code().to_string(),
            origin: origin.into(),
            destination: destination.into(),
            cabin: segment.cabin,
            booking_class: segment.booking_class.clone(),
            travel_date: segment.flight.departure_date,
            agent_type,
            corporate_client: None,
            user_id: None,
            load_factor: Decimal::ZERO,
            promo_code: None,
        }
    }

    fn subject(&self) -> RuleSubject<'_> {
        RuleSubject {
            airline: &self.airline,
            origin: &self.origin,
            destination: &self.destination,
            cabin: self.cabin,
            booking_class: &self.booking_class,
            agent_type: self.agent_type,
            corporate_client: self.corporate_client.as_deref(),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} {}-{} {}/{} on {}",
            self.airline,
            self.origin,
            self.destination,
            self.cabin.code(),
            self.booking_class,
            self.travel_date
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedComponent {
    pub code: String,
    pub kind: ComponentKind,
    pub amount: Decimal,
}

/// Priced passenger. Intermediate figures are unrounded; only `total` is
/// rounded to the currency's minor unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub passenger_type: PassengerType,
    pub fare_id: Option<Uuid>,
    pub corporate_fare_id: Option<Uuid>,
    pub fare_basis: Option<String>,
    pub currency: String,
    pub base_fare: Decimal,
    pub passenger_discount: Decimal,
    pub adjusted_fare: Decimal,
    pub components: Vec<AppliedComponent>,
    pub taxes: Decimal,
    pub markup: Decimal,
    pub commission: Decimal,
    pub promo_discount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSegment {
    pub segment: SegmentRef,
    pub origin: String,
    pub destination: String,
    pub load_factor: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub segments: Vec<QuoteSegment>,
    pub passengers: Vec<PassengerType>,
    pub agent_type: AgentType,
    pub corporate_client: Option<String>,
    pub user_id: Option<String>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub segment_index: usize,
    pub passenger_index: usize,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub lines: Vec<QuoteLine>,
    pub currency: String,
    pub subtotal: Decimal,
    pub promo_code: Option<String>,
    pub promo_discount: Decimal,
    pub total: Decimal,
}

impl Quote {
    pub fn passenger_total(&self, passenger_index: usize) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.passenger_index == passenger_index)
            .map(|l| l.breakdown.total)
            .sum()
    }
}

/// Layered fare calculation over an immutable [`FareCatalog`]. Promo usage
/// counters are the only mutable state and sit behind their own lock.
pub struct PricingEngine {
    catalog: FareCatalog,
    promos: RwLock<HashMap<String, PromoCode>>,
    clock: Arc<dyn Clock>,
}

impl PricingEngine {
    pub fn new(mut catalog: FareCatalog, clock: Arc<dyn Clock>) -> Self {
        let promos = std::mem::take(&mut catalog.promo_codes)
            .into_iter()
            .map(|p| (p.code.to_ascii_uppercase(), p))
            .collect();
        Self {
            catalog,
            promos: RwLock::new(promos),
            clock,
        }
    }

    pub fn catalog(&self) -> &FareCatalog {
        &self.catalog
    }

    /// Exact match on airline, route, cabin and booking class, usable today.
    /// The most recently effective fare wins.
    pub fn resolve_fare(&self, ctx: &PricingContext) -> Result<&Fare, PricingError> {
        let today = self.clock.today();
        self.catalog
            .fares
            .iter()
            .filter(|f| {
                f.airline.eq_ignore_ascii_case(&ctx.airline)
                    && f.origin.eq_ignore_ascii_case(&ctx.origin)
                    && f.destination.eq_ignore_ascii_case(&ctx.destination)
                    && f.cabin == ctx.cabin
                    && f.booking_class.eq_ignore_ascii_case(&ctx.booking_class)
                    && f.validity.contains(today)
            })
            .max_by_key(|f| f.validity.effective_date)
            .ok_or_else(|| PricingError::FareNotFound(ctx.describe()))
    }

    fn corporate_fare(&self, ctx: &PricingContext) -> Option<&CorporateFare> {
        let client = ctx.corporate_client.as_deref()?;
        let today = self.clock.today();
        self.catalog.corporate_fares.iter().find(|c| {
            c.corporate_client.eq_ignore_ascii_case(client)
                && c.airline.eq_ignore_ascii_case(&ctx.airline)
                && c.origin.eq_ignore_ascii_case(&ctx.origin)
                && c.destination.eq_ignore_ascii_case(&ctx.destination)
                && c.cabin == ctx.cabin
                && c.validity.contains(today)
        })
    }

    /// Price one passenger, resolving the fare (or corporate contract) from
    /// the context.
    pub fn price(&self, passenger_type: PassengerType, ctx: &PricingContext) -> Result<PriceBreakdown, PricingError> {
        if let Some(corporate) = self.corporate_fare(ctx) {
            return self.build(
                FareSource {
                    base: corporate.negotiated_amount,
                    discount_pct: Decimal::ZERO,
                    currency: &corporate.currency,
                    fare_id: None,
                    corporate_fare_id: Some(corporate.id),
                    fare_basis: None,
                },
                passenger_type,
                ctx,
            );
        }
        let fare = self.resolve_fare(ctx)?;
        self.price_fare(fare, passenger_type, ctx)
    }

    /// Price one passenger on a given fare.
    pub fn price_fare(
        &self,
        fare: &Fare,
        passenger_type: PassengerType,
        ctx: &PricingContext,
    ) -> Result<PriceBreakdown, PricingError> {
        if !fare.validity.contains(self.clock.today()) {
            return Err(PricingError::FareNotFound(format!("fare {} not valid today", fare.fare_basis)));
        }
        self.build(
            FareSource {
                base: fare.base_fare,
                discount_pct: fare.discount_for(passenger_type),
                currency: &fare.currency,
                fare_id: Some(fare.id),
                corporate_fare_id: None,
                fare_basis: Some(fare.fare_basis.clone()),
            },
            passenger_type,
            ctx,
        )
    }

    fn build(
        &self,
        source: FareSource<'_>,
        passenger_type: PassengerType,
        ctx: &PricingContext,
    ) -> Result<PriceBreakdown, PricingError> {
        let today = self.clock.today();
        let subject = ctx.subject();

        let base = source.base;
        let passenger_discount = percent_of(base, source.discount_pct);
        let adjusted = base - passenger_discount;

        let mut computed: HashMap<&str, Decimal> = HashMap::new();
        let mut components = Vec::new();
        for component in self.catalog.components.iter().filter(|c| {
            c.validity.contains(today) && c.charges(passenger_type) && c.applies.matches(&subject)
        }) {
            let raw = match &component.amount {
                AmountRule::Fixed { amount } => *amount,
                AmountRule::Percentage { rate, of } => {
                    let of = match of {
                        ChargeBase::BaseFare => base,
                        ChargeBase::AdjustedFare => adjusted,
                        ChargeBase::Component(code) => computed.get(code.as_str()).copied().unwrap_or_default(),
                    };
                    percent_of(of, *rate)
                }
            };
            let amount = component.clamp(raw);
            computed.insert(component.code.as_str(), amount);
            components.push(AppliedComponent {
                code: component.code.clone(),
                kind: component.kind,
                amount,
            });
        }
        let taxes: Decimal = components.iter().map(|c| c.amount).sum();

        let commission = self
            .pick(&self.catalog.commissions, |r| r.validity.contains(today) && r.applies.matches(&subject), |r| r.priority)
            .map(|rule| commission_for(rule, adjusted, adjusted + taxes))
            .unwrap_or_default();

        let markup = self
            .pick(&self.catalog.markups, |r| r.validity.contains(today) && r.applies.matches(&subject), |r| r.priority)
            .map(|rule| markup_for(rule, adjusted, ctx.load_factor))
            .unwrap_or_default();

        let before_promo = adjusted + taxes + markup - commission;
        let promo_discount = match ctx.promo_code.as_deref() {
            Some(code) => self.check_promo(code, ctx, before_promo)?,
            None => Decimal::ZERO,
        };

        let total = round_minor((before_promo - promo_discount).max(Decimal::ZERO), source.currency);

        Ok(PriceBreakdown {
            passenger_type,
            fare_id: source.fare_id,
            corporate_fare_id: source.corporate_fare_id,
            fare_basis: source.fare_basis,
            currency: source.currency.to_string(),
            base_fare: base,
            passenger_discount,
            adjusted_fare: adjusted,
            components,
            taxes,
            markup,
            commission,
            promo_discount,
            total,
        })
    }

    /// Highest priority wins; ties go to the first declared.
    fn pick<'a, T>(
        &self,
        rules: &'a [T],
        usable: impl Fn(&T) -> bool,
        priority: impl Fn(&T) -> i32,
    ) -> Option<&'a T> {
        rules
            .iter()
            .filter(|r| usable(r))
            .fold(None, |best: Option<&T>, r| match best {
                Some(b) if priority(b) >= priority(r) => Some(b),
                _ => Some(r),
            })
    }

    /// Price every passenger on every segment, then apply the promo once to
    /// the grand total.
    pub fn quote(&self, request: &QuoteRequest) -> Result<Quote, PricingError> {
        if request.segments.is_empty() || request.passengers.is_empty() {
            return Err(PricingError::FareNotFound("nothing to price".to_string()));
        }

        let mut lines = Vec::with_capacity(request.segments.len() * request.passengers.len());
        let mut currency: Option<String> = None;
        let mut first_ctx = None;

        for (segment_index, quoted) in request.segments.iter().enumerate() {
            let mut ctx = PricingContext::for_segment(
                &quoted.segment,
                quoted.origin.clone(),
                quoted.destination.clone(),
                request.agent_type,
            );
            ctx.corporate_client = request.corporate_client.clone();
            ctx.user_id = request.user_id.clone();
            ctx.load_factor = quoted.load_factor;

            for (passenger_index, passenger_type) in request.passengers.iter().enumerate() {
                let breakdown = self.price(*passenger_type, &ctx)?;
                match &currency {
                    None => currency = Some(breakdown.currency.clone()),
                    Some(expected) if *expected != breakdown.currency => {
                        return Err(PricingError::CurrencyMismatch {
                            expected: expected.clone(),
                            found: breakdown.currency,
                        })
                    }
                    Some(_) => {}
                }
                lines.push(QuoteLine {
                    segment_index,
                    passenger_index,
                    breakdown,
                });
            }
            if first_ctx.is_none() {
                first_ctx = Some(ctx);
            }
        }

        let currency = currency.unwrap_or_default();
        let subtotal: Decimal = lines.iter().map(|l| l.breakdown.total).sum();

        let promo_discount = match (request.promo_code.as_deref(), first_ctx.as_ref()) {
            (Some(code), Some(ctx)) => self.check_promo(code, ctx, subtotal)?,
            _ => Decimal::ZERO,
        };

        let total = round_minor(subtotal - promo_discount, &currency);
        debug!(segments = request.segments.len(), passengers = request.passengers.len(), %total, "quote priced");

        Ok(Quote {
            lines,
            currency,
            subtotal,
            promo_code: request.promo_code.as_ref().map(|c| c.to_ascii_uppercase()),
            promo_discount,
            total,
        })
    }

    /// Validate `code` against a booking value and return the discount it
    /// grants. Does not consume a use.
    pub fn check_promo(&self, code: &str, ctx: &PricingContext, value: Decimal) -> Result<Decimal, PricingError> {
        let promos = self.promos.read();
        let result = match promos.get(&code.to_ascii_uppercase()) {
            None => Err(PromoRejection::UnknownCode),
            Some(promo) => self.usable(promo, ctx.user_id.as_deref()).and_then(|_| {
                if !promo.applies.matches(&ctx.subject()) {
                    return Err(PromoRejection::NotApplicable);
                }
                match promo.minimum_booking_value {
                    Some(minimum) if value < minimum => Err(PromoRejection::BelowMinimum { minimum, actual: value }),
                    _ => Ok(discount_for(&promo.discount, value)),
                }
            }),
        };

        result.map_err(|reason| {
            warn!(code, %reason, "promo code rejected");
            PricingError::PromoInvalid {
                code: code.to_ascii_uppercase(),
                reason,
            }
        })
    }

    /// Consume one use of `code`. Checked and incremented under one write
    /// lock so concurrent confirmations cannot exceed the caps.
    pub fn redeem_promo(&self, code: &str, user_id: Option<&str>) -> Result<(), PricingError> {
        let mut promos = self.promos.write();
        let key = code.to_ascii_uppercase();
        let reject = |reason| PricingError::PromoInvalid {
            code: key.clone(),
            reason,
        };

        let promo = promos.get(&key).ok_or_else(|| reject(PromoRejection::UnknownCode))?;
        self.usable(promo, user_id).map_err(reject)?;

        if let Some(promo) = promos.get_mut(&key) {
            promo.usage_count += 1;
            if let Some(user) = user_id {
                *promo.per_user_usage.entry(user.to_string()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// Give back a use taken by `redeem_promo` for a booking that never
    /// completed.
    pub fn release_promo(&self, code: &str, user_id: Option<&str>) {
        let mut promos = self.promos.write();
        let Some(promo) = promos.get_mut(&code.to_ascii_uppercase()) else {
            return;
        };
        promo.usage_count = promo.usage_count.saturating_sub(1);
        if let Some(count) = user_id.and_then(|user| promo.per_user_usage.get_mut(user)) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn promo(&self, code: &str) -> Option<PromoCode> {
        self.promos.read().get(&code.to_ascii_uppercase()).cloned()
    }

    fn usable(&self, promo: &PromoCode, user_id: Option<&str>) -> Result<(), PromoRejection> {
        let now = self.clock.now();
        if !promo.is_active {
            return Err(PromoRejection::Inactive);
        }
        if now < promo.valid_from {
            return Err(PromoRejection::NotYetValid);
        }
        if now > promo.valid_until {
            return Err(PromoRejection::Expired);
        }
        if promo.max_usage.is_some_and(|max| promo.usage_count >= max) {
            return Err(PromoRejection::UsageExhausted);
        }
        if let (Some(max), Some(user)) = (promo.max_uses_per_user, user_id) {
            if promo.per_user_usage.get(user).copied().unwrap_or(0) >= max {
                return Err(PromoRejection::PerUserLimitReached);
            }
        }
        Ok(())
    }
}

struct FareSource<'a> {
    base: Decimal,
    discount_pct: Decimal,
    currency: &'a str,
    fare_id: Option<Uuid>,
    corporate_fare_id: Option<Uuid>,
    fare_basis: Option<String>,
}

fn commission_for(rule: &CommissionRule, adjusted: Decimal, booking_value: Decimal) -> Decimal {
    let raw = match &rule.kind {
        CommissionKind::Percentage { rate } => percent_of(adjusted, *rate),
        CommissionKind::Fixed { amount } => *amount,
        CommissionKind::Tiered { tiers } => tiers
            .iter()
            .find(|t| booking_value >= t.min_value && t.max_value.map_or(true, |max| booking_value < max))
            .map(|t| percent_of(adjusted, t.rate))
            .unwrap_or_default(),
    };
    rule.maximum_commission.map_or(raw, |cap| raw.min(cap))
}

fn markup_for(rule: &MarkupRule, adjusted: Decimal, load_factor: Decimal) -> Decimal {
    let raw = match &rule.kind {
        MarkupKind::Percentage { rate } => percent_of(adjusted, *rate),
        MarkupKind::Fixed { amount } => *amount,
        MarkupKind::Dynamic { base_rate, demand_rate } => {
            let demand = load_factor / Decimal::ONE_HUNDRED;
            percent_of(adjusted, *base_rate + *demand_rate * demand * demand)
        }
    };
    let raw = rule.min_markup.map_or(raw, |min| raw.max(min));
    rule.max_markup.map_or(raw, |max| raw.min(max))
}

fn discount_for(discount: &PromoDiscount, value: Decimal) -> Decimal {
    let raw = match discount {
        PromoDiscount::Percentage { rate, max_discount } => {
            let d = percent_of(value, *rate);
            max_discount.map_or(d, |cap| d.min(cap))
        }
        PromoDiscount::Fixed { amount } => *amount,
    };
    raw.min(value).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fares::{Applicability, CommissionTier, FareComponent, Validity};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tarmac_core::{FlightDateKey, ManualClock};

    fn validity() -> Validity {
        Validity {
            effective_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2026, 12, 31),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()))
    }

    fn fare() -> Fare {
        Fare {
            id: Uuid::new_v4(),
            airline: "SV".into(),
            origin: "RUH".into(),
            destination: "JED".into(),
            cabin: CabinClass::Economy,
            booking_class: "M".into(),
            fare_basis: "MOWSA".into(),
            base_fare: dec!(500),
            currency: "SAR".into(),
            child_discount_pct: dec!(25),
            infant_discount_pct: dec!(90),
            validity: validity(),
        }
    }

    fn fixed_tax(code: &str, amount: Decimal) -> FareComponent {
        FareComponent {
            code: code.into(),
            name: code.into(),
            kind: ComponentKind::Tax,
            amount: AmountRule::Fixed { amount },
            passenger_types: vec![],
            applies: Applicability::default(),
            min_amount: None,
            max_amount: None,
            validity: validity(),
        }
    }

    fn promo(code: &str) -> PromoCode {
        PromoCode {
            code: code.into(),
            description: String::new(),
            discount: PromoDiscount::Percentage {
                rate: dec!(10),
                max_discount: None,
            },
            applies: Applicability::default(),
            valid_from: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
            valid_until: Utc.with_ymd_and_hms(2026, 10, 31, 0, 0, 0).unwrap(),
            is_active: true,
            max_usage: None,
            usage_count: 0,
            max_uses_per_user: None,
            per_user_usage: HashMap::new(),
            minimum_booking_value: None,
        }
    }

    fn ctx() -> PricingContext {
        let segment = SegmentRef {
            flight: FlightDateKey::new("SV1020", NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()),
            cabin: CabinClass::Economy,
            booking_class: "M".into(),
        };
        PricingContext::for_segment(&segment, "RUH", "JED", AgentType::Iata)
    }

    fn engine(catalog: FareCatalog) -> PricingEngine {
        PricingEngine::new(catalog, clock())
    }

    #[test]
    fn test_child_fare_with_fixed_tax() {
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            components: vec![fixed_tax("YR", dec!(35))],
            ..Default::default()
        });

        let child = engine.price(PassengerType::Child, &ctx()).unwrap();
        assert_eq!(child.adjusted_fare, dec!(375));
        assert_eq!(child.total, dec!(410));

        let adult = engine.price(PassengerType::Adult, &ctx()).unwrap();
        assert_eq!(adult.total, dec!(535));
    }

    #[test]
    fn test_price_is_deterministic() {
        let mut promo = promo("AUTUMN10");
        promo.max_usage = Some(5);
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            components: vec![fixed_tax("YR", dec!(35))],
            promo_codes: vec![promo],
            ..Default::default()
        });
        let mut ctx = ctx();
        ctx.promo_code = Some("autumn10".into());
        ctx.load_factor = dec!(73.5);

        let first = engine.price(PassengerType::Adult, &ctx).unwrap();
        let second = engine.price(PassengerType::Adult, &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.promo_discount, dec!(53.5));
        assert_eq!(first.total, dec!(481.5));
    }

    #[test]
    fn test_percentage_components_round_only_at_the_end() {
        let mut yq = fixed_tax("YQ", Decimal::ZERO);
        yq.amount = AmountRule::Percentage {
            rate: dec!(3.333),
            of: ChargeBase::BaseFare,
        };
        let mut vat = fixed_tax("VAT", Decimal::ZERO);
        vat.amount = AmountRule::Percentage {
            rate: dec!(15),
            of: ChargeBase::Component("YQ".into()),
        };
        vat.min_amount = Some(dec!(1));

        let engine = engine(FareCatalog {
            fares: vec![fare()],
            components: vec![yq, vat],
            ..Default::default()
        });
        let price = engine.price(PassengerType::Adult, &ctx()).unwrap();

        assert_eq!(price.components[0].amount, dec!(16.665));
        assert_eq!(price.components[1].amount, dec!(2.49975));
        // 500 + 16.665 + 2.49975 = 519.16475
        assert_eq!(price.total, dec!(519.16));
    }

    #[test]
    fn test_tiered_commission_miss_is_zero_and_cap_applies() {
        let rule = CommissionRule {
            id: Uuid::new_v4(),
            name: "tiers".into(),
            kind: CommissionKind::Tiered {
                tiers: vec![CommissionTier {
                    min_value: dec!(1000),
                    max_value: None,
                    rate: dec!(5),
                }],
            },
            applies: Applicability::default(),
            validity: validity(),
            maximum_commission: Some(dec!(20)),
            priority: 0,
        };
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            commissions: vec![rule.clone()],
            ..Default::default()
        });
        assert_eq!(engine.price(PassengerType::Adult, &ctx()).unwrap().commission, Decimal::ZERO);

        let mut pricey = fare();
        pricey.base_fare = dec!(2000);
        let engine = self::engine(FareCatalog {
            fares: vec![pricey],
            commissions: vec![rule],
            ..Default::default()
        });
        let price = engine.price(PassengerType::Adult, &ctx()).unwrap();
        assert_eq!(price.commission, dec!(20));
        assert_eq!(price.total, dec!(1980));
    }

    #[test]
    fn test_dynamic_markup_follows_load_factor() {
        let rule = MarkupRule {
            id: Uuid::new_v4(),
            name: "demand".into(),
            kind: MarkupKind::Dynamic {
                base_rate: dec!(2),
                demand_rate: dec!(8),
            },
            applies: Applicability::default(),
            validity: validity(),
            min_markup: None,
            max_markup: Some(dec!(40)),
            priority: 0,
        };
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            markups: vec![rule],
            ..Default::default()
        });

        let mut ctx = ctx();
        ctx.load_factor = dec!(50);
        // 2 + 8 * 0.25 = 4% of 500
        assert_eq!(engine.price(PassengerType::Adult, &ctx).unwrap().markup, dec!(20));

        ctx.load_factor = dec!(100);
        // 10% of 500 = 50, clamped to 40
        assert_eq!(engine.price(PassengerType::Adult, &ctx).unwrap().markup, dec!(40));
    }

    #[test]
    fn test_corporate_fare_replaces_published_fare() {
        let corporate = CorporateFare {
            id: Uuid::new_v4(),
            corporate_client: "ARAMCO".into(),
            airline: "SV".into(),
            origin: "RUH".into(),
            destination: "JED".into(),
            cabin: CabinClass::Economy,
            negotiated_amount: dec!(420),
            currency: "SAR".into(),
            validity: validity(),
        };
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            components: vec![fixed_tax("YR", dec!(35))],
            corporate_fares: vec![corporate],
            ..Default::default()
        });

        let mut ctx = ctx();
        ctx.corporate_client = Some("aramco".into());
        let child = engine.price(PassengerType::Child, &ctx).unwrap();
        assert_eq!(child.base_fare, dec!(420));
        assert_eq!(child.passenger_discount, Decimal::ZERO);
        assert_eq!(child.total, dec!(455));
        assert!(child.fare_id.is_none());
    }

    #[test]
    fn test_missing_fare_is_an_error() {
        let engine = engine(FareCatalog::default());
        assert!(matches!(
            engine.price(PassengerType::Adult, &ctx()),
            Err(PricingError::FareNotFound(_))
        ));

        let mut expired = fare();
        expired.validity.expiry_date = NaiveDate::from_ymd_opt(2026, 6, 30);
        let engine = self::engine(FareCatalog {
            fares: vec![expired],
            ..Default::default()
        });
        assert!(engine.price(PassengerType::Adult, &ctx()).is_err());
    }

    #[test]
    fn test_exhausted_promo_is_rejected() {
        let mut once = promo("ONCE");
        once.max_usage = Some(1);
        once.usage_count = 1;
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            promo_codes: vec![once],
            ..Default::default()
        });

        let mut ctx = ctx();
        ctx.promo_code = Some("ONCE".into());
        let err = engine.price(PassengerType::Adult, &ctx).unwrap_err();
        assert!(matches!(
            err,
            PricingError::PromoInvalid {
                reason: PromoRejection::UsageExhausted,
                ..
            }
        ));
    }

    #[test]
    fn test_promo_redeemed_once_then_exhausted() {
        let mut single = promo("SINGLE");
        single.max_usage = Some(1);
        single.max_uses_per_user = Some(1);
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            promo_codes: vec![single],
            ..Default::default()
        });

        let mut ctx = ctx();
        ctx.promo_code = Some("SINGLE".into());
        assert!(engine.price(PassengerType::Adult, &ctx).is_ok());
        engine.redeem_promo("single", Some("agent-7")).unwrap();

        let err = engine.price(PassengerType::Adult, &ctx).unwrap_err();
        assert!(matches!(
            err,
            PricingError::PromoInvalid {
                reason: PromoRejection::UsageExhausted,
                ..
            }
        ));
        assert!(engine.redeem_promo("SINGLE", Some("agent-8")).is_err());
        assert_eq!(engine.promo("single").unwrap().per_user_usage["agent-7"], 1);
    }

    #[test]
    fn test_released_promo_use_can_be_taken_again() {
        let mut single = promo("SINGLE");
        single.max_usage = Some(1);
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            promo_codes: vec![single],
            ..Default::default()
        });

        engine.redeem_promo("SINGLE", Some("agent-7")).unwrap();
        assert!(engine.redeem_promo("SINGLE", Some("agent-8")).is_err());

        engine.release_promo("single", Some("agent-7"));
        let stored = engine.promo("SINGLE").unwrap();
        assert_eq!(stored.usage_count, 0);
        assert_eq!(stored.per_user_usage["agent-7"], 0);
        engine.redeem_promo("SINGLE", Some("agent-8")).unwrap();

        engine.release_promo("UNKNOWN", None);
    }

    #[test]
    fn test_promo_rejections_carry_reason() {
        let mut minimum = promo("BIG");
        minimum.minimum_booking_value = Some(dec!(1000));
        let mut future = promo("SOON");
        future.valid_from = Utc.with_ymd_and_hms(2026, 10, 25, 0, 0, 0).unwrap();
        let mut off = promo("OFF");
        off.is_active = false;

        let engine = engine(FareCatalog {
            fares: vec![fare()],
            promo_codes: vec![minimum, future, off],
            ..Default::default()
        });

        let reason = |code: &str| match engine.check_promo(code, &ctx(), dec!(410)) {
            Err(PricingError::PromoInvalid { reason, .. }) => reason,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            reason("BIG"),
            PromoRejection::BelowMinimum {
                minimum: dec!(1000),
                actual: dec!(410)
            }
        );
        assert_eq!(reason("SOON"), PromoRejection::NotYetValid);
        assert_eq!(reason("OFF"), PromoRejection::Inactive);
        assert_eq!(reason("NOPE"), PromoRejection::UnknownCode);
    }

    #[test]
    fn test_quote_applies_promo_once_on_total() {
        let mut promo = promo("FAMILY");
        promo.discount = PromoDiscount::Fixed { amount: dec!(100) };
        let engine = engine(FareCatalog {
            fares: vec![fare()],
            components: vec![fixed_tax("YR", dec!(35))],
            promo_codes: vec![promo],
            ..Default::default()
        });
        let segment = ctx();
        let request = QuoteRequest {
            segments: vec![QuoteSegment {
                segment: SegmentRef {
                    flight: FlightDateKey::new("SV1020", segment.travel_date),
                    cabin: CabinClass::Economy,
                    booking_class: "M".into(),
                },
                origin: "RUH".into(),
                destination: "JED".into(),
                load_factor: Decimal::ZERO,
            }],
            passengers: vec![PassengerType::Adult, PassengerType::Child],
            agent_type: AgentType::Iata,
            corporate_client: None,
            user_id: None,
            promo_code: Some("family".into()),
        };

        let quote = engine.quote(&request).unwrap();
        assert_eq!(quote.lines.len(), 2);
        assert_eq!(quote.subtotal, dec!(945));
        assert_eq!(quote.promo_discount, dec!(100));
        assert_eq!(quote.total, dec!(845));
        assert_eq!(quote.passenger_total(1), dec!(410));
        assert_eq!(quote.promo_code.as_deref(), Some("FAMILY"));
    }
}
