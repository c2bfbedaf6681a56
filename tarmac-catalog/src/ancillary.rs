use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tarmac_core::{CoreError, PassengerType};
use tarmac_shared::money::{percent_of, round_minor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AncillaryKind {
    Seat,
    Baggage,
    Meal,
    Lounge,
    Insurance,
}

/// Facts about the passenger and trip an ancillary is priced against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncillaryContext {
    pub passenger_type: PassengerType,
    pub age: u32,
    pub fare_amount: Decimal,
    pub currency: String,
    pub flight_duration_minutes: i64,
    pub destination: String,
    /// Kilograms for baggage, guests for lounge access. Ignored otherwise.
    #[serde(default)]
    pub quantity: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AncillaryError {
    #[error("Unknown ancillary: {0}")]
    Unknown(String),

    #[error("{code} not available: {reason}")]
    NotEligible { code: String, reason: String },

    #[error("Invalid ancillary offering {code}: {reason}")]
    Invalid { code: String, reason: String },
}

impl From<AncillaryError> for CoreError {
    fn from(err: AncillaryError) -> Self {
        match err {
            AncillaryError::Unknown(code) => CoreError::NotFound(format!("ancillary {}", code)),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

/// Optional extra sold alongside a seat.
pub trait Ancillary: Send + Sync {
    fn code(&self) -> &str;

    fn kind(&self) -> AncillaryKind;

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError>;

    /// Price for this passenger; callers check eligibility first.
    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal;
}

fn not_eligible(code: &str, reason: impl Into<String>) -> AncillaryError {
    AncillaryError::NotEligible {
        code: code.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatSelection {
    pub code: String,
    pub price: Decimal,
}

impl Ancillary for SeatSelection {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> AncillaryKind {
        AncillaryKind::Seat
    }

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError> {
        if ctx.passenger_type == PassengerType::Infant {
            return Err(not_eligible(&self.code, "infants do not occupy a seat"));
        }
        Ok(())
    }

    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal {
        round_minor(self.price, &ctx.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraBaggage {
    pub code: String,
    pub price_per_kg: Decimal,
    pub max_kg: u32,
}

impl Ancillary for ExtraBaggage {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> AncillaryKind {
        AncillaryKind::Baggage
    }

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError> {
        if ctx.quantity == 0 {
            return Err(not_eligible(&self.code, "weight must be at least 1 kg"));
        }
        if ctx.quantity > self.max_kg {
            return Err(not_eligible(&self.code, format!("at most {} kg", self.max_kg)));
        }
        Ok(())
    }

    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal {
        round_minor(self.price_per_kg * Decimal::from(ctx.quantity), &ctx.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealOption {
    pub code: String,
    pub price: Decimal,
    /// Meals are only loaded on flights at least this long.
    pub min_flight_minutes: i64,
}

impl Ancillary for MealOption {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> AncillaryKind {
        AncillaryKind::Meal
    }

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError> {
        if ctx.flight_duration_minutes < self.min_flight_minutes {
            return Err(not_eligible(
                &self.code,
                format!("flight shorter than {} minutes", self.min_flight_minutes),
            ));
        }
        Ok(())
    }

    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal {
        round_minor(self.price, &ctx.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoungeAccess {
    pub code: String,
    pub base_price: Decimal,
    pub guest_fee: Decimal,
    pub max_guests: u32,
}

impl Ancillary for LoungeAccess {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> AncillaryKind {
        AncillaryKind::Lounge
    }

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError> {
        if ctx.quantity > self.max_guests {
            return Err(not_eligible(&self.code, format!("at most {} guests", self.max_guests)));
        }
        Ok(())
    }

    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal {
        round_minor(self.base_price + self.guest_fee * Decimal::from(ctx.quantity), &ctx.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelInsurance {
    pub code: String,
    /// Premium as a percentage of the passenger's fare.
    pub rate: Decimal,
    pub min_premium: Decimal,
    pub max_age: u32,
    #[serde(default)]
    pub excluded_destinations: Vec<String>,
}

impl Ancillary for TravelInsurance {
    fn code(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> AncillaryKind {
        AncillaryKind::Insurance
    }

    fn is_eligible(&self, ctx: &AncillaryContext) -> Result<(), AncillaryError> {
        if ctx.age > self.max_age {
            return Err(not_eligible(&self.code, format!("travellers over {} not covered", self.max_age)));
        }
        if self
            .excluded_destinations
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&ctx.destination))
        {
            return Err(not_eligible(&self.code, format!("{} is not covered", ctx.destination)));
        }
        Ok(())
    }

    fn calculate_price(&self, ctx: &AncillaryContext) -> Decimal {
        round_minor(percent_of(ctx.fare_amount, self.rate).max(self.min_premium), &ctx.currency)
    }
}

/// Configured offering, one variant per ancillary type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AncillaryOffering {
    Seat(SeatSelection),
    Baggage(ExtraBaggage),
    Meal(MealOption),
    Lounge(LoungeAccess),
    Insurance(TravelInsurance),
}

impl AncillaryOffering {
    fn validate(&self) -> Result<(), AncillaryError> {
        let (code, problem) = match self {
            AncillaryOffering::Seat(s) => (&s.code, (s.price < Decimal::ZERO).then_some("negative price")),
            AncillaryOffering::Baggage(b) => (
                &b.code,
                (b.price_per_kg < Decimal::ZERO || b.max_kg == 0).then_some("needs a positive weight cap and price"),
            ),
            AncillaryOffering::Meal(m) => (&m.code, (m.price < Decimal::ZERO).then_some("negative price")),
            AncillaryOffering::Lounge(l) => (
                &l.code,
                (l.base_price < Decimal::ZERO || l.guest_fee < Decimal::ZERO).then_some("negative price"),
            ),
            AncillaryOffering::Insurance(i) => (
                &i.code,
                (i.rate < Decimal::ZERO || i.rate > Decimal::ONE_HUNDRED).then_some("rate outside 0..=100"),
            ),
        };
        match problem {
            Some(reason) => Err(AncillaryError::Invalid {
                code: code.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn into_ancillary(self) -> Arc<dyn Ancillary> {
        match self {
            AncillaryOffering::Seat(s) => Arc::new(s),
            AncillaryOffering::Baggage(b) => Arc::new(b),
            AncillaryOffering::Meal(m) => Arc::new(m),
            AncillaryOffering::Lounge(l) => Arc::new(l),
            AncillaryOffering::Insurance(i) => Arc::new(i),
        }
    }
}

/// Quoted ancillary line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncillaryQuote {
    pub code: String,
    pub kind: AncillaryKind,
    pub price: Decimal,
    pub currency: String,
}

/// Registry of ancillaries on sale, keyed by code.
#[derive(Default, Clone)]
pub struct AncillaryCatalog {
    items: BTreeMap<String, Arc<dyn Ancillary>>,
}

impl AncillaryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_offerings(offerings: Vec<AncillaryOffering>) -> Result<Self, AncillaryError> {
        let mut catalog = Self::new();
        for offering in offerings {
            offering.validate()?;
            catalog.register(offering.into_ancillary());
        }
        Ok(catalog)
    }

    pub fn register(&mut self, ancillary: Arc<dyn Ancillary>) {
        self.items.insert(ancillary.code().to_ascii_uppercase(), ancillary);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn Ancillary>> {
        self.items.get(&code.to_ascii_uppercase()).cloned()
    }

    pub fn codes(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn quote(&self, code: &str, ctx: &AncillaryContext) -> Result<AncillaryQuote, AncillaryError> {
        let ancillary = self.get(code).ok_or_else(|| AncillaryError::Unknown(code.to_string()))?;
        ancillary.is_eligible(ctx)?;
        Ok(AncillaryQuote {
            code: ancillary.code().to_string(),
            kind: ancillary.kind(),
            price: ancillary.calculate_price(ctx),
            currency: ctx.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> AncillaryContext {
        AncillaryContext {
            passenger_type: PassengerType::Adult,
            age: 40,
            fare_amount: dec!(1200),
            currency: "SAR".into(),
            flight_duration_minutes: 105,
            destination: "JED".into(),
            quantity: 0,
        }
    }

    fn catalog() -> AncillaryCatalog {
        let json = r#"[
            { "kind": "seat", "code": "SEAT_STD", "price": "45" },
            { "kind": "baggage", "code": "XBAG", "price_per_kg": "12.5", "max_kg": 23 },
            { "kind": "meal", "code": "HOTMEAL", "price": "30", "min_flight_minutes": 120 },
            { "kind": "lounge", "code": "LOUNGE", "base_price": "150", "guest_fee": "90", "max_guests": 2 },
            { "kind": "insurance", "code": "TRAVELPLUS", "rate": "2.5", "min_premium": "25",
              "max_age": 75, "excluded_destinations": ["KBL"] }
        ]"#;
        let offerings: Vec<AncillaryOffering> = serde_json::from_str(json).unwrap();
        AncillaryCatalog::from_offerings(offerings).unwrap()
    }

    #[test]
    fn test_each_kind_prices_its_own_way() {
        let catalog = catalog();
        let mut ctx = ctx();

        assert_eq!(catalog.quote("seat_std", &ctx).unwrap().price, dec!(45));

        ctx.quantity = 10;
        assert_eq!(catalog.quote("XBAG", &ctx).unwrap().price, dec!(125));

        ctx.quantity = 2;
        assert_eq!(catalog.quote("LOUNGE", &ctx).unwrap().price, dec!(330));

        assert_eq!(catalog.quote("TRAVELPLUS", &ctx).unwrap().price, dec!(30));
        ctx.fare_amount = dec!(400);
        assert_eq!(catalog.quote("TRAVELPLUS", &ctx).unwrap().price, dec!(25));
    }

    #[test]
    fn test_eligibility_rules() {
        let catalog = catalog();
        let mut ctx = ctx();

        assert!(matches!(catalog.quote("HOTMEAL", &ctx), Err(AncillaryError::NotEligible { .. })));
        ctx.flight_duration_minutes = 300;
        assert!(catalog.quote("HOTMEAL", &ctx).is_ok());

        ctx.quantity = 3;
        assert!(catalog.quote("LOUNGE", &ctx).is_err());
        ctx.quantity = 24;
        assert!(catalog.quote("XBAG", &ctx).is_err());

        ctx.destination = "kbl".into();
        assert!(catalog.quote("TRAVELPLUS", &ctx).is_err());

        ctx.passenger_type = PassengerType::Infant;
        assert!(catalog.quote("SEAT_STD", &ctx).is_err());
        assert!(matches!(catalog.quote("WIFI", &ctx), Err(AncillaryError::Unknown(_))));
    }

    #[test]
    fn test_invalid_offering_rejected_at_load() {
        let bad = vec![AncillaryOffering::Insurance(TravelInsurance {
            code: "BAD".into(),
            rate: dec!(150),
            min_premium: dec!(0),
            max_age: 80,
            excluded_destinations: vec![],
        })];
        assert!(matches!(
            AncillaryCatalog::from_offerings(bad),
            Err(AncillaryError::Invalid { .. })
        ));
    }
}
