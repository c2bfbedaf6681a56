use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{AgentType, CabinClass, FlightDateKey, PassengerType};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassengerMix {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
}

impl PassengerMix {
    /// Passengers that occupy a seat. Infants travel on a lap.
    pub fn seated(&self) -> u32 {
        self.adults + self.children
    }

    pub fn expand(&self) -> Vec<PassengerType> {
        std::iter::repeat(PassengerType::Adult)
            .take(self.adults as usize)
            .chain(std::iter::repeat(PassengerType::Child).take(self.children as usize))
            .chain(std::iter::repeat(PassengerType::Infant).take(self.infants as usize))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSearchRequest {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    pub passengers: PassengerMix,
    #[serde(default)]
    pub cabin: Option<CabinClass>,
    pub agent_type: AgentType,
    #[serde(default)]
    pub corporate_client: Option<String>,
}

impl FlightSearchRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        let airport = |code: &str| code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic());
        if !airport(&self.origin) || !airport(&self.destination) {
            return Err(CoreError::Validation("origin and destination must be 3-letter airport codes".into()));
        }
        if self.origin.eq_ignore_ascii_case(&self.destination) {
            return Err(CoreError::Validation("origin equals destination".into()));
        }
        if self.passengers.adults == 0 {
            return Err(CoreError::Validation("at least one adult is required".into()));
        }
        if self.passengers.infants > self.passengers.adults {
            return Err(CoreError::Validation("each infant must travel with an adult".into()));
        }
        if let Some(back) = self.return_date {
            if back < self.departure_date {
                return Err(CoreError::Validation("return date before departure".into()));
            }
        }
        Ok(())
    }

    /// Stable textual form of everything that changes the answer. Two
    /// requests with the same canonical key must produce the same results.
    pub fn canonical_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|A{}C{}I{}|{}|{:?}|{}",
            self.origin.to_ascii_uppercase(),
            self.destination.to_ascii_uppercase(),
            self.departure_date,
            self.return_date.map(|d| d.to_string()).unwrap_or_default(),
            self.passengers.adults,
            self.passengers.children,
            self.passengers.infants,
            self.cabin.map(|c| c.code().to_string()).unwrap_or_else(|| "*".to_string()),
            self.agent_type,
            self.corporate_client.as_deref().unwrap_or(""),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerFare {
    pub passenger_type: PassengerType,
    pub amount: Decimal,
}

/// One bookable option on one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightOption {
    /// Parseable [`crate::ItineraryRef`] for this single segment.
    pub itinerary_id: String,
    pub flight: FlightDateKey,
    pub origin: String,
    pub destination: String,
    pub cabin: CabinClass,
    pub booking_class: String,
    pub seats_available: i32,
    pub currency: String,
    pub total_fare: Decimal,
    pub passenger_fares: Vec<PassengerFare>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightSearchResult {
    /// Outbound options first, then return options when requested.
    pub legs: Vec<Vec<FlightOption>>,
}

impl FlightSearchResult {
    pub fn options(&self) -> impl Iterator<Item = &FlightOption> {
        self.legs.iter().flatten()
    }

    pub fn lowest_fare(&self) -> Option<Decimal> {
        self.options().map(|o| o.total_fare).min()
    }

    pub fn highest_fare(&self) -> Option<Decimal> {
        self.options().map(|o| o.total_fare).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FlightSearchRequest {
        FlightSearchRequest {
            origin: "ruh".into(),
            destination: "JED".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            return_date: None,
            passengers: PassengerMix {
                adults: 2,
                children: 1,
                infants: 1,
            },
            cabin: Some(CabinClass::Economy),
            agent_type: AgentType::Iata,
            corporate_client: None,
        }
    }

    #[test]
    fn test_canonical_key_normalises_case() {
        let mut upper = request();
        upper.origin = "RUH".into();
        assert_eq!(request().canonical_key(), upper.canonical_key());
        assert_eq!(request().canonical_key(), "RUH|JED|2026-11-01||A2C1I1|Y|Iata|");
    }

    #[test]
    fn test_passenger_mix_counts() {
        let mix = request().passengers;
        assert_eq!(mix.seated(), 3);
        assert_eq!(mix.expand().len(), 4);
        assert_eq!(mix.expand()[3], PassengerType::Infant);
    }

    #[test]
    fn test_validate_rejects_unaccompanied_infants() {
        let mut req = request();
        req.passengers.infants = 3;
        assert!(matches!(req.validate(), Err(CoreError::Validation(_))));
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_search_request_deserialization() {
        let json = r#"{
            "origin": "RUH",
            "destination": "JED",
            "departure_date": "2026-11-01",
            "passengers": { "adults": 1 },
            "agent_type": "non_iata"
        }"#;
        let req: FlightSearchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.passengers.children, 0);
        assert_eq!(req.agent_type, AgentType::NonIata);
        assert!(req.cabin.is_none());
    }
}
