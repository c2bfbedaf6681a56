use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Identifies one flight segment on one departure date. Every inventory row,
/// seat map and fare bucket hangs off this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlightDateKey {
    pub flight_number: String,
    pub departure_date: NaiveDate,
}

impl FlightDateKey {
    pub fn new(flight_number: impl Into<String>, departure_date: NaiveDate) -> Self {
        Self {
            flight_number: flight_number.into().to_ascii_uppercase(),
            departure_date,
        }
    }

    /// Two-letter carrier prefix of the flight number (`SV1020` -> `SV`).
    pub fn airline_code(&self) -> &str {
        let end = self
            .flight_number
            .char_indices()
            .nth(2)
            .map(|(i, _)| i)
            .unwrap_or(self.flight_number.len());
        &self.flight_number[..end]
    }
}

impl fmt::Display for FlightDateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.flight_number, self.departure_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

impl CabinClass {
    pub fn code(&self) -> char {
        match self {
            CabinClass::Economy => 'Y',
            CabinClass::PremiumEconomy => 'W',
            CabinClass::Business => 'C',
            CabinClass::First => 'F',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'Y' => Some(CabinClass::Economy),
            'W' => Some(CabinClass::PremiumEconomy),
            'C' | 'J' => Some(CabinClass::Business),
            'F' => Some(CabinClass::First),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassengerType {
    Adult,
    Child,
    Infant,
}

impl PassengerType {
    /// Age bands used by the carriers: infants under 2, children under 12,
    /// measured on the departure date.
    pub fn from_birth_date(date_of_birth: NaiveDate, travel_date: NaiveDate) -> Self {
        match age_on(date_of_birth, travel_date) {
            a if a < 2 => PassengerType::Infant,
            a if a < 12 => PassengerType::Child,
            _ => PassengerType::Adult,
        }
    }
}

/// Completed years between `date_of_birth` and `on`.
pub fn age_on(date_of_birth: NaiveDate, on: NaiveDate) -> u32 {
    let mut years = on.year() - date_of_birth.year();
    if (on.month(), on.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Iata,
    NonIata,
    Corporate,
    SubAgent,
}

/// One leg of a bookable itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentRef {
    pub flight: FlightDateKey,
    pub cabin: CabinClass,
    pub booking_class: String,
}

/// Self-describing itinerary id: `SV1020@2026-11-01/Y/M+SV1021@2026-11-08/Y/M`.
///
/// Search hands these out and the booking flow parses them back, so the
/// booking never trusts cached search data for what it commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItineraryRef {
    pub segments: Vec<SegmentRef>,
}

impl ItineraryRef {
    pub fn single(segment: SegmentRef) -> Self {
        Self {
            segments: vec![segment],
        }
    }

    pub fn first_departure(&self) -> Option<NaiveDate> {
        self.segments.iter().map(|s| s.flight.departure_date).min()
    }
}

impl fmt::Display for ItineraryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| format!("{}/{}/{}", s.flight, s.cabin.code(), s.booking_class))
            .collect();
        f.write_str(&parts.join("+"))
    }
}

impl FromStr for ItineraryRef {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| CoreError::Validation(format!("itinerary_id '{}': {}", raw, why));

        if raw.trim().is_empty() {
            return Err(invalid("empty"));
        }

        let mut segments = Vec::new();
        for part in raw.split('+') {
            let mut fields = part.split('/');
            let (Some(flight), Some(cabin), Some(class), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid("expected FLIGHT@DATE/CABIN/CLASS segments"));
            };

            let (number, date) = flight.split_once('@').ok_or_else(|| invalid("missing '@'"))?;
            if number.len() < 3 || !number.is_ascii() {
                return Err(invalid("bad flight number"));
            }
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid("bad date"))?;

            let mut cabin_chars = cabin.chars();
            let cabin = match (cabin_chars.next(), cabin_chars.next()) {
                (Some(c), None) => CabinClass::from_code(c).ok_or_else(|| invalid("unknown cabin"))?,
                _ => return Err(invalid("cabin must be one letter")),
            };

            if class.is_empty() || class.len() > 2 || !class.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid("bad booking class"));
            }

            segments.push(SegmentRef {
                flight: FlightDateKey::new(number, date),
                cabin,
                booking_class: class.to_ascii_uppercase(),
            });
        }

        Ok(Self { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_itinerary_ref_parse_and_display() {
        let raw = "SV1020@2026-11-01/Y/M+SV1021@2026-11-08/C/J";
        let itinerary: ItineraryRef = raw.parse().unwrap();

        assert_eq!(itinerary.segments.len(), 2);
        assert_eq!(itinerary.segments[0].flight.airline_code(), "SV");
        assert_eq!(itinerary.segments[1].cabin, CabinClass::Business);
        assert_eq!(itinerary.to_string(), raw);
    }

    #[test]
    fn test_itinerary_ref_rejects_garbage() {
        assert!("".parse::<ItineraryRef>().is_err());
        assert!("SV1020/Y/M".parse::<ItineraryRef>().is_err());
        assert!("SV1020@2026-13-01/Y/M".parse::<ItineraryRef>().is_err());
        assert!("SV1020@2026-11-01/Q/M".parse::<ItineraryRef>().is_err());
    }

    #[test]
    fn test_passenger_type_from_birth_date() {
        let travel = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let infant = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let child = NaiveDate::from_ymd_opt(2016, 11, 2).unwrap();
        let adult = NaiveDate::from_ymd_opt(2014, 11, 1).unwrap();

        assert_eq!(PassengerType::from_birth_date(infant, travel), PassengerType::Infant);
        assert_eq!(PassengerType::from_birth_date(child, travel), PassengerType::Child);
        assert_eq!(PassengerType::from_birth_date(adult, travel), PassengerType::Adult);
    }
}
