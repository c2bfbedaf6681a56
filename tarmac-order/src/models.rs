use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tarmac_catalog::{AncillaryKind, Quote};
use tarmac_core::gds::GdsPassenger;
use tarmac_core::types::age_on;
use tarmac_core::{AgentType, CoreError, CoreResult, ItineraryRef, PassengerType, SegmentRef};
use tarmac_governor::Admission;
use tarmac_shared::Masked;
use uuid::Uuid;

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Ticketed,
    Cancelled,
    Voided,
    Refunded,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Voided | BookingStatus::Refunded
        )
    }

    pub fn can_transition(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Confirmed, Ticketed)
                | (Confirmed, Cancelled)
                | (Ticketed, Cancelled)
                | (Ticketed, Voided)
                | (Confirmed, Refunded)
                | (Ticketed, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Ticketed => "ticketed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Voided => "voided",
            BookingStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Passenger as submitted by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerDetails {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub passport_number: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub needs_mobility_assistance: bool,
    #[serde(default)]
    pub travelling_with_infant: bool,
}

/// Booking payload accepted from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    /// Idempotency key chosen by the caller.
    pub client_reference: String,
    pub itinerary_id: String,
    pub passengers: Vec<PassengerDetails>,
    pub contact: ContactInfo,
    pub agent_id: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub corporate_client: Option<String>,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A payload that passed validation, with the itinerary parsed and
/// passenger types derived from the first departure.
#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub request: NewBooking,
    pub itinerary: ItineraryRef,
    pub passengers: Vec<Passenger>,
}

impl NewBooking {
    pub fn validate(self) -> CoreResult<ValidatedBooking> {
        let invalid = |why: String| CoreError::Validation(why);

        if self.client_reference.trim().is_empty() {
            return Err(invalid("client_reference is required".into()));
        }
        if self.agent_id.trim().is_empty() {
            return Err(invalid("agent_id is required".into()));
        }
        if !self.contact.email.contains('@') {
            return Err(invalid(format!("contact email '{}' is not valid", self.contact.email)));
        }

        let itinerary = ItineraryRef::from_str(&self.itinerary_id)?;
        let travel_date = itinerary
            .first_departure()
            .ok_or_else(|| invalid("itinerary has no segments".into()))?;

        if self.passengers.is_empty() {
            return Err(invalid("at least one passenger is required".into()));
        }

        let mut passengers = Vec::with_capacity(self.passengers.len());
        for (index, details) in self.passengers.iter().enumerate() {
            let missing = |field: &str| invalid(format!("passenger {}: {} is required", index + 1, field));
            if details.first_name.trim().is_empty() {
                return Err(missing("first_name"));
            }
            if details.last_name.trim().is_empty() {
                return Err(missing("last_name"));
            }
            let date_of_birth = details.date_of_birth.ok_or_else(|| missing("date_of_birth"))?;
            if date_of_birth > travel_date {
                return Err(invalid(format!(
                    "passenger {}: date_of_birth {} is after departure",
                    index + 1,
                    date_of_birth
                )));
            }
            passengers.push(Passenger {
                index,
                first_name: details.first_name.trim().to_string(),
                last_name: details.last_name.trim().to_string(),
                date_of_birth,
                gender: details.gender.clone(),
                passport_number: details.passport_number.clone().map(Masked),
                nationality: details.nationality.clone(),
                passenger_type: PassengerType::from_birth_date(date_of_birth, travel_date),
                needs_mobility_assistance: details.needs_mobility_assistance,
                travelling_with_infant: details.travelling_with_infant,
            });
        }

        let adults = passengers
            .iter()
            .filter(|p| p.passenger_type == PassengerType::Adult)
            .count();
        let infants = passengers
            .iter()
            .filter(|p| p.passenger_type == PassengerType::Infant)
            .count();
        if infants > adults {
            return Err(invalid(format!("{} infants travelling with {} adults", infants, adults)));
        }

        Ok(ValidatedBooking {
            request: self,
            itinerary,
            passengers,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passenger {
    pub index: usize,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub passport_number: Option<Masked<String>>,
    pub nationality: Option<String>,
    pub passenger_type: PassengerType,
    pub needs_mobility_assistance: bool,
    pub travelling_with_infant: bool,
}

impl Passenger {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn age_on(&self, date: NaiveDate) -> u32 {
        age_on(self.date_of_birth, date)
    }

    pub fn to_gds(&self) -> GdsPassenger {
        GdsPassenger {
            index: self.index,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            date_of_birth: self.date_of_birth,
            passenger_type: self.passenger_type,
            passport_number: self.passport_number.clone(),
            nationality: self.nationality.clone(),
        }
    }
}

/// Segment as committed, with the route facts ancillary pricing needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedSegment {
    pub segment: SegmentRef,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub duration_minutes: i64,
}

/// GDS record locator, 1:1 with a confirmed booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pnr {
    pub locator: String,
    pub raw: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Issued,
    Voided,
    Reissued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub passenger_index: usize,
    pub passenger_name: String,
    pub ticket_number: String,
    pub amount: Decimal,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Requested,
    Approved,
    Rejected,
    Processed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub ticket_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub status: RefundStatus,
    pub requested_by: String,
    pub decided_by: Option<String>,
    pub note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Refund {
    /// Requested, approved and processed refunds all claim part of the total.
    pub fn claims_amount(&self) -> bool {
        self.status != RefundStatus::Rejected
    }

    pub fn transition(&mut self, to: RefundStatus) -> CoreResult<()> {
        let legal = matches!(
            (self.status, to),
            (RefundStatus::Requested, RefundStatus::Approved)
                | (RefundStatus::Requested, RefundStatus::Rejected)
                | (RefundStatus::Approved, RefundStatus::Processed)
        );
        if !legal {
            return Err(CoreError::state_conflict(format!("refund {}", self.id), self.status, to));
        }
        self.status = to;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AncillaryStatus {
    Pending,
    Confirmed,
    Cancelled,
    Used,
    Expired,
    Refunded,
}

/// Extra attached to one passenger of a booking. Runs its own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncillaryBooking {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_index: usize,
    pub code: String,
    pub kind: AncillaryKind,
    pub quantity: u32,
    pub price: Decimal,
    pub currency: String,
    pub status: AncillaryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AncillaryBooking {
    pub fn transition(&mut self, to: AncillaryStatus, now: DateTime<Utc>) -> CoreResult<()> {
        use AncillaryStatus::*;
        let legal = matches!(
            (self.status, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Confirmed, Cancelled)
                | (Confirmed, Used)
                | (Confirmed, Expired)
                | (Confirmed, Refunded)
        );
        if !legal {
            return Err(CoreError::state_conflict(format!("ancillary {}", self.id), self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Aggregate root for a reservation. Owns its passengers, tickets, refunds
/// and ancillaries; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub client_reference: String,
    pub agent_id: String,
    pub agent_type: AgentType,
    pub corporate_client: Option<String>,
    pub user_id: Option<String>,
    pub itinerary: ItineraryRef,
    pub segments: Vec<BookedSegment>,
    pub passengers: Vec<Passenger>,
    pub contact: ContactInfo,
    pub quote: Quote,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: BookingStatus,
    pub pnr: Option<Pnr>,
    pub tickets: Vec<Ticket>,
    pub refunds: Vec<Refund>,
    pub ancillaries: Vec<AncillaryBooking>,
    /// Limit usage charged at creation, given back on cancel or void.
    pub admission: Admission,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub ticketed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Booking {
    pub fn new(validated: ValidatedBooking, segments: Vec<BookedSegment>, quote: Quote, now: DateTime<Utc>) -> Self {
        let ValidatedBooking {
            request,
            itinerary,
            passengers,
        } = validated;
        Self {
            id: Uuid::new_v4(),
            client_reference: request.client_reference,
            agent_id: request.agent_id,
            agent_type: request.agent_type,
            corporate_client: request.corporate_client,
            user_id: request.user_id,
            itinerary,
            segments,
            passengers,
            contact: request.contact,
            total_amount: quote.total,
            currency: quote.currency.clone(),
            quote,
            status: BookingStatus::Pending,
            pnr: None,
            tickets: Vec::new(),
            refunds: Vec::new(),
            ancillaries: Vec::new(),
            admission: Admission::default(),
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            ticketed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    /// Passengers that occupy a seat. Infants travel on a lap.
    pub fn seated_passengers(&self) -> i32 {
        self.passengers
            .iter()
            .filter(|p| p.passenger_type != PassengerType::Infant)
            .count() as i32
    }

    pub fn ensure_transition(&self, to: BookingStatus) -> CoreResult<()> {
        if self.status.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::state_conflict(format!("booking {}", self.id), self.status, to))
        }
    }

    pub fn transition(&mut self, to: BookingStatus, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_transition(to)?;
        self.status = to;
        self.updated_at = now;
        match to {
            BookingStatus::Confirmed => self.confirmed_at = Some(now),
            BookingStatus::Ticketed => self.ticketed_at = Some(now),
            BookingStatus::Cancelled | BookingStatus::Voided | BookingStatus::Refunded => {
                self.cancelled_at = Some(now)
            }
            BookingStatus::Pending => {}
        }
        Ok(())
    }

    pub fn confirm(&mut self, pnr: Pnr, now: DateTime<Utc>) -> CoreResult<()> {
        self.transition(BookingStatus::Confirmed, now)?;
        self.pnr = Some(pnr);
        Ok(())
    }

    pub fn pnr_locator(&self) -> CoreResult<&str> {
        self.pnr
            .as_ref()
            .map(|p| p.locator.as_str())
            .ok_or_else(|| CoreError::Validation(format!("booking {} has no PNR", self.id)))
    }

    pub fn passenger(&self, index: usize) -> CoreResult<&Passenger> {
        self.passengers
            .get(index)
            .ok_or_else(|| CoreError::NotFound(format!("passenger {} on booking {}", index, self.id)))
    }

    /// Amount still open to refund requests.
    pub fn refundable_balance(&self) -> Decimal {
        let claimed: Decimal = self
            .refunds
            .iter()
            .filter(|r| r.claims_amount())
            .map(|r| r.amount)
            .sum();
        (self.total_amount - claimed).max(Decimal::ZERO)
    }

    pub fn processed_refunds(&self) -> Decimal {
        self.refunds
            .iter()
            .filter(|r| r.status == RefundStatus::Processed)
            .map(|r| r.amount)
            .sum()
    }

    pub fn refund_mut(&mut self, refund_id: Uuid) -> CoreResult<&mut Refund> {
        self.refunds
            .iter_mut()
            .find(|r| r.id == refund_id)
            .ok_or_else(|| CoreError::NotFound(format!("refund {}", refund_id)))
    }

    pub fn ancillary_mut(&mut self, ancillary_id: Uuid) -> CoreResult<&mut AncillaryBooking> {
        self.ancillaries
            .iter_mut()
            .find(|a| a.id == ancillary_id)
            .ok_or_else(|| CoreError::NotFound(format!("ancillary {}", ancillary_id)))
    }

    pub fn ticket_numbers(&self) -> Vec<String> {
        self.tickets.iter().map(|t| t.ticket_number.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    pub(crate) fn passenger(first: &str, last: &str, dob: (i32, u32, u32)) -> PassengerDetails {
        PassengerDetails {
            first_name: first.to_string(),
            last_name: last.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(dob.0, dob.1, dob.2),
            gender: None,
            passport_number: Some("K1234567".to_string()),
            nationality: Some("SA".to_string()),
            needs_mobility_assistance: false,
            travelling_with_infant: false,
        }
    }

    pub(crate) fn new_booking(reference: &str) -> NewBooking {
        NewBooking {
            client_reference: reference.to_string(),
            itinerary_id: "SV1020@2026-11-01/Y/M".to_string(),
            passengers: vec![
                passenger("Sara", "Alharbi", (1988, 4, 2)),
                passenger("Omar", "Alharbi", (2019, 6, 15)),
            ],
            contact: ContactInfo {
                email: "bookings@agency.example".to_string(),
                phone: None,
            },
            agent_id: "agent-7".to_string(),
            agent_type: AgentType::Iata,
            corporate_client: None,
            promo_code: None,
            user_id: None,
        }
    }

    fn quote(total: Decimal) -> Quote {
        Quote {
            lines: Vec::new(),
            currency: "SAR".to_string(),
            subtotal: total,
            promo_code: None,
            promo_discount: Decimal::ZERO,
            total,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_validation_derives_passenger_types() {
        let validated = new_booking("AGY-1").validate().unwrap();
        assert_eq!(validated.passengers[0].passenger_type, PassengerType::Adult);
        assert_eq!(validated.passengers[1].passenger_type, PassengerType::Child);
        assert_eq!(validated.itinerary.segments.len(), 1);
    }

    #[test]
    fn test_validation_rejects_incomplete_identity() {
        let mut request = new_booking("AGY-1");
        request.passengers[1].last_name = "  ".into();
        let err = request.validate().unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: passenger 2: last_name is required");

        let mut request = new_booking("AGY-1");
        request.passengers.clear();
        assert!(matches!(request.validate(), Err(CoreError::Validation(_))));

        let mut request = new_booking("AGY-1");
        request.itinerary_id = "SV1020".into();
        assert!(matches!(request.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_infants_need_an_adult_each() {
        let mut request = new_booking("AGY-1");
        request.passengers = vec![
            passenger("Sara", "Alharbi", (1988, 4, 2)),
            passenger("Lina", "Alharbi", (2025, 12, 1)),
            passenger("Adam", "Alharbi", (2026, 1, 9)),
        ];
        assert!(matches!(request.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_pending_cannot_jump_to_ticketed() {
        let validated = new_booking("AGY-1").validate().unwrap();
        let mut booking = Booking::new(validated, Vec::new(), quote(dec!(820)), now());

        let err = booking.transition(BookingStatus::Ticketed, now()).unwrap_err();
        assert!(matches!(err, CoreError::StateConflict { .. }));
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[test]
    fn test_terminal_states_refuse_every_transition() {
        let all = [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Ticketed,
            BookingStatus::Cancelled,
            BookingStatus::Voided,
            BookingStatus::Refunded,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition(to), "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn test_refundable_balance_ignores_rejected() {
        let validated = new_booking("AGY-1").validate().unwrap();
        let mut booking = Booking::new(validated, Vec::new(), quote(dec!(1000)), now());
        for (amount, status) in [
            (dec!(300), RefundStatus::Processed),
            (dec!(200), RefundStatus::Rejected),
            (dec!(100), RefundStatus::Requested),
        ] {
            booking.refunds.push(Refund {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                ticket_number: None,
                amount,
                currency: "SAR".into(),
                reason: "schedule change".into(),
                status,
                requested_by: "agent-7".into(),
                decided_by: None,
                note: None,
                requested_at: now(),
                decided_at: None,
                processed_at: None,
            });
        }
        assert_eq!(booking.refundable_balance(), dec!(600));
        assert_eq!(booking.processed_refunds(), dec!(300));
    }
}
