use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tarmac_core::{CabinClass, PassengerType};
use uuid::Uuid;

use crate::inventory::InventoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    Booked,
    Blocked,
    Reserved,
    Unavailable,
    EmergencyExit,
    Crew,
    Infant,
    Wheelchair,
}

/// Who is about to sit in a seat. Drives the eligibility rules of the
/// special seat types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatOccupant {
    pub booking_id: Uuid,
    pub passenger_index: usize,
    pub passenger_name: String,
    pub passenger_type: PassengerType,
    pub age: u32,
    #[serde(default)]
    pub needs_mobility_assistance: bool,
    #[serde(default)]
    pub travelling_with_infant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub booking_id: Uuid,
    pub passenger_index: usize,
    pub passenger_name: String,
    pub price: Option<Decimal>,
}

/// One physical seat on one flight-date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatInventory {
    pub seat_number: String,
    pub cabin: CabinClass,
    /// Status the seat returns to when released.
    pub home_status: SeatStatus,
    pub status: SeatStatus,
    #[serde(default)]
    pub is_window: bool,
    #[serde(default)]
    pub is_aisle: bool,
    pub price: Option<Decimal>,
    pub assignment: Option<SeatAssignment>,
}

const EXIT_ROW_MIN_AGE: u32 = 15;

impl SeatInventory {
    pub fn new(seat_number: impl Into<String>, cabin: CabinClass, home_status: SeatStatus) -> Self {
        Self {
            seat_number: seat_number.into().to_ascii_uppercase(),
            cabin,
            home_status,
            status: home_status,
            is_window: false,
            is_aisle: false,
            price: None,
            assignment: None,
        }
    }

    fn ineligible(&self, reason: &str) -> InventoryError {
        InventoryError::SeatIneligible {
            seat: self.seat_number.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn check_eligibility(&self, occupant: &SeatOccupant) -> Result<(), InventoryError> {
        if occupant.passenger_type == PassengerType::Infant {
            return Err(self.ineligible("infants travel on an adult's lap"));
        }

        match self.status {
            SeatStatus::Available => Ok(()),
            SeatStatus::EmergencyExit => {
                if occupant.age < EXIT_ROW_MIN_AGE || occupant.passenger_type != PassengerType::Adult {
                    Err(self.ineligible("exit row requires an adult aged 15 or over"))
                } else if occupant.needs_mobility_assistance {
                    Err(self.ineligible("exit row is not available to passengers needing assistance"))
                } else if occupant.travelling_with_infant {
                    Err(self.ineligible("exit row is not available to passengers with an infant"))
                } else {
                    Ok(())
                }
            }
            SeatStatus::Infant if !occupant.travelling_with_infant => {
                Err(self.ineligible("bassinet seat is reserved for passengers with an infant"))
            }
            SeatStatus::Infant => Ok(()),
            SeatStatus::Wheelchair if !occupant.needs_mobility_assistance => {
                Err(self.ineligible("seat is reserved for passengers needing mobility assistance"))
            }
            SeatStatus::Wheelchair => Ok(()),
            other => Err(InventoryError::SeatUnavailable {
                seat: self.seat_number.clone(),
                status: other,
            }),
        }
    }

    pub fn assign(&mut self, occupant: &SeatOccupant, price: Option<Decimal>) -> Result<(), InventoryError> {
        self.check_eligibility(occupant)?;
        self.status = SeatStatus::Booked;
        self.assignment = Some(SeatAssignment {
            booking_id: occupant.booking_id,
            passenger_index: occupant.passenger_index,
            passenger_name: occupant.passenger_name.clone(),
            price: price.or(self.price),
        });
        Ok(())
    }

    /// Returns the previous assignment, if any.
    pub fn release(&mut self) -> Option<SeatAssignment> {
        self.status = self.home_status;
        self.assignment.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adult(age: u32) -> SeatOccupant {
        SeatOccupant {
            booking_id: Uuid::new_v4(),
            passenger_index: 0,
            passenger_name: "HADDAD/AMAL".to_string(),
            passenger_type: PassengerType::Adult,
            age,
            needs_mobility_assistance: false,
            travelling_with_infant: false,
        }
    }

    #[test]
    fn test_exit_row_eligibility() {
        let mut seat = SeatInventory::new("14a", CabinClass::Economy, SeatStatus::EmergencyExit);
        let mut with_infant = adult(30);
        with_infant.travelling_with_infant = true;

        assert!(seat.check_eligibility(&with_infant).is_err());
        assert!(seat.check_eligibility(&adult(30)).is_ok());

        seat.assign(&adult(30), None).unwrap();
        assert_eq!(seat.status, SeatStatus::Booked);
        assert!(seat.assign(&adult(40), None).is_err());

        seat.release();
        assert_eq!(seat.status, SeatStatus::EmergencyExit);
        assert!(seat.assignment.is_none());
    }

    #[test]
    fn test_infants_never_get_seats() {
        let seat = SeatInventory::new("20C", CabinClass::Economy, SeatStatus::Available);
        let mut infant = adult(1);
        infant.passenger_type = PassengerType::Infant;
        assert!(matches!(
            seat.check_eligibility(&infant),
            Err(InventoryError::SeatIneligible { .. })
        ));
    }

    #[test]
    fn test_blocked_seat_is_unavailable() {
        let seat = SeatInventory::new("1A", CabinClass::First, SeatStatus::Crew);
        assert!(matches!(
            seat.check_eligibility(&adult(30)),
            Err(InventoryError::SeatUnavailable { status: SeatStatus::Crew, .. })
        ));
    }
}
