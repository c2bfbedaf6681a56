use serde::Deserialize;
use tarmac_catalog::AncillaryContext;
use tarmac_core::{CoreError, CoreResult};
use tracing::info;
use uuid::Uuid;

use crate::models::{AncillaryBooking, AncillaryStatus, Booking, BookingStatus};
use crate::orchestrator::BookingOrchestrator;

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachAncillary {
    pub passenger_index: usize,
    pub code: String,
    /// Kilograms for baggage, guests for lounge access.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn ensure_live(booking: &Booking, action: &str) -> CoreResult<()> {
    match booking.status {
        BookingStatus::Confirmed | BookingStatus::Ticketed => Ok(()),
        other => Err(CoreError::StateConflict {
            entity: format!("booking {}", booking.id),
            from: other.as_str().into(),
            to: action.into(),
        }),
    }
}

impl BookingOrchestrator {
    /// Price an extra for one passenger and attach it as a pending line item.
    pub async fn attach_ancillary(&self, booking_id: Uuid, request: AttachAncillary) -> CoreResult<AncillaryBooking> {
        let mut booking = self.get_booking(booking_id).await?;
        ensure_live(&booking, "ancillary attached")?;

        let passenger = booking.passenger(request.passenger_index)?;
        let first = booking
            .segments
            .first()
            .ok_or_else(|| CoreError::Validation(format!("booking {} has no segments", booking_id)))?;
        let context = AncillaryContext {
            passenger_type: passenger.passenger_type,
            age: passenger.age_on(first.segment.flight.departure_date),
            fare_amount: booking.quote.passenger_total(request.passenger_index),
            currency: booking.currency.clone(),
            flight_duration_minutes: booking
                .segments
                .iter()
                .map(|s| s.duration_minutes)
                .max()
                .unwrap_or_default(),
            destination: first.destination.clone(),
            quantity: request.quantity,
        };
        let quote = self.ancillaries.quote(&request.code, &context)?;

        let now = self.clock.now();
        let ancillary = AncillaryBooking {
            id: Uuid::new_v4(),
            booking_id,
            passenger_index: request.passenger_index,
            code: quote.code,
            kind: quote.kind,
            quantity: request.quantity,
            price: quote.price,
            currency: quote.currency,
            status: AncillaryStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        booking.ancillaries.push(ancillary.clone());
        booking.updated_at = now;
        self.bookings.save(&booking).await?;

        info!(
            %booking_id,
            ancillary_id = %ancillary.id,
            code = %ancillary.code,
            price = %ancillary.price,
            "ancillary attached"
        );
        Ok(ancillary)
    }

    async fn move_ancillary(&self, booking_id: Uuid, ancillary_id: Uuid, to: AncillaryStatus) -> CoreResult<AncillaryBooking> {
        let mut booking = self.get_booking(booking_id).await?;
        if to == AncillaryStatus::Confirmed {
            ensure_live(&booking, "ancillary confirmed")?;
        }
        let now = self.clock.now();
        let ancillary = booking.ancillary_mut(ancillary_id)?;
        ancillary.transition(to, now)?;
        let ancillary = ancillary.clone();

        booking.updated_at = now;
        self.bookings.save(&booking).await?;
        info!(%booking_id, %ancillary_id, status = ?to, "ancillary updated");
        Ok(ancillary)
    }

    pub async fn confirm_ancillary(&self, booking_id: Uuid, ancillary_id: Uuid) -> CoreResult<AncillaryBooking> {
        self.move_ancillary(booking_id, ancillary_id, AncillaryStatus::Confirmed)
            .await
    }

    pub async fn cancel_ancillary(&self, booking_id: Uuid, ancillary_id: Uuid) -> CoreResult<AncillaryBooking> {
        self.move_ancillary(booking_id, ancillary_id, AncillaryStatus::Cancelled)
            .await
    }

    pub async fn mark_ancillary_used(&self, booking_id: Uuid, ancillary_id: Uuid) -> CoreResult<AncillaryBooking> {
        self.move_ancillary(booking_id, ancillary_id, AncillaryStatus::Used).await
    }

    pub async fn expire_ancillary(&self, booking_id: Uuid, ancillary_id: Uuid) -> CoreResult<AncillaryBooking> {
        self.move_ancillary(booking_id, ancillary_id, AncillaryStatus::Expired).await
    }

    pub async fn refund_ancillary(&self, booking_id: Uuid, ancillary_id: Uuid) -> CoreResult<AncillaryBooking> {
        self.move_ancillary(booking_id, ancillary_id, AncillaryStatus::Refunded)
            .await
    }
}
