use rust_decimal::Decimal;
use serde::Deserialize;
use tarmac_core::{CoreError, CoreResult};
use tracing::info;
use uuid::Uuid;

use crate::finance::FinancialEvents;
use crate::models::{Booking, BookingStatus, Refund, RefundStatus, TicketStatus};
use crate::orchestrator::BookingOrchestrator;

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
    pub reason: String,
    pub requested_by: String,
    #[serde(default)]
    pub ticket_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundDecision {
    pub decided_by: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl BookingOrchestrator {
    async fn booking_for_refund(&self, refund_id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .find_by_refund(refund_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("refund {}", refund_id)))
    }

    pub async fn request_refund(&self, booking_id: Uuid, request: RefundRequest) -> CoreResult<Refund> {
        let mut booking = self.get_booking(booking_id).await?;
        if !matches!(
            booking.status,
            BookingStatus::Confirmed | BookingStatus::Ticketed | BookingStatus::Cancelled
        ) {
            return Err(CoreError::StateConflict {
                entity: format!("booking {}", booking_id),
                from: booking.status.as_str().into(),
                to: "refund requested".into(),
            });
        }
        if request.amount <= Decimal::ZERO {
            return Err(CoreError::Validation("refund amount must be positive".into()));
        }
        if request.reason.trim().is_empty() || request.requested_by.trim().is_empty() {
            return Err(CoreError::Validation("refund reason and requester are required".into()));
        }
        let balance = booking.refundable_balance();
        if request.amount > balance {
            return Err(CoreError::Validation(format!(
                "refund of {} exceeds refundable balance {} {}",
                request.amount, balance, booking.currency
            )));
        }
        if let Some(number) = &request.ticket_number {
            let issued = booking
                .tickets
                .iter()
                .any(|t| t.ticket_number == *number && t.status == TicketStatus::Issued);
            if !issued {
                return Err(CoreError::Validation(format!(
                    "ticket {} is not an issued ticket of booking {}",
                    number, booking_id
                )));
            }
        }

        let refund = Refund {
            id: Uuid::new_v4(),
            booking_id,
            ticket_number: request.ticket_number,
            amount: request.amount,
            currency: booking.currency.clone(),
            reason: request.reason,
            status: RefundStatus::Requested,
            requested_by: request.requested_by,
            decided_by: None,
            note: None,
            requested_at: self.clock.now(),
            decided_at: None,
            processed_at: None,
        };
        booking.refunds.push(refund.clone());
        booking.updated_at = refund.requested_at;
        self.bookings.save(&booking).await?;

        info!(%booking_id, refund_id = %refund.id, amount = %refund.amount, "refund requested");
        Ok(refund)
    }

    async fn decide_refund(&self, refund_id: Uuid, to: RefundStatus, decision: RefundDecision) -> CoreResult<Refund> {
        if decision.decided_by.trim().is_empty() {
            return Err(CoreError::Validation("refund decision needs a decider".into()));
        }
        let mut booking = self.booking_for_refund(refund_id).await?;
        let now = self.clock.now();
        let refund = booking.refund_mut(refund_id)?;
        refund.transition(to)?;
        refund.decided_by = Some(decision.decided_by);
        refund.note = decision.note;
        refund.decided_at = Some(now);
        let refund = refund.clone();

        booking.updated_at = now;
        self.bookings.save(&booking).await?;
        info!(%refund_id, status = ?refund.status, "refund decided");
        Ok(refund)
    }

    pub async fn approve_refund(&self, refund_id: Uuid, decision: RefundDecision) -> CoreResult<Refund> {
        self.decide_refund(refund_id, RefundStatus::Approved, decision).await
    }

    pub async fn reject_refund(&self, refund_id: Uuid, decision: RefundDecision) -> CoreResult<Refund> {
        self.decide_refund(refund_id, RefundStatus::Rejected, decision).await
    }

    /// Pay out an approved refund. When processed refunds reach the booking
    /// total on a live booking, the PNR is cancelled and the booking ends
    /// `refunded`; a cancelled booking stays cancelled.
    pub async fn process_refund(&self, refund_id: Uuid) -> CoreResult<Refund> {
        let mut booking = self.booking_for_refund(refund_id).await?;
        let amount = {
            let refund = booking.refund_mut(refund_id)?;
            if refund.status != RefundStatus::Approved {
                return Err(CoreError::state_conflict(
                    format!("refund {}", refund_id),
                    refund.status,
                    RefundStatus::Processed,
                ));
            }
            refund.amount
        };

        let closes_booking = booking.processed_refunds() + amount >= booking.total_amount
            && matches!(booking.status, BookingStatus::Confirmed | BookingStatus::Ticketed);
        if closes_booking {
            self.cancel_at_gds(&booking).await?;
        }

        let now = self.clock.now();
        let refund = booking.refund_mut(refund_id)?;
        refund.transition(RefundStatus::Processed)?;
        refund.processed_at = Some(now);
        let refund = refund.clone();

        if closes_booking {
            booking.transition(BookingStatus::Refunded, now)?;
        }
        booking.updated_at = now;
        let saved = self.bookings.save(&booking).await?;

        if closes_booking {
            self.release_commitments(&saved).await;
        }
        self.accounting
            .emit(FinancialEvents::refund_processed(&saved, &refund, now))
            .await;

        info!(
            booking_id = %saved.id,
            %refund_id,
            amount = %refund.amount,
            status = saved.status.as_str(),
            "refund processed"
        );
        Ok(refund)
    }
}
