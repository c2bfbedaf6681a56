use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tarmac_shared::models::events::{AccountingEvent, AccountingEventKind};
use uuid::Uuid;

use crate::models::{Booking, Refund};

/// Describes the financial side of lifecycle steps for the external ledger.
/// Posting is the ledger's business.
pub struct FinancialEvents;

impl FinancialEvents {
    fn event(
        booking: &Booking,
        kind: AccountingEventKind,
        amount: Decimal,
        references: Vec<String>,
        description: String,
        at: DateTime<Utc>,
    ) -> AccountingEvent {
        AccountingEvent {
            id: Uuid::new_v4(),
            kind,
            booking_id: booking.id,
            client_reference: booking.client_reference.clone(),
            pnr: booking.pnr.as_ref().map(|p| p.locator.clone()),
            amount,
            currency: booking.currency.clone(),
            references,
            description,
            occurred_at: at,
        }
    }

    pub fn ticket_issued(booking: &Booking, at: DateTime<Utc>) -> AccountingEvent {
        Self::event(
            booking,
            AccountingEventKind::TicketIssued,
            booking.total_amount,
            booking.ticket_numbers(),
            format!(
                "{} tickets issued for {} ({})",
                booking.tickets.len(),
                booking.client_reference,
                booking.itinerary
            ),
            at,
        )
    }

    pub fn ticket_voided(booking: &Booking, at: DateTime<Utc>) -> AccountingEvent {
        Self::event(
            booking,
            AccountingEventKind::TicketVoided,
            booking.total_amount,
            booking.ticket_numbers(),
            format!("Tickets voided for {}", booking.client_reference),
            at,
        )
    }

    /// Cancellation reverses what has not been refunded.
    pub fn booking_cancelled(booking: &Booking, at: DateTime<Utc>) -> AccountingEvent {
        Self::event(
            booking,
            AccountingEventKind::BookingCancelled,
            (booking.total_amount - booking.processed_refunds()).max(Decimal::ZERO),
            booking.ticket_numbers(),
            format!("Booking {} cancelled", booking.client_reference),
            at,
        )
    }

    pub fn refund_processed(booking: &Booking, refund: &Refund, at: DateTime<Utc>) -> AccountingEvent {
        let mut references = vec![refund.id.to_string()];
        references.extend(refund.ticket_number.clone());
        Self::event(
            booking,
            AccountingEventKind::RefundProcessed,
            refund.amount,
            references,
            format!("Refund for {}: {}", booking.client_reference, refund.reason),
            at,
        )
    }
}
