use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Financial event handed to the external ledger. The core never posts
/// journal entries itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountingEventKind {
    TicketIssued,
    TicketVoided,
    BookingCancelled,
    RefundProcessed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountingEvent {
    pub id: Uuid,
    pub kind: AccountingEventKind,
    pub booking_id: Uuid,
    pub client_reference: String,
    pub pnr: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    /// Ticket numbers or refund ids the amount relates to.
    pub references: Vec<String>,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LimitWarning,
    LimitCritical,
    LimitExceeded,
    OverrideRequested,
    OverrideApproved,
    OverrideRejected,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub kind: NotificationKind,
    /// Id of the limit or override the notification is about.
    pub subject_id: Uuid,
    pub subject_name: String,
    pub message: String,
    pub recipients: Vec<String>,
    pub usage_percentage: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Published whenever seat counters of a flight-date move, so search caches
/// upstream can invalidate.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryChangedEvent {
    pub flight_number: String,
    pub departure_date: chrono::NaiveDate,
    pub available_seats: i32,
    pub reserved_seats: i32,
    pub occurred_at: DateTime<Utc>,
}
