use async_trait::async_trait;
use parking_lot::Mutex;
use tarmac_shared::models::events::{AccountingEvent, InventoryChangedEvent, NotificationEvent};
use tracing::info;

/// Downstream ledger. Receives descriptions of financial events; posting
/// is the receiver's business.
#[async_trait]
pub trait AccountingSink: Send + Sync {
    async fn emit(&self, event: AccountingEvent);
}

/// Downstream notification delivery (email, SMS, chat).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Sinks must not fail the operation that produced the event, so neither
/// trait returns a `Result`. Implementations log delivery problems.
#[async_trait]
pub trait InventorySink: Send + Sync {
    async fn inventory_changed(&self, event: InventoryChangedEvent);
}

/// Writes every event to the log. Default wiring when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl AccountingSink for TracingSink {
    async fn emit(&self, event: AccountingEvent) {
        info!(
            kind = ?event.kind,
            booking_id = %event.booking_id,
            amount = %event.amount,
            currency = %event.currency,
            "accounting event"
        );
    }
}

#[async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: NotificationEvent) {
        info!(
            kind = ?event.kind,
            subject = %event.subject_name,
            recipients = event.recipients.len(),
            "{}",
            event.message
        );
    }
}

#[async_trait]
impl InventorySink for TracingSink {
    async fn inventory_changed(&self, event: InventoryChangedEvent) {
        info!(
            flight = %event.flight_number,
            date = %event.departure_date,
            available = event.available_seats,
            reserved = event.reserved_seats,
            "inventory changed"
        );
    }
}

/// Keeps everything it receives. For tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    accounting: Mutex<Vec<AccountingEvent>>,
    notifications: Mutex<Vec<NotificationEvent>>,
    inventory: Mutex<Vec<InventoryChangedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounting(&self) -> Vec<AccountingEvent> {
        self.accounting.lock().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.notifications.lock().clone()
    }

    pub fn inventory(&self) -> Vec<InventoryChangedEvent> {
        self.inventory.lock().clone()
    }
}

#[async_trait]
impl AccountingSink for RecordingSink {
    async fn emit(&self, event: AccountingEvent) {
        self.accounting.lock().push(event);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: NotificationEvent) {
        self.notifications.lock().push(event);
    }
}

#[async_trait]
impl InventorySink for RecordingSink {
    async fn inventory_changed(&self, event: InventoryChangedEvent) {
        self.inventory.lock().push(event);
    }
}
