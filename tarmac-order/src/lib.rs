pub mod ancillaries;
pub mod finance;
pub mod models;
pub mod orchestrator;
pub mod refunds;
pub mod repository;
pub mod resiliency;

pub use ancillaries::AttachAncillary;
pub use finance::FinancialEvents;
pub use models::{
    AncillaryBooking, AncillaryStatus, Booking, BookingStatus, ContactInfo, NewBooking, Passenger, PassengerDetails,
    Pnr, Refund, RefundStatus, Ticket, TicketStatus,
};
pub use orchestrator::{demand_for, BookingConfig, BookingOrchestrator};
pub use refunds::{RefundDecision, RefundRequest};
pub use repository::{BookingRepository, MemoryBookingRepository};
pub use resiliency::{CircuitBreaker, CircuitState, GdsConfig, GdsGateway};
