pub mod ancillary;
pub mod bucket;
pub mod fares;
pub mod inventory;
pub mod pricing;
pub mod repository;
pub mod seats;

pub use ancillary::{Ancillary, AncillaryCatalog, AncillaryContext, AncillaryError, AncillaryKind, AncillaryOffering};
pub use bucket::{BucketStatus, FareBucket};
pub use fares::FareCatalog;
pub use inventory::{FlightInventory, InventoryConfig, InventoryError, InventoryManager, InventoryStatus, SeatRequest};
pub use pricing::{PriceBreakdown, PricingContext, PricingEngine, PricingError, Quote, QuoteRequest, QuoteSegment};
pub use repository::{InventoryRepository, MemoryInventoryRepository};
pub use seats::{SeatInventory, SeatOccupant, SeatStatus};
