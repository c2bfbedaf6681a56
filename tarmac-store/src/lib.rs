pub mod app_config;
pub mod booking_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod governance_repo;
pub mod inventory_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use booking_repo::PostgresBookingRepository;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use governance_repo::{PostgresLimitRepository, PostgresOverrideRepository};
pub use inventory_repo::PostgresInventoryRepository;
pub use redis_repo::RedisCacheBackend;
