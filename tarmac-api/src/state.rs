use std::sync::Arc;

use anyhow::Context;
use tarmac_catalog::{
    AncillaryCatalog, AncillaryOffering, FareCatalog, InventoryManager, InventoryRepository, MemoryInventoryRepository,
    PricingEngine,
};
use tarmac_core::gds::{GdsClient, MockGdsClient};
use tarmac_core::sink::{AccountingSink, NotificationSink, TracingSink};
use tarmac_core::{Clock, SystemClock};
use tarmac_governor::{BookingGovernor, LimitRepository, MemoryLimitRepository, MemoryOverrideRepository, OverrideRepository};
use tarmac_offer::{AvailabilityCache, CacheBackend, MemoryCacheBackend, SearchService};
use tarmac_order::{BookingOrchestrator, BookingRepository, GdsGateway, MemoryBookingRepository};
use tarmac_store::Config;

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingOrchestrator>,
    pub inventory: Arc<InventoryManager>,
    pub governor: Arc<BookingGovernor>,
    pub search: Arc<SearchService>,
    pub cache: Arc<AvailabilityCache>,
}

/// Storage and sink choices, resolved from configuration.
pub struct Backends {
    pub inventory: Arc<dyn InventoryRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub limits: Arc<dyn LimitRepository>,
    pub overrides: Arc<dyn OverrideRepository>,
    pub cache: Arc<dyn CacheBackend>,
    pub accounting: Arc<dyn AccountingSink>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            inventory: Arc::new(MemoryInventoryRepository::new()),
            bookings: Arc::new(MemoryBookingRepository::new()),
            limits: Arc::new(MemoryLimitRepository::new()),
            overrides: Arc::new(MemoryOverrideRepository::new()),
            cache: Arc::new(MemoryCacheBackend::new()),
            accounting: Arc::new(TracingSink),
            notifications: Arc::new(TracingSink),
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut backends = Self::in_memory();

        match &config.database {
            Some(db) => {
                let client = tarmac_store::DbClient::new(db)
                    .await
                    .context("Failed to connect to Postgres")?;
                client.migrate().await.context("Failed to run migrations")?;
                backends.inventory = Arc::new(tarmac_store::PostgresInventoryRepository::new(client.pool.clone()));
                backends.bookings = Arc::new(tarmac_store::PostgresBookingRepository::new(client.pool.clone()));
                backends.limits = Arc::new(tarmac_store::PostgresLimitRepository::new(client.pool.clone()));
                backends.overrides = Arc::new(tarmac_store::PostgresOverrideRepository::new(client.pool));
            }
            None => tracing::warn!("No database configured, bookings and inventory are kept in memory"),
        }

        if let Some(redis) = &config.redis {
            let backend = tarmac_store::RedisCacheBackend::new(&redis.url).context("Invalid Redis URL")?;
            backends.cache = Arc::new(backend);
        }

        backends.attach_event_producer(config)?;
        Ok(backends)
    }

    #[cfg(feature = "kafka")]
    fn attach_event_producer(&mut self, config: &Config) -> anyhow::Result<()> {
        if let Some(kafka) = &config.kafka {
            let producer = Arc::new(
                tarmac_store::EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?,
            );
            self.accounting = producer.clone();
            self.notifications = producer;
        }
        Ok(())
    }

    #[cfg(not(feature = "kafka"))]
    fn attach_event_producer(&mut self, config: &Config) -> anyhow::Result<()> {
        if config.kafka.is_some() {
            tracing::warn!("Kafka configured but the binary was built without the kafka feature");
        }
        Ok(())
    }
}

fn read_file(path: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

pub fn load_fares(config: &Config) -> anyhow::Result<FareCatalog> {
    match &config.pricing.catalog_path {
        Some(path) => FareCatalog::from_json(&read_file(path)?).with_context(|| format!("Invalid fare catalog {}", path)),
        None => {
            tracing::warn!("No fare catalog configured, every quote will fail with fare_not_found");
            Ok(FareCatalog::default())
        }
    }
}

pub fn load_ancillaries(config: &Config) -> anyhow::Result<AncillaryCatalog> {
    match &config.pricing.ancillaries_path {
        Some(path) => {
            let offerings: Vec<AncillaryOffering> =
                serde_json::from_str(&read_file(path)?).with_context(|| format!("Invalid ancillary file {}", path))?;
            AncillaryCatalog::from_offerings(offerings).with_context(|| format!("Invalid ancillary file {}", path))
        }
        None => Ok(AncillaryCatalog::new()),
    }
}

impl AppState {
    pub fn build(
        config: &Config,
        backends: Backends,
        fares: FareCatalog,
        ancillaries: AncillaryCatalog,
        gds: Arc<dyn GdsClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inventory = Arc::new(
            InventoryManager::new(backends.inventory, clock.clone(), config.inventory.clone())
                .with_sink(Arc::new(TracingSink)),
        );
        let pricing = Arc::new(PricingEngine::new(fares, clock.clone()));
        let governor = Arc::new(BookingGovernor::new(
            backends.limits,
            backends.overrides,
            backends.notifications,
            clock.clone(),
            config.governor.clone(),
        ));
        let cache = Arc::new(AvailabilityCache::new(backends.cache, clock.clone(), config.cache.clone()));
        let search = Arc::new(SearchService::new(inventory.clone(), pricing.clone(), cache.clone()));
        let gateway = Arc::new(GdsGateway::new(gds, &config.gds));

        let bookings = Arc::new(
            BookingOrchestrator::new(
                backends.bookings,
                inventory.clone(),
                pricing,
                governor.clone(),
                gateway,
                clock,
            )
            .with_accounting(backends.accounting)
            .with_ancillaries(Arc::new(ancillaries))
            .with_config(config.booking.clone()),
        );

        Self {
            bookings,
            inventory,
            governor,
            search,
            cache,
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backends = Backends::from_config(config).await?;
        let fares = load_fares(config)?;
        let ancillaries = load_ancillaries(config)?;
        tracing::warn!("Using the simulated GDS client");
        Ok(Self::build(
            config,
            backends,
            fares,
            ancillaries,
            Arc::new(MockGdsClient::new()),
            Arc::new(SystemClock),
        ))
    }
}
