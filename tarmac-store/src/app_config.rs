use serde::Deserialize;
use std::env;
use tarmac_catalog::InventoryConfig;
use tarmac_governor::GovernorConfig;
use tarmac_offer::cache::CacheConfig;
use tarmac_order::{BookingConfig, GdsConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Absent: bookings, inventory and limits live in memory.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Absent: the availability cache lives in memory.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    #[serde(default)]
    pub gds: GdsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

/// Reference data files loaded and validated at startup.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PricingConfig {
    pub catalog_path: Option<String>,
    pub ancillaries_path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // TARMAC_DATABASE__URL=postgres://... sets database.url
            .add_source(config::Environment::with_prefix("TARMAC").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_falls_back_to_defaults() {
        let config = parse("[server]\nport = 8080\n");
        assert_eq!(config.server.port, 8080);
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.gds.timeout_ms, 15_000);
        assert_eq!(config.cache.ttl_seconds, 900);
        assert_eq!(config.cache.stale_grace_seconds, 300);
        assert_eq!(config.inventory.max_conflict_retries, 8);
        assert_eq!(config.governor.notification_interval_seconds, 3600);
        assert_eq!(config.booking.void_window_hours, 24);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = parse(
            r#"
            [server]
            port = 9000

            [database]
            url = "postgres://tarmac@localhost/tarmac"

            [gds]
            timeout_ms = 5000
            failure_threshold = 3

            [governor]
            recipients = ["ops@agency.example"]

            [booking]
            void_window_hours = 12
            "#,
        );
        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://tarmac@localhost/tarmac");
        assert_eq!(database.max_connections, 5);
        assert_eq!(config.gds.timeout_ms, 5000);
        assert_eq!(config.gds.failure_threshold, 3);
        assert_eq!(config.gds.reset_timeout_seconds, 30);
        assert_eq!(config.governor.recipients, vec!["ops@agency.example".to_string()]);
        assert_eq!(config.booking.void_window_hours, 12);
    }
}
