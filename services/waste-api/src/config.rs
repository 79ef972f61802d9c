use crate::geometry::{GeometryError, Zone};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the waste API service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Event ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Dashboard display configuration
    #[serde(default)]
    pub display: DisplayConfig,
    /// Regions of interest used to localize detections, checked in order
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Event ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Edge box used when a payload carries no `EDGE_BOX_ID`
    pub default_edge_box_id: Option<String>,
    /// Retries after the first failed persistence attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for a single retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Number of task states kept for `GET /api/v1/tasks/{id}`
    #[serde(default = "default_task_registry_capacity")]
    pub task_registry_capacity: usize,
}

/// Dashboard display configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Offset added to UTC timestamps for the date/start/end columns
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i64,
}

/// Named polygon in normalized coordinates, flattened as x1, y1, x2, y2, ...
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub coords: Vec<f64>,
}

// Default value functions
fn default_service_name() -> String {
    "waste-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    16055
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_task_registry_capacity() -> usize {
    10_000
}

fn default_utc_offset_hours() -> i64 {
    2
}

fn default_zones() -> Vec<ZoneConfig> {
    vec![ZoneConfig {
        name: "Tor06".to_string(),
        coords: vec![
            0.337_117_537_856_102_05,
            0.810_818_150_639_534,
            0.177_146_104_340_876_13,
            0.200_324_556_431_775_16,
            0.680_009_763_355_248_8,
            0.198_697_654_812_697_22,
            0.566_499_277_218_509_3,
            0.820_174_073_300_474_2,
        ],
    }]
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "waste-api")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/waste-api").required(false))
            .add_source(config::File::with_name("/etc/wasteant/waste-api").required(false))
            // WASTE_API__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("WASTE_API")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Build the validated zone list
    pub fn zones(&self) -> Result<Vec<Zone>, GeometryError> {
        self.zones
            .iter()
            .map(|z| Zone::new(&z.name, &z.coords))
            .collect()
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl IngestConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_edge_box_id: None,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            task_registry_capacity: default_task_registry_capacity(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}
