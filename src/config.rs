use serde::Deserialize;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gtfs::StaticFiles;

/// Application configuration. Every section is optional in `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub gtfs: GtfsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Realtime vehicle-position feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Location of the static GTFS tables.
#[derive(Debug, Clone, Deserialize)]
pub struct GtfsConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_routes_file")]
    pub routes_file: String,
    #[serde(default = "default_trips_file")]
    pub trips_file: String,
    #[serde(default = "default_shapes_file")]
    pub shapes_file: String,
    #[serde(default = "default_agency_file")]
    pub agency_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub maps_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Distinct route sets kept in the shape cache.
    #[serde(default = "default_max_route_sets")]
    pub max_route_sets: usize,
}

fn default_feed_url() -> String {
    "https://api.transport.nsw.gov.au/v1/gtfs/vehiclepos/buses".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("gtfs_static")
}
fn default_routes_file() -> String {
    "routes.txt".to_string()
}
fn default_trips_file() -> String {
    "trips.txt".to_string()
}
fn default_shapes_file() -> String {
    "shapes.txt".to_string()
}
fn default_agency_file() -> String {
    "agency.txt".to_string()
}
fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_max_route_sets() -> usize {
    256
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            url: default_feed_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GtfsConfig {
    fn default() -> Self {
        GtfsConfig {
            static_dir: default_static_dir(),
            routes_file: default_routes_file(),
            trips_file: default_trips_file(),
            shapes_file: default_shapes_file(),
            agency_file: default_agency_file(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        WebConfig {
            bind: default_bind(),
            maps_api_key: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_route_sets: default_max_route_sets(),
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured key, empty if unset.
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or("")
    }
}

impl GtfsConfig {
    pub fn files(&self) -> StaticFiles {
        StaticFiles {
            routes: self.static_dir.join(&self.routes_file),
            trips: self.static_dir.join(&self.trips_file),
            shapes: self.static_dir.join(&self.shapes_file),
            agency: self.static_dir.join(&self.agency_file),
        }
    }
}

impl WebConfig {
    /// Maps key if set and non-blank.
    pub fn maps_api_key(&self) -> Option<&str> {
        self.maps_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl CacheConfig {
    pub fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_route_sets).unwrap_or(NonZeroUsize::MIN)
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            Self::from_json(&contents)?
        } else {
            Config::default()
        };

        // Overrides only touch fields that need no validation.
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse config from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override file values from the environment. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("API_KEY") {
            self.feed.api_key = Some(key);
        }
        if let Some(url) = var("BUS_URL") {
            self.feed.url = url;
        }
        if let Some(key) = var("GOOGLE_MAPS_API_KEY") {
            self.web.maps_api_key = Some(key);
        }
        if let Some(dir) = var("GTFS_STATIC_DIR") {
            self.gtfs.static_dir = PathBuf::from(dir);
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=120).contains(&self.feed.timeout_secs) {
            return Err(ConfigError::Validation(format!(
                "feed.timeout_secs must be 1-120, got {}",
                self.feed.timeout_secs
            )));
        }
        if self.web.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "web.bind is not a socket address: {}",
                self.web.bind
            )));
        }
        if self.cache.max_route_sets == 0 {
            return Err(ConfigError::Validation(
                "cache.max_route_sets must be at least 1".to_string(),
            ));
        }
        let gtfs = &self.gtfs;
        for (name, file) in [
            ("routes_file", &gtfs.routes_file),
            ("trips_file", &gtfs.trips_file),
            ("shapes_file", &gtfs.shapes_file),
            ("agency_file", &gtfs.agency_file),
        ] {
            if file.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "gtfs.{} cannot be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
