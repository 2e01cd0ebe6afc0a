use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Forecast provider settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Region dataset and reverse geocoding settings
    #[serde(default)]
    pub geocoding: GeocodingConfig,

    /// Dual-tier cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Device location settings
    #[serde(default)]
    pub location: LocationConfig,
}

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Initial display unit; forecasts are always fetched in Celsius
    pub temperature_unit: TemperatureUnit,

    /// Base URL of the forecast endpoint (Open-Meteo compatible)
    pub forecast_base_url: String,

    /// Days requested for single-location forecasts
    pub forecast_days: u32,

    /// Days requested for the nearby batch call
    pub nearby_forecast_days: u32,

    /// HTTP timeout for forecast requests
    pub request_timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            temperature_unit: TemperatureUnit::Auto,
            forecast_base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            forecast_days: 14,
            nearby_forecast_days: 3,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// SQLite file holding the country and sub-region tables
    pub dataset_path: Option<PathBuf>,

    /// Rows farther than this are never considered a match
    pub max_search_radius_km: f64,

    /// Sub-regions closer than this become the primary place label
    pub primary_label_radius_km: f64,

    pub page_size: u32,

    /// Hard cap on pages read per scan
    pub max_pages: u32,

    /// Budget for the center-point lookup during nearby aggregation
    pub reverse_timeout_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            dataset_path: None,
            max_search_radius_km: 1000.0,
            primary_label_radius_km: 100.0,
            page_size: 1000,
            max_pages: 10,
            reverse_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file for the persistent tier; memory-only when absent
    pub store_path: Option<PathBuf>,

    /// Expiry for weather and nearby-weather entries
    pub short_expiry_minutes: u64,

    /// Expiry for location and geocoding entries
    pub long_expiry_hours: u64,

    /// Persistent tier quota
    pub quota_bytes: u64,

    /// Above this estimated size, stale entries are evicted before writes
    pub eviction_threshold_bytes: u64,

    /// Age after which entries are evicted under size pressure
    pub stale_age_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            short_expiry_minutes: 10,
            long_expiry_hours: 24,
            quota_bytes: 5 * 1024 * 1024,
            eviction_threshold_bytes: 4 * 1024 * 1024,
            stale_age_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Used whenever device location is unavailable or invalid
    pub default_latitude: f64,
    pub default_longitude: f64,

    /// Location lookups slower than this fall back to the default
    pub timeout_secs: u64,

    /// IP geolocation endpoint returning `{"loc": "lat,lon"}`
    pub ip_lookup_url: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            default_latitude: -6.2088,
            default_longitude: 106.8456,
            timeout_secs: 5,
            ip_lookup_url: "https://ipinfo.io/json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus");

        Self {
            config_dir,
            weather: WeatherConfig::default(),
            geocoding: GeocodingConfig::default(),
            cache: CacheConfig::default(),
            location: LocationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults when missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(
            &self.weather.forecast_base_url,
            "weather.forecast_base_url",
            &mut result,
        );
        self.validate_url(
            &self.location.ip_lookup_url,
            "location.ip_lookup_url",
            &mut result,
        );

        if self.weather.forecast_days == 0 || self.weather.forecast_days > 16 {
            result.add_error(
                "weather.forecast_days",
                "Forecast days must be between 1 and 16",
            );
        }
        if self.weather.nearby_forecast_days == 0 || self.weather.nearby_forecast_days > 16 {
            result.add_error(
                "weather.nearby_forecast_days",
                "Nearby forecast days must be between 1 and 16",
            );
        }

        if self.geocoding.page_size == 0 {
            result.add_error("geocoding.page_size", "Page size must be greater than 0");
        }
        if self.geocoding.max_pages == 0 {
            result.add_error("geocoding.max_pages", "Max pages must be greater than 0");
        }
        if self.geocoding.primary_label_radius_km > self.geocoding.max_search_radius_km {
            result.add_warning(
                "geocoding.primary_label_radius_km",
                "Primary label radius exceeds the search radius",
            );
        }
        if self.geocoding.dataset_path.is_none() {
            result.add_warning(
                "geocoding.dataset_path",
                "Region dataset not configured - place names will be unavailable",
            );
        }

        if self.cache.short_expiry_minutes == 0 {
            result.add_warning("cache.short_expiry_minutes", "Weather caching disabled (0 minutes)");
        }
        if self.cache.eviction_threshold_bytes > self.cache.quota_bytes {
            result.add_warning(
                "cache.eviction_threshold_bytes",
                "Eviction threshold is above the quota; eviction only runs after quota errors",
            );
        }

        let lat = self.location.default_latitude;
        let lon = self.location.default_longitude;
        if !lat.is_finite() || lat.abs() > 90.0 || !lon.is_finite() || lon.abs() > 180.0 {
            result.add_error(
                "location",
                format!("Default location out of range: {}, {}", lat, lon),
            );
        }
        if self.location.timeout_secs == 0 {
            result.add_warning(
                "location.timeout_secs",
                "Location lookup will always use the default location",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("nimbus");

        Ok(config_dir.join("config.toml"))
    }
}
