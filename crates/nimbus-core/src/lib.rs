pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, GeocodingConfig, LocationConfig, TemperatureUnit, ValidationResult,
    WeatherConfig,
};
pub use error::{
    AppError, ConfigError, DatabaseError, NetworkError, ReqwestErrorExt, RusqliteErrorExt,
};

use anyhow::Result;

/// Initialize logging for the process.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init() -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Nimbus core initialized");
    }
    Ok(())
}
