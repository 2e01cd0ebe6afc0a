//! Service wiring from a [`Config`].
//!
//! Builds each component once and hands them out by reference. One persistent
//! store backs both the cache and the preferences.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{AppError, Config, ConfigError};

use crate::cache::{CachePolicy, ExpiryKind, WeatherCache};
use crate::error::{GeocodeError, WeatherError};
use crate::geocode::GeocodingResolver;
use crate::location::{IpLocationProvider, Locator};
use crate::nearby::NearbyWeatherService;
use crate::preferences::{PreferenceStore, Preferences};
use crate::provider::WeatherProvider;
use crate::store::{PersistentStore, SqliteStore};
use crate::types::{Coordinate, WeatherSnapshot};

pub struct WeatherServices {
    cache: Arc<WeatherCache>,
    provider: Arc<WeatherProvider>,
    resolver: Option<Arc<GeocodingResolver>>,
    nearby: NearbyWeatherService,
    preferences: Arc<PreferenceStore>,
    locator: Locator,
}

impl WeatherServices {
    /// Build every service.
    ///
    /// An unopenable cache store degrades to memory-only. A missing region
    /// dataset leaves geocoding unavailable; see [`WeatherServices::geocoder`].
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let store = open_store(config);

        let cache = Arc::new(WeatherCache::new(
            store.clone(),
            CachePolicy::from(&config.cache),
        ));

        let provider = Arc::new(
            WeatherProvider::new(&config.weather).map_err(|e| AppError::Service(e.to_string()))?,
        );

        let resolver = match GeocodingResolver::from_config(&config.geocoding) {
            Ok(resolver) => Some(Arc::new(resolver.with_cache(Arc::clone(&cache)))),
            Err(GeocodeError::Config(e)) => {
                tracing::warn!("Geocoding disabled: {}", e);
                None
            }
            Err(GeocodeError::Dataset(e)) => return Err(AppError::Database(e)),
            Err(e) => return Err(AppError::Service(e.to_string())),
        };

        let nearby = NearbyWeatherService::new(
            Arc::clone(&cache),
            Arc::clone(&provider),
            resolver.clone(),
        )
        .with_geocode_timeout(Duration::from_millis(config.geocoding.reverse_timeout_ms));

        let preferences = Arc::new(PreferenceStore::load(
            store,
            Preferences {
                temperature_unit: config.weather.temperature_unit,
                last_location: None,
            },
        ));

        let ip_provider = IpLocationProvider::new(&config.location)
            .map_err(|e| AppError::Service(e.to_string()))?;
        let locator = Locator::from_config(Arc::new(ip_provider), &config.location)
            .with_preferences(Arc::clone(&preferences));

        tracing::info!("Weather services initialized");

        Ok(Self {
            cache,
            provider,
            resolver,
            nearby,
            preferences,
            locator,
        })
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    pub fn provider(&self) -> &WeatherProvider {
        &self.provider
    }

    pub fn nearby(&self) -> &NearbyWeatherService {
        &self.nearby
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The geocoding resolver, or a configuration error when no dataset is set.
    pub fn geocoder(&self) -> Result<&GeocodingResolver, GeocodeError> {
        self.resolver.as_deref().ok_or_else(|| {
            GeocodeError::Config(ConfigError::MissingSetting(
                "geocoding.dataset_path".to_string(),
            ))
        })
    }

    /// Forecast for one location, cached with the short expiry.
    pub async fn forecast(&self, coordinate: Coordinate) -> Result<WeatherSnapshot, WeatherError> {
        let coordinate = Coordinate::sanitized(coordinate.latitude, coordinate.longitude);
        let key = format!(
            "weather_{:.2}_{:.2}",
            coordinate.latitude, coordinate.longitude
        );

        if let Some(cached) = self.cache.get::<WeatherSnapshot>(&key, ExpiryKind::Short) {
            return Ok(cached);
        }

        let snapshot = self.provider.fetch_forecast(coordinate).await?;
        self.cache.set(&key, &snapshot);
        Ok(snapshot)
    }
}

fn open_store(config: &Config) -> Option<Arc<dyn PersistentStore>> {
    let path = config.cache.store_path.as_ref()?;
    match SqliteStore::open(path, config.cache.quota_bytes) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!("Cache store {} unavailable: {}", path.display(), e);
            None
        }
    }
}
