//! Device location with a bounded wait and a default fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{LocationConfig, ReqwestErrorExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::error::LocationError;
use crate::preferences::PreferenceStore;
use crate::types::Coordinate;

/// One-shot "where am I" lookup.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<Coordinate, LocationError>;
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    /// `"lat,lon"`
    loc: Option<String>,
}

/// Approximate location from an IP geolocation endpoint.
pub struct IpLocationProvider {
    client: Client,
    url: String,
}

impl IpLocationProvider {
    pub fn new(config: &LocationConfig) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LocationError::Network(e.into_network_error()))?;
        Ok(Self {
            client,
            url: config.ip_lookup_url.clone(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn parse_loc(raw: &str) -> Result<Coordinate, LocationError> {
    let (lat, lon) = raw
        .split_once(',')
        .ok_or_else(|| LocationError::Parse(format!("expected \"lat,lon\", got {:?}", raw)))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| LocationError::Parse(format!("bad latitude {:?}", lat)))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| LocationError::Parse(format!("bad longitude {:?}", lon)))?;
    Coordinate::new(latitude, longitude)
        .ok_or_else(|| LocationError::Parse(format!("out of range: {}", raw)))
}

#[async_trait]
impl LocationProvider for IpLocationProvider {
    #[instrument(skip(self), level = "info")]
    async fn current_location(&self) -> Result<Coordinate, LocationError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LocationError::Network(e.into_network_error()))?;

        if !response.status().is_success() {
            tracing::warn!("Location lookup returned status {}", response.status());
            return Err(LocationError::ServiceUnavailable);
        }

        let body: IpLookupResponse = response
            .json()
            .await
            .map_err(|e| LocationError::Parse(e.to_string()))?;
        let loc = body
            .loc
            .ok_or_else(|| LocationError::Parse("missing loc field".into()))?;
        parse_loc(&loc)
    }
}

/// Resolves the user's location, never failing.
pub struct Locator {
    provider: Arc<dyn LocationProvider>,
    default_location: Coordinate,
    timeout: Duration,
    preferences: Option<Arc<PreferenceStore>>,
}

impl Locator {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        default_location: Coordinate,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            default_location,
            timeout,
            preferences: None,
        }
    }

    pub fn from_config(provider: Arc<dyn LocationProvider>, config: &LocationConfig) -> Self {
        let default_location =
            Coordinate::sanitized(config.default_latitude, config.default_longitude);
        Self::new(
            provider,
            default_location,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Remember successful lookups as the last known location.
    pub fn with_preferences(mut self, preferences: Arc<PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn default_location(&self) -> Coordinate {
        self.default_location
    }

    /// Location to show before a lookup completes: last known, else default.
    pub fn starting_location(&self) -> Coordinate {
        self.preferences
            .as_ref()
            .and_then(|p| p.last_location())
            .unwrap_or(self.default_location)
    }

    /// Current location, or the default when the provider fails or is too slow.
    pub async fn locate_or_default(&self) -> Coordinate {
        match tokio::time::timeout(self.timeout, self.provider.current_location()).await {
            Ok(Ok(location)) => {
                if let Some(prefs) = &self.preferences {
                    prefs.set_last_location(location);
                }
                location
            }
            Ok(Err(e)) => {
                tracing::warn!("Location lookup failed, using default: {}", e);
                self.default_location
            }
            Err(_) => {
                tracing::warn!(
                    "Location lookup exceeded {:?}, using default",
                    self.timeout
                );
                self.default_location
            }
        }
    }
}
