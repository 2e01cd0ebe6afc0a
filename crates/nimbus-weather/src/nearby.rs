//! Nearby weather for the map view.
//!
//! Samples points around the map center, fetches their forecasts in one
//! batch while reverse geocoding the center under a deadline, and names each
//! point relative to the center.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::instrument;

use crate::cache::{ExpiryKind, WeatherCache};
use crate::error::WeatherError;
use crate::geo::{bearing_degrees, haversine_km, Direction};
use crate::geocode::GeocodingResolver;
use crate::provider::WeatherProvider;
use crate::sampler::{sample_points, DEFAULT_ZOOM};
use crate::types::{Coordinate, NearbyLocation};

/// Center name used when reverse geocoding fails or runs out of time.
pub const CENTER_FALLBACK_LABEL: &str = "Current Location";

pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(2);

/// Points closer than this reuse the center name.
const SAME_PLACE_KM: f64 = 5.0;
/// Points up to this distance are named by compass direction.
const DIRECTIONAL_KM: f64 = 20.0;

const KEEP_PROBABILITY: f64 = 0.8;
const ALWAYS_KEPT: usize = 4;

/// Cache key for a center and zoom: `nearby_weather_{lat:.2}_{lon:.2}_{zoom}`.
pub fn nearby_cache_key(center: Coordinate, zoom: f64) -> String {
    format!(
        "nearby_weather_{:.2}_{:.2}_{}",
        center.latitude, center.longitude, zoom
    )
}

/// Display name for `point` relative to a named center.
pub fn place_name(center_name: &str, center: Coordinate, point: Coordinate) -> String {
    let distance = haversine_km(center, point);
    if distance < SAME_PLACE_KM {
        center_name.to_string()
    } else if distance <= DIRECTIONAL_KM {
        let direction = Direction::from_bearing(bearing_degrees(center, point));
        format!("{} of {}", direction.name(), center_name)
    } else {
        format!("{}km from {}", distance.round() as i64, center_name)
    }
}

/// Keep each item with 80% probability; the first four always stay.
pub fn thin_out<T, R: Rng>(items: Vec<T>, rng: &mut R) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| (i < ALWAYS_KEPT || rng.random_bool(KEEP_PROBABILITY)).then_some(item))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct CenterLabel {
    name: String,
    country: String,
}

impl CenterLabel {
    fn fallback() -> Self {
        Self {
            name: CENTER_FALLBACK_LABEL.to_string(),
            country: String::new(),
        }
    }
}

pub struct NearbyWeatherService {
    cache: Arc<WeatherCache>,
    provider: Arc<WeatherProvider>,
    resolver: Option<Arc<GeocodingResolver>>,
    geocode_timeout: Duration,
    rng: Mutex<StdRng>,
}

impl NearbyWeatherService {
    pub fn new(
        cache: Arc<WeatherCache>,
        provider: Arc<WeatherProvider>,
        resolver: Option<Arc<GeocodingResolver>>,
    ) -> Self {
        Self {
            cache,
            provider,
            resolver,
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a fixed seed for sampling and thinning.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_geocode_timeout(mut self, timeout: Duration) -> Self {
        self.geocode_timeout = timeout;
        self
    }

    /// Nearby locations with forecasts around a map center.
    ///
    /// Results are cached with the short expiry. Any failure yields an empty
    /// list so the map can still render.
    #[instrument(skip(self), level = "info")]
    pub async fn get_nearby_weather(
        &self,
        latitude: f64,
        longitude: f64,
        zoom: f64,
    ) -> Vec<NearbyLocation> {
        let center = Coordinate::sanitized(latitude, longitude);
        let zoom = if zoom.is_finite() { zoom } else { DEFAULT_ZOOM };
        let key = nearby_cache_key(center, zoom);

        if let Some(cached) = self.cache.get::<Vec<NearbyLocation>>(&key, ExpiryKind::Short) {
            tracing::debug!("Nearby weather cache hit for {}", key);
            return cached;
        }

        match self.aggregate(center, zoom).await {
            Ok(locations) => {
                tracing::info!("Built {} nearby locations for {}", locations.len(), key);
                self.cache.set(&key, &locations);
                locations
            }
            Err(e) => {
                tracing::error!("Nearby weather aggregation failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn aggregate(
        &self,
        center: Coordinate,
        zoom: f64,
    ) -> Result<Vec<NearbyLocation>, WeatherError> {
        let points = {
            let mut rng = self.rng.lock();
            sample_points(center, zoom, &mut *rng)
        };

        let (forecasts, label) = tokio::join!(
            self.provider.fetch_forecast_batch(&points),
            self.center_label(center)
        );
        let forecasts = forecasts?;

        let locations: Vec<NearbyLocation> = points
            .iter()
            .zip(forecasts)
            .map(|(point, weather_data)| NearbyLocation {
                latitude: point.latitude,
                longitude: point.longitude,
                city: place_name(&label.name, center, *point),
                country: label.country.clone(),
                weather_data,
            })
            .collect();

        let mut rng = self.rng.lock();
        Ok(thin_out(locations, &mut *rng))
    }

    /// Reverse geocode the center, giving up after the configured timeout.
    async fn center_label(&self, center: Coordinate) -> CenterLabel {
        let Some(resolver) = &self.resolver else {
            return CenterLabel::fallback();
        };

        let lookup = resolver.resolve_by_coordinates(center.latitude, center.longitude);
        match tokio::time::timeout(self.geocode_timeout, lookup).await {
            Ok(Ok(place)) => CenterLabel {
                name: place.name,
                country: place.country_name,
            },
            Ok(Err(e)) => {
                tracing::warn!("Center geocoding failed, using generic names: {}", e);
                CenterLabel::fallback()
            }
            Err(_) => {
                tracing::warn!(
                    "Center geocoding exceeded {:?}, using generic names",
                    self.geocode_timeout
                );
                CenterLabel::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CountryRecord, LocalRegionRecord, RegionDataset, SubRegionRecord};
    use crate::geo::offset_km;
    use crate::geocode::tests::seeded_dataset;
    use crate::geocode::ResolverSettings;
    use crate::provider::tests::{forecast_json, provider_for};
    use async_trait::async_trait;
    use nimbus_core::DatabaseError;
    use serde_json::Value;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JAKARTA: Coordinate = Coordinate {
        latitude: -6.2088,
        longitude: 106.8456,
    };

    fn batch_body(count: usize) -> Value {
        Value::Array((0..count).map(|i| forecast_json(20.0 + i as f64)).collect())
    }

    fn service(server: &MockServer, resolver: Option<Arc<GeocodingResolver>>) -> NearbyWeatherService {
        NearbyWeatherService::new(
            Arc::new(WeatherCache::in_memory()),
            Arc::new(provider_for(server)),
            resolver,
        )
        .with_seed(42)
    }

    fn jakarta_resolver() -> Option<Arc<GeocodingResolver>> {
        Some(Arc::new(GeocodingResolver::new(
            Arc::new(seeded_dataset()),
            ResolverSettings::default(),
        )))
    }

    struct SlowDataset;

    #[async_trait]
    impl RegionDataset for SlowDataset {
        async fn countries_page(&self, _: u32, _: u32) -> Result<Vec<CountryRecord>, DatabaseError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn sub_regions_page(
            &self,
            _: u32,
            _: u32,
        ) -> Result<Vec<SubRegionRecord>, DatabaseError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn country_by_code(&self, _: &str) -> Result<Option<CountryRecord>, DatabaseError> {
            Ok(None)
        }

        async fn search_countries(
            &self,
            _: &str,
            _: u32,
        ) -> Result<Vec<CountryRecord>, DatabaseError> {
            Ok(Vec::new())
        }

        async fn search_local_regions(
            &self,
            _: &str,
            _: u32,
        ) -> Result<Vec<LocalRegionRecord>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            nearby_cache_key(JAKARTA, 13.0),
            "nearby_weather_-6.21_106.85_13"
        );
        assert_eq!(
            nearby_cache_key(JAKARTA, 13.5),
            "nearby_weather_-6.21_106.85_13.5"
        );
    }

    #[test]
    fn test_place_name_buckets() {
        let near = offset_km(JAKARTA, 3.0, 0.0);
        let mid = offset_km(JAKARTA, 0.0, 12.0);
        let far = offset_km(JAKARTA, 35.0, 0.0);

        assert_eq!(place_name("Jakarta", JAKARTA, near), "Jakarta");
        assert_eq!(place_name("Jakarta", JAKARTA, mid), "East of Jakarta");
        assert_eq!(place_name("Jakarta", JAKARTA, far), "35km from Jakarta");

        let northeast = offset_km(JAKARTA, 8.0, 8.0);
        assert_eq!(place_name("Jakarta", JAKARTA, northeast), "Northeast of Jakarta");
    }

    #[test]
    fn test_thin_out_keeps_first_four() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let kept = thin_out((0..8).collect::<Vec<_>>(), &mut rng);
            assert!(kept.len() >= 4 && kept.len() <= 8);
            assert_eq!(&kept[..4], &[0, 1, 2, 3]);
        }

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(thin_out(vec![1, 2, 3], &mut rng), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_jakarta_end_to_end_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("forecast_days", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch_body(8)))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&server, jakarta_resolver());
        let first = svc.get_nearby_weather(-6.2088, 106.8456, 13.0).await;

        assert!((4..=8).contains(&first.len()), "got {}", first.len());
        for location in &first {
            let point = Coordinate {
                latitude: location.latitude,
                longitude: location.longitude,
            };
            assert_eq!(location.city, place_name("Jakarta", JAKARTA, point));
            assert_eq!(location.country, "Indonesia");
            assert!(haversine_km(JAKARTA, point) <= 50.0 * 1.15);
        }

        let cached: Option<Vec<NearbyLocation>> = svc
            .cache
            .get("nearby_weather_-6.21_106.85_13", ExpiryKind::Short);
        assert_eq!(cached.as_ref(), Some(&first));

        // Served from cache; the mock expects exactly one request
        let second = svc.get_nearby_weather(-6.2088, 106.8456, 13.0).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_slow_geocoding_falls_back_to_generic_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch_body(8)))
            .mount(&server)
            .await;

        let resolver = GeocodingResolver::new(Arc::new(SlowDataset), ResolverSettings::default());
        let svc = service(&server, Some(Arc::new(resolver)))
            .with_geocode_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let locations = svc.get_nearby_weather(-6.2088, 106.8456, 13.0).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(locations.len() >= 4);
        assert!(locations
            .iter()
            .all(|l| l.city.contains(CENTER_FALLBACK_LABEL)));
    }

    #[tokio::test]
    async fn test_batch_failure_yields_empty_list_and_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let svc = service(&server, None);
        assert!(svc.get_nearby_weather(-6.2088, 106.8456, 13.0).await.is_empty());
        assert!(svc.get_nearby_weather(-6.2088, 106.8456, 13.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_zoomed_in_requests_six_points() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch_body(6)))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(&server, None);
        let locations = svc.get_nearby_weather(-6.2088, 106.8456, 15.0).await;
        assert!((4..=6).contains(&locations.len()));
    }

    #[tokio::test]
    async fn test_invalid_center_uses_fallback_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch_body(8)))
            .mount(&server)
            .await;

        let svc = service(&server, None);
        let locations = svc.get_nearby_weather(f64::NAN, 400.0, 13.0).await;
        assert!(!locations.is_empty());
        let cached: Option<Vec<NearbyLocation>> = svc
            .cache
            .get("nearby_weather_-6.21_106.85_13", ExpiryKind::Short);
        assert!(cached.is_some());
    }
}
