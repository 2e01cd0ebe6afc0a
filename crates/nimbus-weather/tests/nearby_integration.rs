//! Integration tests for the weather services using wiremock and on-disk SQLite.

use chrono::{Duration as ChronoDuration, Utc};
use nimbus_core::{Config, TemperatureUnit};
use nimbus_weather::preferences::format_temperature;
use nimbus_weather::dataset::{CountryRecord, SubRegionRecord};
use nimbus_weather::{
    Coordinate, ExpiryKind, NearbyLocation, PersistentStore, SqliteRegionDataset, SqliteStore,
    WeatherServices,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Forecast for one location in GMT, starting at midnight today.
fn forecast_for_today(base_temperature: f64) -> serde_json::Value {
    let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap();
    let hours: Vec<String> = (0..72)
        .map(|h| {
            (midnight + ChronoDuration::hours(h))
                .format("%Y-%m-%dT%H:%M")
                .to_string()
        })
        .collect();
    let days: Vec<String> = (0..3)
        .map(|d| (midnight + ChronoDuration::days(d)).format("%Y-%m-%d").to_string())
        .collect();

    serde_json::json!({
        "timezone": "GMT",
        "utc_offset_seconds": 0,
        "hourly": {
            "time": hours,
            "temperature_2m": vec![base_temperature; 72],
            "relative_humidity_2m": vec![75.0; 72],
            "surface_pressure": vec![1010.0; 72],
            "wind_speed_10m": vec![9.0; 72],
            "wind_direction_10m": vec![200.0; 72],
            "precipitation_probability": vec![20.0; 72],
            "uv_index": vec![3.0; 72],
            "weather_code": vec![2; 72]
        },
        "daily": {
            "time": days,
            "weather_code": [2, 3, 80],
            "temperature_2m_max": [31.0, 30.0, 29.0],
            "temperature_2m_min": [24.0, 23.0, 22.0],
            "precipitation_probability_max": [20.0, 40.0, 80.0],
            "wind_speed_10m_max": [12.0, 14.0, 16.0],
            "wind_direction_10m_dominant": [200.0, 210.0, 220.0],
            "uv_index_max": [9.0, 8.0, 7.0],
            "sunrise": [null, null, null],
            "sunset": [null, null, null]
        }
    })
}

fn batch(count: usize) -> serde_json::Value {
    serde_json::Value::Array((0..count).map(|i| forecast_for_today(25.0 + i as f64)).collect())
}

struct Fixture {
    dir: tempfile::TempDir,
    config: Config,
}

fn fixture(server: &MockServer) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let dataset_path = dir.path().join("regions.db");

    let dataset = SqliteRegionDataset::open(&dataset_path).unwrap();
    dataset
        .insert_country(&CountryRecord {
            code: "ID".to_string(),
            name: "Indonesia".to_string(),
            geometry: Some("SRID=4326;POINT(106.8 -6.2)".to_string()),
        })
        .unwrap();
    dataset
        .insert_sub_region(&SubRegionRecord {
            code: "ID-JK".to_string(),
            name: "Jakarta".to_string(),
            division_type: "province".to_string(),
            latitude: -6.2,
            longitude: 106.85,
            country_code: "ID".to_string(),
        })
        .unwrap();

    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.weather.forecast_base_url = format!("{}/v1/forecast", server.uri());
    config.geocoding.dataset_path = Some(dataset_path);
    config.cache.store_path = Some(dir.path().join("cache.db"));

    Fixture { dir, config }
}

#[tokio::test]
async fn test_nearby_weather_is_cached_until_weather_cache_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("forecast_days", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(batch(8)))
        .expect(2)
        .mount(&server)
        .await;

    let fx = fixture(&server);
    let services = WeatherServices::from_config(&fx.config).unwrap();

    let first = services
        .nearby()
        .get_nearby_weather(-6.2088, 106.8456, 13.0)
        .await;
    assert!((4..=8).contains(&first.len()), "got {}", first.len());
    assert!(first.iter().all(|l| l.city.contains("Jakarta")));
    assert!(first.iter().all(|l| l.country == "Indonesia"));
    assert!(first.iter().all(|l| l.weather_data.daily.len() == 2));

    let second = services
        .nearby()
        .get_nearby_weather(-6.2088, 106.8456, 13.0)
        .await;
    assert_eq!(first, second);

    // Written through to the persistent tier
    let store = SqliteStore::open(fx.dir.path().join("cache.db"), 10 * 1024 * 1024).unwrap();
    assert!(store
        .keys()
        .unwrap()
        .iter()
        .any(|k| k.ends_with("nearby_weather_-6.21_106.85_13")));

    services.cache().clear_weather_cache();
    let third = services
        .nearby()
        .get_nearby_weather(-6.2088, 106.8456, 13.0)
        .await;
    assert!(!third.is_empty());
}

#[tokio::test]
async fn test_nearby_weather_survives_restart_via_persistent_tier() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(batch(8)))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server);
    let first = WeatherServices::from_config(&fx.config)
        .unwrap()
        .nearby()
        .get_nearby_weather(-6.2088, 106.8456, 13.0)
        .await;

    // A fresh service set starts with an empty memory tier
    let restarted = WeatherServices::from_config(&fx.config).unwrap();
    let cached: Option<Vec<NearbyLocation>> = restarted
        .cache()
        .get("nearby_weather_-6.21_106.85_13", ExpiryKind::Short);
    let cached = cached.expect("nearby entry should be read back from disk");
    let names = |list: &[NearbyLocation]| list.iter().map(|l| l.city.clone()).collect::<Vec<_>>();
    assert_eq!(names(&cached), names(&first));
}

#[tokio::test]
async fn test_single_forecast_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("forecast_days", "14"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_for_today(28.0)))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server);
    let services = WeatherServices::from_config(&fx.config).unwrap();
    let point = Coordinate {
        latitude: -6.2088,
        longitude: 106.8456,
    };

    let a = services.forecast(point).await.unwrap();
    let b = services.forecast(point).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.current.temperature, 28.0);
    assert_eq!(a.current.wind_direction, "SSW");
    assert_eq!(a.today_hourly.len(), 24);
}

#[tokio::test]
async fn test_display_unit_follows_preference_not_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_for_today(30.0)))
        .expect(1)
        .mount(&server)
        .await;

    let mut fx = fixture(&server);
    fx.config.weather.temperature_unit = TemperatureUnit::Fahrenheit;
    let services = WeatherServices::from_config(&fx.config).unwrap();
    let point = Coordinate {
        latitude: -6.2088,
        longitude: 106.8456,
    };

    let snapshot = services.forecast(point).await.unwrap();
    let prefs = services.preferences();
    assert_eq!(prefs.temperature_unit(), TemperatureUnit::Fahrenheit);
    assert_eq!(
        format_temperature(snapshot.current.temperature, prefs.temperature_unit()),
        "86°F"
    );

    // Switching units reuses the cached Celsius reading
    prefs.set_temperature_unit(TemperatureUnit::Celsius);
    let cached = services.forecast(point).await.unwrap();
    assert_eq!(
        format_temperature(cached.current.temperature, prefs.temperature_unit()),
        "30°C"
    );
}

#[tokio::test]
async fn test_geocoder_search_and_reverse() {
    let server = MockServer::start().await;
    let fx = fixture(&server);
    let services = WeatherServices::from_config(&fx.config).unwrap();
    let geocoder = services.geocoder().unwrap();

    let place = geocoder.resolve_by_coordinates(-6.21, 106.84).await.unwrap();
    assert_eq!(place.display_name, "Jakarta, Indonesia");

    let found = geocoder.search_by_text("indonesia", 3).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].coordinates.latitude, -6.2);

    let builtin = geocoder.search_by_text("Kuala", 3).await;
    assert_eq!(builtin[0].country_code, "MY");
}
