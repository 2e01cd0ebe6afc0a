//! Open-Meteo forecast adapter.
//!
//! Single-location requests are de-duplicated by URL while in flight. Batch
//! requests send comma-joined coordinate lists in one call. Temperatures are
//! always requested in Celsius; conversion happens at display time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use nimbus_core::{ReqwestErrorExt, WeatherConfig};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::cache::{Clock, SystemClock};
use crate::error::WeatherError;
use crate::geo::{compass_label, CompassResolution};
use crate::types::{
    Coordinate, CurrentWeather, DailyForecast, HourlyForecast, UvCategory, WeatherCondition,
    WeatherSnapshot,
};

const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,surface_pressure,wind_speed_10m,wind_direction_10m,precipitation_probability,uv_index,weather_code";

const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max,wind_speed_10m_max,wind_direction_10m_dominant,uv_index_max,sunrise,sunset";

/// Hours exposed in [`WeatherSnapshot::hourly`].
const HOURLY_WINDOW: usize = 24;

#[derive(Debug, Clone, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    utc_offset_seconds: i64,
    hourly: Option<HourlySeries>,
    daily: Option<DailySeries>,
}

#[derive(Debug, Clone, Deserialize)]
struct HourlySeries {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    surface_pressure: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    uv_index: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<i32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct DailySeries {
    time: Vec<String>,
    #[serde(default)]
    weather_code: Vec<Option<i32>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m_dominant: Vec<Option<f64>>,
    #[serde(default)]
    uv_index_max: Vec<Option<f64>>,
    #[serde(default)]
    sunrise: Vec<Option<String>>,
    #[serde(default)]
    sunset: Vec<Option<String>>,
}

/// Batch calls return an array; a single coordinate may come back as one object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchResponse {
    Many(Vec<ForecastResponse>),
    One(Box<ForecastResponse>),
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ForecastResponse>, WeatherError>>>;

pub struct WeatherProvider {
    client: Client,
    base_url: String,
    forecast_days: u32,
    nearby_forecast_days: u32,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl WeatherProvider {
    pub fn new(config: &WeatherConfig) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WeatherError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: config.forecast_base_url.clone(),
            forecast_days: config.forecast_days,
            nearby_forecast_days: config.nearby_forecast_days,
            clock: Arc::new(SystemClock),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Clock used to pick the current local hour.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of distinct requests currently awaiting a response.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Full forecast for one location.
    ///
    /// Concurrent calls for the same coordinate share one HTTP request.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_forecast(
        &self,
        coordinate: Coordinate,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let coordinate = Coordinate::sanitized(coordinate.latitude, coordinate.longitude);
        let url = self.forecast_url(&[coordinate], self.forecast_days)?;
        let response = self.shared_fetch(url).await?;
        self.normalize(coordinate, &response)
    }

    /// Forecasts for many locations in one request, in input order.
    #[instrument(skip(self, coordinates), fields(count = coordinates.len()), level = "info")]
    pub async fn fetch_forecast_batch(
        &self,
        coordinates: &[Coordinate],
    ) -> Result<Vec<WeatherSnapshot>, WeatherError> {
        if coordinates.is_empty() {
            return Ok(Vec::new());
        }

        let coordinates: Vec<Coordinate> = coordinates
            .iter()
            .map(|c| Coordinate::sanitized(c.latitude, c.longitude))
            .collect();
        let url = self.forecast_url(&coordinates, self.nearby_forecast_days)?;

        let responses = match fetch_json::<BatchResponse>(&self.client, &url).await? {
            BatchResponse::Many(list) => list,
            BatchResponse::One(single) => vec![*single],
        };

        if responses.len() != coordinates.len() {
            return Err(WeatherError::InvalidResponse(format!(
                "expected {} forecasts, got {}",
                coordinates.len(),
                responses.len()
            )));
        }

        coordinates
            .iter()
            .zip(responses.iter())
            .map(|(coordinate, response)| self.normalize(*coordinate, response))
            .collect()
    }

    fn forecast_url(&self, coordinates: &[Coordinate], days: u32) -> Result<String, WeatherError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| WeatherError::InvalidRequest(format!("bad base URL: {}", e)))?;

        let latitudes = join_components(coordinates, |c| c.latitude);
        let longitudes = join_components(coordinates, |c| c.longitude);

        url.query_pairs_mut()
            .append_pair("latitude", &latitudes)
            .append_pair("longitude", &longitudes)
            .append_pair("hourly", HOURLY_FIELDS)
            .append_pair("daily", DAILY_FIELDS)
            .append_pair("timezone", "auto")
            .append_pair("forecast_days", &days.to_string());

        Ok(url.to_string())
    }

    /// Join or start the request for `url`.
    ///
    /// The request runs on its own task, so it settles and leaves the
    /// registry even when every caller is dropped first.
    fn shared_fetch(&self, url: String) -> SharedFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(&url) {
            tracing::debug!("Joining in-flight forecast request");
            return existing.clone();
        }

        let client = self.client.clone();
        let registry = Arc::clone(&self.in_flight);
        let key = url.clone();
        let task = tokio::spawn(async move {
            let result = fetch_json::<ForecastResponse>(&client, &key)
                .await
                .map(Arc::new);
            registry.lock().remove(&key);
            result
        });

        let fetch = async move {
            task.await.unwrap_or_else(|e| {
                Err(WeatherError::InvalidResponse(format!(
                    "forecast task ended early: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(url, fetch.clone());
        fetch
    }

    fn local_now(&self, utc_offset_seconds: i64) -> NaiveDateTime {
        let utc = DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_else(Utc::now);
        utc.naive_utc() + TimeDelta::seconds(utc_offset_seconds)
    }

    fn normalize(
        &self,
        coordinate: Coordinate,
        response: &ForecastResponse,
    ) -> Result<WeatherSnapshot, WeatherError> {
        let hourly_series = response
            .hourly
            .as_ref()
            .ok_or_else(|| WeatherError::InvalidResponse("missing hourly block".into()))?;
        let hourly_all = hourly_entries(hourly_series)?;
        if hourly_all.is_empty() {
            return Err(WeatherError::InvalidResponse("empty hourly series".into()));
        }

        let now = self.local_now(response.utc_offset_seconds);
        let today = now.date();
        let hour_start = today
            .and_hms_opt(now.hour(), 0, 0)
            .unwrap_or(now);
        let current_index = hourly_all
            .iter()
            .position(|h| h.time >= hour_start)
            .unwrap_or(hourly_all.len() - 1);

        let current = current_from(hourly_series, &hourly_all[current_index], current_index);

        let hourly: Vec<HourlyForecast> = hourly_all
            .iter()
            .skip(current_index)
            .take(HOURLY_WINDOW)
            .cloned()
            .collect();
        let today_hourly: Vec<HourlyForecast> = hourly_all
            .iter()
            .filter(|h| h.time.date() == today)
            .cloned()
            .collect();

        let daily = match &response.daily {
            Some(series) => daily_entries(series)?
                .into_iter()
                .filter(|d| d.date > today)
                .collect(),
            None => Vec::new(),
        };

        Ok(WeatherSnapshot {
            coordinate,
            timezone: response.timezone.clone().unwrap_or_else(|| "GMT".to_string()),
            current,
            hourly,
            today_hourly,
            daily,
        })
    }
}

fn join_components(coordinates: &[Coordinate], component: impl Fn(&Coordinate) -> f64) -> String {
    coordinates
        .iter()
        .map(|c| format!("{:.4}", component(c)))
        .collect::<Vec<_>>()
        .join(",")
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
) -> Result<T, WeatherError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| WeatherError::Network(e.into_network_error()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!("Forecast request failed with status {}", status);
        return Err(WeatherError::Http {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| WeatherError::InvalidResponse(format!("JSON parse error: {}", e)))
}

fn at<T: Copy + Default>(values: &[Option<T>], index: usize) -> T {
    values.get(index).copied().flatten().unwrap_or_default()
}

fn parse_hour(raw: &str) -> Result<NaiveDateTime, WeatherError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| WeatherError::InvalidResponse(format!("bad time {:?}: {}", raw, e)))
}

fn hourly_entries(series: &HourlySeries) -> Result<Vec<HourlyForecast>, WeatherError> {
    series
        .time
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let weather_code = at(&series.weather_code, i);
            Ok(HourlyForecast {
                time: parse_hour(raw)?,
                temperature: at(&series.temperature_2m, i),
                humidity: at(&series.relative_humidity_2m, i),
                pressure: at(&series.surface_pressure, i),
                wind_speed: at(&series.wind_speed_10m, i),
                wind_direction: compass_label(
                    at(&series.wind_direction_10m, i),
                    CompassResolution::Eight,
                )
                .to_string(),
                precipitation_probability: at(&series.precipitation_probability, i),
                uv_index: at(&series.uv_index, i),
                weather_code,
                condition: WeatherCondition::from_wmo_code(weather_code),
            })
        })
        .collect()
}

fn current_from(series: &HourlySeries, hour: &HourlyForecast, index: usize) -> CurrentWeather {
    let degrees = at(&series.wind_direction_10m, index);
    CurrentWeather {
        temperature: hour.temperature,
        humidity: hour.humidity,
        pressure: hour.pressure,
        wind_speed: hour.wind_speed,
        wind_direction_degrees: degrees,
        wind_direction: compass_label(degrees, CompassResolution::Sixteen).to_string(),
        precipitation_probability: hour.precipitation_probability,
        uv_index: hour.uv_index,
        uv_category: UvCategory::from_index(hour.uv_index),
        weather_code: hour.weather_code,
        condition: hour.condition,
        observed_at: hour.time,
    }
}

fn daily_entries(series: &DailySeries) -> Result<Vec<DailyForecast>, WeatherError> {
    series
        .time
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| WeatherError::InvalidResponse(format!("bad date {:?}: {}", raw, e)))?;
            let weather_code = at(&series.weather_code, i);
            let uv_index_max = at(&series.uv_index_max, i);
            let sun = |values: &[Option<String>]| {
                values
                    .get(i)
                    .and_then(|v| v.as_deref())
                    .and_then(|s| parse_hour(s).ok())
            };

            Ok(DailyForecast {
                date,
                temperature_max: at(&series.temperature_2m_max, i),
                temperature_min: at(&series.temperature_2m_min, i),
                precipitation_probability: at(&series.precipitation_probability_max, i),
                wind_speed_max: at(&series.wind_speed_10m_max, i),
                wind_direction: compass_label(
                    at(&series.wind_direction_10m_dominant, i),
                    CompassResolution::Eight,
                )
                .to_string(),
                uv_index_max,
                uv_category: UvCategory::from_index(uv_index_max),
                weather_code,
                condition: WeatherCondition::from_wmo_code(weather_code),
                sunrise: sun(&series.sunrise),
                sunset: sun(&series.sunset),
            })
        })
        .collect()
}
