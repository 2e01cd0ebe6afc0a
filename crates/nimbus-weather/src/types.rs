use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub use nimbus_core::TemperatureUnit;

/// Location used whenever a coordinate is missing or out of range (Jakarta).
pub const FALLBACK_COORDINATE: Coordinate = Coordinate {
    latitude: -6.2088,
    longitude: 106.8456,
};

/// Geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Points produced by the nearby sampler.
pub type SampledPoint = Coordinate;

impl Coordinate {
    /// Build a coordinate, rejecting NaN and out-of-range components.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let candidate = Self {
            latitude,
            longitude,
        };
        candidate.is_valid().then_some(candidate)
    }

    /// Build a coordinate, substituting `fallback` for anything invalid.
    pub fn or_fallback(latitude: f64, longitude: f64, fallback: Coordinate) -> Self {
        match Self::new(latitude, longitude) {
            Some(c) => c,
            None => {
                tracing::warn!(
                    "Invalid coordinate ({}, {}), using fallback ({}, {})",
                    latitude,
                    longitude,
                    fallback.latitude,
                    fallback.longitude
                );
                fallback
            }
        }
    }

    /// Same as [`Coordinate::or_fallback`] with [`FALLBACK_COORDINATE`].
    pub fn sanitized(latitude: f64, longitude: f64) -> Self {
        Self::or_fallback(latitude, longitude, FALLBACK_COORDINATE)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Weather condition mapped from WMO codes.
/// See: https://open-meteo.com/en/docs#weathervariables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    ClearSky,
    MainlyClear,
    PartlyCloudy,
    Overcast,
    Fog,
    RimeFog,
    LightDrizzle,
    ModerateDrizzle,
    DenseDrizzle,
    LightFreezingDrizzle,
    DenseFreezingDrizzle,
    SlightRain,
    ModerateRain,
    HeavyRain,
    LightFreezingRain,
    HeavyFreezingRain,
    SlightSnow,
    ModerateSnow,
    HeavySnow,
    SnowGrains,
    SlightRainShowers,
    ModerateRainShowers,
    ViolentRainShowers,
    SlightSnowShowers,
    HeavySnowShowers,
    Thunderstorm,
    ThunderstormSlightHail,
    ThunderstormHeavyHail,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::ClearSky,
            1 => Self::MainlyClear,
            2 => Self::PartlyCloudy,
            3 => Self::Overcast,
            45 => Self::Fog,
            48 => Self::RimeFog,
            51 => Self::LightDrizzle,
            53 => Self::ModerateDrizzle,
            55 => Self::DenseDrizzle,
            56 => Self::LightFreezingDrizzle,
            57 => Self::DenseFreezingDrizzle,
            61 => Self::SlightRain,
            63 => Self::ModerateRain,
            65 => Self::HeavyRain,
            66 => Self::LightFreezingRain,
            67 => Self::HeavyFreezingRain,
            71 => Self::SlightSnow,
            73 => Self::ModerateSnow,
            75 => Self::HeavySnow,
            77 => Self::SnowGrains,
            80 => Self::SlightRainShowers,
            81 => Self::ModerateRainShowers,
            82 => Self::ViolentRainShowers,
            85 => Self::SlightSnowShowers,
            86 => Self::HeavySnowShowers,
            95 => Self::Thunderstorm,
            96 => Self::ThunderstormSlightHail,
            99 => Self::ThunderstormHeavyHail,
            _ => Self::ClearSky, // Unknown codes default to clear
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClearSky => "Clear Sky",
            Self::MainlyClear => "Mainly Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Overcast => "Overcast",
            Self::Fog => "Fog",
            Self::RimeFog => "Depositing Rime Fog",
            Self::LightDrizzle => "Light Drizzle",
            Self::ModerateDrizzle => "Moderate Drizzle",
            Self::DenseDrizzle => "Dense Drizzle",
            Self::LightFreezingDrizzle => "Light Freezing Drizzle",
            Self::DenseFreezingDrizzle => "Dense Freezing Drizzle",
            Self::SlightRain => "Slight Rain",
            Self::ModerateRain => "Moderate Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::LightFreezingRain => "Light Freezing Rain",
            Self::HeavyFreezingRain => "Heavy Freezing Rain",
            Self::SlightSnow => "Slight Snow Fall",
            Self::ModerateSnow => "Moderate Snow Fall",
            Self::HeavySnow => "Heavy Snow Fall",
            Self::SnowGrains => "Snow Grains",
            Self::SlightRainShowers => "Slight Rain Showers",
            Self::ModerateRainShowers => "Moderate Rain Showers",
            Self::ViolentRainShowers => "Violent Rain Showers",
            Self::SlightSnowShowers => "Slight Snow Showers",
            Self::HeavySnowShowers => "Heavy Snow Showers",
            Self::Thunderstorm => "Thunderstorm",
            Self::ThunderstormSlightHail => "Thunderstorm with Slight Hail",
            Self::ThunderstormHeavyHail => "Thunderstorm with Heavy Hail",
        }
    }

    /// Icon reference understood by the map and forecast views
    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::ClearSky | Self::MainlyClear => "sun",
            Self::PartlyCloudy => "cloud_sun",
            Self::Overcast => "cloud",
            Self::Fog | Self::RimeFog => "cloud_fog",
            Self::LightDrizzle
            | Self::ModerateDrizzle
            | Self::DenseDrizzle
            | Self::SlightRain
            | Self::ModerateRain
            | Self::HeavyRain
            | Self::SlightRainShowers
            | Self::ModerateRainShowers
            | Self::ViolentRainShowers => "cloud_rain",
            Self::LightFreezingDrizzle
            | Self::DenseFreezingDrizzle
            | Self::LightFreezingRain
            | Self::HeavyFreezingRain
            | Self::SlightSnow
            | Self::ModerateSnow
            | Self::HeavySnow
            | Self::SnowGrains
            | Self::SlightSnowShowers
            | Self::HeavySnowShowers => "cloud_snow",
            Self::Thunderstorm | Self::ThunderstormSlightHail | Self::ThunderstormHeavyHail => {
                "cloud_lightning"
            }
        }
    }
}

/// UV exposure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UvCategory {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl UvCategory {
    pub fn from_index(uv_index: f64) -> Self {
        if uv_index <= 2.0 {
            Self::Low
        } else if uv_index <= 5.0 {
            Self::Moderate
        } else if uv_index <= 7.0 {
            Self::High
        } else if uv_index <= 10.0 {
            Self::VeryHigh
        } else {
            Self::Extreme
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
            Self::VeryHigh => "Very High",
            Self::Extreme => "Extreme",
        }
    }
}

/// Conditions at the current local hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction_degrees: f64,
    pub wind_direction: String,
    pub precipitation_probability: f64,
    pub uv_index: f64,
    pub uv_category: UvCategory,
    pub weather_code: i32,
    pub condition: WeatherCondition,
    pub observed_at: NaiveDateTime,
}

/// Hourly forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: String,
    pub precipitation_probability: f64,
    pub uv_index: f64,
    pub weather_code: i32,
    pub condition: WeatherCondition,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub precipitation_probability: f64,
    pub wind_speed_max: f64,
    pub wind_direction: String,
    pub uv_index_max: f64,
    pub uv_category: UvCategory,
    pub weather_code: i32,
    pub condition: WeatherCondition,
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
}

/// Normalized forecast for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub coordinate: Coordinate,
    pub timezone: String,
    pub current: CurrentWeather,
    /// Next 24 hours starting at the current hour
    pub hourly: Vec<HourlyForecast>,
    /// Every hour of the current local date
    pub today_hourly: Vec<HourlyForecast>,
    /// Strictly future days
    pub daily: Vec<DailyForecast>,
}

/// Administrative level of a region dataset row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivisionType {
    Country,
    Province,
    State,
    Region,
    County,
    District,
    City,
    Town,
    Village,
    Other(String),
}

impl DivisionType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "country" => Self::Country,
            "province" => Self::Province,
            "state" => Self::State,
            "region" => Self::Region,
            "county" => Self::County,
            "district" => Self::District,
            "city" => Self::City,
            "town" => Self::Town,
            "village" => Self::Village,
            other => Self::Other(other.to_string()),
        }
    }

    /// `(place_rank, importance)`; coarser divisions rank lower.
    pub fn rank(&self) -> (u8, f64) {
        match self {
            Self::Country => (4, 0.75),
            Self::Province | Self::State => (8, 0.65),
            Self::Region => (10, 0.60),
            Self::County | Self::District => (12, 0.55),
            Self::City => (16, 0.70),
            Self::Town => (16, 0.60),
            Self::Village => (18, 0.50),
            Self::Other(_) => (12, 0.55),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Country => "country",
            Self::Province => "province",
            Self::State => "state",
            Self::Region => "region",
            Self::County => "county",
            Self::District => "district",
            Self::City => "city",
            Self::Town => "town",
            Self::Village => "village",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Box of `half_size_degrees` around `center`, clamped to valid ranges.
    pub fn around(center: Coordinate, half_size_degrees: f64) -> Self {
        Self {
            min_latitude: (center.latitude - half_size_degrees).max(-90.0),
            max_latitude: (center.latitude + half_size_degrees).min(90.0),
            min_longitude: (center.longitude - half_size_degrees).max(-180.0),
            max_longitude: (center.longitude + half_size_degrees).min(180.0),
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}

/// Resolved place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingResult {
    pub place_id: String,
    pub name: String,
    pub display_name: String,
    pub country_code: String,
    pub country_name: String,
    pub coordinates: Coordinate,
    pub division_type: Option<DivisionType>,
    pub sub_region_code: Option<String>,
    pub place_rank: u8,
    pub importance: f64,
    pub bounding_box: BoundingBox,
}

/// A sampled point with its forecast and a display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country: String,
    pub weather_data: WeatherSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(-6.2, 106.8).is_some());
        assert!(Coordinate::new(90.0, 180.0).is_some());
        assert!(Coordinate::new(90.1, 0.0).is_none());
        assert!(Coordinate::new(0.0, -180.5).is_none());
        assert!(Coordinate::new(f64::NAN, 0.0).is_none());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn test_sanitized_replaces_invalid() {
        assert_eq!(Coordinate::sanitized(f64::NAN, 10.0), FALLBACK_COORDINATE);
        assert_eq!(Coordinate::sanitized(95.0, 10.0), FALLBACK_COORDINATE);
        let ok = Coordinate::sanitized(51.5, -0.12);
        assert_eq!(ok.latitude, 51.5);
        assert_eq!(ok.longitude, -0.12);
    }

    #[test]
    fn test_wmo_code_mapping() {
        assert_eq!(WeatherCondition::from_wmo_code(0), WeatherCondition::ClearSky);
        assert_eq!(WeatherCondition::from_wmo_code(3), WeatherCondition::Overcast);
        assert_eq!(WeatherCondition::from_wmo_code(63), WeatherCondition::ModerateRain);
        assert_eq!(
            WeatherCondition::from_wmo_code(99),
            WeatherCondition::ThunderstormHeavyHail
        );
    }

    #[test]
    fn test_wmo_code_unknown_defaults_to_clear_sky() {
        assert_eq!(WeatherCondition::from_wmo_code(999).label(), "Clear Sky");
        assert_eq!(WeatherCondition::from_wmo_code(-1).label(), "Clear Sky");
    }

    #[test]
    fn test_condition_icon_name() {
        assert_eq!(WeatherCondition::ClearSky.icon_name(), "sun");
        assert_eq!(WeatherCondition::SlightRainShowers.icon_name(), "cloud_rain");
        assert_eq!(WeatherCondition::HeavySnow.icon_name(), "cloud_snow");
        assert_eq!(WeatherCondition::Thunderstorm.icon_name(), "cloud_lightning");
    }

    #[test]
    fn test_uv_category_thresholds() {
        assert_eq!(UvCategory::from_index(0.0), UvCategory::Low);
        assert_eq!(UvCategory::from_index(2.0), UvCategory::Low);
        assert_eq!(UvCategory::from_index(2.1), UvCategory::Moderate);
        assert_eq!(UvCategory::from_index(5.0), UvCategory::Moderate);
        assert_eq!(UvCategory::from_index(7.0), UvCategory::High);
        assert_eq!(UvCategory::from_index(10.0), UvCategory::VeryHigh);
        assert_eq!(UvCategory::from_index(10.5), UvCategory::Extreme);
        assert_eq!(UvCategory::VeryHigh.label(), "Very High");
    }

    #[test]
    fn test_division_rank_table() {
        assert_eq!(DivisionType::parse("Country").rank(), (4, 0.75));
        assert_eq!(DivisionType::parse("province").rank(), (8, 0.65));
        assert_eq!(DivisionType::parse("STATE").rank(), (8, 0.65));
        assert_eq!(DivisionType::parse("region").rank(), (10, 0.60));
        assert_eq!(DivisionType::parse("district").rank(), (12, 0.55));
        assert_eq!(DivisionType::parse("city").rank(), (16, 0.70));
        assert_eq!(DivisionType::parse("town").rank(), (16, 0.60));
        assert_eq!(DivisionType::parse("village").rank(), (18, 0.50));
        assert_eq!(DivisionType::parse("kelurahan").rank(), (12, 0.55));
    }

    #[test]
    fn test_bounding_box_around() {
        let bbox = BoundingBox::around(Coordinate::sanitized(10.0, 20.0), 0.1);
        assert!((bbox.max_latitude - bbox.min_latitude - 0.2).abs() < 1e-9);
        assert!(bbox.contains(Coordinate::sanitized(10.05, 19.95)));
        assert!(!bbox.contains(Coordinate::sanitized(10.2, 20.0)));

        let polar = BoundingBox::around(Coordinate::sanitized(89.95, 179.95), 0.1);
        assert_eq!(polar.max_latitude, 90.0);
        assert_eq!(polar.max_longitude, 180.0);
    }
}
