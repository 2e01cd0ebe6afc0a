//! Weather pipeline error types.

use nimbus_core::{ConfigError, DatabaseError, NetworkError};
use thiserror::Error;

/// Forecast adapter errors.
///
/// Cloneable: concurrent callers of the same request URL all receive the
/// outcome of one shared request.
#[derive(Debug, Clone, Error)]
pub enum WeatherError {
    #[error("Forecast request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid forecast response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Http { status, .. } if *status >= 500 => {
                "Weather service unavailable. Please try again later."
            }
            Self::Http { .. } => "Weather service error. Please try again.",
            Self::Network(e) => e.user_message(),
            Self::InvalidResponse(_) => "Weather data could not be read.",
            Self::InvalidRequest(_) => "Weather request was invalid.",
        }
    }

    /// HTTP status of a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }
}

/// Geometry parse failures for a single dataset row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Empty geometry")]
    Empty,

    #[error("Unsupported geometry type: {0}")]
    UnsupportedType(String),

    #[error("Malformed GeoJSON: {0}")]
    MalformedGeoJson(String),

    #[error("Malformed WKT: {0}")]
    MalformedWkt(String),

    #[error("Geometry has no vertices")]
    NoVertices,

    #[error("Coordinate out of range: {0}, {1}")]
    OutOfRange(f64, f64),
}

/// Geocoding resolver errors.
#[derive(Debug, Clone, Error)]
pub enum GeocodeError {
    #[error("Region dataset error: {0}")]
    Dataset(#[from] DatabaseError),

    #[error("Region dataset not configured: {0}")]
    Config(#[from] ConfigError),

    #[error("No place found: {0}")]
    NotFound(String),
}

impl GeocodeError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Dataset(e) => e.user_message(),
            Self::Config(e) => e.user_message(),
            Self::NotFound(_) => "Location not found. Check and try again.",
        }
    }
}

/// Persistent key-value store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Persistent storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),
}

/// Device location errors
#[derive(Debug, Clone, Error)]
pub enum LocationError {
    #[error("Location service unavailable")]
    ServiceUnavailable,

    #[error("Location request timed out")]
    Timeout,

    #[error("Location lookup failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid location response: {0}")]
    Parse(String),
}
