//! Weather pipeline for Nimbus
//!
//! Forecasts from an Open-Meteo compatible API, reverse geocoding over a
//! local region dataset, nearby-weather sampling for the map view, and a
//! dual-tier cache in front of all of it.

pub mod cache;
pub mod dataset;
pub mod error;
pub mod geo;
pub mod geocode;
pub mod geometry;
pub mod location;
pub mod nearby;
pub mod preferences;
pub mod provider;
pub mod sampler;
pub mod service;
pub mod store;
pub mod types;

pub use cache::{CachePolicy, Clock, ExpiryKind, ManualClock, SystemClock, WeatherCache};
pub use dataset::{RegionDataset, SqliteRegionDataset};
pub use error::{GeocodeError, GeometryError, LocationError, StoreError, WeatherError};
pub use geocode::{GeocodingResolver, ResolverSettings};
pub use geometry::Geometry;
pub use location::{IpLocationProvider, LocationProvider, Locator};
pub use nearby::NearbyWeatherService;
pub use preferences::{PreferenceStore, Preferences};
pub use provider::WeatherProvider;
pub use service::WeatherServices;
pub use store::{MemoryStore, PersistentStore, SqliteStore};
pub use types::*;
