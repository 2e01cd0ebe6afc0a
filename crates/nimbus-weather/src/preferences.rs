//! User preferences: temperature unit and last known location.
//!
//! Stored as one JSON document under [`PREFERENCES_KEY`] in the persistent
//! store. The key lives outside the cache namespace, so cache clears leave it
//! alone.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::store::PersistentStore;
use crate::types::{Coordinate, TemperatureUnit};

pub const PREFERENCES_KEY: &str = "nimbus_preferences";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,
    #[serde(default)]
    pub last_location: Option<Coordinate>,
}

/// Preferences held in memory and written through to the persistent store.
pub struct PreferenceStore {
    store: Option<Arc<dyn PersistentStore>>,
    current: Mutex<Preferences>,
}

impl PreferenceStore {
    /// Load saved preferences, or start from `defaults` when none are readable.
    pub fn load(store: Option<Arc<dyn PersistentStore>>, defaults: Preferences) -> Self {
        let saved = store.as_ref().and_then(|s| match s.get(PREFERENCES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Preferences>(&raw) {
                Ok(prefs) => Some(prefs),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable preferences: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not read preferences: {}", e);
                None
            }
        });

        Self {
            store,
            current: Mutex::new(saved.unwrap_or(defaults)),
        }
    }

    pub fn get(&self) -> Preferences {
        *self.current.lock()
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.current.lock().temperature_unit
    }

    pub fn set_temperature_unit(&self, unit: TemperatureUnit) {
        self.update(|p| p.temperature_unit = unit);
    }

    pub fn last_location(&self) -> Option<Coordinate> {
        self.current.lock().last_location
    }

    /// Remember a location. Invalid coordinates are ignored.
    pub fn set_last_location(&self, location: Coordinate) {
        if !location.is_valid() {
            tracing::debug!("Not remembering invalid location {:?}", location);
            return;
        }
        self.update(|p| p.last_location = Some(location));
    }

    fn update(&self, change: impl FnOnce(&mut Preferences)) {
        let snapshot = {
            let mut current = self.current.lock();
            change(&mut current);
            *current
        };
        self.persist(&snapshot);
    }

    fn persist(&self, prefs: &Preferences) {
        let Some(store) = &self.store else {
            return;
        };
        match serde_json::to_string(prefs) {
            Ok(raw) => {
                if let Err(e) = store.set(PREFERENCES_KEY, &raw) {
                    tracing::warn!("Failed to save preferences: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode preferences: {}", e),
        }
    }
}

/// `Auto` displays Celsius.
pub fn effective_unit(unit: TemperatureUnit) -> TemperatureUnit {
    match unit {
        TemperatureUnit::Fahrenheit => TemperatureUnit::Fahrenheit,
        TemperatureUnit::Auto | TemperatureUnit::Celsius => TemperatureUnit::Celsius,
    }
}

/// Convert a Celsius reading into `unit`.
pub fn convert_temperature(celsius: f64, unit: TemperatureUnit) -> f64 {
    match effective_unit(unit) {
        TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        _ => celsius,
    }
}

/// Rounded reading with its unit symbol, e.g. `"31°C"`.
pub fn format_temperature(celsius: f64, unit: TemperatureUnit) -> String {
    let symbol = match effective_unit(unit) {
        TemperatureUnit::Fahrenheit => "F",
        _ => "C",
    };
    format!("{}°{}", convert_temperature(celsius, unit).round() as i64, symbol)
}
