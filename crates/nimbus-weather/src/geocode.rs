//! Geocoding over the local region dataset.
//!
//! Reverse lookups scan the dataset for the nearest sub-region, then the
//! nearest country, then any country at all. Text search cascades from
//! country names to local regions to a small built-in table.

use std::sync::Arc;

use nimbus_core::{ConfigError, GeocodingConfig};
use tracing::instrument;

use crate::cache::{ExpiryKind, WeatherCache};
use crate::dataset::{
    CountryRecord, LocalRegionRecord, RegionDataset, SqliteRegionDataset, SubRegionRecord,
};
use crate::error::{GeocodeError, GeometryError};
use crate::geo::haversine_km;
use crate::geometry::Geometry;
use crate::types::{BoundingBox, Coordinate, DivisionType, GeocodingResult};

/// Half size of the approximate bounding box attached to every result.
const BOUNDING_BOX_HALF_DEGREES: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub max_search_radius_km: f64,
    pub primary_label_radius_km: f64,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&GeocodingConfig::default())
    }
}

impl From<&GeocodingConfig> for ResolverSettings {
    fn from(config: &GeocodingConfig) -> Self {
        Self {
            max_search_radius_km: config.max_search_radius_km,
            primary_label_radius_km: config.primary_label_radius_km,
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
        }
    }
}

/// A dataset row matched by a distance scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMatch<T> {
    pub record: T,
    pub location: Coordinate,
    pub distance_km: f64,
}

struct FallbackPlace {
    name: &'static str,
    display_name: &'static str,
    country_code: &'static str,
    country_name: &'static str,
    latitude: f64,
    longitude: f64,
    division: DivisionType,
}

const FALLBACK_PLACES: &[FallbackPlace] = &[
    FallbackPlace {
        name: "Jakarta",
        display_name: "Jakarta, Indonesia",
        country_code: "ID",
        country_name: "Indonesia",
        latitude: -6.2088,
        longitude: 106.8456,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Bandung",
        display_name: "Bandung, West Java, Indonesia",
        country_code: "ID",
        country_name: "Indonesia",
        latitude: -6.9175,
        longitude: 107.6191,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Surabaya",
        display_name: "Surabaya, East Java, Indonesia",
        country_code: "ID",
        country_name: "Indonesia",
        latitude: -7.2575,
        longitude: 112.7521,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Bali",
        display_name: "Bali, Indonesia",
        country_code: "ID",
        country_name: "Indonesia",
        latitude: -8.3405,
        longitude: 115.0920,
        division: DivisionType::Province,
    },
    FallbackPlace {
        name: "West Java",
        display_name: "West Java, Indonesia",
        country_code: "ID",
        country_name: "Indonesia",
        latitude: -6.9039,
        longitude: 107.6186,
        division: DivisionType::Province,
    },
    FallbackPlace {
        name: "Singapore",
        display_name: "Singapore",
        country_code: "SG",
        country_name: "Singapore",
        latitude: 1.3521,
        longitude: 103.8198,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Kuala Lumpur",
        display_name: "Kuala Lumpur, Malaysia",
        country_code: "MY",
        country_name: "Malaysia",
        latitude: 3.1390,
        longitude: 101.6869,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Bangkok",
        display_name: "Bangkok, Thailand",
        country_code: "TH",
        country_name: "Thailand",
        latitude: 13.7563,
        longitude: 100.5018,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Tokyo",
        display_name: "Tokyo, Japan",
        country_code: "JP",
        country_name: "Japan",
        latitude: 35.6762,
        longitude: 139.6503,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "Sydney",
        display_name: "Sydney, New South Wales, Australia",
        country_code: "AU",
        country_name: "Australia",
        latitude: -33.8688,
        longitude: 151.2093,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "London",
        display_name: "London, England, United Kingdom",
        country_code: "GB",
        country_name: "United Kingdom",
        latitude: 51.5074,
        longitude: -0.1278,
        division: DivisionType::City,
    },
    FallbackPlace {
        name: "New York",
        display_name: "New York, United States",
        country_code: "US",
        country_name: "United States",
        latitude: 40.7128,
        longitude: -74.0060,
        division: DivisionType::City,
    },
];

/// Resolves coordinates and free text against a [`RegionDataset`].
pub struct GeocodingResolver {
    dataset: Arc<dyn RegionDataset>,
    cache: Option<Arc<WeatherCache>>,
    settings: ResolverSettings,
}

impl GeocodingResolver {
    pub fn new(dataset: Arc<dyn RegionDataset>, settings: ResolverSettings) -> Self {
        Self {
            dataset,
            cache: None,
            settings,
        }
    }

    /// Cache reverse and search results with the long expiry.
    pub fn with_cache(mut self, cache: Arc<WeatherCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Open the configured SQLite dataset.
    ///
    /// A missing `dataset_path` is a hard error: there is no fallback dataset.
    pub fn from_config(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let path = config.dataset_path.as_ref().ok_or_else(|| {
            ConfigError::MissingSetting("geocoding.dataset_path".to_string())
        })?;
        let dataset = SqliteRegionDataset::open(path)?;
        Ok(Self::new(Arc::new(dataset), ResolverSettings::from(config)))
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Nearest administrative region for a coordinate.
    ///
    /// Invalid input is replaced with the fallback coordinate. Dataset failures
    /// surface as errors; an empty dataset is [`GeocodeError::NotFound`].
    #[instrument(skip(self), level = "info")]
    pub async fn resolve_by_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<GeocodingResult, GeocodeError> {
        let point = Coordinate::sanitized(latitude, longitude);
        let cache_key = format!(
            "geocode_reverse_{:.4}_{:.4}",
            point.latitude, point.longitude
        );

        if let Some(cached) = self.cache_get::<GeocodingResult>(&cache_key) {
            tracing::debug!("Reverse geocode cache hit for {}", cache_key);
            return Ok(cached);
        }

        let result = self.resolve_uncached(point).await?;
        self.cache_set(&cache_key, &result);
        Ok(result)
    }

    async fn resolve_uncached(&self, point: Coordinate) -> Result<GeocodingResult, GeocodeError> {
        let sub_region = self.nearest_sub_region(point).await?;

        if let Some(found) = &sub_region {
            if found.distance_km <= self.settings.primary_label_radius_km {
                let country_name = self
                    .dataset
                    .country_by_code(&found.record.country_code)
                    .await?
                    .map(|c| c.name)
                    .unwrap_or_else(|| found.record.country_code.clone());
                return Ok(sub_region_result(found, &country_name));
            }
        }

        // Sub-region is too far to name the place; prefer its country.
        if let Some(found) = &sub_region {
            if let Some(country) = self
                .dataset
                .country_by_code(&found.record.country_code)
                .await?
            {
                return Ok(country_result(&country, point));
            }
        }

        if let Some(found) = self.nearest_country(point).await? {
            return Ok(country_result(&found.record, found.location));
        }

        match self.default_first_country().await? {
            Some(country) => {
                tracing::warn!(
                    "No region within {} km of ({}, {}), defaulting to {}",
                    self.settings.max_search_radius_km,
                    point.latitude,
                    point.longitude,
                    country.name
                );
                Ok(country_result(&country, point))
            }
            None => Err(GeocodeError::NotFound(format!(
                "{}, {}",
                point.latitude, point.longitude
            ))),
        }
    }

    /// Row offset of `page`, or `None` once it no longer fits in a `u32`.
    fn page_offset(&self, page: u32) -> Option<u32> {
        let offset = page.checked_mul(self.settings.page_size);
        if offset.is_none() {
            tracing::warn!("Region scan stopped at page {}: offset overflow", page);
        }
        offset
    }

    /// Closest sub-region within the search radius.
    pub async fn nearest_sub_region(
        &self,
        point: Coordinate,
    ) -> Result<Option<RegionMatch<SubRegionRecord>>, GeocodeError> {
        let mut best: Option<RegionMatch<SubRegionRecord>> = None;

        for page in 0..self.settings.max_pages {
            let Some(offset) = self.page_offset(page) else {
                break;
            };
            let rows = self
                .dataset
                .sub_regions_page(offset, self.settings.page_size)
                .await?;
            let row_count = rows.len();

            for row in rows {
                let Some(location) = Coordinate::new(row.latitude, row.longitude) else {
                    tracing::warn!(
                        "Skipping sub-region {} with invalid coordinate ({}, {})",
                        row.code,
                        row.latitude,
                        row.longitude
                    );
                    continue;
                };
                self.consider(&mut best, row, location, point);
            }

            if row_count < self.settings.page_size as usize {
                break;
            }
        }

        Ok(best)
    }

    /// Closest country by representative point, within the search radius.
    ///
    /// Rows whose geometry cannot be parsed are skipped.
    pub async fn nearest_country(
        &self,
        point: Coordinate,
    ) -> Result<Option<RegionMatch<CountryRecord>>, GeocodeError> {
        let mut best: Option<RegionMatch<CountryRecord>> = None;

        for page in 0..self.settings.max_pages {
            let Some(offset) = self.page_offset(page) else {
                break;
            };
            let rows = self
                .dataset
                .countries_page(offset, self.settings.page_size)
                .await?;
            let row_count = rows.len();

            for row in rows {
                match country_location(&row) {
                    Ok(location) => self.consider(&mut best, row, location, point),
                    Err(e) => {
                        tracing::warn!("Skipping country {} geometry: {}", row.code, e);
                    }
                }
            }

            if row_count < self.settings.page_size as usize {
                break;
            }
        }

        Ok(best)
    }

    /// Last resort: the first country in dataset order.
    pub async fn default_first_country(&self) -> Result<Option<CountryRecord>, GeocodeError> {
        Ok(self.dataset.countries_page(0, 1).await?.into_iter().next())
    }

    fn consider<T>(
        &self,
        best: &mut Option<RegionMatch<T>>,
        record: T,
        location: Coordinate,
        point: Coordinate,
    ) {
        let distance_km = haversine_km(point, location);
        if distance_km > self.settings.max_search_radius_km {
            return;
        }
        let closer = best
            .as_ref()
            .map(|b| distance_km < b.distance_km)
            .unwrap_or(true);
        if closer {
            *best = Some(RegionMatch {
                record,
                location,
                distance_km,
            });
        }
    }

    /// Free-text place search.
    ///
    /// Country names first, then local regions, then the built-in table. A
    /// failing stage counts as empty.
    #[instrument(skip(self), level = "info")]
    pub async fn search_by_text(&self, query: &str, limit: usize) -> Vec<GeocodingResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let cache_key = format!("geocode_search_{}_{}", query.to_lowercase(), limit);
        if let Some(cached) = self.cache_get::<Vec<GeocodingResult>>(&cache_key) {
            return cached;
        }

        let mut results = self.search_country_stage(query, limit).await;
        if results.is_empty() {
            results = self.search_local_stage(query, limit).await;
        }
        if results.is_empty() {
            results = search_fallback_places(query, limit);
        }
        results.truncate(limit);

        if !results.is_empty() {
            self.cache_set(&cache_key, &results);
        }
        results
    }

    async fn search_country_stage(&self, query: &str, limit: usize) -> Vec<GeocodingResult> {
        let rows = match self.dataset.search_countries(query, limit_u32(limit)).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Country search failed, trying local regions: {}", e);
                return Vec::new();
            }
        };

        rows.iter()
            .filter_map(|row| match country_location(row) {
                Ok(location) => Some(country_result(row, location)),
                Err(e) => {
                    tracing::warn!("Skipping country {} geometry: {}", row.code, e);
                    None
                }
            })
            .collect()
    }

    async fn search_local_stage(&self, query: &str, limit: usize) -> Vec<GeocodingResult> {
        match self
            .dataset
            .search_local_regions(query, limit_u32(limit))
            .await
        {
            Ok(rows) => rows.iter().filter_map(local_region_result).collect(),
            Err(e) => {
                tracing::warn!("Local region search failed, using built-in places: {}", e);
                Vec::new()
            }
        }
    }

    fn cache_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.as_ref()?.get(key, ExpiryKind::Long)
    }

    fn cache_set<T: serde::Serialize>(&self, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            cache.set(key, value);
        }
    }
}

fn limit_u32(limit: usize) -> u32 {
    u32::try_from(limit).unwrap_or(u32::MAX)
}

fn country_location(country: &CountryRecord) -> Result<Coordinate, GeometryError> {
    let text = country.geometry.as_deref().ok_or(GeometryError::Empty)?;
    Geometry::parse_text(text)?.representative_point()
}

fn sub_region_result(found: &RegionMatch<SubRegionRecord>, country_name: &str) -> GeocodingResult {
    let record = &found.record;
    let division = DivisionType::parse(&record.division_type);
    let (place_rank, importance) = division.rank();

    GeocodingResult {
        place_id: format!("sub_region:{}", record.code),
        name: record.name.clone(),
        display_name: format!("{}, {}", record.name, country_name),
        country_code: record.country_code.clone(),
        country_name: country_name.to_string(),
        coordinates: found.location,
        division_type: Some(division),
        sub_region_code: Some(record.code.clone()),
        place_rank,
        importance,
        bounding_box: BoundingBox::around(found.location, BOUNDING_BOX_HALF_DEGREES),
    }
}

fn country_result(country: &CountryRecord, location: Coordinate) -> GeocodingResult {
    let (place_rank, importance) = DivisionType::Country.rank();

    GeocodingResult {
        place_id: format!("country:{}", country.code),
        name: country.name.clone(),
        display_name: country.name.clone(),
        country_code: country.code.clone(),
        country_name: country.name.clone(),
        coordinates: location,
        division_type: Some(DivisionType::Country),
        sub_region_code: None,
        place_rank,
        importance,
        bounding_box: BoundingBox::around(location, BOUNDING_BOX_HALF_DEGREES),
    }
}

fn local_region_result(region: &LocalRegionRecord) -> Option<GeocodingResult> {
    let Some(location) = Coordinate::new(region.latitude, region.longitude) else {
        tracing::warn!("Skipping local region {} with invalid coordinate", region.place_id);
        return None;
    };

    Some(GeocodingResult {
        place_id: region.place_id.clone(),
        name: region.name.clone(),
        display_name: region.display_name.clone(),
        country_code: region.country_code.clone(),
        country_name: region.country_name.clone(),
        coordinates: location,
        division_type: region.division_type.as_deref().map(DivisionType::parse),
        sub_region_code: None,
        place_rank: region.place_rank,
        importance: region.importance,
        bounding_box: BoundingBox::around(location, BOUNDING_BOX_HALF_DEGREES),
    })
}

fn search_fallback_places(query: &str, limit: usize) -> Vec<GeocodingResult> {
    let needle = query.to_lowercase();
    FALLBACK_PLACES
        .iter()
        .filter(|p| {
            p.name.to_lowercase().contains(&needle)
                || p.display_name.to_lowercase().contains(&needle)
        })
        .take(limit)
        .map(|p| {
            let location = Coordinate {
                latitude: p.latitude,
                longitude: p.longitude,
            };
            let (place_rank, importance) = p.division.rank();
            GeocodingResult {
                place_id: format!("builtin:{}", p.name.to_lowercase().replace(' ', "_")),
                name: p.name.to_string(),
                display_name: p.display_name.to_string(),
                country_code: p.country_code.to_string(),
                country_name: p.country_name.to_string(),
                coordinates: location,
                division_type: Some(p.division.clone()),
                sub_region_code: None,
                place_rank,
                importance,
                bounding_box: BoundingBox::around(location, BOUNDING_BOX_HALF_DEGREES),
            }
        })
        .collect()
}
