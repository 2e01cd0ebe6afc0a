//! Region dataset access: countries, sub-regions and searchable local regions.
//!
//! The resolver only talks to [`RegionDataset`]; [`SqliteRegionDataset`] is the
//! bundled implementation over a local SQLite file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{DatabaseError, RusqliteErrorExt};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Country-level row. `geometry` is GeoJSON or WKT text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub code: String,
    pub name: String,
    pub geometry: Option<String>,
}

/// Administrative subdivision with a stored point coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRegionRecord {
    pub code: String,
    pub name: String,
    pub division_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
}

/// Curated search row with precomputed ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRegionRecord {
    pub place_id: String,
    pub name: String,
    pub display_name: String,
    pub country_code: String,
    pub country_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub division_type: Option<String>,
    pub place_rank: u8,
    pub importance: f64,
}

/// Paginated read access to the region tables.
#[async_trait]
pub trait RegionDataset: Send + Sync {
    async fn countries_page(&self, offset: u32, limit: u32)
        -> Result<Vec<CountryRecord>, DatabaseError>;

    async fn sub_regions_page(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SubRegionRecord>, DatabaseError>;

    async fn country_by_code(&self, code: &str) -> Result<Option<CountryRecord>, DatabaseError>;

    /// Case-insensitive substring match on country names, alphabetical.
    async fn search_countries(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CountryRecord>, DatabaseError>;

    /// Case-insensitive substring match on name or display name, most important first.
    async fn search_local_regions(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<LocalRegionRecord>, DatabaseError>;
}

/// SQLite-backed region dataset.
#[derive(Clone)]
pub struct SqliteRegionDataset {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegionDataset {
    /// Open (or create) the dataset at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(RusqliteErrorExt::into_database_error)?;
        Self::from_connection(conn)
    }

    /// Create an empty in-memory dataset.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(RusqliteErrorExt::into_database_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let dataset = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        dataset.init_schema()?;
        Ok(dataset)
    }

    fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS countries (
                    code TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    geometry TEXT
                );

                CREATE TABLE IF NOT EXISTS sub_regions (
                    code TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    division_type TEXT NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    country_code TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS local_regions (
                    place_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    country_code TEXT NOT NULL,
                    country_name TEXT NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    division_type TEXT,
                    place_rank INTEGER NOT NULL DEFAULT 12,
                    importance REAL NOT NULL DEFAULT 0.5
                );

                CREATE INDEX IF NOT EXISTS idx_sub_regions_country ON sub_regions(country_code);
                CREATE INDEX IF NOT EXISTS idx_local_regions_importance ON local_regions(importance DESC);
                "#,
            )
            .map_err(RusqliteErrorExt::into_database_error)
    }

    pub fn insert_country(&self, country: &CountryRecord) -> Result<(), DatabaseError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO countries (code, name, geometry) VALUES (?1, ?2, ?3)",
                params![country.code, country.name, country.geometry],
            )
            .map_err(RusqliteErrorExt::into_database_error)?;
        Ok(())
    }

    pub fn insert_sub_region(&self, region: &SubRegionRecord) -> Result<(), DatabaseError> {
        self.conn
            .lock()
            .execute(
                r#"
                INSERT OR REPLACE INTO sub_regions
                (code, name, division_type, latitude, longitude, country_code)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    region.code,
                    region.name,
                    region.division_type,
                    region.latitude,
                    region.longitude,
                    region.country_code,
                ],
            )
            .map_err(RusqliteErrorExt::into_database_error)?;
        Ok(())
    }

    pub fn insert_local_region(&self, region: &LocalRegionRecord) -> Result<(), DatabaseError> {
        self.conn
            .lock()
            .execute(
                r#"
                INSERT OR REPLACE INTO local_regions
                (place_id, name, display_name, country_code, country_name, latitude, longitude, division_type, place_rank, importance)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    region.place_id,
                    region.name,
                    region.display_name,
                    region.country_code,
                    region.country_name,
                    region.latitude,
                    region.longitude,
                    region.division_type,
                    region.place_rank,
                    region.importance,
                ],
            )
            .map_err(RusqliteErrorExt::into_database_error)?;
        Ok(())
    }

    /// Run a query on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| DatabaseError::QueryFailed(format!("dataset task failed: {}", e)))?
            .map_err(RusqliteErrorExt::into_database_error)
    }

    fn row_to_country(row: &rusqlite::Row) -> rusqlite::Result<CountryRecord> {
        Ok(CountryRecord {
            code: row.get(0)?,
            name: row.get(1)?,
            geometry: row.get(2)?,
        })
    }

    fn row_to_sub_region(row: &rusqlite::Row) -> rusqlite::Result<SubRegionRecord> {
        Ok(SubRegionRecord {
            code: row.get(0)?,
            name: row.get(1)?,
            division_type: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            country_code: row.get(5)?,
        })
    }

    fn row_to_local_region(row: &rusqlite::Row) -> rusqlite::Result<LocalRegionRecord> {
        let place_rank: i64 = row.get(8)?;
        Ok(LocalRegionRecord {
            place_id: row.get(0)?,
            name: row.get(1)?,
            display_name: row.get(2)?,
            country_code: row.get(3)?,
            country_name: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            division_type: row.get(7)?,
            place_rank: place_rank.clamp(0, u8::MAX as i64) as u8,
            importance: row.get(9)?,
        })
    }
}

/// `%query%` with LIKE wildcards in the query escaped.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl RegionDataset for SqliteRegionDataset {
    async fn countries_page(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<CountryRecord>, DatabaseError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT code, name, geometry FROM countries ORDER BY code LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit, offset], Self::row_to_country)?;
            rows.collect()
        })
        .await
    }

    async fn sub_regions_page(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<SubRegionRecord>, DatabaseError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT code, name, division_type, latitude, longitude, country_code
                 FROM sub_regions ORDER BY code LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit, offset], Self::row_to_sub_region)?;
            rows.collect()
        })
        .await
    }

    async fn country_by_code(&self, code: &str) -> Result<Option<CountryRecord>, DatabaseError> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT code, name, geometry FROM countries WHERE code = ?1",
                params![code],
                Self::row_to_country,
            )
            .optional()
        })
        .await
    }

    async fn search_countries(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CountryRecord>, DatabaseError> {
        let pattern = like_pattern(query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT code, name, geometry FROM countries
                 WHERE LOWER(name) LIKE ?1 ESCAPE '\\'
                 ORDER BY name LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit], Self::row_to_country)?;
            rows.collect()
        })
        .await
    }

    async fn search_local_regions(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<LocalRegionRecord>, DatabaseError> {
        let pattern = like_pattern(query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT place_id, name, display_name, country_code, country_name, latitude, longitude,
                        division_type, place_rank, importance
                 FROM local_regions
                 WHERE LOWER(name) LIKE ?1 ESCAPE '\\' OR LOWER(display_name) LIKE ?1 ESCAPE '\\'
                 ORDER BY importance DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit], Self::row_to_local_region)?;
            rows.collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn country(code: &str, name: &str) -> CountryRecord {
        CountryRecord {
            code: code.to_string(),
            name: name.to_string(),
            geometry: Some("POINT(0 0)".to_string()),
        }
    }

    #[tokio::test]
    async fn test_countries_paginate_in_code_order() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        for (code, name) in [("ID", "Indonesia"), ("MY", "Malaysia"), ("SG", "Singapore")] {
            ds.insert_country(&country(code, name)).unwrap();
        }

        let first = ds.countries_page(0, 2).await.unwrap();
        let second = ds.countries_page(2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].code, "ID");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].code, "SG");
        assert!(ds.countries_page(4, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_countries_case_insensitive_alphabetical() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        ds.insert_country(&country("NE", "Niger")).unwrap();
        ds.insert_country(&country("NG", "Nigeria")).unwrap();
        ds.insert_country(&country("DZ", "Algeria")).unwrap();

        let found = ds.search_countries("GER", 10).await.unwrap();
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Algeria", "Niger", "Nigeria"]);

        let limited = ds.search_countries("ger", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        ds.insert_country(&country("ID", "Indonesia")).unwrap();
        assert!(ds.search_countries("%", 10).await.unwrap().is_empty());
        assert!(ds.search_countries("_", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_local_regions_by_display_name_and_importance() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        for (id, name, display, importance) in [
            ("1", "Bandung", "Bandung, West Java, Indonesia", 0.6),
            ("2", "West Java", "West Java, Indonesia", 0.65),
            ("3", "Surabaya", "Surabaya, East Java, Indonesia", 0.7),
        ] {
            ds.insert_local_region(&LocalRegionRecord {
                place_id: id.to_string(),
                name: name.to_string(),
                display_name: display.to_string(),
                country_code: "ID".to_string(),
                country_name: "Indonesia".to_string(),
                latitude: -6.9,
                longitude: 107.6,
                division_type: Some("city".to_string()),
                place_rank: 16,
                importance,
            })
            .unwrap();
        }

        let found = ds.search_local_regions("java", 10).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.place_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_country_by_code() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        ds.insert_country(&country("ID", "Indonesia")).unwrap();
        assert_eq!(
            ds.country_by_code("ID").await.unwrap().map(|c| c.name),
            Some("Indonesia".to_string())
        );
        assert!(ds.country_by_code("XX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sub_regions_round_trip_fields() {
        let ds = SqliteRegionDataset::in_memory().unwrap();
        let region = SubRegionRecord {
            code: "ID-JK".to_string(),
            name: "Jakarta".to_string(),
            division_type: "province".to_string(),
            latitude: -6.2,
            longitude: 106.8,
            country_code: "ID".to_string(),
        };
        ds.insert_sub_region(&region).unwrap();
        assert_eq!(ds.sub_regions_page(0, 10).await.unwrap(), vec![region]);
    }
}
