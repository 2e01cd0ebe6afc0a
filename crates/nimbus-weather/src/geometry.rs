//! Country geometry parsing.
//!
//! Dataset rows store geometry either as GeoJSON (object or JSON text) or as
//! WKT/EWKT text. Both decode into [`Geometry`], which knows how to produce a
//! single representative point for distance scans.

use serde_json::Value;

use crate::error::GeometryError;
use crate::types::Coordinate;

/// Vertices are capped when averaging multipolygons.
pub const MULTIPOLYGON_VERTEX_CAP: usize = 20;

pub type Ring = Vec<Coordinate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    GeoJson,
    Wkt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coordinate),
    /// Outer ring first, then holes
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub encoding: Encoding,
    pub shape: Shape,
}

impl Geometry {
    /// Parse a stored geometry column: GeoJSON text when it starts with `{`, WKT otherwise.
    pub fn parse_text(text: &str) -> Result<Self, GeometryError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GeometryError::Empty);
        }
        if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| GeometryError::MalformedGeoJson(e.to_string()))?;
            Self::from_geojson(&value)
        } else {
            Self::from_wkt(trimmed)
        }
    }

    /// Parse a GeoJSON geometry (or a Feature wrapping one).
    pub fn from_geojson(value: &Value) -> Result<Self, GeometryError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GeometryError::MalformedGeoJson("missing type".into()))?;

        if kind == "Feature" {
            let inner = value
                .get("geometry")
                .filter(|g| !g.is_null())
                .ok_or(GeometryError::Empty)?;
            return Self::from_geojson(inner);
        }

        let coords = value
            .get("coordinates")
            .ok_or_else(|| GeometryError::MalformedGeoJson("missing coordinates".into()))?;

        let shape = match kind {
            "Point" => Shape::Point(json_position(coords)?),
            "Polygon" => Shape::Polygon(json_polygon(coords)?),
            "MultiPolygon" => Shape::MultiPolygon(
                json_array(coords)?
                    .iter()
                    .map(json_polygon)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => return Err(GeometryError::UnsupportedType(other.to_string())),
        };

        Ok(Self {
            encoding: Encoding::GeoJson,
            shape,
        })
    }

    /// Parse WKT, accepting an EWKT `SRID=...;` prefix.
    pub fn from_wkt(text: &str) -> Result<Self, GeometryError> {
        let text = match text.split_once(';') {
            Some((prefix, rest)) if prefix.trim().to_uppercase().starts_with("SRID=") => rest,
            _ => text,
        }
        .trim();

        let open = text
            .find('(')
            .ok_or_else(|| wkt_error_or_empty(text))?;
        let close = text
            .rfind(')')
            .filter(|&c| c > open)
            .ok_or_else(|| GeometryError::MalformedWkt("unbalanced parentheses".into()))?;

        let keyword = text[..open].trim().to_uppercase();
        let body = &text[open + 1..close];

        let shape = match keyword.as_str() {
            "POINT" => Shape::Point(wkt_position(body)?),
            "POLYGON" => Shape::Polygon(wkt_polygon(body)?),
            "MULTIPOLYGON" => Shape::MultiPolygon(
                split_groups(body)?
                    .into_iter()
                    .map(wkt_polygon)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => return Err(GeometryError::UnsupportedType(other.to_string())),
        };

        Ok(Self {
            encoding: Encoding::Wkt,
            shape,
        })
    }

    /// Point used for nearest-country scans.
    ///
    /// Polygons use the arithmetic mean of their outer ring; multipolygons use
    /// the first [`MULTIPOLYGON_VERTEX_CAP`] vertices of their first non-empty
    /// outer ring.
    pub fn representative_point(&self) -> Result<Coordinate, GeometryError> {
        match &self.shape {
            Shape::Point(p) => Ok(*p),
            Shape::Polygon(rings) => {
                let outer = rings.first().ok_or(GeometryError::NoVertices)?;
                mean(outer)
            }
            Shape::MultiPolygon(polygons) => {
                let outer = polygons
                    .iter()
                    .filter_map(|rings| rings.first())
                    .find(|ring| !ring.is_empty())
                    .ok_or(GeometryError::NoVertices)?;
                let capped = &outer[..outer.len().min(MULTIPOLYGON_VERTEX_CAP)];
                mean(capped)
            }
        }
    }
}

fn wkt_error_or_empty(text: &str) -> GeometryError {
    if text.to_uppercase().ends_with("EMPTY") {
        GeometryError::Empty
    } else {
        GeometryError::MalformedWkt(format!("missing '(' in {:?}", text))
    }
}

fn mean(vertices: &[Coordinate]) -> Result<Coordinate, GeometryError> {
    if vertices.is_empty() {
        return Err(GeometryError::NoVertices);
    }
    let n = vertices.len() as f64;
    let (lat_sum, lon_sum) = vertices
        .iter()
        .fold((0.0, 0.0), |(lat, lon), v| (lat + v.latitude, lon + v.longitude));
    checked(lat_sum / n, lon_sum / n)
}

fn checked(latitude: f64, longitude: f64) -> Result<Coordinate, GeometryError> {
    Coordinate::new(latitude, longitude).ok_or(GeometryError::OutOfRange(latitude, longitude))
}

fn json_array(value: &Value) -> Result<&Vec<Value>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| GeometryError::MalformedGeoJson(format!("expected array, got {}", value)))
}

/// GeoJSON positions are `[lon, lat, ...]`.
fn json_position(value: &Value) -> Result<Coordinate, GeometryError> {
    let pair = json_array(value)?;
    let lon = pair.first().and_then(Value::as_f64);
    let lat = pair.get(1).and_then(Value::as_f64);
    match (lon, lat) {
        (Some(lon), Some(lat)) => checked(lat, lon),
        _ => Err(GeometryError::MalformedGeoJson(format!(
            "bad position {}",
            value
        ))),
    }
}

fn json_polygon(value: &Value) -> Result<Vec<Ring>, GeometryError> {
    json_array(value)?
        .iter()
        .map(|ring| {
            json_array(ring)?
                .iter()
                .map(json_position)
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

/// WKT positions are `lon lat [z [m]]`.
fn wkt_position(text: &str) -> Result<Coordinate, GeometryError> {
    let mut parts = text.split_whitespace();
    let lon = parts.next().and_then(|s| s.parse::<f64>().ok());
    let lat = parts.next().and_then(|s| s.parse::<f64>().ok());
    match (lon, lat) {
        (Some(lon), Some(lat)) => checked(lat, lon),
        _ => Err(GeometryError::MalformedWkt(format!(
            "bad position {:?}",
            text.trim()
        ))),
    }
}

fn wkt_ring(text: &str) -> Result<Ring, GeometryError> {
    let ring = text
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(wkt_position)
        .collect::<Result<Vec<_>, _>>()?;
    if ring.is_empty() {
        return Err(GeometryError::NoVertices);
    }
    Ok(ring)
}

fn wkt_polygon(text: &str) -> Result<Vec<Ring>, GeometryError> {
    split_groups(text)?.into_iter().map(wkt_ring).collect()
}

/// Contents of each top-level parenthesised group: `(a),(b)` -> `["a", "b"]`.
fn split_groups(text: &str) -> Result<Vec<&str>, GeometryError> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, ch) in text.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| GeometryError::MalformedWkt("unbalanced parentheses".into()))?;
                if depth == 0 {
                    groups.push(&text[start..i]);
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(GeometryError::MalformedWkt("unbalanced parentheses".into()));
    }
    if groups.is_empty() {
        return Err(GeometryError::NoVertices);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geojson_point() {
        let g = Geometry::from_geojson(&json!({"type": "Point", "coordinates": [106.8, -6.2]}))
            .unwrap();
        assert_eq!(g.encoding, Encoding::GeoJson);
        let p = g.representative_point().unwrap();
        assert_eq!(p.latitude, -6.2);
        assert_eq!(p.longitude, 106.8);
    }

    #[test]
    fn test_geojson_polygon_centroid_is_vertex_mean() {
        let g = Geometry::parse_text(
            r#"{"type":"Polygon","coordinates":[[[0,0],[4,0],[4,2],[0,2]]]}"#,
        )
        .unwrap();
        let p = g.representative_point().unwrap();
        assert!((p.longitude - 2.0).abs() < 1e-9);
        assert!((p.latitude - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_geojson_feature_wrapper() {
        let g = Geometry::from_geojson(&json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [10.0, 20.0]}
        }))
        .unwrap();
        assert!(matches!(g.shape, Shape::Point(_)));
    }

    #[test]
    fn test_multipolygon_caps_vertices() {
        // 20 vertices at lat 0 then 10 at lat 50: only the first 20 count
        let mut ring: Vec<Value> = (0..20).map(|i| json!([i as f64, 0.0])).collect();
        ring.extend((0..10).map(|i| json!([i as f64, 50.0])));
        let g = Geometry::from_geojson(&json!({
            "type": "MultiPolygon",
            "coordinates": [[ring], [[[100.0, 80.0], [101.0, 80.0], [101.0, 81.0]]]]
        }))
        .unwrap();
        let p = g.representative_point().unwrap();
        assert!((p.latitude - 0.0).abs() < 1e-9);
        assert!((p.longitude - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_wkt_point_and_ewkt_prefix() {
        let g = Geometry::parse_text("SRID=4326;POINT(106.8456 -6.2088)").unwrap();
        assert_eq!(g.encoding, Encoding::Wkt);
        let p = g.representative_point().unwrap();
        assert_eq!(p.latitude, -6.2088);
        assert_eq!(p.longitude, 106.8456);
    }

    #[test]
    fn test_wkt_polygon_with_hole() {
        let g = Geometry::parse_text(
            "POLYGON ((0 0, 10 0, 10 10, 0 10), (2 2, 3 2, 3 3))",
        )
        .unwrap();
        match &g.shape {
            Shape::Polygon(rings) => assert_eq!(rings.len(), 2),
            other => panic!("unexpected shape {:?}", other),
        }
        let p = g.representative_point().unwrap();
        assert!((p.latitude - 5.0).abs() < 1e-9);
        assert!((p.longitude - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_wkt_multipolygon() {
        let g = Geometry::parse_text(
            "MULTIPOLYGON(((0 0, 2 0, 2 2, 0 2)),((50 50, 51 50, 51 51)))",
        )
        .unwrap();
        match &g.shape {
            Shape::MultiPolygon(polys) => assert_eq!(polys.len(), 2),
            other => panic!("unexpected shape {:?}", other),
        }
        let p = g.representative_point().unwrap();
        assert!((p.latitude - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_failures_are_typed() {
        assert_eq!(Geometry::parse_text(""), Err(GeometryError::Empty));
        assert_eq!(Geometry::parse_text("POINT EMPTY"), Err(GeometryError::Empty));
        assert!(matches!(
            Geometry::parse_text("LINESTRING(0 0, 1 1)"),
            Err(GeometryError::UnsupportedType(t)) if t == "LINESTRING"
        ));
        assert!(matches!(
            Geometry::parse_text("POLYGON((0 0, 1 1)"),
            Err(GeometryError::MalformedWkt(_))
        ));
        assert!(matches!(
            Geometry::parse_text("{not json"),
            Err(GeometryError::MalformedGeoJson(_))
        ));
        assert!(matches!(
            Geometry::parse_text(r#"{"type":"Point","coordinates":[200, 0]}"#),
            Err(GeometryError::OutOfRange(_, _))
        ));
        assert!(matches!(
            Geometry::parse_text("POINT(abc def)"),
            Err(GeometryError::MalformedWkt(_))
        ));
    }
}
