//! Spherical helpers: distance, bearing, compass labels and km offsets.

use crate::types::Coordinate;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.32;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in `[0, 360)`.
pub fn bearing_degrees(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

fn normalize_degrees(degrees: f64) -> f64 {
    let d = degrees % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Number of compass sectors used when labelling a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompassResolution {
    Eight,
    Sixteen,
}

const COMPASS_8: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

const COMPASS_16: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Abbreviated compass label for a heading (wind direction).
pub fn compass_label(degrees: f64, resolution: CompassResolution) -> &'static str {
    let labels: &[&'static str] = match resolution {
        CompassResolution::Eight => &COMPASS_8,
        CompassResolution::Sixteen => &COMPASS_16,
    };
    labels[sector_index(degrees, labels.len())]
}

fn sector_index(degrees: f64, sectors: usize) -> usize {
    if !degrees.is_finite() {
        return 0;
    }
    let width = 360.0 / sectors as f64;
    ((normalize_degrees(degrees) / width).round() as usize) % sectors
}

/// Eight-way direction used for place naming ("Northeast of Jakarta").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
}

impl Direction {
    const ALL: [Direction; 8] = [
        Direction::North,
        Direction::Northeast,
        Direction::East,
        Direction::Southeast,
        Direction::South,
        Direction::Southwest,
        Direction::West,
        Direction::Northwest,
    ];

    pub fn from_bearing(degrees: f64) -> Self {
        Self::ALL[sector_index(degrees, Self::ALL.len())]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::North => "North",
            Self::Northeast => "Northeast",
            Self::East => "East",
            Self::Southeast => "Southeast",
            Self::South => "South",
            Self::Southwest => "Southwest",
            Self::West => "West",
            Self::Northwest => "Northwest",
        }
    }
}

/// Move `origin` by the given kilometres north and east.
///
/// Longitude degrees are widened by `1 / cos(latitude)` so a km offset covers
/// roughly the same ground on both axes. Latitude is clamped to the poles and
/// longitude wrapped into `[-180, 180]`.
pub fn offset_km(origin: Coordinate, north_km: f64, east_km: f64) -> Coordinate {
    let delta_lat = north_km / KM_PER_DEGREE;
    let cos_lat = origin.latitude.to_radians().cos().abs().max(0.01);
    let delta_lon = east_km / (KM_PER_DEGREE * cos_lat);

    Coordinate {
        latitude: (origin.latitude + delta_lat).clamp(-90.0, 90.0),
        longitude: wrap_longitude(origin.longitude + delta_lon),
    }
}

fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && longitude > 0.0 {
        180.0
    } else {
        wrapped
    }
}
