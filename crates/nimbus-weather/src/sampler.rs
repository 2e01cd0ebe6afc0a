//! Ring sampling of nearby points around a map center.
//!
//! Points sit on two staggered concentric rings whose radius shrinks as the
//! map zooms in. Positions are randomized; pass a seeded RNG for repeatable
//! output.

use std::f64::consts::TAU;

use rand::Rng;

use crate::geo::offset_km;
use crate::types::{Coordinate, SampledPoint};

/// Zoom at which the base radius applies.
pub const DEFAULT_ZOOM: f64 = 13.0;

const BASE_RADIUS_KM: f64 = 50.0;
const MIN_RADIUS_KM: f64 = 10.0;
const RADIUS_SHRINK_PER_ZOOM: f64 = 0.8;

const INNER_RING: (f64, f64) = (0.4, 0.6);
const OUTER_RING: (f64, f64) = (0.8, 1.0);

/// Jitter as a fraction of the radius at the default zoom.
const BASE_JITTER_FRACTION: f64 = 0.05;
const MAX_JITTER_FRACTION: f64 = 0.08;
const MIN_JITTER_FRACTION: f64 = 0.01;

fn effective_zoom(zoom: f64) -> f64 {
    if zoom.is_finite() {
        zoom
    } else {
        DEFAULT_ZOOM
    }
}

/// `max(10, 50 * 0.8^(zoom - 13))` kilometres.
pub fn sample_radius_km(zoom: f64) -> f64 {
    let zoom = effective_zoom(zoom);
    (BASE_RADIUS_KM * RADIUS_SHRINK_PER_ZOOM.powf(zoom - DEFAULT_ZOOM)).max(MIN_RADIUS_KM)
}

/// Fewer points when zoomed in, more when zoomed out.
pub fn sample_count(zoom: f64) -> usize {
    let zoom = effective_zoom(zoom);
    if zoom >= 15.0 {
        6
    } else if zoom <= 10.0 {
        12
    } else {
        8
    }
}

fn jitter_fraction(zoom: f64) -> f64 {
    (BASE_JITTER_FRACTION * RADIUS_SHRINK_PER_ZOOM.powf(effective_zoom(zoom) - DEFAULT_ZOOM))
        .clamp(MIN_JITTER_FRACTION, MAX_JITTER_FRACTION)
}

/// Sample points around `center`.
///
/// The first `count / 2` points form the inner ring at 40-60% of the radius;
/// the rest form the outer ring at 80-100%, rotated half a sector. Each point
/// is then jittered on both axes. Every point stays within 1.15x the radius.
pub fn sample_points<R: Rng>(
    center: Coordinate,
    zoom: f64,
    rng: &mut R,
) -> Vec<SampledPoint> {
    let center = Coordinate::sanitized(center.latitude, center.longitude);
    let radius = sample_radius_km(zoom);
    let count = sample_count(zoom);
    let jitter_km = radius * jitter_fraction(zoom);

    let inner_count = count / 2;
    let outer_count = count - inner_count;
    let rotation = rng.random_range(0.0..TAU);

    let mut points = Vec::with_capacity(count);
    push_ring(
        &mut points,
        center,
        RingSpec {
            count: inner_count,
            radius_km: radius,
            band: INNER_RING,
            offset: rotation,
            jitter_km,
        },
        rng,
    );
    push_ring(
        &mut points,
        center,
        RingSpec {
            count: outer_count,
            radius_km: radius,
            band: OUTER_RING,
            offset: rotation + sector(outer_count) / 2.0,
            jitter_km,
        },
        rng,
    );

    points
}

struct RingSpec {
    count: usize,
    radius_km: f64,
    band: (f64, f64),
    /// Angle of the first point, radians clockwise from north
    offset: f64,
    jitter_km: f64,
}

fn sector(count: usize) -> f64 {
    TAU / count.max(1) as f64
}

fn push_ring<R: Rng>(
    points: &mut Vec<SampledPoint>,
    center: Coordinate,
    ring: RingSpec,
    rng: &mut R,
) {
    let step = sector(ring.count);
    for i in 0..ring.count {
        let angle = ring.offset + step * i as f64;
        let distance = ring.radius_km * rng.random_range(ring.band.0..=ring.band.1);

        let mut north = distance * angle.cos();
        let mut east = distance * angle.sin();
        if ring.jitter_km > 0.0 {
            north += rng.random_range(-ring.jitter_km..=ring.jitter_km);
            east += rng.random_range(-ring.jitter_km..=ring.jitter_km);
        }

        points.push(offset_km(center, north, east));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_km;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const JAKARTA: Coordinate = Coordinate {
        latitude: -6.2088,
        longitude: 106.8456,
    };

    #[test]
    fn test_radius_by_zoom() {
        assert!((sample_radius_km(13.0) - 50.0).abs() < 1e-9);
        assert!((sample_radius_km(15.0) - 32.0).abs() < 1e-9);
        assert!(sample_radius_km(8.0) > 150.0);
        assert_eq!(sample_radius_km(25.0), 10.0);
        assert!((sample_radius_km(f64::NAN) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_count_by_zoom() {
        assert_eq!(sample_count(13.0), 8);
        assert_eq!(sample_count(14.9), 8);
        assert_eq!(sample_count(15.0), 6);
        assert_eq!(sample_count(18.0), 6);
        assert_eq!(sample_count(10.0), 12);
        assert_eq!(sample_count(8.0), 12);
    }

    #[test]
    fn test_points_stay_within_bound() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            for zoom in [5.0, 8.0, 10.0, 12.0, 13.0, 15.0, 18.0] {
                let radius = sample_radius_km(zoom);
                let points = sample_points(JAKARTA, zoom, &mut rng);
                assert_eq!(points.len(), sample_count(zoom));
                for p in points {
                    assert!(p.is_valid());
                    let d = haversine_km(JAKARTA, p);
                    assert!(d <= radius * 1.15, "zoom {} distance {} radius {}", zoom, d, radius);
                }
            }
        }
    }

    #[test]
    fn test_ring_membership() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            for zoom in [13.0, 15.0] {
                let radius = sample_radius_km(zoom);
                let points = sample_points(JAKARTA, zoom, &mut rng);
                let inner = points.len() / 2;
                for (i, p) in points.iter().enumerate() {
                    let ratio = haversine_km(JAKARTA, *p) / radius;
                    if i < inner {
                        assert!((0.3..0.7).contains(&ratio), "inner ratio {}", ratio);
                    } else {
                        assert!((0.7..1.1).contains(&ratio), "outer ratio {}", ratio);
                    }
                }
            }
        }
    }

    #[test]
    fn test_seeded_rng_is_repeatable() {
        let a = sample_points(JAKARTA, 13.0, &mut StdRng::seed_from_u64(7));
        let b = sample_points(JAKARTA, 13.0, &mut StdRng::seed_from_u64(7));
        let c = sample_points(JAKARTA, 13.0, &mut StdRng::seed_from_u64(8));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_center_uses_fallback() {
        let mut rng = StdRng::seed_from_u64(1);
        let points = sample_points(
            Coordinate {
                latitude: f64::NAN,
                longitude: 0.0,
            },
            13.0,
            &mut rng,
        );
        for p in points {
            assert!(haversine_km(JAKARTA, p) <= 50.0 * 1.15);
        }
    }
}
