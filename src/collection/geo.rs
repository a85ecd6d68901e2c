//! Distance helpers for spacing out geotagged readings.

use crate::telemetry::Position;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters between two positions (haversine).
///
/// Accurate to well under a meter at the spacings used for survey logging,
/// which is all the minimum-distance filter needs.
pub fn distance_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Keeps a reading only if it is far enough from the last kept one.
#[derive(Debug, Clone)]
pub struct GeoFilter {
    min_distance_m: f64,
    last: Option<Position>,
}

impl GeoFilter {
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m,
            last: None,
        }
    }

    /// Returns `true` and remembers `position` when it should be kept.
    pub fn accept(&mut self, position: Position) -> bool {
        let keep = match &self.last {
            None => true,
            Some(last) => distance_m(last, &position) >= self.min_distance_m,
        };
        if keep {
            self.last = Some(position);
        }
        keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lon: f64) -> Position {
        Position { lon, lat }
    }

    #[test]
    fn test_zero_distance() {
        let p = at(-33.8688, 151.2093);
        assert_eq!(distance_m(&p, &p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance_m(&at(0.0, 0.0), &at(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {}", d);
    }

    #[test]
    fn test_short_survey_spacing() {
        // ~10 m east at the equator.
        let d = distance_m(&at(0.0, 0.0), &at(0.0, 0.0000899));
        assert!((d - 10.0).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_filter_keeps_first_and_spaced_points() {
        let mut filter = GeoFilter::new(7.0);
        assert!(filter.accept(at(0.0, 0.0)));
        assert!(!filter.accept(at(0.0, 0.00003)));
        assert!(filter.accept(at(0.0, 0.0000899)));
        // Measured from the last kept point, not the last seen one.
        assert!(!filter.accept(at(0.0, 0.00012)));
    }
}
