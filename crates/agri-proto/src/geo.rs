//! Geographic points and great-circle distance.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, -90..=90.
    pub lat: f64,
    /// Longitude, -180..=180.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a validated point.
    ///
    /// # Errors
    ///
    /// Returns an error if either coordinate is out of range or not finite.
    pub fn new(lat: f64, lon: f64) -> Result<Self, ProtoError> {
        let point = Self { lat, lon };
        point.validate()?;
        Ok(point)
    }

    /// Check that the coordinates are finite and in range.
    ///
    /// Deserialized points bypass [`GeoPoint::new`], so callers accepting
    /// external input should validate explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if either coordinate is out of range or not finite.
    pub fn validate(&self) -> Result<(), ProtoError> {
        let ok = self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon);
        if ok {
            Ok(())
        } else {
            Err(ProtoError::InvalidCoordinates {
                lat: self.lat.to_string(),
                lon: self.lon.to_string(),
            })
        }
    }

    /// Haversine distance to another point in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        // Clamp guards against a > 1.0 from rounding on antipodal points.
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_KM * c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(0.0, 0.0 ; "origin")]
    #[test_case(90.0, 180.0 ; "upper bounds")]
    #[test_case(-90.0, -180.0 ; "lower bounds")]
    #[test_case(-1.2921, 36.8219 ; "nairobi")]
    fn valid_points(lat: f64, lon: f64) {
        assert!(GeoPoint::new(lat, lon).is_ok());
    }

    #[test_case(90.5, 0.0 ; "latitude too high")]
    #[test_case(0.0, -180.1 ; "longitude too low")]
    #[test_case(f64::NAN, 0.0 ; "nan latitude")]
    #[test_case(0.0, f64::INFINITY ; "infinite longitude")]
    fn invalid_points(lat: f64, lon: f64) {
        assert!(GeoPoint::new(lat, lon).is_err());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(-0.0917, 34.768).unwrap();
        assert!(p.distance_km(&p).abs() < 1e-9);
    }

    #[test]
    fn nairobi_to_nakuru() {
        let nairobi = GeoPoint::new(-1.2921, 36.8219).unwrap();
        let nakuru = GeoPoint::new(-0.3031, 36.0800).unwrap();
        let d = nairobi.distance_km(&nakuru);
        // Roughly 137 km as the crow flies.
        assert!((130.0..145.0).contains(&d), "distance was {d}");
    }

    #[test]
    fn one_degree_of_latitude() {
        let a = GeoPoint::new(0.0, 36.0).unwrap();
        let b = GeoPoint::new(1.0, 36.0).unwrap();
        let d = a.distance_km(&b);
        assert!((d - 111.19).abs() < 0.1, "distance was {d}");
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(
            lat1 in -90.0f64..=90.0, lon1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0, lon2 in -180.0f64..=180.0,
        ) {
            let a = GeoPoint::new(lat1, lon1).unwrap();
            let b = GeoPoint::new(lat2, lon2).unwrap();
            let ab = a.distance_km(&b);
            let ba = b.distance_km(&a);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab >= 0.0);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_KM + 1e-6);
        }
    }
}
