use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{GuidanceError, Result};

/// Point on the WGS84 sphere, degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Validating constructor: latitude in [-90, 90], longitude in [-180, 180].
    pub fn try_new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self::new(latitude, longitude);
        if point.is_valid() {
            Ok(point)
        } else {
            Err(GuidanceError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Parses `"lat,lon"` (whitespace around either value allowed).
impl FromStr for GeoPoint {
    type Err = GuidanceError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(str::trim);
        let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GuidanceError::Config(format!("expected \"lat,lon\", got {:?}", s)));
        };
        let parse = |v: &str| {
            v.parse::<f64>()
                .map_err(|_| GuidanceError::Config(format!("not a number: {:?}", v)))
        };
        Self::try_new(parse(lat)?, parse(lon)?)
    }
}

/// One geolocation reading from the device
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    #[serde(flatten)]
    pub position: GeoPoint,
    /// Reported horizontal accuracy, meters
    pub accuracy: f64,
    /// Capture time, seconds since the Unix epoch
    pub timestamp: f64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp: f64) -> Self {
        Self {
            position: GeoPoint::new(latitude, longitude),
            accuracy,
            timestamp,
        }
    }
}

/// Point of interest the user is guided toward
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub position: GeoPoint,
}

impl Destination {
    pub fn new(id: i64, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            name: name.into(),
            position: GeoPoint::new(latitude, longitude),
        }
    }
}

/// Inbound sensor update, one per geolocation or orientation callback
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Fix(Fix),
    /// Compass heading in degrees, `None` while uncalibrated or unavailable
    Heading { degrees: Option<f64> },
    /// Permission denied, timeout, or any other failed read
    SensorError { message: String },
}

/// Result of a finished guidance session, handed to the analytics backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub destination_id: i64,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub duration_seconds: u64,
    /// Whole meters
    pub distance_meters: u64,
    pub completed: bool,
}

/// Per-update drawing instructions for the directional marker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderInstruction {
    /// Anchor point a few meters ahead of the user along the bearing
    pub target_point: GeoPoint,
    pub yaw_degrees: f64,
    pub scale_factor: f64,
    pub distance_meters: f64,
    pub bearing_degrees: f64,
    pub arrival_radius_meters: f64,
    pub near_destination: bool,
    pub status_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let p: GeoPoint = "4.6605, -74.0597".parse().unwrap();
        assert_eq!(p, GeoPoint::new(4.6605, -74.0597));
        assert!("4.66".parse::<GeoPoint>().is_err());
        assert!("4.66,-74.06,3".parse::<GeoPoint>().is_err());
        assert!("abc,-74.06".parse::<GeoPoint>().is_err());
        assert!(matches!(
            "91,0".parse::<GeoPoint>(),
            Err(GuidanceError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_fix_json_is_flat() {
        let fix: Fix = serde_json::from_str(
            r#"{"latitude": 4.66, "longitude": -74.06, "accuracy": 7.5, "timestamp": 12.0}"#,
        )
        .unwrap();
        assert_eq!(fix, Fix::new(4.66, -74.06, 7.5, 12.0));
    }
}
