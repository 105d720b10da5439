//! Position filter for pedestrian GPS fixes.
//!
//! Two independent scalar Kalman filters, one per coordinate axis, in
//! coordinate-degree units. Measurement variance comes from the fix's reported
//! accuracy converted to degrees on that axis, so a poor fix pulls the estimate
//! less than a sharp one.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::geodesy::meters_per_degree;
use crate::types::{Fix, GeoPoint};

/// One axis of the filter: estimate, its variance, and the drift added per update
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisFilter {
    pub estimate: f64,
    pub variance: f64,
    pub process_variance: f64,
}

impl AxisFilter {
    /// Seed the axis with its first measurement.
    pub fn new(measurement: f64, measurement_variance: f64, process_variance: f64) -> Self {
        Self {
            estimate: measurement,
            variance: measurement_variance,
            process_variance,
        }
    }

    /// Predict + correct, returns the new estimate.
    pub fn update(&mut self, measurement: f64, measurement_variance: f64) -> f64 {
        let predicted = self.variance + self.process_variance;
        let gain = predicted / (predicted + measurement_variance);
        self.estimate += gain * (measurement - self.estimate);
        self.variance = (1.0 - gain) * predicted;
        self.estimate
    }
}

/// Snapshot of both axes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    pub latitude: AxisFilter,
    pub longitude: AxisFilter,
}

/// Fix rejected for reporting worse accuracy than the configured ceiling
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LowQualityFix {
    pub accuracy: f64,
    pub ceiling: f64,
}

impl Display for LowQualityFix {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Low-quality reading (±{:.0} m, limit {:.0} m), awaiting better signal",
            self.accuracy, self.ceiling
        )
    }
}

pub struct PositionFilter {
    max_accuracy_m: f64,
    process_variance: f64,
    state: Option<FilterState>,
    accepted: u64,
    rejected: u64,
}

impl PositionFilter {
    pub fn new(max_accuracy_m: f64, process_variance: f64) -> Self {
        Self {
            max_accuracy_m,
            process_variance,
            state: None,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Fuse a fix and return the filtered position.
    ///
    /// Fixes over the accuracy ceiling (or with a nonsensical accuracy) are
    /// rejected without touching the state.
    pub fn accept(&mut self, fix: &Fix) -> Result<GeoPoint, LowQualityFix> {
        if !(fix.accuracy >= 0.0 && fix.accuracy <= self.max_accuracy_m) {
            self.rejected += 1;
            return Err(LowQualityFix {
                accuracy: fix.accuracy,
                ceiling: self.max_accuracy_m,
            });
        }

        let (lat_var, lon_var) = Self::measurement_variance(fix);
        let filtered = match self.state.as_mut() {
            None => {
                self.state = Some(FilterState {
                    latitude: AxisFilter::new(fix.position.latitude, lat_var, self.process_variance),
                    longitude: AxisFilter::new(
                        fix.position.longitude,
                        lon_var,
                        self.process_variance,
                    ),
                });
                fix.position
            }
            Some(state) => GeoPoint::new(
                state.latitude.update(fix.position.latitude, lat_var),
                state.longitude.update(fix.position.longitude, lon_var),
            ),
        };

        self.accepted += 1;
        Ok(filtered)
    }

    /// accuracy² per axis, in degrees²
    fn measurement_variance(fix: &Fix) -> (f64, f64) {
        let (lat_m, lon_m) = meters_per_degree(fix.position.latitude);
        let lat_sigma = fix.accuracy / lat_m;
        let lon_sigma = fix.accuracy / lon_m;
        (lat_sigma * lat_sigma, lon_sigma * lon_sigma)
    }

    pub fn estimate(&self) -> Option<GeoPoint> {
        self.state
            .map(|s| GeoPoint::new(s.latitude.estimate, s.longitude.estimate))
    }

    pub fn state(&self) -> Option<FilterState> {
        self.state
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.accepted, self.rejected)
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.accepted = 0;
        self.rejected = 0;
    }
}
