use crate::geodesy::distance;
use crate::types::GeoPoint;

/// Result of checking the user's position against the entry origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationOutcome {
    /// Within the acceptance radius (or no origin configured)
    Accepted { distance_m: f64 },
    /// Too far away; the caller must decide how to proceed
    OutOfRange { distance_m: f64, position: GeoPoint },
}

/// Caller's answer to an out-of-range entry check
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationDecision {
    /// Start guidance from where the user is anyway
    StartAnyway,
    /// Move the entry origin to this position, then start
    Reanchor(GeoPoint),
    /// Do not start
    Abort,
}

/// One-shot gate comparing the user's first position to a configured entry point
#[derive(Clone, Debug)]
pub struct EntryGate {
    origin: Option<GeoPoint>,
    accept_radius_m: f64,
}

impl EntryGate {
    pub fn new(origin: Option<GeoPoint>, accept_radius_m: f64) -> Self {
        Self {
            origin,
            accept_radius_m,
        }
    }

    pub fn check(&self, position: GeoPoint) -> CalibrationOutcome {
        // Without an origin the current position is the origin
        let origin = self.origin.unwrap_or(position);
        let distance_m = distance(position, origin);
        if distance_m <= self.accept_radius_m {
            CalibrationOutcome::Accepted { distance_m }
        } else {
            log::info!(
                "Entry check: {:.0} m from origin (limit {:.0} m)",
                distance_m,
                self.accept_radius_m
            );
            CalibrationOutcome::OutOfRange {
                distance_m,
                position,
            }
        }
    }

    pub fn reanchor(&mut self, position: GeoPoint) {
        log::info!(
            "Entry origin re-anchored to ({:.6}, {:.6})",
            position.latitude,
            position.longitude
        );
        self.origin = Some(position);
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        self.origin
    }
}
