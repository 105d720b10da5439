use serde::{Deserialize, Serialize};

use crate::config::GuidanceConfig;
use crate::geodesy::distance;
use crate::types::GeoPoint;

/// Outcome of feeding one filtered position to the tracker
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackStep {
    /// First position of the session
    Started,
    /// Arrived faster than the minimum sampling interval, nothing changed
    Ignored,
    /// Below the movement floor; reference kept, so short steps add up
    Stationary { segment_m: f64 },
    /// Implausible displacement; reference resynchronized, no distance credited
    Jump { segment_m: f64, speed_mps: f64 },
    /// Genuine movement, credited to the total
    Moved { segment_m: f64, speed_mps: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub start_time: f64,
    pub start_position: GeoPoint,
    pub last_accepted_position: GeoPoint,
    pub last_accepted_time: f64,
    pub total_distance: f64,
}

/// Elapsed time and distance of a finished session
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub origin: GeoPoint,
    pub duration_seconds: u64,
    pub distance_meters: f64,
    pub arrived: bool,
}

/// Distance-walked accounting for one guidance session
pub struct NavigationTracker {
    min_movement_m: f64,
    max_segment_m: f64,
    max_speed_mps: f64,
    min_update_interval_s: f64,
    state: Option<TrackingState>,
    jumps: u32,
}

impl NavigationTracker {
    pub fn new(config: &GuidanceConfig) -> Self {
        Self {
            min_movement_m: config.min_movement_m,
            max_segment_m: config.max_segment_m,
            max_speed_mps: config.max_speed_mps,
            min_update_interval_s: config.min_update_interval_s,
            state: None,
            jumps: 0,
        }
    }

    pub fn update(&mut self, position: GeoPoint, timestamp: f64) -> TrackStep {
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => {
                self.state = Some(TrackingState {
                    start_time: timestamp,
                    start_position: position,
                    last_accepted_position: position,
                    last_accepted_time: timestamp,
                    total_distance: 0.0,
                });
                log::info!(
                    "Tracking started at ({:.6}, {:.6})",
                    position.latitude,
                    position.longitude
                );
                return TrackStep::Started;
            }
        };

        let elapsed = timestamp - state.last_accepted_time;
        if elapsed < self.min_update_interval_s {
            return TrackStep::Ignored;
        }

        let segment_m = distance(state.last_accepted_position, position);
        // elapsed > 0 unless the interval floor is configured to zero
        let speed_mps = if elapsed > 0.0 {
            segment_m / elapsed
        } else {
            f64::INFINITY
        };

        if segment_m < self.min_movement_m {
            return TrackStep::Stationary { segment_m };
        }

        state.last_accepted_position = position;
        state.last_accepted_time = timestamp;

        if segment_m > self.max_segment_m || speed_mps > self.max_speed_mps {
            self.jumps += 1;
            log::warn!(
                "GPS jump detected: {:.1} m in {:.1} s ({:.1} m/s), resyncing",
                segment_m,
                elapsed,
                speed_mps
            );
            TrackStep::Jump {
                segment_m,
                speed_mps,
            }
        } else {
            state.total_distance += segment_m;
            log::debug!(
                "+{:.1} m | total {:.1} m | {:.1} m/s",
                segment_m,
                state.total_distance,
                speed_mps
            );
            TrackStep::Moved {
                segment_m,
                speed_mps,
            }
        }
    }

    /// Close the session and clear tracking state.
    ///
    /// Returns `None` if tracking never started or was already finished.
    pub fn finish(&mut self, now: f64, arrived: bool) -> Option<TrackingSummary> {
        let state = self.state.take()?;
        let duration = (now - state.start_time).max(0.0).floor() as u64;
        log::info!(
            "Tracking finished: {} s, {:.1} m, arrived={} ({} jumps ignored)",
            duration,
            state.total_distance,
            arrived,
            self.jumps
        );
        self.jumps = 0;
        Some(TrackingSummary {
            origin: state.start_position,
            duration_seconds: duration,
            distance_meters: state.total_distance,
            arrived,
        })
    }

    pub fn total_distance(&self) -> f64 {
        self.state.map(|s| s.total_distance).unwrap_or(0.0)
    }

    pub fn is_tracking(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<TrackingState> {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::destination_point;
    use approx::assert_abs_diff_eq;

    const START: GeoPoint = GeoPoint::new(4.6604, -74.0596);

    fn tracker() -> NavigationTracker {
        NavigationTracker::new(&GuidanceConfig::default())
    }

    #[test]
    fn test_first_update_starts() {
        let mut t = tracker();
        assert_eq!(t.update(START, 100.0), TrackStep::Started);
        let state = t.state().unwrap();
        assert_eq!(state.start_position, START);
        assert_eq!(state.last_accepted_time, 100.0);
        assert_eq!(t.total_distance(), 0.0);
    }

    #[test]
    fn test_jitter_below_floor_is_not_credited() {
        let mut t = tracker();
        t.update(START, 0.0);
        for i in 1..=20 {
            let bearing = if i % 2 == 0 { 0.0 } else { 180.0 };
            let step = t.update(destination_point(START, bearing, 0.8), i as f64 * 2.0);
            assert!(matches!(step, TrackStep::Stationary { .. }), "{:?}", step);
        }
        assert_abs_diff_eq!(t.total_distance(), 0.0, epsilon = 1e-9);
        let state = t.state().unwrap();
        assert_eq!(state.last_accepted_position, START);
        assert_eq!(state.last_accepted_time, 0.0);
    }

    #[test]
    fn test_slow_walk_at_one_hertz_accumulates() {
        let mut t = tracker();
        let mut pos = START;
        t.update(pos, 0.0);
        for i in 1..=100 {
            pos = destination_point(pos, 30.0, 1.4);
            t.update(pos, i as f64);
        }
        // Every other fix closes a 2.8 m segment
        assert_abs_diff_eq!(t.total_distance(), 140.0, epsilon = 0.5);
    }

    #[test]
    fn test_walking_accumulates() {
        let mut t = tracker();
        let mut pos = START;
        t.update(pos, 0.0);
        for i in 1..=10 {
            pos = destination_point(pos, 45.0, 5.0);
            // 5 m every 4 s = 1.25 m/s
            let step = t.update(pos, i as f64 * 4.0);
            assert!(matches!(step, TrackStep::Moved { .. }), "{:?}", step);
        }
        assert_abs_diff_eq!(t.total_distance(), 50.0, epsilon = 0.01);
    }

    #[test]
    fn test_jump_excluded_but_resyncs() {
        let mut t = tracker();
        t.update(START, 0.0);
        let walked = destination_point(START, 90.0, 5.0);
        t.update(walked, 4.0);

        let jumped = destination_point(walked, 90.0, 200.0);
        let step = t.update(jumped, 4.9);
        assert!(matches!(step, TrackStep::Jump { .. }), "{:?}", step);
        assert_abs_diff_eq!(t.total_distance(), 5.0, epsilon = 0.01);
        assert_eq!(t.state().unwrap().last_accepted_position, jumped);

        // Walking resumes from the resynced reference
        let next = destination_point(jumped, 90.0, 5.0);
        assert!(matches!(t.update(next, 8.9), TrackStep::Moved { .. }));
        assert_abs_diff_eq!(t.total_distance(), 10.0, epsilon = 0.01);
    }

    #[test]
    fn test_speed_bound_flags_jump() {
        let mut t = tracker();
        t.update(START, 0.0);
        // 30 m in 1 s: under the segment cap but 30 m/s
        let step = t.update(destination_point(START, 0.0, 30.0), 1.0);
        assert!(matches!(step, TrackStep::Jump { .. }), "{:?}", step);
        assert_eq!(t.total_distance(), 0.0);
    }

    #[test]
    fn test_fast_updates_ignored() {
        let mut t = tracker();
        t.update(START, 0.0);
        let moved = destination_point(START, 0.0, 5.0);
        assert_eq!(t.update(moved, 0.2), TrackStep::Ignored);
        assert_eq!(t.state().unwrap().last_accepted_position, START);
        assert_eq!(t.state().unwrap().last_accepted_time, 0.0);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut t = tracker();
        assert!(t.finish(10.0, false).is_none());

        t.update(START, 100.0);
        t.update(destination_point(START, 0.0, 6.0), 105.0);
        let summary = t.finish(112.7, true).unwrap();
        assert_eq!(summary.duration_seconds, 12);
        assert_abs_diff_eq!(summary.distance_meters, 6.0, epsilon = 0.01);
        assert!(summary.arrived);
        assert_eq!(summary.origin, START);

        assert!(!t.is_tracking());
        assert!(t.finish(120.0, true).is_none());
    }
}
