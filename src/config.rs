use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{GuidanceError, Result};

/// Tunable policy constants for one guidance session.
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Fixes reporting worse accuracy than this are rejected (meters)
    pub max_accuracy_m: f64,
    /// Kalman process noise, coordinate-degree² per axis. The default 1e-7
    /// is about a 35 m one-sigma drift per update, a ceiling on how far the
    /// estimate may lag rather than a pedestrian-scale drift: at typical
    /// 5-10 m accuracy the gain stays near 0.9 and fixes pass almost raw.
    /// Lower it (1e-9 is roughly 3.5 m) for heavier smoothing.
    pub process_variance: f64,
    /// Compass smoothing factor in (0, 1]
    pub heading_alpha: f64,

    /// Segments shorter than this are GPS jitter (meters)
    pub min_movement_m: f64,
    /// Segments longer than this in one update are GPS jumps (meters)
    pub max_segment_m: f64,
    /// Implied speeds above this are GPS jumps (m/s)
    pub max_speed_mps: f64,
    /// Updates closer together than this are skipped by the tracker (seconds)
    pub min_update_interval_s: f64,

    /// Arrival radius floor (meters)
    pub base_arrival_radius_m: f64,
    /// Arrival radius grows as accuracy × factor when accuracy is poor
    pub accuracy_factor: f64,

    /// Entry-origin acceptance radius for the calibration gate (meters)
    pub origin_accept_radius_m: f64,
    /// Marker anchor distance ahead of the user (meters)
    pub guide_ahead_m: f64,
    /// Remaining distance that maps to a marker scale of 1.0 (meters)
    pub scale_distance_m: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 40.0,
            process_variance: 1e-7,
            heading_alpha: 0.3,
            min_movement_m: 2.0,
            max_segment_m: 50.0,
            max_speed_mps: 10.0,
            min_update_interval_s: 0.5,
            base_arrival_radius_m: 4.0,
            accuracy_factor: 0.6,
            origin_accept_radius_m: 12.0,
            guide_ahead_m: 6.0,
            scale_distance_m: 30.0,
            min_scale: 0.8,
            max_scale: 3.0,
        }
    }
}

impl GuidanceConfig {
    /// Wider arrival criterion for campuses with poor sky view
    /// (15 m floor, radius = 1.5 × accuracy, 3 m movement floor).
    pub fn relaxed() -> Self {
        Self {
            base_arrival_radius_m: 15.0,
            accuracy_factor: 1.5,
            min_movement_m: 3.0,
            ..Self::default()
        }
    }

    /// Load from a JSON file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: GuidanceConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::info!("Loaded guidance config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_accuracy_m", self.max_accuracy_m),
            ("process_variance", self.process_variance),
            ("max_segment_m", self.max_segment_m),
            ("max_speed_mps", self.max_speed_mps),
            ("base_arrival_radius_m", self.base_arrival_radius_m),
            ("origin_accept_radius_m", self.origin_accept_radius_m),
            ("scale_distance_m", self.scale_distance_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GuidanceError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !(self.heading_alpha > 0.0 && self.heading_alpha <= 1.0) {
            return Err(GuidanceError::Config(format!(
                "heading_alpha must be in (0, 1], got {}",
                self.heading_alpha
            )));
        }
        if self.min_movement_m < 0.0 || self.min_movement_m >= self.max_segment_m {
            return Err(GuidanceError::Config(format!(
                "min_movement_m must be in [0, max_segment_m), got {}",
                self.min_movement_m
            )));
        }
        if self.min_update_interval_s < 0.0 || self.accuracy_factor < 0.0 || self.guide_ahead_m < 0.0
        {
            return Err(GuidanceError::Config(
                "min_update_interval_s, accuracy_factor and guide_ahead_m must not be negative"
                    .to_string(),
            ));
        }
        if !(self.min_scale > 0.0 && self.min_scale <= self.max_scale) {
            return Err(GuidanceError::Config(format!(
                "scale bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.min_scale, self.max_scale
            )));
        }
        Ok(())
    }

    /// max(base radius, accuracy × factor)
    pub fn arrival_radius(&self, accuracy_m: f64) -> f64 {
        self.base_arrival_radius_m.max(accuracy_m * self.accuracy_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GuidanceConfig::default().validate().is_ok());
        assert!(GuidanceConfig::relaxed().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GuidanceConfig =
            serde_json::from_str(r#"{ "base_arrival_radius_m": 15.0 }"#).unwrap();
        assert_eq!(config.base_arrival_radius_m, 15.0);
        assert_eq!(config.max_accuracy_m, 40.0);
        assert_eq!(config.heading_alpha, 0.3);
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let config = GuidanceConfig {
            heading_alpha: 1.5,
            ..GuidanceConfig::default()
        };
        assert!(matches!(config.validate(), Err(GuidanceError::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_movement_bounds() {
        let config = GuidanceConfig {
            min_movement_m: 60.0,
            ..GuidanceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_arrival_radius_adapts() {
        let config = GuidanceConfig::default();
        assert_eq!(config.arrival_radius(5.0), 4.0);
        assert!((config.arrival_radius(8.0) - 4.8).abs() < 1e-9);

        let relaxed = GuidanceConfig::relaxed();
        assert_eq!(relaxed.arrival_radius(8.0), 15.0);
        assert_eq!(relaxed.arrival_radius(20.0), 30.0);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "wayfinder_config_{}.json",
            std::process::id()
        ));
        let config = GuidanceConfig::relaxed();
        config.save(&path).unwrap();
        let loaded = GuidanceConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_default_process_variance_barely_smooths() {
        use crate::filters::position::AxisFilter;
        use crate::geodesy::meters_per_degree;

        let config = GuidanceConfig::default();
        let (m_lat, _) = meters_per_degree(4.66);
        let r = (8.0 / m_lat).powi(2);
        let mut axis = AxisFilter::new(0.0, r, config.process_variance);
        for _ in 0..50 {
            axis.update(0.0, r);
        }
        // Steady-state gain stays high: a 10 m step is mostly followed
        let step = 10.0 / m_lat;
        let moved = axis.update(step, r);
        assert!(moved > 0.9 * step, "moved {} of {}", moved, step);
    }
}
