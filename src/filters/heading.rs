use crate::geodesy::{normalize_angle, signed_angle_difference};

/// Exponential smoothing for compass headings (degrees, 0-360)
///
/// Interpolates along the shortest arc, so 350° → 10° moves through north.
/// A missing reading leaves the smoothed value untouched and is passed on as
/// `None`.
pub struct HeadingSmoother {
    alpha: f64,
    smoothed: Option<f64>,
}

impl HeadingSmoother {
    /// Alpha is clamped to [0, 1]; lower alpha = more smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            smoothed: None,
        }
    }

    pub fn smooth(&mut self, raw: Option<f64>) -> Option<f64> {
        let raw = raw.filter(|h| h.is_finite())?;

        let next = match self.smoothed {
            None => normalize_angle(raw),
            Some(prev) => normalize_angle(prev + self.alpha * signed_angle_difference(raw, prev)),
        };
        self.smoothed = Some(next);
        Some(next)
    }

    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_sample_adopted() {
        let mut smoother = HeadingSmoother::new(0.3);
        assert_eq!(smoother.smooth(Some(45.0)), Some(45.0));
    }

    #[test]
    fn test_smooths_step() {
        let mut smoother = HeadingSmoother::new(0.3);
        smoother.smooth(Some(90.0));
        // 90 + 0.3 * 10
        assert_abs_diff_eq!(smoother.smooth(Some(100.0)).unwrap(), 93.0, epsilon = 1e-9);
        // 93 + 0.3 * 7
        assert_abs_diff_eq!(smoother.smooth(Some(100.0)).unwrap(), 95.1, epsilon = 1e-9);
    }

    #[test]
    fn test_wraps_through_north() {
        let mut smoother = HeadingSmoother::new(0.3);
        smoother.smooth(Some(350.0));
        assert_abs_diff_eq!(smoother.smooth(Some(10.0)).unwrap(), 356.0, epsilon = 1e-9);

        let mut smoother = HeadingSmoother::new(0.5);
        smoother.smooth(Some(10.0));
        assert_abs_diff_eq!(smoother.smooth(Some(340.0)).unwrap(), 355.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_reading_keeps_state() {
        let mut smoother = HeadingSmoother::new(0.3);
        smoother.smooth(Some(120.0));
        assert_eq!(smoother.smooth(None), None);
        assert_eq!(smoother.smooth(Some(f64::NAN)), None);
        assert_eq!(smoother.current(), Some(120.0));
    }

    #[test]
    fn test_reset() {
        let mut smoother = HeadingSmoother::new(0.3);
        smoother.smooth(Some(200.0));
        smoother.reset();
        assert_eq!(smoother.current(), None);
        assert_eq!(smoother.smooth(Some(30.0)), Some(30.0));
    }
}
