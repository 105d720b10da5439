//! Guidance state machine.
//!
//! `Navigator` owns at most one `GuidanceSession` and is driven purely by
//! method calls: sensor events in, `GuidanceOutput`s out. It performs no I/O,
//! which keeps the whole walk reproducible from a list of events.
//!
//! ```text
//! Idle ──begin_calibration──▶ Calibrating ──start──▶ Active ──arrival──▶ Arrived
//!   ▲                             │                    │
//!   └────────── Abort ────────────┘◀────── stop ───────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationDecision, CalibrationOutcome, EntryGate};
use crate::config::GuidanceConfig;
use crate::error::{GuidanceError, Result};
use crate::filters::{HeadingSmoother, LowQualityFix, PositionFilter};
use crate::geodesy::{bearing, destination_point, distance, normalize_angle, signed_angle_difference};
use crate::tracker::{NavigationTracker, TrackStep, TrackingSummary};
use crate::types::{Destination, Fix, GeoPoint, NavigationRecord, RenderInstruction, SensorEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuidanceState {
    /// No session; a destination may or may not be selected
    Idle,
    /// Entry-origin check pending or passed, guidance not yet started
    Calibrating,
    /// Consuming fixes
    Active,
    /// Reached the destination; terminal until the next start
    Arrived,
}

/// What to do with a session that is still active when a new one starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Report the old session as not completed before replacing it
    FinishPrevious,
    /// Drop the old session without a report
    Discard,
}

/// Outbound messages produced while handling an event
#[derive(Debug, Clone, PartialEq)]
pub enum GuidanceOutput {
    Render(RenderInstruction),
    /// Fix rejected for poor accuracy; nothing changed
    LowQuality { accuracy: f64, message: String },
    /// Sensor failure surfaced to the user; session keeps running
    SensorStatus(String),
    /// Session ended (arrived or stopped); hand to analytics exactly once
    Completed(NavigationRecord),
}

/// Per-fix result inside a session
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    Rejected(LowQualityFix),
    Guiding {
        render: RenderInstruction,
        step: TrackStep,
    },
    Arrived {
        record: Option<NavigationRecord>,
        distance_m: f64,
    },
}

/// All mutable state of one guided walk
pub struct GuidanceSession {
    destination: Destination,
    config: GuidanceConfig,
    filter: PositionFilter,
    heading: HeadingSmoother,
    current_heading: Option<f64>,
    tracker: NavigationTracker,
    completion_reported: bool,
    last_render: Option<RenderInstruction>,
}

impl GuidanceSession {
    pub fn new(destination: Destination, config: &GuidanceConfig) -> Self {
        Self {
            destination,
            config: config.clone(),
            filter: PositionFilter::new(config.max_accuracy_m, config.process_variance),
            heading: HeadingSmoother::new(config.heading_alpha),
            current_heading: None,
            tracker: NavigationTracker::new(config),
            completion_reported: false,
            last_render: None,
        }
    }

    pub fn on_fix(&mut self, fix: &Fix) -> FixOutcome {
        let position = match self.filter.accept(fix) {
            Ok(position) => position,
            Err(low) => {
                log::debug!("{}", low);
                return FixOutcome::Rejected(low);
            }
        };

        let step = self.tracker.update(position, fix.timestamp);

        let distance_m = distance(position, self.destination.position);
        let radius = self.config.arrival_radius(fix.accuracy);
        if distance_m <= radius {
            log::info!(
                "Arrived at {} ({:.1} m, radius {:.1} m)",
                self.destination.name,
                distance_m,
                radius
            );
            let record = self.finish(fix.timestamp, true);
            return FixOutcome::Arrived { record, distance_m };
        }

        let render = self.render(position, distance_m, radius);
        self.last_render = Some(render.clone());
        FixOutcome::Guiding { render, step }
    }

    /// Feed a compass reading; returns the heading the renderer should use.
    pub fn on_heading(&mut self, raw: Option<f64>) -> Option<f64> {
        self.current_heading = self.heading.smooth(raw);
        self.current_heading
    }

    /// Close the session. Only the first call yields a record.
    pub fn finish(&mut self, now: f64, arrived: bool) -> Option<NavigationRecord> {
        if self.completion_reported {
            return None;
        }
        let summary = self.tracker.finish(now, arrived)?;
        self.completion_reported = true;
        Some(self.record_from(summary))
    }

    fn record_from(&self, summary: TrackingSummary) -> NavigationRecord {
        NavigationRecord {
            destination_id: self.destination.id,
            origin_latitude: summary.origin.latitude,
            origin_longitude: summary.origin.longitude,
            duration_seconds: summary.duration_seconds,
            distance_meters: summary.distance_meters.max(0.0).round() as u64,
            completed: summary.arrived,
        }
    }

    fn render(&self, position: GeoPoint, distance_m: f64, radius: f64) -> RenderInstruction {
        let bearing_deg = bearing(position, self.destination.position);
        let target_point = destination_point(position, bearing_deg, self.config.guide_ahead_m);

        let yaw_degrees = match self.current_heading {
            Some(heading) => -signed_angle_difference(bearing_deg, heading),
            None => normalize_angle(bearing_deg + 180.0),
        };
        let scale_factor = (distance_m / self.config.scale_distance_m)
            .clamp(self.config.min_scale, self.config.max_scale);
        let near_destination = distance_m <= radius * 2.0;

        let mut status_text = format!(
            "Destination: {} | Distance: {} m | Bearing: {}° | Arrival radius: {:.1} m",
            self.destination.name,
            distance_m.round(),
            bearing_deg.round() as i64 % 360,
            radius
        );
        if near_destination {
            status_text.push_str(" | Almost there, keep going");
        }

        RenderInstruction {
            target_point,
            yaw_degrees,
            scale_factor,
            distance_meters: distance_m,
            bearing_degrees: bearing_deg,
            arrival_radius_meters: radius,
            near_destination,
            status_text,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn filtered_position(&self) -> Option<GeoPoint> {
        self.filter.estimate()
    }

    pub fn heading(&self) -> Option<f64> {
        self.current_heading
    }

    pub fn distance_traveled(&self) -> f64 {
        self.tracker.total_distance()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_tracking()
    }

    pub fn last_render(&self) -> Option<&RenderInstruction> {
        self.last_render.as_ref()
    }

    /// (accepted, rejected) fix counts
    pub fn fix_counts(&self) -> (u64, u64) {
        self.filter.counts()
    }
}

/// Owner of the single active guidance session
pub struct Navigator {
    config: GuidanceConfig,
    state: GuidanceState,
    destination: Option<Destination>,
    gate: EntryGate,
    gate_passed: bool,
    session: Option<GuidanceSession>,
}

impl Navigator {
    pub fn new(config: GuidanceConfig) -> Self {
        let gate = EntryGate::new(None, config.origin_accept_radius_m);
        Self {
            config,
            state: GuidanceState::Idle,
            destination: None,
            gate,
            gate_passed: false,
            session: None,
        }
    }

    /// Choose where the next session leads. An active session keeps its own
    /// destination until it ends.
    pub fn select_destination(&mut self, destination: Destination) {
        log::info!("Destination selected: {} (#{})", destination.name, destination.id);
        self.destination = Some(destination);
    }

    /// Enter Calibrating with the given entry origin (`None`: wherever the user is).
    pub fn begin_calibration(&mut self, entry_origin: Option<GeoPoint>) -> Result<()> {
        if self.state == GuidanceState::Active {
            return Err(GuidanceError::SessionActive);
        }
        if self.destination.is_none() {
            return Err(GuidanceError::NoDestination);
        }

        self.gate = EntryGate::new(entry_origin, self.config.origin_accept_radius_m);
        self.gate_passed = false;
        self.state = GuidanceState::Calibrating;
        Ok(())
    }

    /// Compare the user's position with the entry origin.
    pub fn check_entry(&mut self, position: GeoPoint) -> Result<CalibrationOutcome> {
        if self.state != GuidanceState::Calibrating {
            return Err(GuidanceError::NotCalibrating);
        }
        let outcome = self.gate.check(position);
        self.gate_passed = matches!(outcome, CalibrationOutcome::Accepted { .. });
        Ok(outcome)
    }

    /// Resolve an out-of-range entry check. Returns whether guidance may start.
    pub fn resolve_calibration(&mut self, decision: CalibrationDecision) -> Result<bool> {
        if self.state != GuidanceState::Calibrating {
            return Err(GuidanceError::NotCalibrating);
        }

        match decision {
            CalibrationDecision::StartAnyway => self.gate_passed = true,
            CalibrationDecision::Reanchor(position) => {
                self.gate.reanchor(position);
                self.gate_passed = true;
            }
            CalibrationDecision::Abort => {
                self.gate_passed = false;
                self.state = GuidanceState::Idle;
            }
        }
        Ok(self.gate_passed)
    }

    /// Open an Active session toward the selected destination.
    ///
    /// A session that is still active is finished or discarded per `policy`;
    /// the returned outputs carry its completion record when finished.
    pub fn start(&mut self, policy: ReplacePolicy, now: f64) -> Result<Vec<GuidanceOutput>> {
        let destination = self.destination.clone().ok_or(GuidanceError::NoDestination)?;
        if self.state == GuidanceState::Calibrating && !self.gate_passed {
            return Err(GuidanceError::CalibrationPending);
        }

        let mut outputs = Vec::new();
        if let Some(mut previous) = self.session.take() {
            match policy {
                ReplacePolicy::FinishPrevious => {
                    if let Some(record) = previous.finish(now, false) {
                        outputs.push(GuidanceOutput::Completed(record));
                    }
                }
                ReplacePolicy::Discard => {
                    log::warn!(
                        "Discarding active session to {} without a completion report",
                        previous.destination().name
                    );
                }
            }
        }

        log::info!("Guidance started toward {}", destination.name);
        self.session = Some(GuidanceSession::new(destination, &self.config));
        self.state = GuidanceState::Active;
        self.gate_passed = false;
        Ok(outputs)
    }

    /// Process one sensor event. Outside the Active state events are ignored.
    pub fn handle(&mut self, event: SensorEvent) -> Vec<GuidanceOutput> {
        if self.state != GuidanceState::Active {
            log::debug!("Ignoring {:?} in state {:?}", event, self.state);
            return Vec::new();
        }
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        match event {
            SensorEvent::Fix(fix) => match session.on_fix(&fix) {
                FixOutcome::Rejected(low) => vec![GuidanceOutput::LowQuality {
                    accuracy: low.accuracy,
                    message: low.to_string(),
                }],
                FixOutcome::Guiding { render, .. } => vec![GuidanceOutput::Render(render)],
                FixOutcome::Arrived { record, .. } => {
                    self.session = None;
                    self.state = GuidanceState::Arrived;
                    record.map(GuidanceOutput::Completed).into_iter().collect()
                }
            },
            SensorEvent::Heading { degrees } => {
                session.on_heading(degrees);
                Vec::new()
            }
            SensorEvent::SensorError { message } => {
                log::warn!("Sensor error while guiding: {}", message);
                vec![GuidanceOutput::SensorStatus(format!(
                    "Location error: {}",
                    message
                ))]
            }
        }
    }

    /// Manual cancellation. Finishes an active session as not completed and
    /// returns to Idle; a no-op in any other state except Calibrating, which
    /// is abandoned.
    pub fn stop(&mut self, now: f64) -> Vec<GuidanceOutput> {
        match self.state {
            GuidanceState::Active => {
                let record = self.session.take().and_then(|mut s| s.finish(now, false));
                self.state = GuidanceState::Idle;
                log::info!("Guidance stopped");
                record.map(GuidanceOutput::Completed).into_iter().collect()
            }
            GuidanceState::Calibrating => {
                self.gate_passed = false;
                self.state = GuidanceState::Idle;
                Vec::new()
            }
            GuidanceState::Idle | GuidanceState::Arrived => Vec::new(),
        }
    }

    /// Lifecycle teardown: best-effort completion of an in-flight session.
    pub fn teardown(&mut self, now: f64) -> Vec<GuidanceOutput> {
        if self.state == GuidanceState::Active {
            log::info!("Teardown with active session, reporting as not completed");
        }
        self.stop(now)
    }

    pub fn state(&self) -> GuidanceState {
        self.state
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn session(&self) -> Option<&GuidanceSession> {
        self.session.as_ref()
    }

    pub fn entry_origin(&self) -> Option<GeoPoint> {
        self.gate.origin()
    }

    pub fn config(&self) -> &GuidanceConfig {
        &self.config
    }
}
