use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::guidance::{GuidanceState, Navigator};

/// Snapshot of the running guidance session, written as JSON for dashboards
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub updated_at: String,
    pub state: GuidanceState,
    pub destination_id: Option<i64>,
    pub destination_name: Option<String>,
    // Filtered position
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub heading_deg: Option<f64>,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    // Guidance
    pub distance_to_destination_m: Option<f64>,
    pub arrival_radius_m: Option<f64>,
    pub distance_traveled_m: f64,
    pub status_text: String,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            updated_at: Utc::now().to_rfc3339(),
            state: GuidanceState::Idle,
            destination_id: None,
            destination_name: None,
            latitude: None,
            longitude: None,
            heading_deg: None,
            fixes_accepted: 0,
            fixes_rejected: 0,
            distance_to_destination_m: None,
            arrival_radius_m: None,
            distance_traveled_m: 0.0,
            status_text: String::new(),
        }
    }

    pub fn capture(navigator: &Navigator) -> Self {
        let mut status = Self::new();
        status.state = navigator.state();
        if let Some(destination) = navigator.destination() {
            status.destination_id = Some(destination.id);
            status.destination_name = Some(destination.name.clone());
        }

        let Some(session) = navigator.session() else {
            return status;
        };
        if let Some(position) = session.filtered_position() {
            status.latitude = Some(position.latitude);
            status.longitude = Some(position.longitude);
        }
        status.heading_deg = session.heading();
        (status.fixes_accepted, status.fixes_rejected) = session.fix_counts();
        status.distance_traveled_m = session.distance_traveled();
        if let Some(render) = session.last_render() {
            status.distance_to_destination_m = Some(render.distance_meters);
            status.arrival_radius_m = Some(render.arrival_radius_meters);
            status.status_text = render.status_text.clone();
        }
        status
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
