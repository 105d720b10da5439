//! Pedestrian guidance engine: filters noisy GPS fixes and compass readings,
//! steers toward a single point of interest, and reports each walk exactly once.

pub mod analytics;
pub mod calibration;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod error;
pub mod filters;
pub mod geodesy;
pub mod guidance;
pub mod live_status;
pub mod tracker;
pub mod types;

pub use config::GuidanceConfig;
pub use error::{GuidanceError, Result};
pub use guidance::{GuidanceOutput, GuidanceState, Navigator, ReplacePolicy};
pub use types::{Destination, Fix, GeoPoint, NavigationRecord, RenderInstruction, SensorEvent};
