pub mod heading;
pub mod position;

pub use heading::HeadingSmoother;
pub use position::{AxisFilter, FilterState, LowQualityFix, PositionFilter};
