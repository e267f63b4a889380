//! Streaming anomaly detectors
//!
//! Each detector is a pure evaluation over store windows: it holds its own
//! configuration (and, for correlation, per-entity state) but never performs
//! I/O and never fails the caller. Preconditions that are not met simply
//! yield no finding.

mod correlation;
mod seasonal;
mod statistical;

pub use correlation::{CorrelationConfig, CorrelationDetector, DivergenceFinding};
pub use seasonal::{SeasonalConfig, SeasonalFinding, SeasonalTrendDetector};
pub use statistical::{
    StatisticalConfig, StatisticalDetector, StatisticalFinding, StatisticalKind,
};
