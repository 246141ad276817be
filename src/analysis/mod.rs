//! Analysis modules.
//!
//! `aggregator` holds the pure statistics; `snapshot` bundles them for a
//! single dashboard render.

pub mod aggregator;
pub mod snapshot;

pub use aggregator::*;
pub use snapshot::{DashboardSnapshot, LoadWarning, PerformanceSection};
