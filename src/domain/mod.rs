//! Domain models - core inference types
//!
//! This module contains the canonical data types used throughout the system:
//! - `TapEvent` - one AFC boarding record
//! - `ScheduleIndex` - read-only schedule lookups the engine depends on
//! - `Leg` - one inferred vehicle ride
//! - `Journey` - legs grouped between two journey boundaries
//! - `OdMatrix` - aggregated origin-destination counts
//! - `Issue` / `CardError` - recoverable warnings and per-card failures

pub mod geo;
pub mod issues;
pub mod journey;
pub mod leg;
pub mod od_matrix;
pub mod schedule;
pub mod types;

// Re-export commonly used types at module level
pub use issues::{CardError, Issue, LegFlag};
pub use journey::Journey;
pub use leg::{AlightingSource, Leg};
pub use od_matrix::OdMatrix;
pub use schedule::{ScheduleIndex, ScheduledVisit};
pub use types::{CardId, RouteId, StopId, TapEvent, TripId};
