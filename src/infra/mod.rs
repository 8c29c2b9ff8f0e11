//! Infrastructure - configuration, metrics, and the schedule index
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `timetable` - In-memory `ScheduleIndex` with calendar expansion

pub mod config;
pub mod metrics;
pub mod timetable;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use timetable::{Timetable, TimetableBuilder};
