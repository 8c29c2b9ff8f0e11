//! IO modules - external system interfaces
//!
//! This module contains all file IO, kept out of the inference path:
//! - `schedule_feed` - JSON schedule feed loader building the in-memory timetable
//! - `tap_source` - AFC tap reader (JSONL format)
//! - `egress` - OD-X journey output (JSONL format) and OD matrix output (JSON)

pub mod egress;
pub mod schedule_feed;
pub mod tap_source;

// Re-export commonly used types
pub use egress::{write_matrix, Egress};
pub use schedule_feed::load_schedule;
pub use tap_source::{load_taps, TapBatch};
