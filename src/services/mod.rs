//! Services - inference pipeline
//!
//! This module contains the ODX inference stages, in pipeline order:
//! - `matcher` - Candidate trip matching for a single tap
//! - `leg_builder` - Duplicate collapse, boarding legs and trip-chaining
//! - `interchange` - Interchange/boundary classification between legs
//! - `destination` - Destination inference for open journeys
//! - `assembler` - Partitioning legs into journeys
//! - `engine` - Per-card batch orchestration over a worker pool

pub mod assembler;
pub mod destination;
pub mod engine;
pub mod interchange;
pub mod leg_builder;
pub mod matcher;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use assembler::JourneyAssembler;
pub use engine::{BatchOutput, CancelToken, OdxEngine};
pub use interchange::{BoundaryReason, Decision, InterchangeClassifier};
pub use leg_builder::LegBuilder;
pub use matcher::{CandidateMatcher, TapMatch};
