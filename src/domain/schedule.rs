//! Schedule index contract consumed by the inference engine
//!
//! The engine never builds or mutates a schedule. It receives an immutable
//! `Arc<dyn ScheduleIndex>` and shares it across all workers.

use crate::domain::geo::GeoPoint;
use crate::domain::types::{RouteId, StopId, TripId};
use chrono::NaiveDate;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// One scheduled stop visit of a trip.
///
/// Times are seconds since midnight of the service date and can exceed 24h.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledVisit {
    pub trip_id: TripId,
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub sequence: u32,
    pub arrival: u32,
    pub departure: u32,
}

/// Inclusive window of departure times, seconds since service midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: u32,
    pub end: u32,
}

impl TimeWindow {
    /// Window around `center`, clamped at the start of the service day
    pub fn around(center: i64, before: u32, after: u32) -> Self {
        let start = (center - i64::from(before)).max(0);
        let end = (center + i64::from(after)).max(0);
        Self {
            start: u32::try_from(start).unwrap_or(u32::MAX),
            end: u32::try_from(end).unwrap_or(u32::MAX),
        }
    }

    #[inline]
    pub fn contains(&self, t: u32) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Set of trips running on one service date
pub type ActiveTrips = Arc<FxHashSet<TripId>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("trip {0} is not in the schedule index")]
    UnknownTrip(TripId),
    #[error("trip {0} has no stop times")]
    EmptyTrip(TripId),
    #[error("malformed schedule: {0}")]
    Malformed(String),
}

/// Read-only lookups over a transit schedule
pub trait ScheduleIndex: Send + Sync {
    /// Whether the stop exists at all
    fn has_stop(&self, stop: &StopId) -> bool;

    /// Visits at `stop` whose departure lies inside `window`, ordered by departure
    fn visits_near(
        &self,
        stop: &StopId,
        window: TimeWindow,
    ) -> Result<Vec<ScheduledVisit>, ScheduleError>;

    /// Sequence index of the first visit of `trip` at `stop`
    fn stop_sequence_position(&self, trip: &TripId, stop: &StopId) -> Option<u32>;

    /// Last stop served by `trip`
    fn terminal_stop(&self, trip: &TripId) -> Result<StopId, ScheduleError>;

    /// Trips whose service runs on `date`
    fn active_service(&self, date: NaiveDate) -> ActiveTrips;

    /// All visits of `trip`, ordered by sequence
    fn trip_visits(&self, trip: &TripId) -> Result<&[ScheduledVisit], ScheduleError>;

    fn stop_location(&self, stop: &StopId) -> Option<GeoPoint>;

    /// Straight-line distance between two stops in meters
    fn distance_m(&self, a: &StopId, b: &StopId) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        let pa = self.stop_location(a)?;
        let pb = self.stop_location(b)?;
        Some(pa.distance_m(&pb))
    }

    /// Routes with at least one active trip calling at `stop` on `date`
    fn routes_serving(
        &self,
        stop: &StopId,
        date: NaiveDate,
    ) -> Result<BTreeSet<RouteId>, ScheduleError> {
        let active = self.active_service(date);
        if active.is_empty() {
            return Ok(BTreeSet::new());
        }
        let all_day = TimeWindow { start: 0, end: u32::MAX };
        Ok(self
            .visits_near(stop, all_day)?
            .into_iter()
            .filter(|v| active.contains(&v.trip_id))
            .map(|v| v.route_id)
            .collect())
    }
}
