//! Interchange classification between consecutive legs
//!
//! A pair of legs is either linked into one journey (interchange) or split
//! (boundary). Checks run in a fixed order and the first failing one decides
//! the boundary reason.

use crate::domain::leg::Leg;
use crate::domain::schedule::ScheduleIndex;
use crate::infra::config::Config;
use serde::Serialize;
use tracing::trace;

/// Why two legs were not linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryReason {
    UnresolvedAlighting,
    NextUnmatched,
    RepeatedRoute,
    NegativeGap,
    WaitExceeded,
    WalkExceeded,
    Circuitous,
}

impl BoundaryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryReason::UnresolvedAlighting => "unresolved_alighting",
            BoundaryReason::NextUnmatched => "next_unmatched",
            BoundaryReason::RepeatedRoute => "repeated_route",
            BoundaryReason::NegativeGap => "negative_gap",
            BoundaryReason::WaitExceeded => "wait_exceeded",
            BoundaryReason::WalkExceeded => "walk_exceeded",
            BoundaryReason::Circuitous => "circuitous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Same journey; confidence in [0.5, 1]
    Interchange { confidence: f64 },
    Boundary { reason: BoundaryReason },
}

impl Decision {
    pub fn is_interchange(&self) -> bool {
        matches!(self, Decision::Interchange { .. })
    }
}

pub struct InterchangeClassifier<'a> {
    schedule: &'a dyn ScheduleIndex,
    config: &'a Config,
}

impl<'a> InterchangeClassifier<'a> {
    pub fn new(schedule: &'a dyn ScheduleIndex, config: &'a Config) -> Self {
        Self { schedule, config }
    }

    pub fn classify(&self, current: &Leg, next: &Leg) -> Decision {
        let decision = self.decide(current, next);
        trace!(
            card_id = %current.card_id,
            from = %current.boarding_stop,
            to = %next.boarding_stop,
            decision = ?decision,
            "legs_classified"
        );
        decision
    }

    fn decide(&self, current: &Leg, next: &Leg) -> Decision {
        let boundary = |reason| Decision::Boundary { reason };

        let (Some(alight_stop), Some(alight_time)) = (&current.alighting_stop, current.alighting_time)
        else {
            return boundary(BoundaryReason::UnresolvedAlighting);
        };
        if !current.is_matched() {
            return boundary(BoundaryReason::UnresolvedAlighting);
        }
        if !next.is_matched() {
            return boundary(BoundaryReason::NextUnmatched);
        }
        if current.route_id == next.route_id && !self.config.allow_same_route_interchange() {
            return boundary(BoundaryReason::RepeatedRoute);
        }

        let gap = (next.boarding_time - alight_time).num_seconds();
        if gap < 0 {
            return boundary(BoundaryReason::NegativeGap);
        }
        let max_wait = self.config.max_interchange_wait();
        if gap as u64 > max_wait {
            return boundary(BoundaryReason::WaitExceeded);
        }

        let max_walk = self.config.max_interchange_walk();
        let walk = match self.schedule.distance_m(alight_stop, &next.boarding_stop) {
            Some(d) if d <= max_walk => d,
            _ => return boundary(BoundaryReason::WalkExceeded),
        };

        if let Some(ratio) = self.config.max_circuity_ratio() {
            if self.circuity(current, walk, next).is_some_and(|c| c > ratio) {
                return boundary(BoundaryReason::Circuitous);
            }
        }

        let wait_share = if max_wait == 0 { 0.0 } else { gap as f64 / max_wait as f64 };
        let walk_share = if max_walk <= 0.0 { 0.0 } else { walk / max_walk };
        Decision::Interchange { confidence: (1.0 - 0.5 * wait_share.max(walk_share)).clamp(0.5, 1.0) }
    }

    /// Travelled distance over straight-line distance for the linked pair.
    ///
    /// `None` when the next leg is unresolved or a stop has no location.
    fn circuity(&self, current: &Leg, walk: f64, next: &Leg) -> Option<f64> {
        let first_alight = current.alighting_stop.as_ref()?;
        let second_alight = next.alighting_stop.as_ref()?;

        let ride1 = self.schedule.distance_m(&current.boarding_stop, first_alight)?;
        let ride2 = self.schedule.distance_m(&next.boarding_stop, second_alight)?;
        let direct = self.schedule.distance_m(&current.boarding_stop, second_alight)?;

        let travelled = ride1 + walk + ride2;
        if direct <= 0.0 {
            return Some(f64::INFINITY);
        }
        Some(travelled / direct)
    }
}
