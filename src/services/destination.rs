//! Destination inference for a journey's final leg
//!
//! Only legs without an alighting reach this point: the last ride of a
//! card-day, or a ride that could not be chained. The destination is pinned
//! to the trip visit closest to where the card is next seen.

use crate::domain::leg::{AlightingSource, Leg};
use crate::domain::schedule::{ScheduleError, ScheduleIndex};
use crate::domain::types::StopId;
use crate::infra::config::Config;
use crate::services::leg_builder::nearest_visit;
use chrono::NaiveDateTime;
use tracing::debug;

/// Where the card is next seen, relative to the leg being resolved
#[derive(Debug, Clone, Copy)]
pub struct DestinationContext<'c> {
    /// First boarding of the card's following journey, if any
    pub next_boarding: Option<(&'c StopId, NaiveDateTime)>,
    /// Origin of the first journey of the same service day, when the leg
    /// belongs to a later journey of that day
    pub day_origin: Option<&'c StopId>,
}

pub struct DestinationInference<'a> {
    schedule: &'a dyn ScheduleIndex,
    config: &'a Config,
}

impl<'a> DestinationInference<'a> {
    pub fn new(schedule: &'a dyn ScheduleIndex, config: &'a Config) -> Self {
        Self { schedule, config }
    }

    /// Resolve the alighting of `leg` from the card's surrounding activity.
    ///
    /// Resolved and unmatched legs are returned as they are. A leg no anchor
    /// can explain stays unresolved and the journey gets an unknown
    /// destination.
    pub fn infer(&self, leg: Leg, context: DestinationContext<'_>) -> Result<Leg, ScheduleError> {
        if leg.is_resolved() || !leg.is_matched() {
            return Ok(leg);
        }

        // The rider must be off this trip before tapping again
        let deadline = context.next_boarding.map(|(_, boarded_at)| boarded_at);
        let mut anchors: Vec<(&StopId, AlightingSource)> = Vec::with_capacity(2);
        if let Some((stop, boarded_at)) = context.next_boarding {
            let gap = (boarded_at - leg.boarding_time).num_seconds();
            if gap > self.config.max_interchange_wait() as i64
                && gap <= self.config.max_activity_duration() as i64
            {
                anchors.push((stop, AlightingSource::NextJourney));
            }
        }
        if let Some(origin) = context.day_origin {
            anchors.push((origin, AlightingSource::ReturnToOrigin));
        }

        for (anchor, source) in anchors {
            if let Some(resolved) = self.anchor_to(&leg, anchor, source, deadline)? {
                return Ok(resolved);
            }
        }

        debug!(
            card_id = %leg.card_id,
            boarding_stop = %leg.boarding_stop,
            boarding_time = %leg.boarding_time,
            "destination_unknown"
        );
        Ok(leg)
    }

    fn anchor_to(
        &self,
        leg: &Leg,
        anchor: &StopId,
        source: AlightingSource,
        deadline: Option<NaiveDateTime>,
    ) -> Result<Option<Leg>, ScheduleError> {
        let Some(boarding) = leg.boarding_match() else {
            return Ok(None);
        };
        let visits = self.schedule.trip_visits(&boarding.visit.trip_id)?;
        let after = visits.iter().filter(|v| {
            v.sequence > boarding.visit.sequence
                && deadline.map_or(true, |limit| boarding.arrival_at(v) <= limit)
        });

        let Some(visit) =
            nearest_visit(self.schedule, after, anchor, self.config.max_alighting_distance())
        else {
            return Ok(None);
        };

        debug!(
            card_id = %leg.card_id,
            trip_id = %visit.trip_id,
            destination = %visit.stop_id,
            source = source.as_str(),
            "destination_inferred"
        );
        let confidence = leg.confidence * self.config.return_to_origin_confidence_factor();
        Ok(Some(leg.clone().resolved(visit, source, confidence)))
    }
}
