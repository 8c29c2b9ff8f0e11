//! Journey assembly for one card
//!
//! Legs of each service day are cut into journeys at every boundary the
//! classifier reports. Destinations of still-open journeys are inferred from
//! the card's later activity, then each group becomes a `Journey`.

use crate::domain::journey::Journey;
use crate::domain::leg::Leg;
use crate::domain::schedule::{ScheduleError, ScheduleIndex};
use crate::domain::types::CardId;
use crate::infra::config::Config;
use crate::services::destination::{DestinationContext, DestinationInference};
use crate::services::interchange::{Decision, InterchangeClassifier};
use chrono::NaiveDate;
use tracing::trace;

/// Legs linked by interchanges, with one classifier confidence per link
#[derive(Debug, Clone, Default)]
pub struct LegGroup {
    pub legs: Vec<Leg>,
    pub links: Vec<f64>,
}

impl LegGroup {
    fn single(leg: Leg) -> Self {
        Self { legs: vec![leg], links: Vec::new() }
    }
}

pub struct JourneyAssembler<'a> {
    schedule: &'a dyn ScheduleIndex,
    config: &'a Config,
    classifier: InterchangeClassifier<'a>,
    destinations: DestinationInference<'a>,
}

impl<'a> JourneyAssembler<'a> {
    pub fn new(schedule: &'a dyn ScheduleIndex, config: &'a Config) -> Self {
        Self {
            schedule,
            config,
            classifier: InterchangeClassifier::new(schedule, config),
            destinations: DestinationInference::new(schedule, config),
        }
    }

    /// Split a card-day's legs wherever the classifier reports a boundary
    pub fn partition(&self, legs: Vec<Leg>) -> Vec<LegGroup> {
        let mut groups: Vec<LegGroup> = Vec::new();
        for leg in legs {
            let decision = groups
                .last()
                .and_then(|g| g.legs.last())
                .map(|prev| self.classifier.classify(prev, &leg));
            match (decision, groups.last_mut()) {
                (Some(Decision::Interchange { confidence }), Some(group)) => {
                    group.links.push(confidence);
                    group.legs.push(leg);
                }
                _ => groups.push(LegGroup::single(leg)),
            }
        }
        groups
    }

    /// Journeys of one card, `days` ordered by service date.
    pub fn assemble(
        &self,
        card_id: &CardId,
        days: Vec<(NaiveDate, Vec<Leg>)>,
    ) -> Result<Vec<Journey>, ScheduleError> {
        let mut groups: Vec<(NaiveDate, LegGroup)> = Vec::new();
        for (date, legs) in days {
            groups.extend(self.partition(legs).into_iter().map(|g| (date, g)));
        }

        self.infer_destinations(&mut groups)?;

        let mut journeys = Vec::with_capacity(groups.len());
        let mut current_day: Option<NaiveDate> = None;
        let mut ordinal = 0u32;
        for (date, group) in groups {
            for part in self.split_loop(group) {
                if current_day != Some(date) {
                    current_day = Some(date);
                    ordinal = 0;
                }
                let Some(journey) = Journey::new(
                    card_id.clone(),
                    date,
                    ordinal,
                    part.legs,
                    &part.links,
                    self.config.unknown_destination_confidence_cap(),
                ) else {
                    continue;
                };
                trace!(
                    card_id = %card_id,
                    jid = %journey.jid,
                    origin = %journey.origin,
                    legs = journey.legs.len(),
                    "journey_assembled"
                );
                ordinal += 1;
                journeys.push(journey);
            }
        }
        Ok(journeys)
    }

    fn infer_destinations(&self, groups: &mut [(NaiveDate, LegGroup)]) -> Result<(), ScheduleError> {
        let mut day_start = 0;
        for i in 0..groups.len() {
            if groups[i].0 != groups[day_start].0 {
                day_start = i;
            }
            let next_boarding = groups
                .get(i + 1)
                .and_then(|(_, g)| g.legs.first())
                .map(|l| (l.boarding_stop.clone(), l.boarding_time));
            let day_origin = (i != day_start)
                .then(|| groups[day_start].1.legs.first().map(|l| l.boarding_stop.clone()))
                .flatten();

            let Some(last) = groups[i].1.legs.pop() else {
                continue;
            };
            let context = DestinationContext {
                next_boarding: next_boarding.as_ref().map(|(stop, at)| (stop, *at)),
                day_origin: day_origin.as_ref(),
            };
            let last = self.destinations.infer(last, context)?;
            groups[i].1.legs.push(last);
        }
        Ok(())
    }

    /// Break a multi-leg group that ends too close to where it started.
    fn split_loop(&self, group: LegGroup) -> Vec<LegGroup> {
        let min_length = self.config.min_journey_length();
        if min_length <= 0.0 || group.legs.len() < 2 {
            return vec![group];
        }
        let (Some(first), Some(last)) = (group.legs.first(), group.legs.last()) else {
            return vec![group];
        };
        let Some(destination) = last.alighting_stop.as_ref() else {
            return vec![group];
        };
        match self.schedule.distance_m(&first.boarding_stop, destination) {
            Some(length) if length < min_length => {
                trace!(
                    card_id = %first.card_id,
                    origin = %first.boarding_stop,
                    length_m = length,
                    "loop_journey_split"
                );
                group.legs.into_iter().map(LegGroup::single).collect()
            }
            _ => vec![group],
        }
    }
}
