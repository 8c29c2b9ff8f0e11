//! Leg construction and trip-chaining
//!
//! One left-to-right pass over a card-day: every tap becomes a Leg, and each
//! matched Leg takes its alighting from the next tap ("you alight where you
//! next board"). The last Leg of the day is left for destination inference.

use crate::domain::issues::{Issue, LegFlag, UnmatchedReason};
use crate::domain::leg::{AlightingSource, Leg};
use crate::domain::schedule::{ScheduleError, ScheduleIndex, ScheduledVisit};
use crate::domain::types::{StopId, TapEvent};
use crate::infra::config::Config;
use crate::services::matcher::{CandidateMatcher, TapMatch};
use chrono::{Duration, NaiveDate};
use tracing::debug;

/// Drop taps that follow the previously kept tap within `window_secs`.
///
/// `taps` must be ordered by timestamp. Returns the kept taps and one
/// `DuplicateTap` issue per dropped tap.
pub fn collapse_duplicates(taps: Vec<TapEvent>, window_secs: u64) -> (Vec<TapEvent>, Vec<Issue>) {
    let window = Duration::seconds(i64::from(u32::try_from(window_secs).unwrap_or(u32::MAX)));
    let mut kept: Vec<TapEvent> = Vec::with_capacity(taps.len());
    let mut issues = Vec::new();

    for tap in taps {
        match kept.last() {
            Some(prev) if tap.timestamp - prev.timestamp <= window => {
                debug!(
                    card_id = %tap.card_id,
                    stop_id = %tap.stop_id,
                    timestamp = %tap.timestamp,
                    kept = %prev.timestamp,
                    "duplicate_tap_collapsed"
                );
                issues.push(Issue::DuplicateTap {
                    card_id: tap.card_id,
                    stop_id: tap.stop_id,
                    timestamp: tap.timestamp,
                    kept_timestamp: prev.timestamp,
                });
            }
            _ => kept.push(tap),
        }
    }

    (kept, issues)
}

/// Nearest visit to `anchor` among `visits`, within `max_distance` meters.
///
/// Ties go to the lowest sequence, so a circular trip passing the same stop
/// twice resolves to the first pass.
pub fn nearest_visit<'v>(
    schedule: &dyn ScheduleIndex,
    visits: impl Iterator<Item = &'v ScheduledVisit>,
    anchor: &StopId,
    max_distance: f64,
) -> Option<&'v ScheduledVisit> {
    visits
        .filter_map(|v| {
            let distance = schedule.distance_m(&v.stop_id, anchor)?;
            (distance <= max_distance).then_some((distance, v))
        })
        .min_by(|(da, va), (db, vb)| da.total_cmp(db).then_with(|| va.sequence.cmp(&vb.sequence)))
        .map(|(_, v)| v)
}

pub struct LegBuilder<'a> {
    schedule: &'a dyn ScheduleIndex,
    config: &'a Config,
    matcher: CandidateMatcher<'a>,
}

impl<'a> LegBuilder<'a> {
    pub fn new(schedule: &'a dyn ScheduleIndex, config: &'a Config) -> Self {
        Self { schedule, config, matcher: CandidateMatcher::new(schedule, config) }
    }

    /// Legs for one card-day of de-duplicated, time-ordered taps.
    ///
    /// Always returns exactly one Leg per tap. Fails only when the schedule
    /// cannot answer for a trip it handed out.
    pub fn build_day(
        &self,
        service_date: NaiveDate,
        taps: &[TapEvent],
        issues: &mut Vec<Issue>,
    ) -> Result<Vec<Leg>, ScheduleError> {
        let mut legs = Vec::with_capacity(taps.len());
        for (i, tap) in taps.iter().enumerate() {
            let leg = self.board(tap, service_date, issues)?;
            let leg = match taps.get(i + 1) {
                Some(next) => self.resolve_alighting(leg, next, issues)?,
                None => leg,
            };
            legs.push(leg);
        }
        Ok(legs)
    }

    /// Boarding Leg for a single tap, unmatched when the schedule has no fit
    pub fn board(
        &self,
        tap: &TapEvent,
        service_date: NaiveDate,
        issues: &mut Vec<Issue>,
    ) -> Result<Leg, ScheduleError> {
        let leg = match self.matcher.match_tap(tap)? {
            TapMatch::Boarded { boarding, confidence } => {
                Leg::matched(tap, service_date, boarding, confidence)
            }
            TapMatch::NoActiveService { date } => {
                issues.push(Issue::NoActiveService {
                    card_id: tap.card_id.clone(),
                    stop_id: tap.stop_id.clone(),
                    timestamp: tap.timestamp,
                    date,
                });
                Leg::unmatched(tap, service_date, &[LegFlag::NoActiveService])
            }
            TapMatch::Unmatched { reason } => {
                issues.push(Issue::UnmatchedTap {
                    card_id: tap.card_id.clone(),
                    stop_id: tap.stop_id.clone(),
                    timestamp: tap.timestamp,
                    reason,
                });
                let flags: &[LegFlag] = match reason {
                    UnmatchedReason::UnknownStop => &[LegFlag::UnknownStop],
                    UnmatchedReason::NoCandidateInWindow => &[],
                };
                Leg::unmatched(tap, service_date, flags)
            }
        };
        Ok(leg)
    }

    /// Resolve where `leg` ended given the card's next boarding.
    ///
    /// Unmatched legs pass through untouched. When no visit of the trip fits
    /// the next boarding, the trip terminal is used with a confidence penalty.
    pub fn resolve_alighting(
        &self,
        leg: Leg,
        next: &TapEvent,
        issues: &mut Vec<Issue>,
    ) -> Result<Leg, ScheduleError> {
        let Some(boarding) = leg.boarding_match().cloned() else {
            return Ok(leg);
        };
        let trip_id = boarding.visit.trip_id.clone();
        let visits = self.schedule.trip_visits(&trip_id)?;

        let reachable = visits.iter().filter(|v| {
            v.sequence > boarding.visit.sequence && boarding.arrival_at(v) <= next.timestamp
        });
        if let Some(visit) = nearest_visit(
            self.schedule,
            reachable,
            &next.stop_id,
            self.config.max_alighting_distance(),
        ) {
            let confidence = leg.confidence;
            return Ok(leg.resolved(visit, AlightingSource::Chained, confidence));
        }

        let terminal_stop = self.schedule.terminal_stop(&trip_id)?;
        let terminal = visits
            .iter()
            .rev()
            .find(|v| v.stop_id == terminal_stop)
            .filter(|v| v.sequence > boarding.visit.sequence);

        issues.push(Issue::AlightingUnresolved {
            card_id: leg.card_id.clone(),
            trip_id: trip_id.clone(),
            stop_id: leg.boarding_stop.clone(),
            boarding_time: leg.boarding_time,
            fallback: terminal.map(|v| v.stop_id.clone()),
        });

        let leg = leg.with_flag(LegFlag::AlightingUnresolved);
        match terminal {
            Some(visit) => {
                let confidence = leg.confidence - self.config.alighting_fallback_penalty();
                Ok(leg.resolved(visit, AlightingSource::TerminalFallback, confidence))
            }
            None => Ok(leg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CardId, TripId};
    use crate::services::test_support::{monday, network, tap};

    fn build(taps: &[TapEvent]) -> (Vec<Leg>, Vec<Issue>) {
        let tt = network();
        let config = Config::default();
        let builder = LegBuilder::new(tt.as_ref(), &config);
        let mut issues = Vec::new();
        let legs = builder.build_day(monday(), taps, &mut issues).unwrap();
        (legs, issues)
    }

    #[test]
    fn test_collapse_duplicates() {
        let taps = vec![
            tap("c1", "08:00:00", "S1"),
            tap("c1", "08:00:05", "S1"),
            tap("c1", "08:00:29", "S2"),
            tap("c1", "08:00:40", "S1"),
        ];
        let (kept, issues) = collapse_duplicates(taps, 30);

        assert_eq!(kept.len(), 2);
        assert_eq!(issues.len(), 2);
        assert_eq!(kept[1].timestamp, tap("c1", "08:00:40", "S1").timestamp);
        assert!(matches!(&issues[0], Issue::DuplicateTap { card_id, .. } if *card_id == CardId::from("c1")));
    }

    #[test]
    fn test_chained_alighting_at_next_boarding_stop() {
        let (legs, issues) = build(&[tap("c1", "08:00:00", "S1"), tap("c1", "08:20:00", "S2")]);

        assert_eq!(legs.len(), 2);
        let first = &legs[0];
        assert_eq!(first.trip_id, Some(TripId::from("T1")));
        assert_eq!(first.alighting_stop, Some(StopId::from("S2")));
        assert_eq!(first.alighting_source, AlightingSource::Chained);
        assert_eq!(first.alighting_time, Some(tap("c1", "08:18:00", "S2").timestamp));
        assert_eq!(first.confidence, first.match_confidence);
        assert!(legs[1].alighting_stop.is_none());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_chaining_walks_to_nearby_stop() {
        // Ride T1 to S3 then walk ~520 m to S5 for the R2 departure
        let (legs, _) = build(&[tap("c1", "08:00:00", "S1"), tap("c1", "08:39:00", "S5")]);

        assert_eq!(legs[0].alighting_stop, Some(StopId::from("S3")));
        assert_eq!(legs[0].alighting_source, AlightingSource::Chained);
        assert_eq!(legs[1].trip_id, Some(TripId::from("T4")));
    }

    #[test]
    fn test_terminal_fallback_when_next_stop_unreachable() {
        // S8 is far from every T1 stop
        let (legs, issues) = build(&[tap("c1", "08:00:00", "S1"), tap("c1", "09:30:00", "S8")]);

        let first = &legs[0];
        assert_eq!(first.alighting_stop, Some(StopId::from("S4")));
        assert_eq!(first.alighting_source, AlightingSource::TerminalFallback);
        assert!(first.has_flag(LegFlag::AlightingUnresolved));
        assert!((first.confidence - (first.match_confidence - 0.3)).abs() < 1e-9);
        assert!(issues.iter().any(|i| matches!(
            i,
            Issue::AlightingUnresolved { fallback: Some(stop), .. } if *stop == StopId::from("S4")
        )));
    }

    #[test]
    fn test_visit_after_next_tap_is_not_chained() {
        // T1 reaches S3 at 08:26, after the 08:20 tap there; S2 is too far to walk
        let (legs, issues) = build(&[tap("c1", "08:00:00", "S1"), tap("c1", "08:20:00", "S3")]);

        assert_eq!(legs[0].alighting_source, AlightingSource::TerminalFallback);
        assert_eq!(legs[0].alighting_stop, Some(StopId::from("S4")));
        assert!(issues.iter().any(|i| i.as_str() == "alighting_unresolved"));
    }

    #[test]
    fn test_circular_trip_alights_at_first_pass() {
        // C1 calls at S3 at 12:10 and again at 12:30; T8 boards at S3 12:16
        let (legs, _) = build(&[tap("c1", "11:59:00", "S2"), tap("c1", "12:15:00", "S3")]);

        assert_eq!(legs[0].trip_id, Some(TripId::from("C1")));
        assert_eq!(legs[0].alighting_stop, Some(StopId::from("S3")));
        assert_eq!(legs[0].alighting_time, Some(tap("c1", "12:10:00", "S3").timestamp));
    }

    #[test]
    fn test_unmatched_taps_still_produce_legs() {
        let (legs, issues) = build(&[
            tap("c1", "08:00:00", "S99"),
            tap("c1", "10:00:00", "S1"),
            tap("c1", "17:00:00", "S3"),
        ]);

        assert_eq!(legs.len(), 3);
        assert!(legs[0].has_flag(LegFlag::UnknownStop));
        assert!(!legs[1].is_matched());
        assert!(legs[1].alighting_stop.is_none());
        assert!(legs[2].is_matched());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_narrower_late_tolerance_never_raises_leg_confidence() {
        let tt = network();
        let wide = Config::default();
        let narrow = Config::default().with_match_time_tolerance_late(200);
        let days: [&[TapEvent]; 4] = [
            &[tap("c1", "08:00:00", "S1"), tap("c1", "08:20:00", "S2")],
            &[tap("c1", "08:00:00", "S1"), tap("c1", "09:30:00", "S8")],
            &[tap("c1", "08:00:00", "S1"), tap("c1", "08:30:00", "S3"), tap("c1", "17:00:00", "S1")],
            &[tap("c1", "11:59:00", "S2"), tap("c1", "12:15:00", "S3")],
        ];

        for taps in days {
            let legs = |config: &Config| {
                LegBuilder::new(tt.as_ref(), config)
                    .build_day(monday(), taps, &mut Vec::new())
                    .unwrap()
            };
            for (w, n) in legs(&wide).iter().zip(legs(&narrow).iter()) {
                assert_eq!(w.trip_id, n.trip_id, "tap at {}", w.boarding_time);
                assert!(n.confidence <= w.confidence, "tap at {}", w.boarding_time);
            }
        }
    }

    #[test]
    fn test_boarding_at_terminal_stays_unresolved() {
        // T3 ends at S1 at 17:27; a tap there can only match the arrival
        let (legs, issues) = build(&[tap("c1", "17:27:00", "S1"), tap("c1", "18:30:00", "S2")]);

        assert_eq!(legs[0].trip_id, Some(TripId::from("T3")));
        assert!(legs[0].alighting_stop.is_none());
        assert!(legs[0].has_flag(LegFlag::AlightingUnresolved));
        assert!(issues
            .iter()
            .any(|i| matches!(i, Issue::AlightingUnresolved { fallback: None, .. })));
    }
}
