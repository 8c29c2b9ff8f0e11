//! Candidate trip matching for a single tap
//!
//! Queries the schedule for departures around the tap at its boarding stop
//! and picks the closest active one. Taps before the new-day hour are
//! searched on both the previous service date and the calendar date.

use crate::domain::issues::UnmatchedReason;
use crate::domain::leg::BoardingMatch;
use crate::domain::schedule::{ScheduleError, ScheduleIndex, ScheduledVisit, TimeWindow};
use crate::domain::types::{service_date, service_seconds, RouteId, TapEvent};
use crate::infra::config::Config;
use chrono::NaiveDate;
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::trace;

/// Result of matching one tap against the schedule
#[derive(Debug, Clone, PartialEq)]
pub enum TapMatch {
    Boarded {
        boarding: BoardingMatch,
        confidence: f64,
    },
    /// No active trip calls at the tap's stop on its service date
    NoActiveService { date: NaiveDate },
    Unmatched { reason: UnmatchedReason },
}

#[derive(Debug)]
struct Candidate {
    visit: ScheduledVisit,
    service_date: NaiveDate,
    /// Tap time in seconds of `service_date`
    tap_secs: i64,
    delta: i64,
    score: i64,
    hint_match: bool,
}

impl Candidate {
    /// Total order: score, hint match, raw delta, trip id, service date
    fn rank(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.hint_match.cmp(&self.hint_match))
            .then_with(|| self.delta.cmp(&other.delta))
            .then_with(|| self.visit.trip_id.cmp(&other.visit.trip_id))
            .then_with(|| self.service_date.cmp(&other.service_date))
    }
}

pub struct CandidateMatcher<'a> {
    schedule: &'a dyn ScheduleIndex,
    config: &'a Config,
}

impl<'a> CandidateMatcher<'a> {
    pub fn new(schedule: &'a dyn ScheduleIndex, config: &'a Config) -> Self {
        Self { schedule, config }
    }

    /// Service dates to search and the tap time expressed in each
    fn search_days(&self, tap: &TapEvent) -> SmallVec<[(NaiveDate, i64); 2]> {
        let day = service_date(tap.timestamp, self.config.new_day_hour());
        let mut days: SmallVec<[(NaiveDate, i64); 2]> =
            smallvec![(day, service_seconds(tap.timestamp, day))];
        let calendar_day = tap.timestamp.date();
        if calendar_day != day {
            days.push((calendar_day, service_seconds(tap.timestamp, calendar_day)));
        }
        days
    }

    pub fn match_tap(&self, tap: &TapEvent) -> Result<TapMatch, ScheduleError> {
        if !self.schedule.has_stop(&tap.stop_id) {
            return Ok(TapMatch::Unmatched { reason: UnmatchedReason::UnknownStop });
        }

        let early = self.config.match_time_tolerance_early();
        let late = self.config.match_time_tolerance_late();
        let hint = tap.route_hint.as_ref();

        let days = self.search_days(tap);
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut routes: BTreeSet<RouteId> = BTreeSet::new();

        for &(date, tap_secs) in &days {
            let active = self.schedule.active_service(date);
            if active.is_empty() {
                continue;
            }
            routes.extend(self.schedule.routes_serving(&tap.stop_id, date)?);

            let window = TimeWindow::around(tap_secs, early, late);
            for visit in self.schedule.visits_near(&tap.stop_id, window)? {
                if !active.contains(&visit.trip_id) {
                    continue;
                }
                let delta = (i64::from(visit.departure) - tap_secs).abs();
                let hint_match = hint == Some(&visit.route_id);
                let bonus = if hint_match { i64::from(self.config.route_hint_bonus()) } else { 0 };
                candidates.push(Candidate {
                    visit,
                    service_date: date,
                    tap_secs,
                    delta,
                    score: delta - bonus,
                    hint_match,
                });
            }
        }

        // Nothing calls at this stop on any searched day
        if routes.is_empty() {
            return Ok(TapMatch::NoActiveService { date: days[0].0 });
        }

        let candidate_count = candidates.len();
        let Some(best) = candidates.into_iter().min_by(|a, b| a.rank(b)) else {
            return Ok(TapMatch::Unmatched { reason: UnmatchedReason::NoCandidateInWindow });
        };

        let span = f64::from(early) + f64::from(late);
        let mut confidence = (1.0 - best.score.max(0) as f64 / span).clamp(0.0, 1.0);
        let disambiguated = hint.is_some_and(|h| routes.contains(h));
        if !disambiguated && routes.len() > 1 {
            confidence = confidence.min(self.config.ambiguity_confidence_floor());
        }

        trace!(
            card_id = %tap.card_id,
            stop_id = %tap.stop_id,
            trip_id = %best.visit.trip_id,
            delta = best.delta,
            candidates = candidate_count,
            routes = routes.len(),
            confidence = confidence,
            "tap_matched"
        );

        let delay_secs = (best.tap_secs - i64::from(best.visit.departure)).max(0);
        Ok(TapMatch::Boarded {
            boarding: BoardingMatch {
                visit: best.visit,
                service_date: best.service_date,
                delay_secs,
            },
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{StopId, TripId};
    use crate::services::test_support::{monday, network, tap, ts};

    fn boarded(result: TapMatch) -> (BoardingMatch, f64) {
        match result {
            TapMatch::Boarded { boarding, confidence } => (boarding, confidence),
            other => panic!("expected a boarding, got {:?}", other),
        }
    }

    #[test]
    fn test_matches_closest_departure() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        let (boarding, confidence) = boarded(matcher.match_tap(&tap("c1", "08:00:00", "S1")).unwrap());

        assert_eq!(boarding.visit.trip_id, TripId::from("T1"));
        assert_eq!(boarding.service_date, monday());
        assert_eq!(boarding.delay_secs, 0);
        // S1 is served by a single route: no ambiguity cap
        assert!((confidence - (1.0 - 60.0 / 720.0)).abs() < 1e-9);
    }

    #[test]
    fn test_late_tap_records_delay() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        let (boarding, _) = boarded(matcher.match_tap(&tap("c1", "08:02:30", "S1")).unwrap());

        assert_eq!(boarding.visit.trip_id, TripId::from("T1"));
        assert_eq!(boarding.delay_secs, 90);
    }

    #[test]
    fn test_ambiguous_stop_caps_confidence() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        // S2 is served by several routes; T6 (R4) departs 08:12
        let (boarding, confidence) = boarded(matcher.match_tap(&tap("c1", "08:11:00", "S2")).unwrap());
        assert_eq!(boarding.visit.trip_id, TripId::from("T6"));
        assert_eq!(confidence, 0.5);

        let hinted = tap("c1", "08:11:00", "S2").with_route_hint("R4");
        let (_, confidence) = boarded(matcher.match_tap(&hinted).unwrap());
        assert!((confidence - (1.0 - 60.0 / 720.0)).abs() < 1e-9);

        // A hint for a route that does not serve the stop does not disambiguate
        let wrong = tap("c1", "08:11:00", "S2").with_route_hint("R2");
        let (_, confidence) = boarded(matcher.match_tap(&wrong).unwrap());
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn test_route_hint_bonus_changes_choice() {
        let tt = network();
        let hinted = tap("c1", "08:16:00", "S2").with_route_hint("R4");

        let config = Config::default();
        let (boarding, _) =
            boarded(CandidateMatcher::new(tt.as_ref(), &config).match_tap(&hinted).unwrap());
        assert_eq!(boarding.visit.trip_id, TripId::from("T1"));

        let config = Config::default().with_route_hint_bonus(200);
        let (boarding, _) =
            boarded(CandidateMatcher::new(tt.as_ref(), &config).match_tap(&hinted).unwrap());
        assert_eq!(boarding.visit.trip_id, TripId::from("T7"));
    }

    #[test]
    fn test_unknown_stop() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        assert_eq!(
            matcher.match_tap(&tap("c1", "08:00:00", "S99")).unwrap(),
            TapMatch::Unmatched { reason: UnmatchedReason::UnknownStop }
        );
    }

    #[test]
    fn test_no_candidate_in_window() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        assert_eq!(
            matcher.match_tap(&tap("c1", "10:00:00", "S1")).unwrap(),
            TapMatch::Unmatched { reason: UnmatchedReason::NoCandidateInWindow }
        );
    }

    #[test]
    fn test_no_active_service_on_sunday() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);
        let sunday = crate::domain::types::TapEvent::new("c1", ts("2019-10-06 08:00:00"), "S1");

        assert_eq!(
            matcher.match_tap(&sunday).unwrap(),
            TapMatch::NoActiveService { date: NaiveDate::from_ymd_opt(2019, 10, 6).unwrap() }
        );
    }

    #[test]
    fn test_no_active_service_at_stop_without_calls() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);

        // Monday runs the weekday service, but no trip calls at S8
        assert_eq!(
            matcher.match_tap(&tap("c1", "08:00:00", "S8")).unwrap(),
            TapMatch::NoActiveService { date: monday() }
        );
    }

    #[test]
    fn test_after_midnight_tap_uses_previous_service_day() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);
        let night = crate::domain::types::TapEvent::new("c1", ts("2019-10-08 00:31:00"), "S4");

        let (boarding, _) = boarded(matcher.match_tap(&night).unwrap());
        assert_eq!(boarding.visit.trip_id, TripId::from("N1"));
        assert_eq!(boarding.service_date, monday());
        assert_eq!(boarding.delay_secs, 60);
    }

    #[test]
    fn test_after_midnight_tap_also_searches_calendar_day() {
        let tt = network();
        let config = Config::default();
        let matcher = CandidateMatcher::new(tt.as_ref(), &config);
        let early = crate::domain::types::TapEvent::new("c1", ts("2019-10-08 00:21:00"), "S4");

        let (boarding, _) = boarded(matcher.match_tap(&early).unwrap());
        assert_eq!(boarding.visit.trip_id, TripId::from("E1"));
        assert_eq!(boarding.service_date, NaiveDate::from_ymd_opt(2019, 10, 8).unwrap());
        assert_eq!(boarding.visit.stop_id, StopId::from("S4"));
    }

    #[test]
    fn test_narrower_late_tolerance_never_raises_confidence() {
        let tt = network();
        let wide = Config::default();
        let narrow = Config::default().with_match_time_tolerance_late(200);

        for (hms, stop) in [("08:00:00", "S1"), ("08:02:30", "S1"), ("08:11:00", "S2"), ("08:16:00", "S2")] {
            let t = tap("c1", hms, stop);
            let conf = |config: &Config| match CandidateMatcher::new(tt.as_ref(), config)
                .match_tap(&t)
                .unwrap()
            {
                TapMatch::Boarded { confidence, .. } => confidence,
                _ => 0.0,
            };
            assert!(conf(&narrow) <= conf(&wide), "tap {hms} at {stop}");
        }
    }
}
