//! Leg: one inferred vehicle ride

use crate::domain::issues::LegFlag;
use crate::domain::schedule::ScheduledVisit;
use crate::domain::types::{service_instant, CardId, RouteId, StopId, TapEvent, TripId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use smallvec::SmallVec;

/// How a leg's alighting stop was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlightingSource {
    Unresolved,
    /// Trip-chaining against the next tap of the same day
    Chained,
    /// Chaining failed, trip terminal used instead
    TerminalFallback,
    /// Anchored on the next journey's boarding
    NextJourney,
    /// Anchored on the first boarding of the service day
    ReturnToOrigin,
}

impl AlightingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlightingSource::Unresolved => "unresolved",
            AlightingSource::Chained => "chained",
            AlightingSource::TerminalFallback => "terminal_fallback",
            AlightingSource::NextJourney => "next_journey",
            AlightingSource::ReturnToOrigin => "return_to_origin",
        }
    }
}

/// Schedule anchor of a matched boarding
#[derive(Debug, Clone, PartialEq)]
pub struct BoardingMatch {
    pub visit: ScheduledVisit,
    /// Service date the visit's times are relative to
    pub service_date: NaiveDate,
    /// Seconds the tap came after the scheduled departure, 0 if it came before
    pub delay_secs: i64,
}

impl BoardingMatch {
    /// Expected wall-clock arrival at `visit` for a rider on this boarding
    pub fn arrival_at(&self, visit: &ScheduledVisit) -> NaiveDateTime {
        service_instant(self.service_date, i64::from(visit.arrival) + self.delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leg {
    pub card_id: CardId,
    /// Service date of the card-day this leg belongs to
    pub service_date: NaiveDate,
    pub trip_id: Option<TripId>,
    pub route_id: Option<RouteId>,
    pub boarding_stop: StopId,
    pub boarding_time: NaiveDateTime,
    pub alighting_stop: Option<StopId>,
    pub alighting_time: Option<NaiveDateTime>,
    pub match_confidence: f64,
    pub confidence: f64,
    pub alighting_source: AlightingSource,
    #[serde(skip_serializing_if = "SmallVec::is_empty")]
    pub flags: SmallVec<[LegFlag; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(skip)]
    boarding: Option<BoardingMatch>,
}

impl Leg {
    /// Leg for a tap that could not be placed on any trip
    pub fn unmatched(tap: &TapEvent, service_date: NaiveDate, flags: &[LegFlag]) -> Self {
        let mut all_flags: SmallVec<[LegFlag; 2]> = SmallVec::new();
        all_flags.push(LegFlag::Unmatched);
        all_flags.extend(flags.iter().copied().filter(|f| *f != LegFlag::Unmatched));
        Self {
            card_id: tap.card_id.clone(),
            service_date,
            trip_id: None,
            route_id: None,
            boarding_stop: tap.stop_id.clone(),
            boarding_time: tap.timestamp,
            alighting_stop: None,
            alighting_time: None,
            match_confidence: 0.0,
            confidence: 0.0,
            alighting_source: AlightingSource::Unresolved,
            flags: all_flags,
            vehicle_id: tap.vehicle_id.clone(),
            boarding: None,
        }
    }

    /// Leg boarded on a scheduled trip, alighting still unknown
    pub fn matched(
        tap: &TapEvent,
        service_date: NaiveDate,
        boarding: BoardingMatch,
        confidence: f64,
    ) -> Self {
        Self {
            card_id: tap.card_id.clone(),
            service_date,
            trip_id: Some(boarding.visit.trip_id.clone()),
            route_id: Some(boarding.visit.route_id.clone()),
            boarding_stop: tap.stop_id.clone(),
            boarding_time: tap.timestamp,
            alighting_stop: None,
            alighting_time: None,
            match_confidence: confidence,
            confidence,
            alighting_source: AlightingSource::Unresolved,
            flags: SmallVec::new(),
            vehicle_id: tap.vehicle_id.clone(),
            boarding: Some(boarding),
        }
    }

    #[inline]
    pub fn is_matched(&self) -> bool {
        self.trip_id.is_some()
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.alighting_stop.is_some()
    }

    pub fn boarding_match(&self) -> Option<&BoardingMatch> {
        self.boarding.as_ref()
    }

    pub fn has_flag(&self, flag: LegFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// New leg with the alighting fields filled from `visit`
    pub fn resolved(
        self,
        visit: &ScheduledVisit,
        source: AlightingSource,
        confidence: f64,
    ) -> Self {
        let alighting_time = match &self.boarding {
            Some(b) => b.arrival_at(visit).max(self.boarding_time),
            None => self.boarding_time,
        };
        Self {
            alighting_stop: Some(visit.stop_id.clone()),
            alighting_time: Some(alighting_time),
            alighting_source: source,
            confidence: confidence.clamp(0.0, 1.0),
            ..self
        }
    }

    pub fn with_flag(mut self, flag: LegFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(stop: &str, seq: u32, arrival: u32, departure: u32) -> ScheduledVisit {
        ScheduledVisit {
            trip_id: TripId::from("T1"),
            route_id: RouteId::from("R1"),
            stop_id: StopId::from(stop),
            sequence: seq,
            arrival,
            departure,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 10, 7).unwrap()
    }

    #[test]
    fn test_unmatched_leg() {
        let tap = TapEvent::new("c1", date().and_hms_opt(8, 0, 0).unwrap(), "S1");
        let leg = Leg::unmatched(&tap, date(), &[LegFlag::NoActiveService]);

        assert!(!leg.is_matched());
        assert!(!leg.is_resolved());
        assert_eq!(leg.confidence, 0.0);
        assert_eq!(leg.flags.as_slice(), &[LegFlag::Unmatched, LegFlag::NoActiveService]);
        assert_eq!(leg.boarding_stop, StopId::from("S1"));
    }

    #[test]
    fn test_resolved_applies_boarding_delay() {
        // Tap two minutes after the scheduled 08:01 departure
        let tap = TapEvent::new("c1", date().and_hms_opt(8, 3, 0).unwrap(), "S1");
        let boarding = BoardingMatch {
            visit: visit("S1", 1, 8 * 3600 + 60, 8 * 3600 + 60),
            service_date: date(),
            delay_secs: 120,
        };
        let leg = Leg::matched(&tap, date(), boarding, 0.9);

        let resolved = leg.resolved(&visit("S2", 2, 8 * 3600 + 18 * 60, 8 * 3600 + 18 * 60), AlightingSource::Chained, 0.9);

        assert_eq!(resolved.alighting_stop, Some(StopId::from("S2")));
        assert_eq!(resolved.alighting_time, Some(date().and_hms_opt(8, 20, 0).unwrap()));
        assert_eq!(resolved.alighting_source, AlightingSource::Chained);
        assert!(resolved.alighting_time.unwrap() >= resolved.boarding_time);
    }

    #[test]
    fn test_flag_not_duplicated() {
        let tap = TapEvent::new("c1", date().and_hms_opt(8, 0, 0).unwrap(), "S1");
        let leg = Leg::unmatched(&tap, date(), &[]).with_flag(LegFlag::Unmatched);
        assert_eq!(leg.flags.len(), 1);
    }
}
