//! In-memory schedule index
//!
//! Built once before inference through `TimetableBuilder`, then shared
//! read-only across workers. Departures per stop are kept sorted so a time
//! window lookup is a binary search plus a short scan.

use crate::domain::geo::GeoPoint;
use crate::domain::schedule::{
    ActiveTrips, ScheduleError, ScheduleIndex, ScheduledVisit, TimeWindow,
};
use crate::domain::types::{RouteId, StopId, TripId};
use chrono::{Datelike, NaiveDate};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StopInfo {
    pub name: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone)]
struct TripInfo {
    service_id: String,
    visits: Vec<ScheduledVisit>,
}

/// Weekly service pattern valid between two dates (inclusive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCalendar {
    /// Monday first
    pub weekdays: [bool; 7],
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ServiceCalendar {
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        date >= self.start
            && date <= self.end
            && self.weekdays[date.weekday().num_days_from_monday() as usize]
    }
}

/// One stop time as read from a feed, before sequencing
#[derive(Debug, Clone)]
pub struct StopTime {
    pub stop_id: StopId,
    pub sequence: u32,
    pub arrival: u32,
    pub departure: u32,
}

#[derive(Debug, Default)]
pub struct TimetableBuilder {
    stops: FxHashMap<StopId, StopInfo>,
    trips: FxHashMap<TripId, (RouteId, String, Vec<StopTime>)>,
    calendars: FxHashMap<String, ServiceCalendar>,
    /// (service, date) -> added (true) or removed (false)
    exceptions: BTreeMap<(String, NaiveDate), bool>,
}

impl TimetableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(mut self, id: &str, name: &str, location: Option<GeoPoint>) -> Self {
        self.add_stop(StopId::from(id), name, location);
        self
    }

    pub fn add_stop(&mut self, id: StopId, name: &str, location: Option<GeoPoint>) {
        self.stops.insert(id, StopInfo { name: name.to_string(), location });
    }

    pub fn add_trip(
        &mut self,
        trip_id: TripId,
        route_id: RouteId,
        service_id: &str,
        stop_times: Vec<StopTime>,
    ) {
        self.trips.insert(trip_id, (route_id, service_id.to_string(), stop_times));
    }

    /// Trip with stop times given in order as (stop, arrival, departure)
    pub fn trip(
        mut self,
        trip_id: &str,
        route_id: &str,
        service_id: &str,
        times: &[(&str, u32, u32)],
    ) -> Self {
        let stop_times = times
            .iter()
            .enumerate()
            .map(|(i, (stop, arrival, departure))| StopTime {
                stop_id: StopId::from(*stop),
                sequence: i as u32 + 1,
                arrival: *arrival,
                departure: *departure,
            })
            .collect();
        self.add_trip(TripId::from(trip_id), RouteId::from(route_id), service_id, stop_times);
        self
    }

    pub fn add_calendar(&mut self, service_id: &str, calendar: ServiceCalendar) {
        self.calendars.insert(service_id.to_string(), calendar);
    }

    pub fn calendar(mut self, service_id: &str, calendar: ServiceCalendar) -> Self {
        self.add_calendar(service_id, calendar);
        self
    }

    pub fn add_exception(&mut self, service_id: &str, date: NaiveDate, added: bool) {
        self.exceptions.insert((service_id.to_string(), date), added);
    }

    pub fn exception(mut self, service_id: &str, date: NaiveDate, added: bool) -> Self {
        self.add_exception(service_id, date, added);
        self
    }

    /// Validate and index everything added so far
    pub fn build(self) -> Result<Timetable, ScheduleError> {
        let mut trips: FxHashMap<TripId, TripInfo> = FxHashMap::default();
        let mut departures_by_stop: FxHashMap<StopId, Vec<ScheduledVisit>> = FxHashMap::default();

        for (trip_id, (route_id, service_id, mut stop_times)) in self.trips {
            if stop_times.is_empty() {
                debug!(trip_id = %trip_id, "trip_without_stop_times_skipped");
                continue;
            }
            stop_times.sort_by_key(|st| st.sequence);

            let mut visits = Vec::with_capacity(stop_times.len());
            let mut last_departure = 0u32;
            for st in stop_times {
                if !self.stops.contains_key(&st.stop_id) {
                    return Err(ScheduleError::Malformed(format!(
                        "trip {} references unknown stop {}",
                        trip_id, st.stop_id
                    )));
                }
                if st.arrival > st.departure || st.arrival < last_departure {
                    return Err(ScheduleError::Malformed(format!(
                        "trip {} goes back in time at stop {} (sequence {})",
                        trip_id, st.stop_id, st.sequence
                    )));
                }
                last_departure = st.departure;
                visits.push(ScheduledVisit {
                    trip_id: trip_id.clone(),
                    route_id: route_id.clone(),
                    stop_id: st.stop_id,
                    sequence: st.sequence,
                    arrival: st.arrival,
                    departure: st.departure,
                });
            }

            for visit in &visits {
                departures_by_stop.entry(visit.stop_id.clone()).or_default().push(visit.clone());
            }
            trips.insert(trip_id, TripInfo { service_id, visits });
        }

        for visits in departures_by_stop.values_mut() {
            visits.sort_by(|a, b| {
                a.departure
                    .cmp(&b.departure)
                    .then_with(|| a.trip_id.cmp(&b.trip_id))
                    .then_with(|| a.sequence.cmp(&b.sequence))
            });
        }

        let active_by_date = expand_calendars(&trips, &self.calendars, &self.exceptions);

        Ok(Timetable {
            stops: self.stops,
            trips,
            departures_by_stop,
            active_by_date,
            no_service: Arc::new(FxHashSet::default()),
        })
    }
}

/// Per-date sets of running trips from weekly calendars plus exceptions
fn expand_calendars(
    trips: &FxHashMap<TripId, TripInfo>,
    calendars: &FxHashMap<String, ServiceCalendar>,
    exceptions: &BTreeMap<(String, NaiveDate), bool>,
) -> BTreeMap<NaiveDate, ActiveTrips> {
    let mut services_by_date: BTreeMap<NaiveDate, FxHashSet<&str>> = BTreeMap::new();

    for (service_id, calendar) in calendars {
        let mut date = calendar.start;
        while date <= calendar.end {
            if calendar.runs_on(date) {
                services_by_date.entry(date).or_default().insert(service_id.as_str());
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
    }
    for ((service_id, date), added) in exceptions {
        let services = services_by_date.entry(*date).or_default();
        if *added {
            services.insert(service_id.as_str());
        } else {
            services.remove(service_id.as_str());
        }
    }

    let mut trips_by_service: FxHashMap<&str, Vec<&TripId>> = FxHashMap::default();
    for (trip_id, info) in trips {
        trips_by_service.entry(info.service_id.as_str()).or_default().push(trip_id);
    }

    services_by_date
        .into_iter()
        .map(|(date, services)| {
            let active: FxHashSet<TripId> = services
                .iter()
                .filter_map(|s| trips_by_service.get(s))
                .flatten()
                .map(|t| (*t).clone())
                .collect();
            (date, Arc::new(active))
        })
        .collect()
}

#[derive(Debug)]
pub struct Timetable {
    stops: FxHashMap<StopId, StopInfo>,
    trips: FxHashMap<TripId, TripInfo>,
    departures_by_stop: FxHashMap<StopId, Vec<ScheduledVisit>>,
    active_by_date: BTreeMap<NaiveDate, ActiveTrips>,
    no_service: ActiveTrips,
}

impl Timetable {
    pub fn builder() -> TimetableBuilder {
        TimetableBuilder::new()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    /// Number of service dates with at least one running trip
    pub fn service_days(&self) -> usize {
        self.active_by_date.values().filter(|t| !t.is_empty()).count()
    }

    pub fn stop_info(&self, stop: &StopId) -> Option<&StopInfo> {
        self.stops.get(stop)
    }
}

impl ScheduleIndex for Timetable {
    fn has_stop(&self, stop: &StopId) -> bool {
        self.stops.contains_key(stop)
    }

    fn visits_near(
        &self,
        stop: &StopId,
        window: TimeWindow,
    ) -> Result<Vec<ScheduledVisit>, ScheduleError> {
        let Some(departures) = self.departures_by_stop.get(stop) else {
            return Ok(Vec::new());
        };
        let start = departures.partition_point(|v| v.departure < window.start);
        Ok(departures[start..]
            .iter()
            .take_while(|v| v.departure <= window.end)
            .cloned()
            .collect())
    }

    fn stop_sequence_position(&self, trip: &TripId, stop: &StopId) -> Option<u32> {
        self.trips
            .get(trip)?
            .visits
            .iter()
            .find(|v| &v.stop_id == stop)
            .map(|v| v.sequence)
    }

    fn terminal_stop(&self, trip: &TripId) -> Result<StopId, ScheduleError> {
        self.trip_visits(trip)?
            .last()
            .map(|v| v.stop_id.clone())
            .ok_or_else(|| ScheduleError::EmptyTrip(trip.clone()))
    }

    fn active_service(&self, date: NaiveDate) -> ActiveTrips {
        self.active_by_date.get(&date).cloned().unwrap_or_else(|| self.no_service.clone())
    }

    fn trip_visits(&self, trip: &TripId) -> Result<&[ScheduledVisit], ScheduleError> {
        let info = self.trips.get(trip).ok_or_else(|| ScheduleError::UnknownTrip(trip.clone()))?;
        if info.visits.is_empty() {
            return Err(ScheduleError::EmptyTrip(trip.clone()));
        }
        Ok(&info.visits)
    }

    fn stop_location(&self, stop: &StopId) -> Option<GeoPoint> {
        self.stops.get(stop).and_then(|s| s.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 10, day).unwrap()
    }

    fn weekdays_only() -> ServiceCalendar {
        ServiceCalendar {
            weekdays: [true, true, true, true, true, false, false],
            start: d(1),
            end: d(31),
        }
    }

    fn timetable() -> Timetable {
        Timetable::builder()
            .stop("S1", "Alameda", Some(GeoPoint::new(38.7370, -9.1330)))
            .stop("S2", "Arroios", Some(GeoPoint::new(38.7330, -9.1340)))
            .stop("S3", "Anjos", Some(GeoPoint::new(38.7260, -9.1350)))
            .trip("T1", "R1", "WK", &[("S1", 28860, 28860), ("S2", 29400, 29430), ("S3", 29880, 29880)])
            .trip("T2", "R1", "WK", &[("S1", 30660, 30660), ("S2", 31200, 31230), ("S3", 31680, 31680)])
            .trip("T9", "R2", "SAT", &[("S3", 28800, 28800), ("S1", 29700, 29700)])
            .calendar("WK", weekdays_only())
            .exception("WK", d(7), false)
            .exception("SAT", d(7), true)
            .build()
            .unwrap()
    }

    #[test]
    fn test_visits_near_window() {
        let tt = timetable();
        let visits = tt
            .visits_near(&StopId::from("S1"), TimeWindow { start: 28800, end: 29000 })
            .unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].trip_id, TripId::from("T1"));

        let wide = tt
            .visits_near(&StopId::from("S1"), TimeWindow { start: 0, end: 40000 })
            .unwrap();
        let trips: Vec<&str> = wide.iter().map(|v| v.trip_id.as_str()).collect();
        assert_eq!(trips, vec!["T1", "T9", "T2"]);
    }

    #[test]
    fn test_unknown_stop_has_no_visits() {
        let tt = timetable();
        assert!(!tt.has_stop(&StopId::from("S9")));
        assert!(tt
            .visits_near(&StopId::from("S9"), TimeWindow { start: 0, end: 90000 })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_trip_lookups() {
        let tt = timetable();
        let t1 = TripId::from("T1");
        assert_eq!(tt.stop_sequence_position(&t1, &StopId::from("S2")), Some(2));
        assert_eq!(tt.terminal_stop(&t1).unwrap(), StopId::from("S3"));
        assert_eq!(tt.trip_visits(&t1).unwrap().len(), 3);
        assert!(matches!(
            tt.terminal_stop(&TripId::from("nope")),
            Err(ScheduleError::UnknownTrip(_))
        ));
    }

    #[test]
    fn test_calendar_expansion_with_exceptions() {
        let tt = timetable();

        // Tuesday 2019-10-08 runs the weekday service only
        let tue = tt.active_service(d(8));
        assert!(tue.contains(&TripId::from("T1")));
        assert!(!tue.contains(&TripId::from("T9")));

        // Monday 2019-10-07 swapped to the Saturday service
        let swapped = tt.active_service(d(7));
        assert!(!swapped.contains(&TripId::from("T1")));
        assert!(swapped.contains(&TripId::from("T9")));

        // Sunday: nothing
        assert!(tt.active_service(d(6)).is_empty());
        assert!(tt.active_service(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()).is_empty());
    }

    #[test]
    fn test_distance_between_stops() {
        let tt = timetable();
        let d12 = tt.distance_m(&StopId::from("S1"), &StopId::from("S2")).unwrap();
        assert!(d12 > 400.0 && d12 < 500.0, "got {d12}");
        assert_eq!(tt.distance_m(&StopId::from("S1"), &StopId::from("S1")), Some(0.0));
    }

    #[test]
    fn test_build_rejects_time_travel() {
        let result = Timetable::builder()
            .stop("S1", "A", None)
            .stop("S2", "B", None)
            .trip("T1", "R1", "WK", &[("S1", 100, 200), ("S2", 150, 150)])
            .build();
        assert!(matches!(result, Err(ScheduleError::Malformed(_))));
    }

    #[test]
    fn test_build_rejects_unknown_stop() {
        let result = Timetable::builder()
            .stop("S1", "A", None)
            .trip("T1", "R1", "WK", &[("S1", 100, 100), ("S2", 150, 150)])
            .build();
        assert!(matches!(result, Err(ScheduleError::Malformed(_))));
    }
}
