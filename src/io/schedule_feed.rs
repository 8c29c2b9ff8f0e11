//! JSON schedule feed loader
//!
//! Flattened GTFS layout: stops, trips with their stop times, weekly
//! calendars and calendar date exceptions. Stop times use `HH:MM:SS` and
//! may run past 24:00 for trips that belong to the previous service day.

use crate::domain::geo::GeoPoint;
use crate::domain::types::{RouteId, StopId, TripId};
use crate::infra::timetable::{ServiceCalendar, StopTime, Timetable, TimetableBuilder};
use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct FeedStop {
    stop_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeedStopTime {
    stop_id: String,
    #[serde(default)]
    sequence: Option<u32>,
    arrival: String,
    /// Defaults to the arrival time
    #[serde(default)]
    departure: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedTrip {
    trip_id: String,
    route_id: String,
    service_id: String,
    stop_times: Vec<FeedStopTime>,
}

#[derive(Debug, Deserialize)]
struct FeedCalendar {
    service_id: String,
    #[serde(default)]
    monday: bool,
    #[serde(default)]
    tuesday: bool,
    #[serde(default)]
    wednesday: bool,
    #[serde(default)]
    thursday: bool,
    #[serde(default)]
    friday: bool,
    #[serde(default)]
    saturday: bool,
    #[serde(default)]
    sunday: bool,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// GTFS exception_type: 1 = service added, 2 = service removed
#[derive(Debug, Deserialize)]
struct FeedCalendarDate {
    service_id: String,
    date: NaiveDate,
    exception_type: u8,
}

#[derive(Debug, Deserialize)]
struct Feed {
    stops: Vec<FeedStop>,
    trips: Vec<FeedTrip>,
    #[serde(default)]
    calendars: Vec<FeedCalendar>,
    #[serde(default)]
    calendar_dates: Vec<FeedCalendarDate>,
}

/// Parse `HH:MM:SS` (or `HH:MM`) into seconds; hours may exceed 23
pub fn parse_time_to_secs(time_str: &str) -> Option<u32> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hours: u32 = parts[0].parse().ok()?;
    let mins: u32 = parts[1].parse().ok()?;
    let secs: u32 = match parts.get(2) {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if mins >= 60 || secs >= 60 {
        return None;
    }
    Some(hours * 3600 + mins * 60 + secs)
}

/// Read and index a schedule feed file
pub fn load_schedule<P: AsRef<Path>>(path: P) -> anyhow::Result<Timetable> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read schedule feed {}", path.display()))?;
    let timetable = parse_schedule(&content)
        .with_context(|| format!("Failed to load schedule feed {}", path.display()))?;

    info!(
        feed = %path.display(),
        stops = timetable.stop_count(),
        trips = timetable.trip_count(),
        service_days = timetable.service_days(),
        "schedule_loaded"
    );
    Ok(timetable)
}

pub fn parse_schedule(content: &str) -> anyhow::Result<Timetable> {
    let feed: Feed = serde_json::from_str(content).context("invalid schedule JSON")?;
    let mut builder = TimetableBuilder::new();

    for stop in feed.stops {
        let location = match (stop.lat, stop.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        };
        builder.add_stop(StopId::from(stop.stop_id), &stop.name, location);
    }

    for trip in feed.trips {
        let mut stop_times = Vec::with_capacity(trip.stop_times.len());
        for (i, st) in trip.stop_times.into_iter().enumerate() {
            let arrival = parse_time_to_secs(&st.arrival).ok_or_else(|| {
                anyhow!("trip {}: bad arrival time {:?}", trip.trip_id, st.arrival)
            })?;
            let departure = match &st.departure {
                Some(dep) => parse_time_to_secs(dep).ok_or_else(|| {
                    anyhow!("trip {}: bad departure time {:?}", trip.trip_id, dep)
                })?,
                None => arrival,
            };
            stop_times.push(StopTime {
                stop_id: StopId::from(st.stop_id),
                sequence: st.sequence.unwrap_or(i as u32 + 1),
                arrival,
                departure,
            });
        }
        builder.add_trip(
            TripId::from(trip.trip_id),
            RouteId::from(trip.route_id),
            &trip.service_id,
            stop_times,
        );
    }

    for cal in feed.calendars {
        builder.add_calendar(
            &cal.service_id,
            ServiceCalendar {
                weekdays: [
                    cal.monday,
                    cal.tuesday,
                    cal.wednesday,
                    cal.thursday,
                    cal.friday,
                    cal.saturday,
                    cal.sunday,
                ],
                start: cal.start_date,
                end: cal.end_date,
            },
        );
    }

    for exc in feed.calendar_dates {
        let added = match exc.exception_type {
            1 => true,
            2 => false,
            other => {
                return Err(anyhow!(
                    "service {} on {}: unknown exception_type {}",
                    exc.service_id,
                    exc.date,
                    other
                ))
            }
        };
        builder.add_exception(&exc.service_id, exc.date, added);
    }

    Ok(builder.build()?)
}
