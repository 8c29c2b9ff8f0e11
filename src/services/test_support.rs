//! Shared schedule and tap fixtures for service tests

use crate::domain::types::TapEvent;
use crate::infra::timetable::Timetable;
use crate::io::schedule_feed::parse_schedule;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

/// Small weekday network, see `tests/fixtures/network.json`
pub(crate) fn network() -> Arc<Timetable> {
    Arc::new(parse_schedule(include_str!("../../tests/fixtures/network.json")).unwrap())
}

/// Monday 2019-10-07, a regular service day
pub(crate) fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 10, 7).unwrap()
}

pub(crate) fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Tap on Monday at `hms`
pub(crate) fn tap(card: &str, hms: &str, stop: &str) -> TapEvent {
    TapEvent::new(card, ts(&format!("2019-10-07 {}", hms)), stop)
}
