//! Shared identifier and input types

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Smart-card identifier
    CardId
);
string_id!(
    /// Stop identifier as used by the schedule
    StopId
);
string_id!(
    /// Scheduled trip identifier
    TripId
);
string_id!(
    /// Route identifier
    RouteId
);

/// One normalized AFC tap (boarding) record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapEvent {
    pub card_id: CardId,
    /// Local wall-clock time of the tap
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub stop_id: StopId,
    /// Route reported by the validator, when the AFC system knows it
    #[serde(default, alias = "route_id")]
    pub route_hint: Option<RouteId>,
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

impl TapEvent {
    pub fn new(card_id: &str, timestamp: NaiveDateTime, stop_id: &str) -> Self {
        Self {
            card_id: CardId::from(card_id),
            timestamp,
            stop_id: StopId::from(stop_id),
            route_hint: None,
            vehicle_id: None,
        }
    }

    pub fn with_route_hint(mut self, route: &str) -> Self {
        self.route_hint = Some(RouteId::from(route));
        self
    }

    pub fn with_vehicle(mut self, vehicle: &str) -> Self {
        self.vehicle_id = Some(vehicle.to_string());
        self
    }
}

/// Accepts ISO 8601 (`T` separator) and the space-separated form AFC exports use
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(serde::de::Error::custom)
}

/// Service date a timestamp belongs to.
///
/// Anything before `new_day_hour` still belongs to the previous day's service,
/// the way late-night trips do in a GTFS feed.
pub fn service_date(ts: NaiveDateTime, new_day_hour: u32) -> NaiveDate {
    let date = ts.date();
    if ts.time().hour() < new_day_hour {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Seconds elapsed since midnight of `date` (may exceed 24h)
pub fn service_seconds(ts: NaiveDateTime, date: NaiveDate) -> i64 {
    (ts - date.and_time(NaiveTime::MIN)).num_seconds()
}

/// Wall-clock instant for a schedule time expressed in seconds since midnight of `date`
pub fn service_instant(date: NaiveDate, seconds: i64) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::seconds(seconds)
}
