//! Journey data model: legs of one card grouped between two boundaries

use crate::domain::leg::{AlightingSource, Leg};
use crate::domain::types::{CardId, StopId, TripId};
use chrono::NaiveDate;
use smallvec::SmallVec;
use uuid::Uuid;

/// Name-based journey id, stable across runs and worker counts
pub fn journey_uuid(card_id: &CardId, service_date: NaiveDate, ordinal: u32) -> String {
    let name = format!("{}|{}|{}", card_id, service_date, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Complete inferred journey for one card
#[derive(Debug, Clone, PartialEq)]
pub struct Journey {
    pub jid: String,
    pub card_id: CardId,
    pub service_date: NaiveDate,
    /// Position of the journey within the card-day, from 0
    pub ordinal: u32,
    pub origin: StopId,
    pub destination: Option<StopId>,
    pub destination_source: AlightingSource,
    /// Alighting stops of every non-terminal leg
    pub interchanges: SmallVec<[StopId; 4]>,
    pub trip_ids: SmallVec<[TripId; 4]>,
    pub confidence: f64,
    pub legs: Vec<Leg>,
}

impl Journey {
    /// Build a journey from its legs and the classifier confidence of each link.
    ///
    /// Returns `None` for an empty leg list. Confidence is the weakest link
    /// among legs and interchanges, capped at `unknown_cap` when the
    /// destination could not be inferred.
    pub fn new(
        card_id: CardId,
        service_date: NaiveDate,
        ordinal: u32,
        legs: Vec<Leg>,
        link_confidences: &[f64],
        unknown_cap: f64,
    ) -> Option<Self> {
        let first = legs.first()?;
        let last = legs.last()?;

        let origin = first.boarding_stop.clone();
        let destination = last.alighting_stop.clone();
        let destination_source = last.alighting_source;

        let interchanges: SmallVec<[StopId; 4]> = legs[..legs.len() - 1]
            .iter()
            .filter_map(|leg| leg.alighting_stop.clone())
            .collect();
        let trip_ids: SmallVec<[TripId; 4]> =
            legs.iter().filter_map(|leg| leg.trip_id.clone()).collect();

        let mut confidence = legs
            .iter()
            .map(|leg| leg.confidence)
            .chain(link_confidences.iter().copied())
            .fold(1.0_f64, f64::min);
        if destination.is_none() {
            confidence = confidence.min(unknown_cap);
        }

        Some(Self {
            jid: journey_uuid(&card_id, service_date, ordinal),
            card_id,
            service_date,
            ordinal,
            origin,
            destination,
            destination_source,
            interchanges,
            trip_ids,
            confidence: confidence.clamp(0.0, 1.0),
            legs,
        })
    }

    pub fn is_multi_leg(&self) -> bool {
        self.legs.len() > 1
    }

    pub fn has_unknown_destination(&self) -> bool {
        self.destination.is_none()
    }

    /// OD-X record as a JSON value
    pub fn to_json_value(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();

        obj.insert("jid".to_string(), serde_json::Value::String(self.jid.clone()));
        obj.insert("card_id".to_string(), serde_json::Value::String(self.card_id.to_string()));
        obj.insert(
            "service_date".to_string(),
            serde_json::Value::String(self.service_date.to_string()),
        );
        obj.insert("origin".to_string(), serde_json::Value::String(self.origin.to_string()));
        match &self.destination {
            Some(dest) => {
                obj.insert("destination".to_string(), serde_json::Value::String(dest.to_string()))
            }
            None => obj.insert("destination".to_string(), serde_json::Value::Null),
        };
        let source = match self.destination_source {
            AlightingSource::Unresolved => "unknown",
            other => other.as_str(),
        };
        obj.insert("destination_source".to_string(), serde_json::Value::String(source.to_string()));
        obj.insert("interchanges".to_string(), serde_json::json!(self.interchanges.as_slice()));
        obj.insert("confidence".to_string(), serde_json::json!(self.confidence));
        obj.insert("trip_ids".to_string(), serde_json::json!(self.trip_ids.as_slice()));

        let legs: Vec<serde_json::Value> = self
            .legs
            .iter()
            .map(|leg| serde_json::to_value(leg).unwrap_or(serde_json::Value::Null))
            .collect();
        obj.insert("legs".to_string(), serde_json::Value::Array(legs));

        serde_json::Value::Object(obj)
    }

    /// Convert to a single-line JSON string
    pub fn to_json(&self) -> String {
        self.to_json_value().to_string()
    }
}
