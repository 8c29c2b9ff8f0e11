//! Aggregated origin-destination matrix

use crate::domain::journey::Journey;
use crate::domain::types::StopId;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OdCell {
    pub count: u64,
    /// Sum of journey confidences
    pub weight: f64,
}

/// Journey counts keyed by (origin, destination), ordered for stable output
#[derive(Debug, Clone, Default)]
pub struct OdMatrix {
    cells: BTreeMap<(StopId, StopId), OdCell>,
    unknown_destination: u64,
}

#[derive(Serialize)]
struct OdRow<'a> {
    origin: &'a StopId,
    destination: &'a StopId,
    count: u64,
    weight: f64,
}

impl OdMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_journeys<'a>(journeys: impl IntoIterator<Item = &'a Journey>) -> Self {
        let mut matrix = Self::new();
        for journey in journeys {
            matrix.add(journey);
        }
        matrix
    }

    /// Count one journey; unknown destinations are only tallied
    pub fn add(&mut self, journey: &Journey) {
        match &journey.destination {
            Some(dest) => {
                let cell = self.cells.entry((journey.origin.clone(), dest.clone())).or_default();
                cell.count += 1;
                cell.weight += journey.confidence;
            }
            None => self.unknown_destination += 1,
        }
    }

    pub fn get(&self, origin: &StopId, destination: &StopId) -> Option<&OdCell> {
        self.cells.get(&(origin.clone(), destination.clone()))
    }

    /// Number of non-empty OD pairs
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total_journeys(&self) -> u64 {
        self.cells.values().map(|c| c.count).sum()
    }

    pub fn unknown_destination(&self) -> u64 {
        self.unknown_destination
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        let rows: Vec<OdRow<'_>> = self
            .cells
            .iter()
            .map(|((origin, destination), cell)| OdRow {
                origin,
                destination,
                count: cell.count,
                weight: cell.weight,
            })
            .collect();
        serde_json::json!({
            "pairs": rows,
            "total_journeys": self.total_journeys(),
            "unknown_destination": self.unknown_destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::leg::{AlightingSource, BoardingMatch, Leg};
    use crate::domain::schedule::ScheduledVisit;
    use crate::domain::types::{CardId, RouteId, TapEvent, TripId};
    use chrono::NaiveDate;

    fn journey(card: &str, from: &str, to: Option<&str>, confidence: f64) -> Journey {
        let date = NaiveDate::from_ymd_opt(2019, 10, 7).unwrap();
        let tap = TapEvent::new(card, date.and_hms_opt(8, 0, 0).unwrap(), from);
        let visit = |stop: &str, seq: u32| ScheduledVisit {
            trip_id: TripId::from("T1"),
            route_id: RouteId::from("R1"),
            stop_id: StopId::from(stop),
            sequence: seq,
            arrival: 8 * 3600 + seq * 300,
            departure: 8 * 3600 + seq * 300,
        };
        let boarding = BoardingMatch { visit: visit(from, 0), service_date: date, delay_secs: 0 };
        let mut leg = Leg::matched(&tap, date, boarding, confidence);
        if let Some(to) = to {
            leg = leg.resolved(&visit(to, 3), AlightingSource::Chained, confidence);
        }
        Journey::new(CardId::from(card), date, 0, vec![leg], &[], 0.2).unwrap()
    }

    #[test]
    fn test_matrix_aggregates_pairs() {
        let journeys = vec![
            journey("c1", "S1", Some("S3"), 0.9),
            journey("c2", "S1", Some("S3"), 0.5),
            journey("c3", "S3", Some("S1"), 0.8),
            journey("c4", "S2", None, 0.9),
        ];
        let matrix = OdMatrix::from_journeys(&journeys);

        let cell = matrix.get(&StopId::from("S1"), &StopId::from("S3")).unwrap();
        assert_eq!(cell.count, 2);
        assert!((cell.weight - 1.4).abs() < 1e-9);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.total_journeys(), 3);
        assert_eq!(matrix.unknown_destination(), 1);
    }

    #[test]
    fn test_matrix_json_is_ordered() {
        let journeys = vec![journey("c1", "S3", Some("S1"), 0.9), journey("c2", "S1", Some("S3"), 0.9)];
        let value = OdMatrix::from_journeys(&journeys).to_json_value();

        let pairs = value["pairs"].as_array().unwrap();
        assert_eq!(pairs[0]["origin"], "S1");
        assert_eq!(pairs[1]["origin"], "S3");
        assert_eq!(value["unknown_destination"], 0);
    }
}
