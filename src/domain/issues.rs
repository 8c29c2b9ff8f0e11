//! Recoverable inference issues and per-card failures
//!
//! Nothing here aborts a batch. `Issue`s are recovered locally (an unmatched
//! leg, a penalized fallback, a collapsed tap) and kept for auditing.
//! `CardError` stops one card's processing while the other cards continue.

use crate::domain::schedule::ScheduleError;
use crate::domain::types::{CardId, StopId, TripId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// Boarding stop is not part of the schedule
    UnknownStop,
    /// No active visit departs inside the tolerance window
    NoCandidateInWindow,
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::UnknownStop => f.write_str("unknown stop"),
            UnmatchedReason::NoCandidateInWindow => f.write_str("no candidate in window"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// NoActiveServiceError: the tap's service date has no running trips
    #[error("no active service on {date} for tap at {stop_id} ({timestamp})")]
    NoActiveService {
        card_id: CardId,
        stop_id: StopId,
        timestamp: NaiveDateTime,
        date: NaiveDate,
    },
    /// UnmatchedTapWarning
    #[error("tap at {stop_id} ({timestamp}) unmatched: {reason}")]
    UnmatchedTap {
        card_id: CardId,
        stop_id: StopId,
        timestamp: NaiveDateTime,
        reason: UnmatchedReason,
    },
    /// AlightingUnresolvedWarning
    #[error("alighting on trip {trip_id} from {stop_id} not chained, fallback {fallback:?}")]
    AlightingUnresolved {
        card_id: CardId,
        trip_id: TripId,
        stop_id: StopId,
        boarding_time: NaiveDateTime,
        fallback: Option<StopId>,
    },
    /// DuplicateTapWarning
    #[error("duplicate tap at {stop_id} ({timestamp}) collapsed into {kept_timestamp}")]
    DuplicateTap {
        card_id: CardId,
        stop_id: StopId,
        timestamp: NaiveDateTime,
        kept_timestamp: NaiveDateTime,
    },
}

impl Issue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Issue::NoActiveService { .. } => "no_active_service",
            Issue::UnmatchedTap { .. } => "unmatched_tap",
            Issue::AlightingUnresolved { .. } => "alighting_unresolved",
            Issue::DuplicateTap { .. } => "duplicate_tap",
        }
    }

    pub fn card_id(&self) -> &CardId {
        match self {
            Issue::NoActiveService { card_id, .. }
            | Issue::UnmatchedTap { card_id, .. }
            | Issue::AlightingUnresolved { card_id, .. }
            | Issue::DuplicateTap { card_id, .. } => card_id,
        }
    }
}

/// Audit flag attached to a leg in the OD-X output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegFlag {
    Unmatched,
    NoActiveService,
    UnknownStop,
    AlightingUnresolved,
}

#[derive(Debug, Error)]
pub enum CardError {
    /// ScheduleIndexUnavailableError: fatal for this card only
    #[error("schedule index unavailable for card {card_id}: {source}")]
    ScheduleIndexUnavailable {
        card_id: CardId,
        #[source]
        source: ScheduleError,
    },
}

impl CardError {
    pub fn schedule(card_id: &CardId, source: ScheduleError) -> Self {
        CardError::ScheduleIndexUnavailable { card_id: card_id.clone(), source }
    }

    pub fn card_id(&self) -> &CardId {
        match self {
            CardError::ScheduleIndexUnavailable { card_id, .. } => card_id,
        }
    }
}
