//! Batch inference over a tap stream
//!
//! The engine groups taps per card and fans the cards out over a rayon
//! pool. Each card runs the full pipeline on its own:
//! - duplicate collapse and service-day grouping
//! - boarding match and trip-chaining (`LegBuilder`)
//! - interchange classification and destination inference (`JourneyAssembler`)
//!
//! Cards share nothing but the read-only schedule and the metrics counters.
//! A card whose schedule lookups fail is reported and skipped.


use crate::domain::issues::{CardError, Issue};
use crate::domain::journey::Journey;
use crate::domain::leg::AlightingSource;
use crate::domain::od_matrix::OdMatrix;
use crate::domain::schedule::ScheduleIndex;
use crate::domain::types::{service_date, CardId, TapEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::assembler::JourneyAssembler;
use crate::services::leg_builder::{collapse_duplicates, LegBuilder};
use anyhow::Context;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coarse stop flag checked between cards
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything inferred for one card
#[derive(Debug, Default)]
pub struct CardOutcome {
    pub journeys: Vec<Journey>,
    pub issues: Vec<Issue>,
    pub legs: usize,
    pub duplicates: usize,
}

enum CardResult {
    Done(CardOutcome),
    Failed(CardError),
    Cancelled,
}

/// Result of one batch run, in card order
#[derive(Debug, Default)]
pub struct BatchOutput {
    pub journeys: Vec<Journey>,
    pub matrix: OdMatrix,
    pub issues: Vec<Issue>,
    pub failed: Vec<CardError>,
    /// Cards skipped after cancellation
    pub cancelled: usize,
}

impl BatchOutput {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled == 0
    }
}

pub struct OdxEngine {
    schedule: Arc<dyn ScheduleIndex>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl OdxEngine {
    pub fn new(schedule: Arc<dyn ScheduleIndex>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self { schedule, config, metrics }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Taps per card, each card's taps ordered by time.
    ///
    /// The sort is stable, so taps with equal timestamps keep input order.
    pub fn group_taps(taps: Vec<TapEvent>) -> BTreeMap<CardId, Vec<TapEvent>> {
        let mut cards: BTreeMap<CardId, Vec<TapEvent>> = BTreeMap::new();
        for tap in taps {
            cards.entry(tap.card_id.clone()).or_default().push(tap);
        }
        for taps in cards.values_mut() {
            taps.sort_by_key(|t| t.timestamp);
        }
        cards
    }

    /// Run the whole pipeline for one card's time-ordered taps
    pub fn process_card(
        &self,
        card_id: &CardId,
        taps: Vec<TapEvent>,
    ) -> Result<CardOutcome, CardError> {
        let start = Instant::now();
        for _ in &taps {
            self.metrics.record_tap();
        }

        let (taps, mut issues) = collapse_duplicates(taps, self.config.duplicate_tap_window());
        let duplicates = issues.len();
        for _ in 0..duplicates {
            self.metrics.record_duplicate_tap();
        }

        let mut days: BTreeMap<NaiveDate, Vec<TapEvent>> = BTreeMap::new();
        for tap in taps {
            days.entry(service_date(tap.timestamp, self.config.new_day_hour()))
                .or_default()
                .push(tap);
        }

        let builder = LegBuilder::new(self.schedule.as_ref(), &self.config);
        let mut day_legs = Vec::with_capacity(days.len());
        let mut legs = 0;
        for (date, taps) in &days {
            let built = builder
                .build_day(*date, taps, &mut issues)
                .map_err(|e| CardError::schedule(card_id, e))?;
            legs += built.len();
            day_legs.push((*date, built));
        }

        let journeys = JourneyAssembler::new(self.schedule.as_ref(), &self.config)
            .assemble(card_id, day_legs)
            .map_err(|e| CardError::schedule(card_id, e))?;

        self.record_outcome(&journeys, &issues);
        for issue in &issues {
            debug!(card_id = %card_id, kind = issue.as_str(), detail = %issue, "inference_issue");
        }
        self.metrics.record_card_processed(start.elapsed().as_micros() as u64);

        Ok(CardOutcome { journeys, issues, legs, duplicates })
    }

    fn record_outcome(&self, journeys: &[Journey], issues: &[Issue]) {
        for issue in issues {
            if let Issue::NoActiveService { .. } = issue {
                self.metrics.record_no_service_tap();
            }
        }
        for journey in journeys {
            self.metrics.record_journey();
            for _ in &journey.interchanges {
                self.metrics.record_interchange();
            }
            if journey.has_unknown_destination() {
                self.metrics.record_destination_unknown();
            }
            for leg in &journey.legs {
                if !leg.is_matched() {
                    self.metrics.record_leg_unmatched();
                    continue;
                }
                self.metrics.record_leg_matched();
                match leg.alighting_source {
                    AlightingSource::Chained => self.metrics.record_alighting_chained(),
                    AlightingSource::TerminalFallback => self.metrics.record_alighting_fallback(),
                    AlightingSource::NextJourney | AlightingSource::ReturnToOrigin => {
                        self.metrics.record_destination_inferred()
                    }
                    AlightingSource::Unresolved => self.metrics.record_alighting_unresolved(),
                }
            }
        }
    }

    /// Infer journeys for every card in `taps`.
    ///
    /// Output order follows card id, so the result does not depend on the
    /// worker count. Failed cards are collected, never fatal.
    pub fn run(&self, taps: Vec<TapEvent>, cancel: &CancelToken) -> anyhow::Result<BatchOutput> {
        let cards: Vec<(CardId, Vec<TapEvent>)> = Self::group_taps(taps).into_iter().collect();
        let card_count = cards.len();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers())
            .thread_name(|i| format!("odx-worker-{}", i))
            .build()
            .context("Failed to build worker pool")?;
        info!(cards = card_count, workers = pool.current_num_threads(), "batch_started");

        let results: Vec<CardResult> = pool.install(|| {
            cards
                .into_par_iter()
                .map(|(card_id, taps)| {
                    if cancel.is_cancelled() {
                        self.metrics.record_card_cancelled();
                        return CardResult::Cancelled;
                    }
                    match self.process_card(&card_id, taps) {
                        Ok(outcome) => CardResult::Done(outcome),
                        Err(e) => {
                            warn!(card_id = %e.card_id(), error = %e, "card_failed");
                            self.metrics.record_card_failed();
                            CardResult::Failed(e)
                        }
                    }
                })
                .collect()
        });

        let mut output = BatchOutput::default();
        for result in results {
            match result {
                CardResult::Done(outcome) => {
                    output.journeys.extend(outcome.journeys);
                    output.issues.extend(outcome.issues);
                }
                CardResult::Failed(e) => output.failed.push(e),
                CardResult::Cancelled => output.cancelled += 1,
            }
        }
        output.matrix = OdMatrix::from_journeys(&output.journeys);

        if output.cancelled > 0 {
            warn!(cancelled = output.cancelled, cards = card_count, "batch_cancelled");
        }
        info!(
            cards = card_count,
            journeys = output.journeys.len(),
            issues = output.issues.len(),
            failed = output.failed.len(),
            od_pairs = output.matrix.len(),
            "batch_completed"
        );
        Ok(output)
    }
}
