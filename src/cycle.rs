//! One poll cycle: fetch both sources, normalize, reconcile, notify.
//!
//! Nothing here retries. Every failure is collected into the
//! [`CycleReport`] so the caller (scheduler or `/poll`) decides what to do.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::{Disposition, Reconciler};
use crate::error::{IngestError, IngestResult};
use crate::fetch::{FetchAdapter, RawBatch};
use crate::models::{AcceptedEvent, Reading, StreamKind};
use crate::normalize::{normalize_device, normalize_energy};
use crate::notify::{Notifier, Topics};

// ---

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Which upstream sources are polled.
#[derive(Debug, Clone, Copy)]
pub struct SourceSelection {
    pub weather: bool,
    pub energy: bool,
}

/// Production window requested each cycle, ending `lag_days` before now.
#[derive(Debug, Clone, Copy)]
pub struct EnergyWindow {
    pub hours: i64,
    pub lag_days: i64,
}

impl EnergyWindow {
    // ---
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = now - Duration::days(self.lag_days);
        (end - Duration::hours(self.hours), end)
    }
}

/// Aggregated outcome of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub started_at: i64,
    pub weather_records: usize,
    pub energy_records: usize,
    pub accepted: usize,
    pub buckets_inserted: usize,
    pub buckets_updated: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub published: usize,
    pub errors: Vec<IngestError>,
}

impl CycleReport {
    // ---
    fn new(trigger: Trigger, started_at: DateTime<Utc>) -> Self {
        CycleReport {
            trigger,
            started_at: started_at.timestamp(),
            weather_records: 0,
            energy_records: 0,
            accepted: 0,
            buckets_inserted: 0,
            buckets_updated: 0,
            duplicates: 0,
            stale: 0,
            published: 0,
            errors: Vec::new(),
        }
    }

    /// `false` when any part of the cycle failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn tally(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Accepted => self.accepted += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::Stale => self.stale += 1,
            Disposition::BucketInserted => self.buckets_inserted += 1,
            Disposition::BucketUpdated => self.buckets_updated += 1,
        }
    }
}

pub struct PollCycle {
    fetcher: Arc<dyn FetchAdapter>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
    topics: Topics,
    sources: SourceSelection,
    window: EnergyWindow,
}

impl PollCycle {
    // ---
    pub fn new(
        fetcher: Arc<dyn FetchAdapter>,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn Notifier>,
        topics: Topics,
        sources: SourceSelection,
        window: EnergyWindow,
    ) -> Self {
        Self {
            fetcher,
            reconciler,
            notifier,
            topics,
            sources,
            window,
        }
    }

    /// Run one full cycle. Never fails as a whole; see [`CycleReport::errors`].
    pub async fn run(&self, trigger: Trigger, now: DateTime<Utc>) -> CycleReport {
        let span = info_span!("poll_cycle", ?trigger);
        self.run_inner(trigger, now).instrument(span).await
    }

    async fn run_inner(&self, trigger: Trigger, now: DateTime<Utc>) -> CycleReport {
        // ---
        let mut report = CycleReport::new(trigger, now);

        // Step 1: fetch both sources; one failing does not block the other
        let (weather, energy) = tokio::join!(self.fetch_weather(), self.fetch_energy(now));

        // Step 2: normalize
        let mut readings = Vec::new();
        if let Some(batch) = take_batch(weather, &mut report.errors) {
            report.weather_records = batch.len();
            for raw in &batch {
                match normalize_device(raw) {
                    Ok(Some(reading)) => readings.push(reading),
                    Ok(None) => {}
                    Err(e) => record_normalize_error(e, &mut report.errors),
                }
            }
        }
        if let Some(batch) = take_batch(energy, &mut report.errors) {
            report.energy_records = batch.len();
            for raw in &batch {
                match normalize_energy(raw) {
                    Ok(bucket) => readings.push(Reading::Energy(bucket)),
                    Err(e) => record_normalize_error(e, &mut report.errors),
                }
            }
        }

        // Oldest first, so several rain readings in one batch chain their deltas
        readings.sort_by_key(Reading::epoch);

        // Step 3: reconcile, then notify for whatever was accepted
        let mut failed_streams: HashSet<StreamKind> = HashSet::new();
        for reading in readings {
            let kind = reading.stream_key().kind();
            if failed_streams.contains(&kind) {
                debug!(stream = %kind, epoch = reading.epoch(), "skipped after storage failure");
                continue;
            }

            match self.reconciler.reconcile(reading).await {
                Ok(outcome) => {
                    debug!(
                        key = %outcome.record.key,
                        epoch = outcome.record.epoch,
                        disposition = ?outcome.disposition,
                        "reconciled"
                    );
                    report.tally(outcome.disposition);
                    if let Some(event) = outcome.event {
                        match self.notify(&event).await {
                            Ok(()) => report.published += 1,
                            Err(e) => {
                                warn!("{}", e);
                                report.errors.push(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    // energy buckets are independent keys; rain/wind stop for this cycle
                    if kind != StreamKind::EnergyInterval {
                        failed_streams.insert(kind);
                    }
                    report.errors.push(e);
                }
            }
        }

        info!(
            accepted = report.accepted,
            inserted = report.buckets_inserted,
            updated = report.buckets_updated,
            duplicates = report.duplicates,
            stale = report.stale,
            published = report.published,
            errors = report.errors.len(),
            "Poll cycle complete"
        );
        report
    }

    async fn fetch_weather(&self) -> Option<IngestResult<RawBatch>> {
        if !self.sources.weather {
            return None;
        }
        Some(self.fetcher.fetch_weather().await)
    }

    async fn fetch_energy(&self, now: DateTime<Utc>) -> Option<IngestResult<RawBatch>> {
        if !self.sources.energy {
            return None;
        }
        let (start, end) = self.window.bounds(now);
        Some(self.fetcher.fetch_energy(start, end).await)
    }

    async fn notify(&self, event: &AcceptedEvent) -> IngestResult<()> {
        // ---
        let topic = self
            .topics
            .for_key(&event.key)
            .ok_or_else(|| IngestError::PublishError {
                topic: String::new(),
                reason: format!("no topic for stream {}", event.key),
            })?;

        self.notifier.publish(topic, event).await
    }
}

// ---

fn take_batch(
    fetched: Option<IngestResult<RawBatch>>,
    errors: &mut Vec<IngestError>,
) -> Option<RawBatch> {
    match fetched? {
        Ok(batch) => Some(batch),
        Err(e) => {
            warn!("{}", e);
            errors.push(e);
            None
        }
    }
}

/// Malformed records are expected in mixed batches and are dropped quietly;
/// anything else is a data-integrity problem worth reporting.
fn record_normalize_error(err: IngestError, errors: &mut Vec<IngestError>) {
    match err {
        IngestError::MalformedRecord { reason } => {
            debug!("Dropping record: {}", reason);
        }
        other => {
            warn!("{}", other);
            errors.push(other);
        }
    }
}
