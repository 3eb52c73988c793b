//! Reconciliation engine: decides new vs duplicate for each reading,
//! computes the rain delta, and issues the upsert.
//!
//! This is the only place stored state is read before being written. Each
//! stream kind has its own async mutex, held across the read-then-write, so
//! two overlapping cycles (scheduler tick plus a manual `/poll`) cannot both
//! compute a delta against the same previous record.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::models::{
    AcceptedEvent, EnergyReading, PersistedRecord, RainReading, Reading, StreamKey, StreamKind,
    WindReading,
};
use crate::store::StateStore;

// ---

/// How a reading was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// New rain/wind reading, persisted and announced.
    Accepted,
    /// Same epoch as the latest persisted reading; nothing written.
    Duplicate,
    /// Older than the latest persisted reading; nothing written.
    Stale,
    /// Energy bucket seen for the first time.
    BucketInserted,
    /// Energy bucket already stored; value overwritten.
    BucketUpdated,
}

/// Outcome of reconciling a single reading.
///
/// `record` is what the store holds for the stream afterwards: the new
/// record when something was written, the existing one otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub record: PersistedRecord,
    pub event: Option<AcceptedEvent>,
    pub disposition: Disposition,
}

impl Reconciled {
    // ---
    fn skipped(existing: PersistedRecord, disposition: Disposition) -> Self {
        Reconciled {
            record: existing,
            event: None,
            disposition,
        }
    }
}

#[derive(Default)]
struct StreamLocks {
    rain: Mutex<()>,
    wind: Mutex<()>,
    energy: Mutex<()>,
}

impl StreamLocks {
    fn for_kind(&self, kind: StreamKind) -> &Mutex<()> {
        match kind {
            StreamKind::Rain => &self.rain,
            StreamKind::Wind => &self.wind,
            StreamKind::EnergyInterval => &self.energy,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn StateStore>,
    locks: StreamLocks,
}

impl Reconciler {
    // ---
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            locks: StreamLocks::default(),
        }
    }

    /// Route a reading to the operation for its stream.
    pub async fn reconcile(&self, reading: Reading) -> IngestResult<Reconciled> {
        match reading {
            Reading::Rain(rain) => self.reconcile_rain(rain).await,
            Reading::Wind(wind) => self.reconcile_wind(wind).await,
            Reading::Energy(energy) => self.reconcile_energy_bucket(energy).await,
        }
    }

    /// Persist a rain reading with its incremental rainfall.
    ///
    /// The first reading ever seen bootstraps the stream with a delta of 0.
    pub async fn reconcile_rain(&self, reading: RainReading) -> IngestResult<Reconciled> {
        // ---
        let _guard = self.locks.for_kind(StreamKind::Rain).lock().await;

        let previous = self.store.get_latest(StreamKey::Rain).await?;
        if let Some(existing) = previous.as_ref() {
            if let Some(disposition) = skip_disposition(existing.epoch, reading.epoch) {
                debug!(epoch = reading.epoch, ?disposition, "rain reading skipped");
                return Ok(Reconciled::skipped(existing.clone(), disposition));
            }
        }

        let baseline = match previous.as_ref().map(|p| &p.payload) {
            Some(Reading::Rain(prev)) => prev.cumulative_total,
            Some(other) => {
                return Err(IngestError::storage(
                    StreamKey::Rain,
                    format!("latest rain record holds a non-rain payload: {other:?}"),
                ))
            }
            None => reading.cumulative_total,
        };
        let derived = reading.cumulative_total - baseline;

        let record = PersistedRecord::from_reading(Reading::Rain(reading), Some(derived));
        self.store.upsert(&record).await?;

        info!(epoch = record.epoch, derived, "rain reading accepted");
        Ok(accepted(record))
    }

    /// Persist a new wind reading. No derived value.
    pub async fn reconcile_wind(&self, reading: WindReading) -> IngestResult<Reconciled> {
        // ---
        let _guard = self.locks.for_kind(StreamKind::Wind).lock().await;

        if let Some(existing) = self.store.get_latest(StreamKey::Wind).await? {
            if let Some(disposition) = skip_disposition(existing.epoch, reading.epoch) {
                debug!(epoch = reading.epoch, ?disposition, "wind reading skipped");
                return Ok(Reconciled::skipped(existing, disposition));
            }
        }

        let record = PersistedRecord::from_reading(Reading::Wind(reading), None);
        self.store.upsert(&record).await?;

        info!(epoch = record.epoch, "wind reading accepted");
        Ok(accepted(record))
    }

    /// Insert or overwrite one production bucket.
    ///
    /// The upstream source revises recent buckets, so an existing bucket is
    /// always overwritten. Energy is archival only and never yields an event.
    pub async fn reconcile_energy_bucket(&self, reading: EnergyReading) -> IngestResult<Reconciled> {
        // ---
        let key = StreamKey::EnergyInterval {
            start: reading.epoch,
        };
        let _guard = self.locks.for_kind(StreamKind::EnergyInterval).lock().await;

        let existing = self.store.get_by_epoch(key, reading.epoch).await?;
        let disposition = match existing {
            Some(_) => Disposition::BucketUpdated,
            None => Disposition::BucketInserted,
        };

        let record = PersistedRecord::from_reading(Reading::Energy(reading), None);
        self.store.upsert(&record).await?;

        debug!(%key, ?disposition, "energy bucket stored");
        Ok(Reconciled {
            record,
            event: None,
            disposition,
        })
    }
}

// ---

/// `None` when the incoming epoch is newer than the latest persisted one.
fn skip_disposition(latest_epoch: i64, incoming_epoch: i64) -> Option<Disposition> {
    use std::cmp::Ordering;

    match incoming_epoch.cmp(&latest_epoch) {
        Ordering::Greater => None,
        Ordering::Equal => Some(Disposition::Duplicate),
        Ordering::Less => Some(Disposition::Stale),
    }
}

fn accepted(record: PersistedRecord) -> Reconciled {
    let event = AcceptedEvent {
        key: record.key,
        payload: record.payload.clone(),
        derived: record.derived,
    };
    Reconciled {
        record,
        event: Some(event),
        disposition: Disposition::Accepted,
    }
}
