//! State store contract and its PostgreSQL implementation.
//!
//! The reconciliation engine only sees [`StateStore`]; rows live in one typed
//! table per stream (see `schema.rs`), each keyed by `epoch`.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{IngestError, IngestResult};
use crate::models::{
    CompassPoint, EnergyReading, PersistedRecord, RainReading, Reading, StreamKey, WindReading,
};

// ---

/// Last-known state per stream key.
///
/// `upsert` with an existing `(key, epoch)` pair must replace the stored
/// record, never add a second one.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Record with the greatest epoch for the key's stream, if any.
    async fn get_latest(&self, key: StreamKey) -> IngestResult<Option<PersistedRecord>>;

    /// Record stored for exactly this key and epoch, if any.
    async fn get_by_epoch(&self, key: StreamKey, epoch: i64)
        -> IngestResult<Option<PersistedRecord>>;

    async fn upsert(&self, record: &PersistedRecord) -> IngestResult<()>;
}

// ---

#[derive(sqlx::FromRow)]
struct RainRow {
    epoch: i64,
    total_rain: f64,
    temperature: f64,
    additional_rain: f64,
}

impl From<RainRow> for PersistedRecord {
    fn from(row: RainRow) -> Self {
        let reading = Reading::Rain(RainReading {
            epoch: row.epoch,
            cumulative_total: row.total_rain,
            temperature: row.temperature,
        });
        PersistedRecord::from_reading(reading, Some(row.additional_rain))
    }
}

#[derive(sqlx::FromRow)]
struct WindRow {
    epoch: i64,
    wind_speed: f64,
    wind_gust: f64,
    direction: String,
}

impl TryFrom<WindRow> for PersistedRecord {
    type Error = IngestError;

    fn try_from(row: WindRow) -> Result<Self, Self::Error> {
        let direction = CompassPoint::from_label(&row.direction).ok_or_else(|| {
            IngestError::storage(
                StreamKey::Wind,
                format!("stored direction '{}' is not a compass point", row.direction),
            )
        })?;
        let reading = Reading::Wind(WindReading {
            epoch: row.epoch,
            speed: row.wind_speed,
            gust: row.wind_gust,
            direction,
        });
        Ok(PersistedRecord::from_reading(reading, None))
    }
}

#[derive(sqlx::FromRow)]
struct EnergyRow {
    epoch: i64,
    watt_hours: i64,
}

impl From<EnergyRow> for PersistedRecord {
    fn from(row: EnergyRow) -> Self {
        let reading = Reading::Energy(EnergyReading {
            epoch: row.epoch,
            watt_hours: row.watt_hours,
        });
        PersistedRecord::from_reading(reading, None)
    }
}

/// [`StateStore`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_rain(&self, epoch: Option<i64>) -> Result<Option<PersistedRecord>, sqlx::Error> {
        // ---
        let row = sqlx::query_as::<_, RainRow>(
            r#"
            SELECT epoch, total_rain, temperature, additional_rain
            FROM rain_readings
            WHERE $1::BIGINT IS NULL OR epoch = $1
            ORDER BY epoch DESC
            LIMIT 1
            "#,
        )
        .bind(epoch)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PersistedRecord::from))
    }

    async fn fetch_wind(&self, epoch: Option<i64>) -> Result<Option<WindRow>, sqlx::Error> {
        // ---
        sqlx::query_as::<_, WindRow>(
            r#"
            SELECT epoch, wind_speed, wind_gust, direction
            FROM wind_readings
            WHERE $1::BIGINT IS NULL OR epoch = $1
            ORDER BY epoch DESC
            LIMIT 1
            "#,
        )
        .bind(epoch)
        .fetch_optional(&self.pool)
        .await
    }

    async fn fetch_energy(&self, epoch: Option<i64>) -> Result<Option<PersistedRecord>, sqlx::Error> {
        // ---
        let row = sqlx::query_as::<_, EnergyRow>(
            r#"
            SELECT epoch, watt_hours
            FROM energy_intervals
            WHERE $1::BIGINT IS NULL OR epoch = $1
            ORDER BY epoch DESC
            LIMIT 1
            "#,
        )
        .bind(epoch)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PersistedRecord::from))
    }

    async fn fetch(&self, key: StreamKey, epoch: Option<i64>) -> IngestResult<Option<PersistedRecord>> {
        // ---
        match key {
            StreamKey::Rain => self
                .fetch_rain(epoch)
                .await
                .map_err(|e| IngestError::storage(key, e)),
            StreamKey::Wind => self
                .fetch_wind(epoch)
                .await
                .map_err(|e| IngestError::storage(key, e))?
                .map(PersistedRecord::try_from)
                .transpose(),
            StreamKey::EnergyInterval { .. } => self
                .fetch_energy(epoch)
                .await
                .map_err(|e| IngestError::storage(key, e)),
        }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    // ---
    async fn get_latest(&self, key: StreamKey) -> IngestResult<Option<PersistedRecord>> {
        self.fetch(key, None).await
    }

    async fn get_by_epoch(
        &self,
        key: StreamKey,
        epoch: i64,
    ) -> IngestResult<Option<PersistedRecord>> {
        self.fetch(key, Some(epoch)).await
    }

    async fn upsert(&self, record: &PersistedRecord) -> IngestResult<()> {
        // ---
        let result = match &record.payload {
            Reading::Rain(rain) => {
                sqlx::query(
                    r#"
                    INSERT INTO rain_readings (epoch, total_rain, temperature, additional_rain)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (epoch) DO UPDATE SET
                        total_rain      = EXCLUDED.total_rain,
                        temperature     = EXCLUDED.temperature,
                        additional_rain = EXCLUDED.additional_rain,
                        updated_at      = now()
                    "#,
                )
                .bind(rain.epoch)
                .bind(rain.cumulative_total)
                .bind(rain.temperature)
                .bind(record.derived.unwrap_or(0.0))
                .execute(&self.pool)
                .await
            }
            Reading::Wind(wind) => {
                sqlx::query(
                    r#"
                    INSERT INTO wind_readings (epoch, wind_speed, wind_gust, direction)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (epoch) DO UPDATE SET
                        wind_speed = EXCLUDED.wind_speed,
                        wind_gust  = EXCLUDED.wind_gust,
                        direction  = EXCLUDED.direction,
                        updated_at = now()
                    "#,
                )
                .bind(wind.epoch)
                .bind(wind.speed)
                .bind(wind.gust)
                .bind(wind.direction.label())
                .execute(&self.pool)
                .await
            }
            Reading::Energy(energy) => {
                sqlx::query(
                    r#"
                    INSERT INTO energy_intervals (epoch, watt_hours)
                    VALUES ($1, $2)
                    ON CONFLICT (epoch) DO UPDATE SET
                        watt_hours = EXCLUDED.watt_hours,
                        updated_at = now()
                    "#,
                )
                .bind(energy.epoch)
                .bind(energy.watt_hours)
                .execute(&self.pool)
                .await
            }
        };

        result
            .map(|_| ())
            .map_err(|e| IngestError::storage(record.key, e))
    }
}

// ---
