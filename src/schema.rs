//! Database schema management for `meteoflow`.
//!
//! Ensures the per-stream tables exist before the first poll cycle.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// One table per stream, each keyed by `epoch` so that an upsert for an
/// already-stored epoch replaces the row instead of adding a second one.
/// Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Rain gauge readings; additional_rain is the delta to the previous row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rain_readings (
            epoch           BIGINT           PRIMARY KEY,
            total_rain      DOUBLE PRECISION NOT NULL,
            temperature     DOUBLE PRECISION NOT NULL,
            additional_rain DOUBLE PRECISION NOT NULL,
            created_at      TIMESTAMPTZ      NOT NULL DEFAULT now(),
            updated_at      TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Anemometer readings; direction stored as a compass label
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wind_readings (
            epoch       BIGINT           PRIMARY KEY,
            wind_speed  DOUBLE PRECISION NOT NULL,
            wind_gust   DOUBLE PRECISION NOT NULL,
            direction   TEXT             NOT NULL,
            created_at  TIMESTAMPTZ      NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ      NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // 15-minute production buckets, keyed by bucket start
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS energy_intervals (
            epoch       BIGINT      PRIMARY KEY,
            watt_hours  BIGINT      NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
