//! Application entry point for the `meteoflow` ingestion service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and creating the schema
//! - Connecting the MQTT notifier and the upstream HTTP clients
//! - Spawning the scheduler that runs one poll cycle per interval
//! - Mounting the API routes (`/health`, `/poll`) via the `routes` gateway
//!
//! # Environment Variables
//! See `config::load_from_env` for the full list. Logging is controlled by:
//! - `APP_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `APP_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! route registration to `routes`, and all ingestion logic to `cycle`.
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use chrono::Utc;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod config;
mod cycle;
mod engine;
mod error;
mod fetch;
mod models;
mod normalize;
mod notify;
mod routes;
mod schema;
mod store;

pub use config::Config;

// Re-exported for routes/*.rs, which only know their parent module.
pub use cycle::{PollCycle, Trigger};

use cycle::{EnergyWindow, SourceSelection};
use engine::Reconciler;
use fetch::HttpFetchAdapter;
use notify::{MqttNotifier, Topics};
use store::PgStateStore;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Attempting to connect to database: {}",
        config::mask_db_url(&cfg.storage.db_url)
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.storage.db_pool_max)
        .connect(&cfg.storage.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let cycle = Arc::new(build_cycle(&cfg, pool)?);

    spawn_scheduler(cycle.clone(), Duration::from_secs(cfg.poll_interval_secs));

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(cycle);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Wire the concrete collaborators into one [`PollCycle`].
fn build_cycle(cfg: &Config, pool: sqlx::PgPool) -> Result<PollCycle> {
    // ---
    let fetcher = HttpFetchAdapter::new(
        cfg.weather.clone(),
        cfg.energy.clone(),
        Duration::from_secs(cfg.http_timeout_secs),
    )?;
    let notifier = MqttNotifier::connect(&cfg.notifier)?;
    let reconciler = Reconciler::new(Arc::new(PgStateStore::new(pool)));

    Ok(PollCycle::new(
        Arc::new(fetcher),
        Arc::new(reconciler),
        Arc::new(notifier),
        Topics {
            rain: cfg.notifier.rain_topic.clone(),
            wind: cfg.notifier.wind_topic.clone(),
        },
        SourceSelection {
            weather: cfg.poll_weather,
            energy: cfg.poll_energy,
        },
        EnergyWindow {
            hours: cfg.energy.window_hours,
            lag_days: cfg.energy.lag_days,
        },
    ))
}

/// Run one cycle per `period`, starting immediately.
///
/// Cycles run inline on this task, so a slow cycle delays the next tick
/// instead of overlapping it; missed ticks are skipped, not replayed.
fn spawn_scheduler(cycle: Arc<PollCycle>, period: Duration) {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let report = cycle.run(Trigger::Scheduled, Utc::now()).await;
            if !report.is_clean() {
                tracing::error!(
                    "Scheduled cycle finished with {} error(s)",
                    report.errors.len()
                );
            }
        }
    });
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `APP_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `APP_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("APP_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to APP_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("APP_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
