//! HTTP clients for the two upstream sources.
//!
//! Both calls are single-shot: no retry, no backoff. Any transport error,
//! timeout, non-2xx status or unexpected envelope becomes `FetchFailure`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{EnergySourceConfig, WeatherSourceConfig};
use crate::error::{IngestError, IngestResult, Source};

// ---

/// Ordered sequence of loosely-typed upstream records.
pub type RawBatch = Vec<Value>;

const ENERGY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn fetch_weather(&self) -> IngestResult<RawBatch>;

    async fn fetch_energy(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> IngestResult<RawBatch>;
}

/// [`FetchAdapter`] talking to the weather gateway and the production API
/// over HTTPS.
pub struct HttpFetchAdapter {
    client: reqwest::Client,
    weather: WeatherSourceConfig,
    energy: EnergySourceConfig,
}

impl HttpFetchAdapter {
    // ---
    pub fn new(
        weather: WeatherSourceConfig,
        energy: EnergySourceConfig,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        // ---
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            weather,
            energy,
        })
    }

    async fn get_json(&self, origin: Source, request: reqwest::RequestBuilder) -> IngestResult<Value> {
        // ---
        let fail = |reason: String| IngestError::FetchFailure { origin, reason };

        let response = request
            .header("cache-control", "no-cache")
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }

        response.json().await.map_err(|e| fail(e.to_string()))
    }
}

#[async_trait]
impl FetchAdapter for HttpFetchAdapter {
    // ---
    async fn fetch_weather(&self) -> IngestResult<RawBatch> {
        // ---
        debug!("Fetching weather devices from {}", self.weather.url);

        let request = self.client.post(&self.weather.url).form(&[
            ("phoneid", self.weather.phone_id.as_str()),
            ("deviceids", self.weather.device_ids.as_str()),
        ]);
        let body = self.get_json(Source::Weather, request).await?;

        let devices = extract_weather_batch(body)?;
        info!("Fetched {} weather device records", devices.len());
        Ok(devices)
    }

    async fn fetch_energy(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> IngestResult<RawBatch> {
        // ---
        let start = window_start.format(ENERGY_TIME_FORMAT).to_string();
        let end = window_end.format(ENERGY_TIME_FORMAT).to_string();
        debug!("Fetching energy production {} .. {} from {}", start, end, self.energy.url);

        let request = self.client.get(&self.energy.url).query(&[
            ("timeUnit", "QUARTER_OF_AN_HOUR"),
            ("meters", "Production"),
            ("api_key", self.energy.api_key.as_str()),
            ("startTime", start.as_str()),
            ("endTime", end.as_str()),
        ]);
        let body = self.get_json(Source::Energy, request).await?;

        let buckets = extract_energy_batch(body)?;
        info!("Fetched {} energy buckets", buckets.len());
        Ok(buckets)
    }
}

// ---

/// Pull the `devices` array out of a gateway response.
pub fn extract_weather_batch(mut body: Value) -> IngestResult<RawBatch> {
    // ---
    match body.get_mut("devices").map(Value::take) {
        Some(Value::Array(devices)) => Ok(devices),
        _ => Err(IngestError::FetchFailure {
            origin: Source::Weather,
            reason: "response has no 'devices' array".into(),
        }),
    }
}

/// Pull `energyDetails.meters[0].values` out of a production response.
pub fn extract_energy_batch(mut body: Value) -> IngestResult<RawBatch> {
    // ---
    match body.pointer_mut("/energyDetails/meters/0/values").map(Value::take) {
        Some(Value::Array(values)) => Ok(values),
        _ => Err(IngestError::FetchFailure {
            origin: Source::Energy,
            reason: "response has no 'energyDetails.meters[0].values' array".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::collections::HashMap;

    use axum::extract::{Form, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    /// Serve `app` on an ephemeral local port and return its base URL.
    async fn serve(app: Router) -> String {
        // ---
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/")
    }

    fn adapter(url: &str, timeout: Duration) -> HttpFetchAdapter {
        // ---
        let weather = WeatherSourceConfig {
            url: url.into(),
            phone_id: "phone-1".into(),
            device_ids: "0BW,08R".into(),
        };
        let energy = EnergySourceConfig {
            url: url.into(),
            api_key: "KEY123".into(),
            window_hours: 12,
            lag_days: 0,
        };
        HttpFetchAdapter::new(weather, energy, timeout).unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_weather_request_is_form_post() {
        // ---
        // echo the form back as the only device
        let app = Router::new().route(
            "/",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                Json(json!({ "devices": [form] }))
            }),
        );
        let url = serve(app).await;

        let batch = adapter(&url, Duration::from_secs(5)).fetch_weather().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["phoneid"], "phone-1");
        assert_eq!(batch[0]["deviceids"], "0BW,08R");
    }

    #[tokio::test]
    async fn test_energy_request_carries_window_query() {
        // ---
        let app = Router::new().route(
            "/",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                Json(json!({ "energyDetails": { "meters": [ { "values": [query] } ] } }))
            }),
        );
        let url = serve(app).await;
        let (start, end) = window();

        let batch = adapter(&url, Duration::from_secs(5))
            .fetch_energy(start, end)
            .await
            .unwrap();
        let query = &batch[0];
        assert_eq!(query["timeUnit"], "QUARTER_OF_AN_HOUR");
        assert_eq!(query["meters"], "Production");
        assert_eq!(query["api_key"], "KEY123");
        assert_eq!(query["startTime"], "2024-05-01 00:00:00");
        assert_eq!(query["endTime"], "2024-05-01 12:00:00");
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_failure() {
        // ---
        let app = Router::new().route(
            "/",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR })
                .get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let url = serve(app).await;
        let fetcher = adapter(&url, Duration::from_secs(5));
        let (start, end) = window();

        match fetcher.fetch_weather().await {
            Err(IngestError::FetchFailure { origin, reason }) => {
                assert_eq!(origin, Source::Weather);
                assert!(reason.contains("500"), "unexpected reason: {reason}");
            }
            other => panic!("expected FetchFailure, got {other:?}"),
        }
        assert!(matches!(
            fetcher.fetch_energy(start, end).await,
            Err(IngestError::FetchFailure { origin: Source::Energy, .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_source_times_out_as_fetch_failure() {
        // ---
        let app = Router::new().route(
            "/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "devices": [] }))
            }),
        );
        let url = serve(app).await;

        let err = adapter(&url, Duration::from_millis(200))
            .fetch_weather()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::FetchFailure { origin: Source::Weather, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_envelope_is_fetch_failure() {
        // ---
        let app = Router::new().route("/", post(|| async { Json(json!({ "success": true })) }));
        let url = serve(app).await;

        let err = adapter(&url, Duration::from_secs(5)).fetch_weather().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::FetchFailure { origin: Source::Weather, .. }
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_fetch_failure() {
        // ---
        // bind then drop so the port is known to be closed
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = adapter(&url, Duration::from_secs(5)).fetch_weather().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::FetchFailure { origin: Source::Weather, .. }
        ));
    }

    #[test]
    fn test_weather_envelope() {
        // ---
        let body = json!({
            "success": true,
            "devices": [ { "deviceid": "a" }, { "deviceid": "b" } ]
        });
        assert_eq!(extract_weather_batch(body).unwrap().len(), 2);

        let err = extract_weather_batch(json!({ "success": false })).unwrap_err();
        assert!(matches!(
            err,
            IngestError::FetchFailure { origin: Source::Weather, .. }
        ));
    }

    #[test]
    fn test_energy_envelope() {
        // ---
        let body = json!({
            "energyDetails": {
                "timeUnit": "QUARTER_OF_AN_HOUR",
                "unit": "Wh",
                "meters": [ { "type": "Production", "values": [
                    { "date": "2024-05-01 10:00:00", "value": 88.0 },
                    { "date": "2024-05-01 10:15:00" }
                ] } ]
            }
        });
        let batch = extract_energy_batch(body).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1]["date"], "2024-05-01 10:15:00");

        let err = extract_energy_batch(json!({ "energyDetails": { "meters": [] } })).unwrap_err();
        assert!(matches!(
            err,
            IngestError::FetchFailure { origin: Source::Energy, .. }
        ));
    }
}
