//! Typed readings, persisted records and accepted events.
//!
//! Everything here is plain data. Raw gateway/production payloads are turned
//! into these shapes by `normalize`, and `engine` decides what gets persisted.

use std::fmt;

use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::IngestError;

// ---

/// The kind of telemetry series, without the per-bucket epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    Rain,
    Wind,
    EnergyInterval,
}

impl StreamKind {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Rain => "rain",
            StreamKind::Wind => "wind",
            StreamKind::EnergyInterval => "energy-interval",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one logical telemetry stream.
///
/// Rain and wind have a single key each since only their latest reading
/// matters. Every 15-minute energy bucket is its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "stream", rename_all = "kebab-case")]
pub enum StreamKey {
    Rain,
    Wind,
    EnergyInterval { start: i64 },
}

impl StreamKey {
    // ---
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamKey::Rain => StreamKind::Rain,
            StreamKey::Wind => StreamKind::Wind,
            StreamKey::EnergyInterval { .. } => StreamKind::EnergyInterval,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::EnergyInterval { start } => write!(f, "energy-interval@{start}"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// The 16 compass points a wind sensor reports, clockwise from north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompassPoint {
    N,
    NNE,
    NE,
    ENE,
    E,
    ESE,
    SE,
    SSE,
    S,
    SSW,
    SW,
    WSW,
    W,
    WNW,
    NW,
    NNW,
}

impl CompassPoint {
    // ---
    pub const ALL: [CompassPoint; 16] = [
        CompassPoint::N,
        CompassPoint::NNE,
        CompassPoint::NE,
        CompassPoint::ENE,
        CompassPoint::E,
        CompassPoint::ESE,
        CompassPoint::SE,
        CompassPoint::SSE,
        CompassPoint::S,
        CompassPoint::SSW,
        CompassPoint::SW,
        CompassPoint::WSW,
        CompassPoint::W,
        CompassPoint::WNW,
        CompassPoint::NW,
        CompassPoint::NNW,
    ];

    /// Map a gateway direction index to its compass point.
    ///
    /// No wrapping or clamping: anything outside `0..=15` is rejected.
    pub fn from_index(index: i64) -> Result<Self, IngestError> {
        // ---
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(IngestError::InvalidDirectionIndex {
                index: index as f64,
            })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompassPoint::N => "N",
            CompassPoint::NNE => "NNE",
            CompassPoint::NE => "NE",
            CompassPoint::ENE => "ENE",
            CompassPoint::E => "E",
            CompassPoint::ESE => "ESE",
            CompassPoint::SE => "SE",
            CompassPoint::SSE => "SSE",
            CompassPoint::S => "S",
            CompassPoint::SSW => "SSW",
            CompassPoint::SW => "SW",
            CompassPoint::WSW => "WSW",
            CompassPoint::W => "W",
            CompassPoint::WNW => "WNW",
            CompassPoint::NW => "NW",
            CompassPoint::NNW => "NNW",
        }
    }

    /// Inverse of [`CompassPoint::label`], used when reading rows back.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainReading {
    pub epoch: i64,
    /// Rainfall counter as reported by the gauge, monotonically growing.
    pub cumulative_total: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindReading {
    pub epoch: i64,
    pub speed: f64,
    pub gust: f64,
    pub direction: CompassPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnergyReading {
    /// Start of the 15-minute production bucket.
    pub epoch: i64,
    pub watt_hours: i64,
}

/// One normalized reading, tagged by the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reading {
    Rain(RainReading),
    Wind(WindReading),
    Energy(EnergyReading),
}

impl Reading {
    // ---
    pub fn epoch(&self) -> i64 {
        match self {
            Reading::Rain(r) => r.epoch,
            Reading::Wind(w) => w.epoch,
            Reading::Energy(e) => e.epoch,
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        match self {
            Reading::Rain(_) => StreamKey::Rain,
            Reading::Wind(_) => StreamKey::Wind,
            Reading::Energy(e) => StreamKey::EnergyInterval { start: e.epoch },
        }
    }
}

/// What the state store holds for a stream key and epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub key: StreamKey,
    pub epoch: i64,
    pub payload: Reading,
    /// Incremental rainfall for rain records, `None` otherwise.
    pub derived: Option<f64>,
}

impl PersistedRecord {
    // ---
    pub fn from_reading(reading: Reading, derived: Option<f64>) -> Self {
        PersistedRecord {
            key: reading.stream_key(),
            epoch: reading.epoch(),
            payload: reading,
            derived,
        }
    }
}

/// Signal that a reading was new and has been durably recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedEvent {
    pub key: StreamKey,
    pub payload: Reading,
    pub derived: Option<f64>,
}

impl AcceptedEvent {
    // ---
    /// Build the downstream message body for this event.
    pub fn to_message(&self) -> Value {
        // ---
        let timestamp = DateTime::from_timestamp(self.payload.epoch(), 0)
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();

        match &self.payload {
            Reading::Rain(rain) => json!({
                "@timestamp": timestamp,
                "sensor_type": "rain",
                "total_rain": rain.cumulative_total,
                "temperature": rain.temperature,
                "additional_rain": self.derived.unwrap_or(0.0),
            }),
            Reading::Wind(wind) => json!({
                "@timestamp": timestamp,
                "sensor_type": "wind",
                "windspeed": wind.speed,
                "windgust": wind.gust,
                "winddir": wind.direction.label(),
            }),
            Reading::Energy(energy) => json!({
                "@timestamp": timestamp,
                "sensor_type": "energy",
                "watt_hours": energy.watt_hours,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_direction_index_maps_clockwise() {
        // ---
        assert_eq!(CompassPoint::from_index(0).unwrap(), CompassPoint::N);
        assert_eq!(CompassPoint::from_index(4).unwrap(), CompassPoint::E);
        assert_eq!(CompassPoint::from_index(8).unwrap(), CompassPoint::S);
        assert_eq!(CompassPoint::from_index(15).unwrap(), CompassPoint::NNW);
    }

    #[test]
    fn test_direction_index_out_of_range_is_rejected() {
        // ---
        for index in [-1, 16, 255] {
            match CompassPoint::from_index(index) {
                Err(IngestError::InvalidDirectionIndex { index: got }) => {
                    assert_eq!(got, index as f64)
                }
                other => panic!("index {index} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_labels_round_trip() {
        // ---
        for point in CompassPoint::ALL {
            assert_eq!(CompassPoint::from_label(point.label()), Some(point));
        }
        assert_eq!(CompassPoint::from_label("north"), None);
    }

    #[test]
    fn test_energy_key_carries_bucket_start() {
        // ---
        let reading = Reading::Energy(EnergyReading {
            epoch: 600,
            watt_hours: 120,
        });
        assert_eq!(reading.stream_key(), StreamKey::EnergyInterval { start: 600 });
        assert_eq!(reading.stream_key().kind(), StreamKind::EnergyInterval);
        assert_eq!(reading.stream_key().to_string(), "energy-interval@600");
    }

    #[test]
    fn test_rain_message_fields() {
        // ---
        let event = AcceptedEvent {
            key: StreamKey::Rain,
            payload: Reading::Rain(RainReading {
                epoch: 1_700_000_000,
                cumulative_total: 7.5,
                temperature: 11.2,
            }),
            derived: Some(2.5),
        };

        let message = event.to_message();
        assert_eq!(message["sensor_type"], "rain");
        assert_eq!(message["total_rain"], 7.5);
        assert_eq!(message["additional_rain"], 2.5);
        assert_eq!(message["@timestamp"], "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_wind_message_uses_compass_label() {
        // ---
        let event = AcceptedEvent {
            key: StreamKey::Wind,
            payload: Reading::Wind(WindReading {
                epoch: 0,
                speed: 3.1,
                gust: 5.4,
                direction: CompassPoint::WSW,
            }),
            derived: None,
        };

        let message = event.to_message();
        assert_eq!(message["sensor_type"], "wind");
        assert_eq!(message["winddir"], "WSW");
        assert_eq!(message["windgust"], 5.4);
    }
}
