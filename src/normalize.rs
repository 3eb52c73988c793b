//! Raw record → typed [`Reading`] conversion.
//!
//! Pure functions only. The upstream JSON is inspected just for the fields a
//! reading needs; anything else in the payload is ignored.
//!
//! Weather gateway devices nest their values under `measurement`:
//! - `ts` – measurement epoch seconds
//! - `r`, `t1` – cumulative rainfall and temperature (rain gauges)
//! - `ws`, `wg`, `wd` – wind speed, gust, direction index (anemometers)
//!
//! Energy production buckets carry `date` (`%Y-%m-%d %H:%M:%S`, UTC) and an
//! optional `value` in watt-hours.

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::models::{CompassPoint, EnergyReading, RainReading, Reading, WindReading};

// ---

const ENERGY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Classify one weather-gateway device record.
///
/// Returns `Ok(None)` for records that are neither rain nor wind; those are
/// expected in mixed batches. A rain/wind record missing a required field is
/// `MalformedRecord`; a direction index outside the compass is
/// `InvalidDirectionIndex`.
pub fn normalize_device(raw: &Value) -> IngestResult<Option<Reading>> {
    // ---
    let measurement = raw.get("measurement").unwrap_or(raw);

    if measurement.get("r").is_some() {
        let epoch = epoch_field(measurement)?;
        let rain = RainReading {
            epoch,
            cumulative_total: number_field(measurement, "r")?,
            temperature: number_field(measurement, "t1")?,
        };
        return Ok(Some(Reading::Rain(rain)));
    }

    if measurement.get("ws").is_some() {
        let epoch = epoch_field(measurement)?;
        let index = number_field(measurement, "wd")?;
        // Range check before the cast; `as i64` saturates.
        if index.fract() != 0.0 || !(0.0..=15.0).contains(&index) {
            return Err(IngestError::InvalidDirectionIndex { index });
        }
        let wind = WindReading {
            epoch,
            speed: number_field(measurement, "ws")?,
            gust: number_field(measurement, "wg")?,
            direction: CompassPoint::from_index(index as i64)?,
        };
        return Ok(Some(Reading::Wind(wind)));
    }

    Ok(None)
}

/// Convert one element of the production time series.
///
/// A missing or null `value` is a zero-production interval, not an error.
pub fn normalize_energy(raw: &Value) -> IngestResult<EnergyReading> {
    // ---
    let date = raw
        .get("date")
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::malformed("energy bucket has no 'date'"))?;

    let epoch = NaiveDateTime::parse_from_str(date, ENERGY_DATE_FORMAT)
        .map_err(|e| IngestError::malformed(format!("energy bucket date '{date}': {e}")))?
        .and_utc()
        .timestamp();

    let watt_hours = match raw.get("value") {
        None | Some(Value::Null) => 0,
        Some(v) => as_number(v)
            .ok_or_else(|| IngestError::malformed(format!("energy bucket value {v} is not numeric")))?
            .round() as i64,
    };

    Ok(EnergyReading { epoch, watt_hours })
}

// ---

/// Accept JSON numbers and numeric strings; gateways are not consistent.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_field(obj: &Value, field: &str) -> IngestResult<f64> {
    // ---
    let value = obj
        .get(field)
        .ok_or_else(|| IngestError::malformed(format!("missing field '{field}'")))?;

    as_number(value)
        .filter(|n| n.is_finite())
        .ok_or_else(|| IngestError::malformed(format!("field '{field}' is not numeric: {value}")))
}

fn epoch_field(obj: &Value) -> IngestResult<i64> {
    // ---
    let ts = number_field(obj, "ts")?;
    if ts < 0.0 || ts.fract() != 0.0 {
        return Err(IngestError::malformed(format!("invalid epoch {ts}")));
    }
    Ok(ts as i64)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rain_device_is_classified_by_r_field() {
        // ---
        let raw = json!({
            "deviceid": "08AABBCCDDEE",
            "measurement": { "idx": "2024-05-01 10:00", "ts": 1714557600, "c": 1714557630,
                             "r": 12.5, "t1": 14.2 }
        });

        let reading = normalize_device(&raw).unwrap();
        assert_eq!(
            reading,
            Some(Reading::Rain(RainReading {
                epoch: 1714557600,
                cumulative_total: 12.5,
                temperature: 14.2,
            }))
        );
    }

    #[test]
    fn test_wind_device_is_classified_by_ws_field() {
        // ---
        let raw = json!({
            "deviceid": "0B1122334455",
            "measurement": { "ts": 1714557600, "ws": 2.4, "wg": "4.8", "wd": 6 }
        });

        match normalize_device(&raw).unwrap() {
            Some(Reading::Wind(wind)) => {
                assert_eq!(wind.epoch, 1714557600);
                assert_eq!(wind.speed, 2.4);
                assert_eq!(wind.gust, 4.8);
                assert_eq!(wind.direction, CompassPoint::SE);
            }
            other => panic!("expected wind reading, got {other:?}"),
        }
    }

    #[test]
    fn test_unrecognized_device_is_skipped() {
        // ---
        let raw = json!({ "deviceid": "02X", "measurement": { "ts": 1, "t1": 20.0, "h": 55 } });
        assert_eq!(normalize_device(&raw).unwrap(), None);
        assert_eq!(normalize_device(&json!("not an object")).unwrap(), None);
    }

    #[test]
    fn test_rain_without_temperature_is_malformed() {
        // ---
        let raw = json!({ "measurement": { "ts": 1000, "r": 5.0 } });
        assert!(matches!(
            normalize_device(&raw),
            Err(IngestError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_wind_direction_out_of_range_is_surfaced() {
        // ---
        for wd in [16, -1] {
            let raw = json!({ "measurement": { "ts": 1000, "ws": 1.0, "wg": 2.0, "wd": wd } });
            assert_eq!(
                normalize_device(&raw),
                Err(IngestError::InvalidDirectionIndex { index: wd as f64 })
            );
        }
    }

    #[test]
    fn test_wind_direction_fraction_or_huge_keeps_raw_index() {
        // ---
        for wd in [15.5, 1e20] {
            let raw = json!({ "measurement": { "ts": 1000, "ws": 1.0, "wg": 2.0, "wd": wd } });
            assert_eq!(
                normalize_device(&raw),
                Err(IngestError::InvalidDirectionIndex { index: wd })
            );
        }
    }

    #[test]
    fn test_energy_bucket_parses_date_as_utc() {
        // ---
        let raw = json!({ "date": "2024-05-01 10:15:00", "value": 134.6 });
        let reading = normalize_energy(&raw).unwrap();
        assert_eq!(reading.epoch, 1714558500);
        assert_eq!(reading.watt_hours, 135);
    }

    #[test]
    fn test_energy_bucket_without_value_is_zero() {
        // ---
        let missing = json!({ "date": "2024-05-01 03:00:00" });
        let null = json!({ "date": "2024-05-01 03:15:00", "value": null });
        assert_eq!(normalize_energy(&missing).unwrap().watt_hours, 0);
        assert_eq!(normalize_energy(&null).unwrap().watt_hours, 0);
    }

    #[test]
    fn test_energy_bucket_with_bad_date_is_malformed() {
        // ---
        let raw = json!({ "date": "01/05/2024", "value": 10 });
        assert!(matches!(
            normalize_energy(&raw),
            Err(IngestError::MalformedRecord { .. })
        ));
    }
}
