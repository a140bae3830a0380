//! Ingestion boundary: raw JSON records are validated and typed here, once.
//! Everything downstream works on [`Transaction`].

pub mod cleaning;
pub mod pool;

pub use cleaning::DataCleaner;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::types::{RawTransaction, Transaction};

const NUMERIC_FIELDS: [&str; 3] = ["value", "gas", "gasPrice"];

/// Fields without which no feature vector can be built.
const FEATURE_FIELDS: [&str; 3] = ["value", "gas", "gasPrice"];

/// Fields a daily value series needs.
const SERIES_FIELDS: [&str; 2] = ["timeStamp", "value"];

/// Validate a raw batch for the anomaly path and convert it to typed
/// transactions, preserving order.
///
/// A required field absent from every record is a validation error (the
/// column does not exist). A field that is present but not a usable number
/// becomes `None` and is recovered later by the cleaner.
pub fn parse_batch(raw: &[RawTransaction]) -> Result<Vec<Transaction>> {
    parse_with(raw, &FEATURE_FIELDS)
}

/// Like [`parse_batch`], but only `timeStamp` and `value` are required.
/// Used for forecasting, where gas columns play no part.
pub fn parse_series(raw: &[RawTransaction]) -> Result<Vec<Transaction>> {
    parse_with(raw, &SERIES_FIELDS)
}

fn parse_with(raw: &[RawTransaction], required: &[&'static str]) -> Result<Vec<Transaction>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    for &field in required {
        let present = raw.iter().any(|r| field_of(r, field).is_some());
        if !present {
            return Err(AppError::validation(
                field,
                "a field present in at least one record",
                format!("missing from all {} records", raw.len()),
            ));
        }
    }

    let mut coerced = [0usize; 3];
    let mut bad_timestamps = 0usize;

    let txs: Vec<Transaction> = raw
        .iter()
        .map(|r| {
            let value = coerce_numeric(r.value.as_ref());
            let gas = coerce_numeric(r.gas.as_ref());
            let gas_price = coerce_numeric(r.gas_price.as_ref());
            for (i, (raw_field, typed)) in [
                (&r.value, value),
                (&r.gas, gas),
                (&r.gas_price, gas_price),
            ]
            .into_iter()
            .enumerate()
            {
                if is_present(raw_field) && typed.is_none() {
                    coerced[i] += 1;
                }
            }

            let timestamp = r.time_stamp.as_ref().and_then(parse_timestamp);
            if is_present(&r.time_stamp) && timestamp.is_none() {
                bad_timestamps += 1;
            }

            Transaction {
                hash: r.hash.clone().filter(|h| !h.is_empty()),
                timestamp,
                value,
                gas,
                gas_price,
            }
        })
        .collect();

    for (field, count) in NUMERIC_FIELDS.iter().zip(coerced) {
        if count > 0 {
            warn!(field, count, "Non-numeric values coerced to missing");
        }
    }
    if bad_timestamps > 0 {
        warn!(count = bad_timestamps, "Unparseable timestamps treated as missing");
    }
    debug!(records = txs.len(), "Parsed transaction batch");

    Ok(txs)
}

fn field_of<'a>(r: &'a RawTransaction, field: &str) -> Option<&'a Value> {
    let v = match field {
        "value" => r.value.as_ref(),
        "gas" => r.gas.as_ref(),
        "gasPrice" => r.gas_price.as_ref(),
        "timeStamp" => r.time_stamp.as_ref(),
        _ => None,
    };
    v.filter(|v| !v.is_null())
}

fn is_present(v: &Option<Value>) -> bool {
    matches!(v, Some(v) if !v.is_null())
}

/// Coerce a JSON number or numeric string to a finite, non-negative f64.
pub fn coerce_numeric(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

/// Parse unix seconds (number or numeric string), RFC 3339, or
/// `YYYY-MM-DD[ HH:MM:SS]` into a UTC timestamp.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => from_unix_secs(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return from_unix_secs(secs);
            }
            if let Ok(secs) = s.parse::<f64>() {
                return secs.is_finite().then(|| from_unix_secs(secs as i64)).flatten();
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn from_unix_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawTransaction {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn coerces_numbers_and_numeric_strings() {
        assert_eq!(coerce_numeric(Some(&json!("21000"))), Some(21000.0));
        assert_eq!(coerce_numeric(Some(&json!(50))), Some(50.0));
        assert_eq!(coerce_numeric(Some(&json!(" 1e18 "))), Some(1e18));
    }

    #[test]
    fn rejects_garbage_negative_and_non_finite() {
        assert_eq!(coerce_numeric(Some(&json!("abc"))), None);
        assert_eq!(coerce_numeric(Some(&json!("-5"))), None);
        assert_eq!(coerce_numeric(Some(&json!("inf"))), None);
        assert_eq!(coerce_numeric(Some(&json!(true))), None);
        assert_eq!(coerce_numeric(None), None);
    }

    #[test]
    fn parses_timestamp_formats() {
        let expected = DateTime::from_timestamp(1_678_901_234, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("1678901234")), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_678_901_234)), Some(expected));
        assert_eq!(parse_timestamp(&json!("2023-03-15T17:27:14Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2023-03-15 17:27:14")), Some(expected));
        assert!(parse_timestamp(&json!("2023-03-15")).is_some());
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn missing_column_is_a_validation_error() {
        let batch = vec![
            raw(json!({"hash": "0x1", "value": "1", "gas": "21000"})),
            raw(json!({"hash": "0x2", "value": "2", "gas": "21000", "gasPrice": null})),
        ];
        match parse_batch(&batch) {
            Err(AppError::Validation { field, .. }) => assert_eq!(field, "gasPrice"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn partial_gaps_become_none() {
        let batch = vec![
            raw(json!({"hash": "0x1", "value": "1", "gas": "21000", "gasPrice": "50"})),
            raw(json!({"hash": "0x2", "value": "oops", "gas": "21000"})),
        ];
        let txs = parse_batch(&batch).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].gas_price, Some(50.0));
        assert_eq!(txs[1].value, None);
        assert_eq!(txs[1].gas_price, None);
        assert_eq!(txs[1].hash.as_deref(), Some("0x2"));
    }

    #[test]
    fn series_needs_no_gas_columns() {
        let batch = vec![raw(json!({"timeStamp": "1678901234", "value": "10"}))];
        let txs = parse_series(&batch).unwrap();
        assert_eq!(txs[0].value, Some(10.0));
        assert!(txs[0].timestamp.is_some());
        assert!(matches!(parse_batch(&batch), Err(AppError::Validation { .. })));
    }

    #[test]
    fn empty_batch_parses_to_empty() {
        assert!(parse_batch(&[]).unwrap().is_empty());
    }
}
