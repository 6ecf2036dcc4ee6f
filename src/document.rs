//! Maps metric sample records to sink documents and derives their
//! deterministic identity.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::influx::csv::FluxRecord;

/// Flat key/value document written to the sink.
pub type Document = BTreeMap<String, Value>;

/// A sample mapped to its document and write identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedSample {
    pub id: String,
    pub document: Document,
}

/// Build the sink document and identity for one sample record.
///
/// The document starts with `time` set to the record's timestamp, then
/// every column of the record is copied in. A column literally named
/// `time` therefore overwrites the seeded entry; that precedence is
/// deliberate. Records missing a timestamp or measurement cannot be
/// identified and map to `None`.
pub fn map_record(record: &FluxRecord, host: &str) -> Option<MappedSample> {
    let time = record.time()?;
    let measurement = record.measurement()?;
    let time_str = format_timestamp(&time);

    let mut document = Document::new();
    document.insert("time".to_string(), Value::String(time_str.clone()));
    for (key, value) in record.values() {
        document.insert(key.clone(), value.clone());
    }

    let id = document_id(&time_str, host, measurement);
    Some(MappedSample { id, document })
}

/// Deterministic identity for a sample: a UUID v5 over the concatenated
/// (timestamp, host, measurement) triple. Equal triples always produce the
/// same id; that is the sole de-duplication mechanism.
pub fn document_id(time: &str, host: &str, measurement: &str) -> String {
    let seed = format!("{time}{host}{measurement}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
}

/// Canonical string form of a sample timestamp, used both for the `time`
/// document entry and the identity seed so the two always agree.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> FluxRecord {
        let mut values = BTreeMap::new();
        values.insert(
            "_time".to_string(),
            Value::String("2024-05-01T00:59:58.123456789Z".to_string()),
        );
        values.insert(
            "_measurement".to_string(),
            Value::String("system_metrics".to_string()),
        );
        values.insert("host".to_string(), Value::String("h1".to_string()));
        values.insert("total_cpu".to_string(), Value::from(12.5));
        values.insert("used_cpu".to_string(), Value::from(3.1));
        FluxRecord::from_values(values)
    }

    #[test]
    fn identity_is_deterministic() {
        let a = document_id("2024-05-01T00:59:58.123456789Z", "h1", "system_metrics");
        let b = document_id("2024-05-01T00:59:58.123456789Z", "h1", "system_metrics");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_differs_when_any_component_differs() {
        let base = document_id("2024-05-01T00:59:58.123456789Z", "h1", "system_metrics");
        let other_time = document_id("2024-05-01T00:59:59.123456789Z", "h1", "system_metrics");
        let other_host = document_id("2024-05-01T00:59:58.123456789Z", "h2", "system_metrics");
        let other_measurement = document_id("2024-05-01T00:59:58.123456789Z", "h1", "disk_metrics");
        assert_ne!(base, other_time);
        assert_ne!(base, other_host);
        assert_ne!(base, other_measurement);
    }

    #[test]
    fn maps_sample_to_flat_document() {
        let record = sample_record();
        let sample = map_record(&record, "h1").unwrap();

        assert_eq!(
            sample.document["time"],
            Value::String("2024-05-01T00:59:58.123456789Z".to_string())
        );
        assert_eq!(sample.document["host"], Value::String("h1".to_string()));
        assert_eq!(sample.document["total_cpu"].as_f64(), Some(12.5));
        assert_eq!(sample.document["used_cpu"].as_f64(), Some(3.1));
        assert_eq!(
            sample.id,
            document_id("2024-05-01T00:59:58.123456789Z", "h1", "system_metrics")
        );
    }

    #[test]
    fn upstream_time_column_wins_over_seeded_entry() {
        let mut values = sample_record().values().clone();
        values.insert(
            "time".to_string(),
            Value::String("upstream-value".to_string()),
        );
        let record = FluxRecord::from_values(values);

        let sample = map_record(&record, "h1").unwrap();
        assert_eq!(
            sample.document["time"],
            Value::String("upstream-value".to_string())
        );
    }

    #[test]
    fn record_without_timestamp_is_not_mapped() {
        let mut values = sample_record().values().clone();
        values.remove("_time");
        assert!(map_record(&FluxRecord::from_values(values), "h1").is_none());

        let mut values = sample_record().values().clone();
        values.remove("_measurement");
        assert!(map_record(&FluxRecord::from_values(values), "h1").is_none());
    }
}
