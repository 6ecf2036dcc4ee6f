//! InfluxDB 2.x query client and Flux query construction.

pub mod csv;

use std::time::Duration;

use thiserror::Error;

use self::csv::FluxTable;

/// Measurement holding the host metric samples.
pub const MEASUREMENT: &str = "system_metrics";

/// Metric fields fetched for each discovered host.
pub const METRIC_FIELDS: [&str; 4] = ["total_cpu", "total_memory", "used_cpu", "used_memory"];

#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("influxdb query failed with status {status}: {body}")]
    Query {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("influxdb request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Process-scoped client for the Flux query API. Holds one long-lived
/// connection pool for the daemon's lifetime.
pub struct InfluxClient {
    client: reqwest::Client,
    url: String,
    org: String,
    token: String,
}

impl InfluxClient {
    pub fn new(url: &str, token: &str, org: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            token: token.to_string(),
        }
    }

    /// Run a Flux query and decode the annotated-CSV response.
    pub async fn query(&self, flux: &str) -> Result<Vec<FluxTable>, InfluxError> {
        let endpoint = format!("{}/api/v2/query", self.url);
        let body = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
            },
        });

        let response = self
            .client
            .post(&endpoint)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InfluxError::Query { status, body });
        }

        let text = response.text().await?;
        Ok(csv::parse_annotated_csv(&text))
    }
}

/// Escape a value for embedding in a double-quoted Flux string literal.
/// Tag values come from the store and must not be able to terminate the
/// literal they are spliced into.
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Flux query listing the distinct hosts seen in the trailing discovery
/// window.
pub fn host_discovery_query(bucket: &str, window: Duration) -> String {
    format!(
        "from(bucket: \"{}\") \
         |> range(start: -{}s) \
         |> keep(columns: [\"_value\", \"_time\", \"host\"]) \
         |> distinct(column: \"host\")",
        escape_string_literal(bucket),
        window.as_secs()
    )
}

/// Flux query fetching the metric fields for one host over the trailing
/// fetch window.
pub fn host_metrics_query(bucket: &str, window: Duration, host: &str) -> String {
    let field_predicate = METRIC_FIELDS
        .iter()
        .map(|field| format!("r[\"_field\"] == \"{field}\""))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "from(bucket: \"{}\") \
         |> range(start: -{}s) \
         |> filter(fn: (r) => r[\"_measurement\"] == \"{}\") \
         |> filter(fn: (r) => {}) \
         |> filter(fn: (r) => r[\"host\"] == \"{}\") \
         |> yield(name: \"mean\")",
        escape_string_literal(bucket),
        window.as_secs(),
        MEASUREMENT,
        field_predicate,
        escape_string_literal(host)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_query_shape() {
        let query = host_discovery_query("metrics", Duration::from_secs(3600));
        assert_eq!(
            query,
            "from(bucket: \"metrics\") |> range(start: -3600s) \
             |> keep(columns: [\"_value\", \"_time\", \"host\"]) \
             |> distinct(column: \"host\")"
        );
    }

    #[test]
    fn metrics_query_filters_measurement_fields_and_host() {
        let query = host_metrics_query("metrics", Duration::from_secs(5), "h1");
        assert!(query.contains("range(start: -5s)"));
        assert!(query.contains("r[\"_measurement\"] == \"system_metrics\""));
        for field in METRIC_FIELDS {
            assert!(query.contains(&format!("r[\"_field\"] == \"{field}\"")));
        }
        assert!(query.contains("r[\"host\"] == \"h1\""));
        assert!(query.ends_with("|> yield(name: \"mean\")"));
    }

    #[test]
    fn host_value_cannot_terminate_the_string_literal() {
        let query = host_metrics_query("metrics", Duration::from_secs(5), "h1\" or true");
        assert!(query.contains("r[\"host\"] == \"h1\\\" or true\""));
        assert!(!query.contains("== \"h1\" or true\""));
    }

    #[test]
    fn escaping_handles_backslashes_and_quotes() {
        assert_eq!(escape_string_literal("plain"), "plain");
        assert_eq!(escape_string_literal("a\"b"), "a\\\"b");
        assert_eq!(escape_string_literal("a\\b"), "a\\\\b");
        assert_eq!(escape_string_literal("\\\""), "\\\\\\\"");
    }
}
