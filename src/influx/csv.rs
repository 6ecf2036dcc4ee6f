//! Annotated-CSV decoding for Flux query responses.
//!
//! The query API answers in the annotated CSV dialect: `#datatype`,
//! `#group` and `#default` annotation rows, then a header row, then record
//! rows. A blank line starts a new schema block; within a block the `table`
//! column partitions records into result tables.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

pub const TIME_COLUMN: &str = "_time";
pub const MEASUREMENT_COLUMN: &str = "_measurement";

/// One result table of a Flux response.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxTable {
    pub records: Vec<FluxRecord>,
}

/// One record row, keyed by column name. Holds every column the response
/// carries (result, table, _start, _stop, _time, _value, _field,
/// _measurement and all tags).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FluxRecord {
    values: BTreeMap<String, Value>,
}

impl FluxRecord {
    pub fn from_values(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|value| value.as_str())
    }

    /// The record's `_time` column, if present and well-formed.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        let raw = self.get_str(TIME_COLUMN)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }

    pub fn measurement(&self) -> Option<&str> {
        self.get_str(MEASUREMENT_COLUMN)
    }
}

/// Column metadata for the current schema block.
#[derive(Debug, Default)]
struct Block {
    datatypes: Vec<String>,
    defaults: Vec<String>,
    header: Vec<String>,
    table_index: Option<usize>,
}

/// Decode a full annotated-CSV response body into result tables.
pub fn parse_annotated_csv(body: &str) -> Vec<FluxTable> {
    let mut tables = Vec::new();
    let mut records: Vec<FluxRecord> = Vec::new();
    let mut block = Block::default();
    let mut current_table_id: Option<String> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            // blank line: next schema block starts with fresh annotations
            if !records.is_empty() {
                tables.push(FluxTable {
                    records: std::mem::take(&mut records),
                });
            }
            block = Block::default();
            current_table_id = None;
            continue;
        }

        let fields = split_csv_line(line);
        let annotation = fields.first().cloned().unwrap_or_default();
        if let Some(kind) = annotation.strip_prefix('#') {
            match kind {
                "datatype" => block.datatypes = fields,
                "default" => block.defaults = fields,
                _ => {} // #group carries no information we use
            }
            continue;
        }

        if block.header.is_empty() {
            block.table_index = fields.iter().position(|name| name == "table");
            block.header = fields;
            continue;
        }

        if let Some(idx) = block.table_index {
            let table_id = fields.get(idx).cloned().unwrap_or_default();
            let table_changed = current_table_id
                .as_ref()
                .is_some_and(|current| *current != table_id);
            if table_changed && !records.is_empty() {
                tables.push(FluxTable {
                    records: std::mem::take(&mut records),
                });
            }
            current_table_id = Some(table_id);
        }

        records.push(build_record(&block, &fields));
    }

    if !records.is_empty() {
        tables.push(FluxTable { records });
    }
    tables
}

fn build_record(block: &Block, fields: &[String]) -> FluxRecord {
    let mut values = BTreeMap::new();
    for (i, name) in block.header.iter().enumerate() {
        if name.is_empty() {
            continue; // leading annotation column
        }
        let mut raw = fields.get(i).map(String::as_str).unwrap_or("");
        if raw.is_empty() {
            if let Some(default) = block.defaults.get(i) {
                raw = default;
            }
        }
        let datatype = block.datatypes.get(i).map(String::as_str).unwrap_or("string");
        values.insert(name.clone(), convert_cell(datatype, raw));
    }
    FluxRecord { values }
}

/// Convert one cell according to its `#datatype` annotation. Cells that
/// fail their annotated parse are carried as strings rather than dropping
/// the record.
fn convert_cell(datatype: &str, raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match datatype {
        "double" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_owned())),
        "long" => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_owned())),
        "unsignedLong" => raw
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_owned())),
        "boolean" => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_owned()),
        },
        dt if dt.starts_with("dateTime") => match DateTime::parse_from_rfc3339(raw) {
            Ok(time) => Value::String(
                time.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            Err(_) => Value::String(raw.to_owned()),
        },
        _ => Value::String(raw.to_owned()),
    }
}

/// RFC-4180 field splitting: quoted fields, embedded commas, doubled quotes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}
