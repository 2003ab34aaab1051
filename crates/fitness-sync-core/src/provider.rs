use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::SourceRecord;
use crate::SyncError;

/// Window over the provider's record sequence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FetchRange {
    pub start: usize,
    pub limit: Option<usize>,
}

impl FetchRange {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }
}

/// Read-only source of telemetry records.
pub trait TelemetryProvider {
    /// # Errors
    /// Returns [`SyncError::Provider`] when the source cannot be read.
    fn list_records(&mut self, range: &FetchRange) -> Result<Vec<SourceRecord>, SyncError>;
}

/// Records exported from the service as a JSON array or as JSON lines.
#[derive(Debug, Clone, Default)]
pub struct JsonFileProvider {
    records: Vec<SourceRecord>,
    stop_paths: Vec<String>,
}

impl JsonFileProvider {
    /// # Errors
    /// Returns [`SyncError::Provider`] when the file cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Provider(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_text(&text)
    }

    /// Parses an export held in memory. A leading byte-order mark is
    /// ignored; a single object, pretty-printed or not, is one record.
    ///
    /// # Errors
    /// Returns [`SyncError::Provider`] when `text` is neither a JSON document
    /// of objects nor one JSON object per line.
    pub fn from_json_text(text: &str) -> Result<Self, SyncError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let values = match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(record)) => vec![Value::Object(record)],
            Ok(_) => {
                return Err(SyncError::Provider(
                    "expected a JSON array of records".to_string(),
                ))
            }
            Err(err) if text.trim_start().starts_with('[') => {
                return Err(SyncError::Provider(format!("invalid JSON export: {err}")))
            }
            Err(_) => parse_json_lines(text)?,
        };

        if let Some(index) = values.iter().position(|value| !value.is_object()) {
            return Err(SyncError::Provider(format!(
                "record {index} is not a JSON object"
            )));
        }

        Ok(Self {
            records: values.into_iter().map(SourceRecord::new).collect(),
            stop_paths: Vec::new(),
        })
    }

    /// Ends the sequence at the first record that has content at none of
    /// `paths`.
    #[must_use]
    pub fn stop_at_first_without(mut self, paths: &[&str]) -> Self {
        self.stop_paths = paths.iter().map(|path| (*path).to_string()).collect();
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_json_lines(text: &str) -> Result<Vec<Value>, SyncError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str::<Value>(line).map_err(|err| {
                SyncError::Provider(format!("invalid JSON on line {}: {err}", number + 1))
            })
        })
        .collect()
}

impl TelemetryProvider for JsonFileProvider {
    fn list_records(&mut self, range: &FetchRange) -> Result<Vec<SourceRecord>, SyncError> {
        let available = self.records.iter().take_while(|record| {
            self.stop_paths.is_empty()
                || self.stop_paths.iter().any(|path| record.has_content(path))
        });
        let windowed = available.skip(range.start);
        let records: Vec<SourceRecord> = match range.limit {
            Some(limit) => windowed.take(limit).cloned().collect(),
            None => windowed.cloned().collect(),
        };
        tracing::debug!(
            start = range.start,
            returned = records.len(),
            "listed telemetry records"
        );
        Ok(records)
    }
}
