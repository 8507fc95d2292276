//! Structured (JSON) exporter (spec §4.10): a record per metric, identical
//! fields to the tabular encoder, nested under the session's display name.

use std::path::Path;

use serde::Serialize;

use super::{metric_records, round_half_to_even, EncodeOptions, Exporter, MetricRecord};
use crate::session::Session;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StructuredRecord {
    pub session_action_name: String,
    pub total_count: u64,
    pub max: u64,
    pub mean: i64,
    pub min: u64,
    /// Percentile column name (`percentile_99_9`) → value.
    pub percentiles: std::collections::BTreeMap<String, u64>,
}

impl From<&MetricRecord> for StructuredRecord {
    fn from(r: &MetricRecord) -> Self {
        StructuredRecord {
            session_action_name: r.session_action_name.clone(),
            total_count: r.total_count,
            max: r.max,
            mean: round_half_to_even(r.mean),
            min: r.min,
            percentiles: r
                .percentiles
                .iter()
                .map(|(label, value)| (format!("percentile_{label}"), *value))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuredDocument {
    pub session: String,
    pub records: Vec<StructuredRecord>,
}

/// The JSON exporter backend, via `serde_json`.
pub struct StructuredExporter;

impl Exporter for StructuredExporter {
    type Encoded = StructuredDocument;

    fn encode(
        &self,
        session: &Session,
        _options: &EncodeOptions,
    ) -> Result<StructuredDocument, String> {
        let records = metric_records(session)?;
        Ok(StructuredDocument {
            session: session.name.clone(),
            records: records.iter().map(StructuredRecord::from).collect(),
        })
    }

    fn write_output(&self, data: &StructuredDocument, path: &Path) -> Result<(), String> {
        let json = serde_json::to_vec_pretty(data).map_err(|e| e.to_string())?;
        std::fs::write(path, json).map_err(|e| e.to_string())
    }
}
