//! Tabular (CSV) exporter (spec §4.10, §6 "bit-exact for tabular").
//!
//! Columns, in order: `session_action_name, total_count, max, mean, min,
//! percentile_10, percentile_20, ..., percentile_99_999`. Numeric values are
//! rounded half-to-even to the nearest integer before being written, exactly
//! as spec.md §6 requires.

use std::path::Path;

use super::{metric_records, round_half_to_even, EncodeOptions, Exporter};
use crate::metrics::PERCENTILES;
use crate::session::Session;

/// Column headers in the exact order spec.md §6 specifies.
pub fn header_row() -> Vec<String> {
    let mut headers = vec![
        "session_action_name".to_string(),
        "total_count".to_string(),
        "max".to_string(),
        "mean".to_string(),
        "min".to_string(),
    ];
    for p in PERCENTILES {
        headers.push(format!("percentile_{}", crate::metrics::percentile_label(*p)));
    }
    headers
}

/// The CSV exporter backend, built on the teacher's `csv` crate dependency.
pub struct TabularExporter;

impl Exporter for TabularExporter {
    type Encoded = Vec<u8>;

    fn encode(&self, session: &Session, _options: &EncodeOptions) -> Result<Vec<u8>, String> {
        let records = metric_records(session)?;
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer
            .write_record(header_row())
            .map_err(|e| e.to_string())?;

        for record in &records {
            let mut row = vec![
                record.session_action_name.clone(),
                record.total_count.to_string(),
                record.max.to_string(),
                round_half_to_even(record.mean).to_string(),
                record.min.to_string(),
            ];
            for (_, value) in &record.percentiles {
                row.push(value.to_string());
            }
            writer.write_record(&row).map_err(|e| e.to_string())?;
        }

        writer.into_inner().map_err(|e| e.to_string())
    }

    fn write_output(&self, data: &Vec<u8>, path: &Path) -> Result<(), String> {
        std::fs::write(path, data).map_err(|e| e.to_string())
    }
}
