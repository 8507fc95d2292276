//! Time-series exporter (spec §4.10): one point per metric key, tagged
//! `load_test, session, action, tag`, with a numeric field for every column.
//!
//! This is the generalization of the teacher's `prometheus`/`hyper` scrape
//! surface (kept verbatim, ambient, in [`crate::prom_metrics`]) into an
//! explicit [`Exporter`] backend, plus [`FileSinkWriter`] standing in for the
//! spec's "opaque" S3/time-series-database collaborator (spec §1 "out of
//! scope ... treated as opaque writers").

use std::path::Path;

use serde::Serialize;

use super::{metric_records, round_half_to_even, EncodeOptions, Exporter};
use crate::session::Session;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub load_test: String,
    pub session: String,
    pub action: String,
    pub tag: String,
    pub total_count: u64,
    pub max: u64,
    pub mean: i64,
    pub min: u64,
    pub percentiles: std::collections::BTreeMap<String, u64>,
}

/// The time-series exporter backend. `tag` (set via [`EncodeOptions`] in a
/// real deployment; fixed here to keep the trait's `EncodeOptions` shape
/// shared across backends) labels the series, e.g. `"latency_ms"`.
pub struct TimeSeriesExporter {
    pub tag: String,
}

impl Default for TimeSeriesExporter {
    fn default() -> Self {
        TimeSeriesExporter { tag: "latency_ms".to_string() }
    }
}

impl Exporter for TimeSeriesExporter {
    type Encoded = Vec<TimeSeriesPoint>;

    fn encode(
        &self,
        session: &Session,
        options: &EncodeOptions,
    ) -> Result<Vec<TimeSeriesPoint>, String> {
        let records = metric_records(session)?;
        Ok(records
            .iter()
            .map(|r| TimeSeriesPoint {
                load_test: options.load_test.clone(),
                session: session.name.clone(),
                action: r.session_action_name.clone(),
                tag: self.tag.clone(),
                total_count: r.total_count,
                max: r.max,
                mean: round_half_to_even(r.mean),
                min: r.min,
                percentiles: r
                    .percentiles
                    .iter()
                    .map(|(label, value)| (format!("percentile_{label}"), *value))
                    .collect(),
            })
            .collect())
    }

    fn write_output(&self, data: &Vec<TimeSeriesPoint>, path: &Path) -> Result<(), String> {
        FileSinkWriter.write(data, path)
    }
}

/// Local file-sink reference `Writer`, standing in for the spec's opaque
/// S3/time-series-database collaborator: one JSON line per point.
pub struct FileSinkWriter;

impl FileSinkWriter {
    pub fn write(&self, points: &[TimeSeriesPoint], path: &Path) -> Result<(), String> {
        let mut buffer = String::new();
        for point in points {
            let line = serde_json::to_string(point).map_err(|e| e.to_string())?;
            buffer.push_str(&line);
            buffer.push('\n');
        }
        std::fs::write(path, buffer).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;
    use crate::metrics::{MetricKey, SnapshotOptions};

    #[test]
    fn points_carry_required_tags() {
        let session = Session::new("Checkout", ConfigValue::empty(), false)
            .record_metric(MetricKey::Action("delay".into()), 12)
            .add_histogram_metrics(&SnapshotOptions::default());

        let options = EncodeOptions { load_test: "LT1".into() };
        let points = TimeSeriesExporter::default()
            .encode(&session, &options)
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].load_test, "LT1");
        assert_eq!(points[0].session, "Checkout");
        assert_eq!(points[0].action, "delay");
        assert_eq!(points[0].tag, "latency_ms");
    }

    #[test]
    fn file_sink_writes_one_json_line_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.jsonl");
        let point = TimeSeriesPoint {
            load_test: "LT".into(),
            session: "S".into(),
            action: "delay".into(),
            tag: "latency_ms".into(),
            total_count: 1,
            max: 5,
            mean: 5,
            min: 5,
            percentiles: Default::default(),
        };
        FileSinkWriter.write(&[point], &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
