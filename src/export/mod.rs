//! Exporters (spec §4.10): turn a session's histogrammed metrics into a
//! target representation, then persist it. [`metric_records`] is the common
//! flattening step every format-specific encoder builds on.

pub mod structured;
pub mod tabular;
pub mod timeseries;

use crate::session::{MetricsState, Session};

/// Per-call options threaded through `encode`/`write_output`.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub load_test: String,
}

/// `{encode(session, options) → (ok data | error reason), write_output(...)
/// → (ok files | error reason)}` (spec §4.10).
pub trait Exporter {
    type Encoded;

    fn encode(&self, session: &Session, options: &EncodeOptions) -> Result<Self::Encoded, String>;

    fn write_output(&self, data: &Self::Encoded, path: &std::path::Path) -> Result<(), String>;
}

/// One flattened metric record — the shape every exporter iterates,
/// switching the original key on its shape into `session_action_name`
/// (spec §4.10: `(:call, (mod,func))` → `call(Mod.func)`; `(action, url)` →
/// `action(url)`; bare `action` → `action`; [`crate::metrics::MetricKey::printed`]
/// already renders exactly this).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub session_action_name: String,
    pub total_count: u64,
    pub max: u64,
    pub mean: f64,
    pub min: u64,
    /// `(percentile_label, value)` pairs in `crate::metrics::PERCENTILES` order.
    pub percentiles: Vec<(String, u64)>,
}

/// Flattens a session's collapsed metrics into records, sorted
/// lexicographically by printed key for deterministic, reproducible output
/// (spec §9 Open Questions).
pub fn metric_records(session: &Session) -> Result<Vec<MetricRecord>, String> {
    let snapshots = match &session.metrics {
        MetricsState::Snapshots(map) => map,
        MetricsState::Raw(_) => {
            return Err(
                "cannot export a session whose metrics were not collapsed via add_histogram_metrics"
                    .into(),
            )
        }
    };

    let mut keys: Vec<_> = snapshots.keys().collect();
    keys.sort_by_key(|k| k.printed());

    Ok(keys
        .into_iter()
        .map(|key| {
            let snap = &snapshots[key];
            let percentiles = crate::metrics::PERCENTILES
                .iter()
                .map(|p| {
                    let label = crate::metrics::percentile_label(*p);
                    let value = snap.percentiles.get(&label).copied().unwrap_or(0);
                    (label, value)
                })
                .collect();
            MetricRecord {
                session_action_name: key.printed(),
                total_count: snap.total_count,
                max: snap.max,
                mean: snap.mean,
                min: snap.min,
                percentiles,
            }
        })
        .collect())
}

/// Half-to-even rounding to the nearest integer (spec §6 "rounded
/// half-to-even").
pub fn round_half_to_even(v: f64) -> i64 {
    let floor = v.floor();
    let diff = v - floor;
    let floor_i = floor as i64;
    if diff < 0.5 {
        floor_i
    } else if diff > 0.5 {
        floor_i + 1
    } else if floor_i % 2 == 0 {
        floor_i
    } else {
        floor_i + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_to_even_rounds_ties_to_even_neighbor() {
        assert_eq!(round_half_to_even(2.5), 2);
        assert_eq!(round_half_to_even(3.5), 4);
        assert_eq!(round_half_to_even(-2.5), -2);
    }

    #[test]
    fn half_to_even_rounds_non_ties_normally() {
        assert_eq!(round_half_to_even(2.4), 2);
        assert_eq!(round_half_to_even(2.6), 3);
    }

    #[test]
    fn metric_records_rejects_uncollapsed_sessions() {
        let session = Session::new("T", crate::config::ConfigValue::empty(), false);
        assert!(metric_records(&session).is_err());
    }

    #[test]
    fn metric_records_sorted_by_printed_key() {
        use crate::config::ConfigValue;
        use crate::metrics::{MetricKey, SnapshotOptions};
        let session = Session::new("T", ConfigValue::empty(), false)
            .record_metric(MetricKey::ActionUrl("get".into(), "/z".into()), 5)
            .record_metric(MetricKey::ActionUrl("get".into(), "/a".into()), 5)
            .add_histogram_metrics(&SnapshotOptions::default());
        let records = metric_records(&session).unwrap();
        assert_eq!(records[0].session_action_name, "get(/a)");
        assert_eq!(records[1].session_action_name, "get(/z)");
    }
}
