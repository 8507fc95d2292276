//! Histogram-based metrics engine (spec §4.2).
//!
//! One HDR histogram per distinct [`MetricKey`]; bounds `[1, 10_000_000]`
//! and 3 significant digits of precision, matching the source's old
//! per-request percentile tracker but keyed by the richer metric-key shape
//! the session/action pipeline needs.

use hdrhistogram::Histogram as HdrHistogram;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lower/upper bounds and precision for every tracked histogram.
const HISTOGRAM_LOW: u64 = 1;
const HISTOGRAM_HIGH: u64 = 10_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

/// The percentile set every snapshot reports (spec §4.2).
pub const PERCENTILES: &[f64] = &[
    10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 75.0, 80.0, 85.0, 90.0, 95.0, 99.0, 99.9, 99.99, 99.999,
];

/// Canonical identifier under which duration samples are recorded (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKey {
    /// Bare identifier, e.g. `ws_recv`.
    Action(String),
    /// `(action, url)` pair — the common HTTP shape.
    ActionUrl(String, String),
    /// `(call, (module, func))`.
    Call(String, String),
}

impl MetricKey {
    /// The printed form used for export column headers and deterministic
    /// sort ordering (spec §9 Open Questions: lexicographic on printed form).
    pub fn printed(&self) -> String {
        match self {
            MetricKey::Action(a) => a.clone(),
            MetricKey::ActionUrl(a, url) => format!("{a}({url})"),
            MetricKey::Call(module, func) => format!("call({module}.{func})"),
        }
    }
}

/// A point-in-time snapshot of one histogram (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub total_count: u64,
    pub min: u64,
    pub mean: f64,
    pub max: u64,
    /// Percentile label (e.g. `"99.9"`) → value.
    pub percentiles: HashMap<String, u64>,
}

impl HistogramSnapshot {
    fn from_histogram(h: &HdrHistogram<u64>) -> Self {
        let mut percentiles = HashMap::with_capacity(PERCENTILES.len());
        for p in PERCENTILES {
            percentiles.insert(percentile_label(*p), h.value_at_percentile(*p));
        }
        HistogramSnapshot {
            total_count: h.len(),
            min: h.min(),
            mean: h.mean(),
            max: h.max(),
            percentiles,
        }
    }
}

/// Renders a percentile like `99.9` as the export column suffix `99_9`.
pub fn percentile_label(p: f64) -> String {
    let s = format!("{p}");
    s.replace('.', "_")
}

/// A predicate over metric keys, or a fixed set of allowed top-level action
/// names — the `options.filter` of `add_histogram_metrics` (spec §4.2).
pub enum MetricsFilter {
    Allow(std::collections::HashSet<String>),
    Predicate(Box<dyn Fn(&MetricKey) -> bool + Send + Sync>),
}

impl MetricsFilter {
    pub fn allows(&self, key: &MetricKey) -> bool {
        match self {
            MetricsFilter::Allow(set) => {
                let action = match key {
                    MetricKey::Action(a) => a,
                    MetricKey::ActionUrl(a, _) => a,
                    MetricKey::Call(_, _) => "call",
                };
                set.contains(action)
            }
            MetricsFilter::Predicate(f) => f(key),
        }
    }
}

/// Options for `add_histogram_metrics`.
#[derive(Default)]
pub struct SnapshotOptions {
    pub filter: Option<MetricsFilter>,
}

/// A process-local collection of histograms, one per metric key.
///
/// Isolation between runs is achieved by calling [`HistogramEngine::reset`];
/// a single run should use one engine instance.
#[derive(Default)]
pub struct HistogramEngine {
    histograms: HashMap<MetricKey, HdrHistogram<u64>>,
}

impl HistogramEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_histogram() -> HdrHistogram<u64> {
        HdrHistogram::new_with_bounds(HISTOGRAM_LOW, HISTOGRAM_HIGH, HISTOGRAM_SIGFIG)
            .expect("static histogram bounds are valid")
    }

    /// Absorb one sample (a positive integer duration in milliseconds).
    pub fn record(&mut self, key: MetricKey, value: u64) {
        let value = value.max(HISTOGRAM_LOW);
        let histogram = self
            .histograms
            .entry(key)
            .or_insert_with(Self::new_histogram);
        let _ = histogram.record(value.min(HISTOGRAM_HIGH));
    }

    /// Snapshot a single key's histogram, if any samples were recorded.
    pub fn snapshot(&self, key: &MetricKey) -> Option<HistogramSnapshot> {
        self.histograms.get(key).map(HistogramSnapshot::from_histogram)
    }

    /// Snapshot every tracked key, honoring an optional filter.
    pub fn snapshot_all(&self, options: &SnapshotOptions) -> HashMap<MetricKey, HistogramSnapshot> {
        self.histograms
            .iter()
            .filter(|(key, _)| options.filter.as_ref().map_or(true, |f| f.allows(key)))
            .map(|(key, h)| (key.clone(), HistogramSnapshot::from_histogram(h)))
            .collect()
    }

    /// Clear all histograms; called between runs to guarantee isolation.
    pub fn reset(&mut self) {
        self.histograms.clear();
    }

    pub fn sample_count(&self, key: &MetricKey) -> u64 {
        self.histograms.get(key).map(|h| h.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_snapshot_round_trip() {
        let mut engine = HistogramEngine::new();
        let key = MetricKey::ActionUrl("get".into(), "/x".into());
        for v in [10, 20, 30, 40, 50] {
            engine.record(key.clone(), v);
        }
        let snap = engine.snapshot(&key).unwrap();
        assert_eq!(snap.total_count, 5);
        assert_eq!(snap.min, 10);
        assert_eq!(snap.max, 50);
    }

    #[test]
    fn histogram_fidelity_percentile_ordering() {
        let mut engine = HistogramEngine::new();
        let key = MetricKey::Action("ws_recv".into());
        for v in 1..=1000u64 {
            engine.record(key.clone(), v);
        }
        let snap = engine.snapshot(&key).unwrap();
        assert_eq!(snap.total_count, 1000);
        let p10 = snap.percentiles[&percentile_label(10.0)];
        let p50 = snap.percentiles[&percentile_label(50.0)];
        let p90 = snap.percentiles[&percentile_label(90.0)];
        let p99 = snap.percentiles[&percentile_label(99.0)];
        assert!(snap.min <= p10 && p10 <= p50 && p50 <= p90 && p90 <= p99 && p99 <= snap.max);
    }

    #[test]
    fn reset_clears_all_histograms() {
        let mut engine = HistogramEngine::new();
        let key = MetricKey::Action("x".into());
        engine.record(key.clone(), 5);
        engine.reset();
        assert!(engine.snapshot(&key).is_none());
    }

    #[test]
    fn filter_allow_set_restricts_snapshot() {
        let mut engine = HistogramEngine::new();
        engine.record(MetricKey::ActionUrl("get".into(), "/a".into()), 5);
        engine.record(MetricKey::ActionUrl("post".into(), "/b".into()), 5);

        let mut allow = std::collections::HashSet::new();
        allow.insert("get".to_string());
        let opts = SnapshotOptions {
            filter: Some(MetricsFilter::Allow(allow)),
        };
        let snaps = engine.snapshot_all(&opts);
        assert_eq!(snaps.len(), 1);
    }

    #[test]
    fn printed_form_matches_export_shape() {
        assert_eq!(MetricKey::Action("delay".into()).printed(), "delay");
        assert_eq!(
            MetricKey::ActionUrl("get".into(), "/x".into()).printed(),
            "get(/x)"
        );
        assert_eq!(
            MetricKey::Call("Checkout".into(), "place_order".into()).printed(),
            "call(Checkout.place_order)"
        );
    }
}
