//! The immutable [`Session`] value threaded through one scenario execution
//! (spec §3).
//!
//! A session is never mutated in place; every action returns a new session
//! built from the old one (`with_*`/`record_*` constructors), matching the
//! functional pipeline the scenario engine expects. `prepare_merge`/`merge`
//! are the one pure combine step used both by `RunScenario`'s nested join
//! (§4.7) and, once per run, by the load-test runner over every top-level
//! worker session (§4.9).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ConfigValue;
use crate::errors::SessionError;
use crate::metrics::{HistogramEngine, HistogramSnapshot, MetricKey, SnapshotOptions};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying a worker, used for parent/child signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

impl WorkerId {
    pub fn next() -> Self {
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A spawned async child task, tracked under `session.async_tasks[name]`
/// until `await(name)` joins and merges it (spec §4.7 Async).
pub struct AsyncTaskHandle {
    pub join: tokio::task::JoinHandle<Session>,
}

/// Shared registry of live async child task handles, keyed by task name.
/// `JoinHandle` isn't `Clone`, so the registry lives behind the same
/// `Arc<Mutex<_>>` pattern as `ws_connections` — every clone of a session
/// along the pipeline shares the same pending tasks; `async_task_names`
/// records which names are outstanding for display/ordering.
pub type AsyncTaskRegistry =
    std::sync::Arc<tokio::sync::Mutex<HashMap<String, Vec<tokio::task::JoinHandle<Session>>>>>;

/// Either the raw per-sample lists a session accumulates during a run, or
/// the collapsed per-key histogram snapshots produced by
/// `add_histogram_metrics` (spec §4.2, §4.3 step 6).
#[derive(Debug, Clone)]
pub enum MetricsState {
    Raw(HashMap<MetricKey, Vec<u64>>),
    Snapshots(HashMap<MetricKey, HistogramSnapshot>),
}

impl Default for MetricsState {
    fn default() -> Self {
        MetricsState::Raw(HashMap::new())
    }
}

impl MetricsState {
    fn raw_mut(&mut self) -> &mut HashMap<MetricKey, Vec<u64>> {
        match self {
            MetricsState::Raw(map) => map,
            MetricsState::Snapshots(_) => {
                panic!("cannot record a raw sample into a session whose metrics were collapsed")
            }
        }
    }

    /// Count of raw samples recorded under `key`, used by the merge-count
    /// testable property; snapshots report their own `total_count`.
    pub fn count(&self, key: &MetricKey) -> u64 {
        match self {
            MetricsState::Raw(map) => map.get(key).map(|v| v.len() as u64).unwrap_or(0),
            MetricsState::Snapshots(map) => map.get(key).map(|s| s.total_count).unwrap_or(0),
        }
    }
}

/// The immutable value passed through the scenario/action pipeline.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub scenario: String,
    pub config: ConfigValue,
    pub assigned: ConfigValue,
    pub results: HashMap<String, Vec<Value>>,
    pub metrics: MetricsState,
    pub errors: HashMap<String, Vec<SessionError>>,
    pub cookies: Vec<String>,
    pub parent_pid: Option<WorkerId>,
    pub cancellation: Option<String>,
    /// Names of async tasks spawned so far, in insertion order — the real
    /// `JoinHandle`s live in the worker's local task table since a `Session`
    /// must stay `Clone` for merge/prepare_merge; `await(name)` on the
    /// scenario engine looks the handle up there by name.
    pub async_task_names: Vec<String>,
    /// Live WebSocket connection handles keyed by slot name (`""` for the
    /// anonymous slot). `assigned.websocket` carries the JSON-visible
    /// metadata (`connection`/`url`/`named_connections`); this registry
    /// holds the actual task handle a JSON value can't represent. Wrapped in
    /// an `Arc` so every clone of a session along the pipeline shares the
    /// same live connections.
    pub ws_connections: std::sync::Arc<tokio::sync::Mutex<HashMap<String, std::sync::Arc<crate::action::ws_client::WsClientHandle>>>>,
    /// Live `JoinHandle`s for outstanding `Async`/`SpreadAsync` children,
    /// keyed by task name; `await(name)` pulls from here and merges the
    /// joined session back in (spec §4.7).
    pub async_tasks: AsyncTaskRegistry,
}

impl Session {
    /// Builds the initial session for a scenario execution (spec §4.3 step
    /// 1). `id` is `"<ScenarioName> <UUID>"` unless the caller is running
    /// under `merge_scenario_sessions`, in which case the scenario name
    /// alone is used as the id.
    pub fn new(scenario: &str, config: ConfigValue, merge_scenario_sessions: bool) -> Self {
        let id = if merge_scenario_sessions {
            scenario.to_string()
        } else {
            format!("{scenario} {}", uuid::Uuid::new_v4())
        };
        // config.session_name wins over the scenario-generated name when both
        // are set (spec §9 Open Questions).
        let name = config
            .get("session_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| id.clone());

        Session {
            id,
            name,
            scenario: scenario.to_string(),
            config,
            assigned: ConfigValue::empty(),
            results: HashMap::new(),
            metrics: MetricsState::default(),
            errors: HashMap::new(),
            cookies: Vec::new(),
            parent_pid: None,
            cancellation: None,
            async_task_names: Vec::new(),
            ws_connections: std::sync::Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            async_tasks: std::sync::Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    /// Sets `cancellation`; once set, `run_action` becomes a no-op (spec
    /// §4.4, §8 cancellation monotonicity).
    pub fn cancel(mut self, reason: impl Into<String>) -> Self {
        self.cancellation = Some(reason.into());
        self
    }

    /// Records one sample. No-op (other than the append) beyond the single
    /// entry growth the immutability testable property requires.
    pub fn record_metric(mut self, key: MetricKey, value: u64) -> Self {
        self.metrics.raw_mut().entry(key).or_default().push(value);
        self
    }

    pub fn record_result(mut self, action: impl Into<String>, value: Value) -> Self {
        self.results.entry(action.into()).or_default().push(value);
        self
    }

    pub fn record_error(mut self, action: impl Into<String>, error: SessionError) -> Self {
        self.errors.entry(action.into()).or_default().push(error);
        self
    }

    pub fn append_cookie(mut self, cookie: String) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn append_cookies(mut self, cookies: impl IntoIterator<Item = String>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    pub fn with_assigned(mut self, assigned: ConfigValue) -> Self {
        self.assigned = assigned;
        self
    }

    pub fn update_assigned(mut self, patch: ConfigValue) -> Self {
        self.assigned = self.assigned.merged_with(&patch);
        self
    }

    pub fn delete_assigned(mut self, key: &str) -> Self {
        self.assigned = self.assigned.delete(key);
        self
    }

    pub fn set_config(mut self, config: ConfigValue) -> Self {
        self.config = config;
        self
    }

    pub fn update_config(mut self, patch: ConfigValue) -> Self {
        self.config = self.config.merged_with(&patch);
        self
    }

    pub fn push_async_task(mut self, name: impl Into<String>) -> Self {
        self.async_task_names.push(name.into());
        self
    }

    /// Swaps the scenario reference for a nested run, returning both the
    /// updated session and the original scenario name to restore afterwards
    /// (spec §4.3 `execute_nested`).
    pub fn swap_scenario(mut self, scenario: &str) -> (Self, String) {
        let previous = self.scenario.clone();
        self.scenario = scenario.to_string();
        (self, previous)
    }

    /// `prepare_merge`: prefixes results/metrics/errors keys with the
    /// session's own name so that merging several sessions doesn't conflate
    /// same-named actions from different scenarios (spec §4.9).
    pub fn prepare_merge(mut self) -> Self {
        let prefix = |k: &str| format!("{}/{}", self.name, k);

        self.results = self
            .results
            .drain()
            .map(|(k, v)| (prefix(&k), v))
            .collect();
        self.errors = self.errors.drain().map(|(k, v)| (prefix(&k), v)).collect();
        self
    }

    /// `preserve_vals_merge` of two prepared sessions: a key present in only
    /// one is kept as-is; a key present in both has its values concatenated,
    /// new values prepended (spec §4.9, §8 merge-preserves-counts).
    pub fn merge(self, other: Session) -> Session {
        let mut results = self.results;
        for (k, mut v) in other.results {
            results.entry(k).or_default().append(&mut v);
        }

        let mut errors = self.errors;
        for (k, mut v) in other.errors {
            errors.entry(k).or_default().append(&mut v);
        }

        let metrics = match (self.metrics, other.metrics) {
            (MetricsState::Raw(mut a), MetricsState::Raw(b)) => {
                for (k, mut v) in b {
                    a.entry(k).or_default().append(&mut v);
                }
                MetricsState::Raw(a)
            }
            (MetricsState::Snapshots(a), MetricsState::Snapshots(_)) => {
                // Snapshots are collapsed per-session; a post-collapse merge
                // only happens at the global level via `add_histogram_metrics`
                // on the raw samples before collapse, so we keep the first.
                MetricsState::Snapshots(a)
            }
            (a, _) => a,
        };

        let mut cookies = self.cookies;
        cookies.extend(other.cookies);

        Session {
            id: self.id,
            name: self.name,
            scenario: self.scenario,
            config: self.config,
            assigned: self.assigned,
            results,
            metrics,
            errors,
            cookies,
            parent_pid: self.parent_pid,
            cancellation: self.cancellation.or(other.cancellation),
            async_task_names: self.async_task_names,
            ws_connections: self.ws_connections,
            async_tasks: self.async_tasks,
        }
    }

    /// Collapses raw samples into histogram snapshots via a scratch
    /// [`HistogramEngine`], replacing `metrics` in place (spec §4.2, §4.3
    /// step 6).
    pub fn add_histogram_metrics(mut self, options: &SnapshotOptions) -> Self {
        let raw = match &self.metrics {
            MetricsState::Raw(map) => map.clone(),
            MetricsState::Snapshots(_) => return self,
        };

        let mut engine = HistogramEngine::new();
        for (key, samples) in &raw {
            for &value in samples {
                engine.record(key.clone(), value);
            }
        }
        self.metrics = MetricsState::Snapshots(engine.snapshot_all(options));
        self
    }
}

/// An empty session with a warning, produced when merging zero sessions
/// (spec §4.9).
pub fn empty_merged_session(load_test: &str) -> Session {
    tracing::warn!(load_test, "merging zero sessions; returning empty session");
    Session::new(load_test, ConfigValue::empty(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_name_defaults_to_id() {
        let s = Session::new("Checkout", ConfigValue::empty(), false);
        assert!(s.id.starts_with("Checkout "));
        assert_eq!(s.name, s.id);
    }

    #[test]
    fn merge_scenario_sessions_uses_scenario_name_as_id() {
        let s = Session::new("Checkout", ConfigValue::empty(), true);
        assert_eq!(s.id, "Checkout");
    }

    #[test]
    fn config_session_name_wins_over_generated_name() {
        let cfg = ConfigValue::from_value(json!({"session_name": "custom"}));
        let s = Session::new("Checkout", cfg, false);
        assert_eq!(s.name, "custom");
    }

    #[test]
    fn cancellation_is_monotonic() {
        let s = Session::new("X", ConfigValue::empty(), false);
        assert!(!s.is_cancelled());
        let s = s.cancel("reason");
        assert!(s.is_cancelled());
        assert_eq!(s.cancellation.as_deref(), Some("reason"));
    }

    #[test]
    fn merge_preserves_counts() {
        let key = MetricKey::Action("ws_recv".into());
        let s1 = Session::new("A", ConfigValue::empty(), false)
            .record_metric(key.clone(), 1)
            .record_metric(key.clone(), 2);
        let s2 = Session::new("B", ConfigValue::empty(), false).record_metric(key.clone(), 3);

        let c1 = s1.metrics.count(&key);
        let c2 = s2.metrics.count(&key);
        let merged = s1.prepare_merge().merge(s2.prepare_merge());
        assert_eq!(merged.metrics.count(&key), c1 + c2);
    }

    #[test]
    fn merge_concatenates_errors_present_in_both() {
        let err = SessionError::new(
            "http",
            &crate::errors::ActionError::Other("boom".into()),
            0,
        );
        let s1 = Session::new("A", ConfigValue::empty(), false)
            .record_error("get", err.clone())
            .prepare_merge();
        let s2 = Session::new("A", ConfigValue::empty(), false)
            .record_error("get", err)
            .prepare_merge();
        let merged = s1.merge(s2);
        assert_eq!(merged.errors.get("A/get").map(Vec::len), Some(2));
    }

    #[test]
    fn add_histogram_metrics_preserves_total_count() {
        let key = MetricKey::ActionUrl("get".into(), "/x".into());
        let mut s = Session::new("A", ConfigValue::empty(), false);
        for v in [1, 2, 3, 4, 5] {
            s = s.record_metric(key.clone(), v);
        }
        let raw_count = s.metrics.count(&key);
        let s = s.add_histogram_metrics(&SnapshotOptions::default());
        assert_eq!(s.metrics.count(&key), raw_count);
    }
}
