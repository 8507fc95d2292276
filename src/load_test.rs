//! The LoadTest runner (spec §4.9): expands a [`LoadTestSpec`] into
//! concrete workers, awaits them under a bounded timeout, and merges their
//! sessions into one `Results` record.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::ClusterHandle;
use crate::config::ConfigValue;
use crate::metrics::SnapshotOptions;
use crate::scenario::{Scenario, Sequence};
use crate::session::{self, Session};
use crate::worker::{self, Worker};

/// A single scenario, or a list denoting a [`Sequence`] (spec §3 "`(scenario
/// | [scenario], …)`").
#[derive(Clone)]
pub enum ScenarioRef {
    Single(Arc<dyn Scenario>),
    Sequence(Vec<Arc<dyn Scenario>>),
}

impl ScenarioRef {
    fn resolve(&self, entry_name: &str) -> Arc<dyn Scenario> {
        match self {
            ScenarioRef::Single(s) => s.clone(),
            ScenarioRef::Sequence(steps) => Arc::new(Sequence {
                name: entry_name.to_string(),
                steps: steps.clone(),
            }),
        }
    }
}

/// One entry of a load test: a scenario (or sequence), an optional explicit
/// session name, per-entry config, and how many concurrent workers to run it
/// as (spec §3 `((concurrency, …), …)`).
#[derive(Clone)]
pub struct LoadTestEntry {
    pub scenario: ScenarioRef,
    pub session_name: Option<String>,
    pub config: ConfigValue,
    pub concurrency: usize,
}

impl LoadTestEntry {
    pub fn new(scenario: Arc<dyn Scenario>) -> Self {
        LoadTestEntry {
            scenario: ScenarioRef::Single(scenario),
            session_name: None,
            config: ConfigValue::empty(),
            concurrency: 1,
        }
    }
}

pub struct LoadTestSpec {
    pub name: String,
    pub default_config: ConfigValue,
    pub entries: Vec<LoadTestEntry>,
}

/// `{load_test, start_ms, end_ms, duration_ms, sessions, max_timeout,
/// timed_out}` (spec §4.9 step 4). `session` is the already-merged result of
/// combining every worker's session (spec's `sessions` field collapsed to
/// its final post-merge value, since downstream export consumes exactly one
/// session).
pub struct Results {
    pub load_test: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub session: Session,
    pub max_timeout: Option<Duration>,
    pub timed_out: usize,
}

/// Runs `spec` end to end: materialize entries into workers, place them
/// over `cluster`'s known nodes, await under bounded timeout, merge.
pub async fn run(spec: &LoadTestSpec, cluster: &ClusterHandle) -> Results {
    let start_ms = crate::timing::timestamp();
    let nodes = cluster.known_nodes();

    let mut placed: Vec<(Worker, ConfigValue)> = Vec::new();
    for entry in &spec.entries {
        let entry_name = entry
            .session_name
            .clone()
            .unwrap_or_else(|| format!("{}/{}", spec.name, uuid::Uuid::new_v4()));
        let scenario = entry.scenario.resolve(&entry_name);

        let mut merged_config = crate::config::deep_merge_chain([
            spec.default_config.clone(),
            entry.config.clone(),
        ]);
        if let Some(name) = &entry.session_name {
            merged_config = merged_config.set("session_name", Value::String(name.clone()));
        }

        let concurrency = entry.concurrency.max(1);
        for worker in worker::start(concurrency, scenario, merged_config.clone(), &nodes) {
            placed.push((worker, merged_config.clone()));
        }
    }

    let (max_timeout, sessions, timed_out) = worker::await_workers(placed).await;
    if timed_out > 0 {
        crate::prom_metrics::WORKERS_TIMED_OUT_TOTAL
            .with_label_values(&[&spec.name])
            .inc_by(timed_out as u64);
    }

    let merge_scenario_sessions = spec
        .default_config
        .get("merge_scenario_sessions")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut merged = merge_sessions(sessions, &spec.name);
    if merge_scenario_sessions {
        merged = merged.add_histogram_metrics(&SnapshotOptions::default());
    }

    let end_ms = crate::timing::timestamp();
    Results {
        load_test: spec.name.clone(),
        start_ms,
        end_ms,
        duration_ms: end_ms.saturating_sub(start_ms),
        session: merged,
        max_timeout,
        timed_out,
    }
}

/// Session merging (spec §4.9): empty set → empty session with a warning;
/// otherwise `prepare_merge(s1)` then fold the rest in via `merge`.
fn merge_sessions(mut sessions: Vec<Session>, load_test: &str) -> Session {
    if sessions.is_empty() {
        return session::empty_merged_session(load_test);
    }
    let first = sessions.remove(0).prepare_merge();
    sessions
        .into_iter()
        .fold(first, |acc, s| acc.merge(s.prepare_merge()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterConfig;
    use async_trait::async_trait;
    use serde_json::json;

    struct Touch(&'static str);
    #[async_trait]
    impl Scenario for Touch {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self, session: Session) -> Session {
            session.record_result("hit", json!(self.0))
        }
    }

    #[tokio::test]
    async fn runs_every_entry_and_merges_by_name() {
        let cluster = ClusterHandle::new(ClusterConfig::for_testing("n0", &[]));
        let spec = LoadTestSpec {
            name: "Smoke".into(),
            default_config: ConfigValue::empty(),
            entries: vec![
                LoadTestEntry {
                    session_name: Some("A".into()),
                    concurrency: 1,
                    ..LoadTestEntry::new(Arc::new(Touch("A")))
                },
                LoadTestEntry {
                    session_name: Some("B".into()),
                    concurrency: 1,
                    ..LoadTestEntry::new(Arc::new(Touch("B")))
                },
            ],
        };
        let results = run(&spec, &cluster).await;
        assert_eq!(results.timed_out, 0);
        assert!(results.session.results.contains_key("A/hit"));
        assert!(results.session.results.contains_key("B/hit"));
    }

    #[tokio::test]
    async fn empty_entry_list_returns_warned_empty_session() {
        let cluster = ClusterHandle::new(ClusterConfig::for_testing("n0", &[]));
        let spec = LoadTestSpec {
            name: "Empty".into(),
            default_config: ConfigValue::empty(),
            entries: vec![],
        };
        let results = run(&spec, &cluster).await;
        assert!(results.session.results.is_empty());
    }

    #[tokio::test]
    async fn concurrency_spawns_n_workers_for_one_entry() {
        let cluster = ClusterHandle::new(ClusterConfig::for_testing("n0", &[]));
        let spec = LoadTestSpec {
            name: "Fan".into(),
            default_config: ConfigValue::empty(),
            entries: vec![LoadTestEntry {
                concurrency: 5,
                ..LoadTestEntry::new(Arc::new(Touch("Fan")))
            }],
        };
        let results = run(&spec, &cluster).await;
        let hits = results
            .session
            .results
            .iter()
            .find(|(k, _)| k.ends_with("/hit"))
            .map(|(_, v)| v.len());
        assert_eq!(hits, Some(5));
        assert_eq!(results.timed_out, 0);
    }
}
