//! Worker & Supervisor (spec §4.8): a timeout-bounded task owning a single
//! `Session` from start to end, placed round-robin or at random over the
//! known cluster node set.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::ConfigValue;
use crate::scenario::{self, Scenario};
use crate::session::{Session, WorkerId};

/// A task handle plus the node it was placed on (spec §3 "Worker").
pub struct Worker {
    pub id: WorkerId,
    pub node: String,
    join: tokio::task::JoinHandle<Session>,
}

impl Worker {
    /// Awaits this worker's own task to completion, for callers that join a
    /// single placed worker directly (e.g. `RunScenario`'s Cluster
    /// placement, spec §4.7) rather than through [`await_workers`]'s bulk
    /// timeout policy.
    pub async fn join(self) -> Result<Session, tokio::task::JoinError> {
        self.join.await
    }
}

fn spawn_one(scenario: Arc<dyn Scenario>, config: ConfigValue, node: String) -> Worker {
    let id = WorkerId::next();
    debug!(worker = id.0, node = %node, scenario = scenario.name(), "starting worker");
    let join = tokio::spawn(async move { scenario::execute(scenario.as_ref(), config).await });
    Worker { id, node, join }
}

/// `start(n, scenario, config)`: `n` worker handles placed round-robin over
/// `nodes` (spec §4.8).
pub fn start(n: usize, scenario: Arc<dyn Scenario>, config: ConfigValue, nodes: &[String]) -> Vec<Worker> {
    if nodes.is_empty() {
        return (0..n)
            .map(|_| spawn_one(scenario.clone(), config.clone(), "self".to_string()))
            .collect();
    }
    (0..n)
        .map(|i| spawn_one(scenario.clone(), config.clone(), nodes[i % nodes.len()].clone()))
        .collect()
}

/// `start(scenario, config)`: a single worker on one random node.
pub fn start_one_random(scenario: Arc<dyn Scenario>, config: ConfigValue, nodes: &[String]) -> Worker {
    let node = if nodes.is_empty() {
        "self".to_string()
    } else {
        let idx = crate::timing::random_in_range(0, nodes.len() as u64 - 1) as usize;
        nodes[idx].clone()
    };
    spawn_one(scenario, config, node)
}

fn scenario_timeout(config: &ConfigValue) -> Option<Duration> {
    config
        .get("scenario_timeout")
        .and_then(serde_json::Value::as_u64)
        .map(Duration::from_millis)
}

/// `await_workers(workers_with_configs)` (spec §4.8): computes the maximum
/// per-worker timeout. If any worker is unbounded, every worker is awaited
/// unbounded; otherwise every worker is bounded by the shared maximum,
/// stragglers are killed and counted as timed out. Returns
/// `(max_timeout, completed_sessions, timed_out_count)`.
pub async fn await_workers(workers: Vec<(Worker, ConfigValue)>) -> (Option<Duration>, Vec<Session>, usize) {
    let bounds: Vec<Option<Duration>> = workers.iter().map(|(_, cfg)| scenario_timeout(cfg)).collect();
    let any_unbounded = bounds.iter().any(Option::is_none);
    let max_timeout = bounds.into_iter().flatten().max();

    let mut sessions = Vec::with_capacity(workers.len());
    let mut timed_out = 0usize;

    if any_unbounded {
        for (worker, _) in workers {
            match worker.join.await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    error!(worker = worker.id.0, error = %e, "worker task panicked");
                    timed_out += 1;
                }
            }
        }
        (None, sessions, timed_out)
    } else {
        let bound = max_timeout.unwrap_or(Duration::from_secs(0));
        for (worker, _) in workers {
            let worker_id = worker.id.0;
            match tokio::time::timeout(bound, worker.join).await {
                Ok(Ok(session)) => sessions.push(session),
                Ok(Err(e)) => {
                    error!(worker = worker_id, error = %e, "worker task panicked");
                    timed_out += 1;
                }
                Err(_) => {
                    error!(worker = worker_id, bound_ms = bound.as_millis() as u64, "worker timed out");
                    timed_out += 1;
                }
            }
        }
        (Some(bound), sessions, timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Quick;
    #[async_trait]
    impl Scenario for Quick {
        fn name(&self) -> &str {
            "Quick"
        }
        async fn run(&self, session: Session) -> Session {
            session.record_result("done", json!(true))
        }
    }

    #[tokio::test]
    async fn round_robin_places_workers_over_nodes() {
        let nodes = vec!["n0".to_string(), "n1".to_string()];
        let workers = start(4, Arc::new(Quick), ConfigValue::empty(), &nodes);
        let placed: Vec<&str> = workers.iter().map(|w| w.node.as_str()).collect();
        assert_eq!(placed, vec!["n0", "n1", "n0", "n1"]);
    }

    #[tokio::test]
    async fn await_workers_collects_all_sessions_when_unbounded() {
        let nodes = vec!["n0".to_string()];
        let workers: Vec<_> = start(3, Arc::new(Quick), ConfigValue::empty(), &nodes)
            .into_iter()
            .map(|w| (w, ConfigValue::empty()))
            .collect();
        let (max_timeout, sessions, timed_out) = await_workers(workers).await;
        assert!(max_timeout.is_none());
        assert_eq!(sessions.len(), 3);
        assert_eq!(timed_out, 0);
    }

    #[tokio::test]
    async fn await_workers_times_out_stragglers() {
        struct Slow;
        #[async_trait]
        impl Scenario for Slow {
            fn name(&self) -> &str {
                "Slow"
            }
            async fn run(&self, session: Session) -> Session {
                tokio::time::sleep(Duration::from_millis(200)).await;
                session
            }
        }
        let nodes = vec!["n0".to_string()];
        let cfg = ConfigValue::from_value(json!({"scenario_timeout": 10}));
        let worker = spawn_one(Arc::new(Slow), cfg.clone(), nodes[0].clone());
        let (max_timeout, sessions, timed_out) = await_workers(vec![(worker, cfg)]).await;
        assert_eq!(max_timeout, Some(Duration::from_millis(10)));
        assert_eq!(sessions.len(), 0);
        assert_eq!(timed_out, 1);
    }
}
