//! RunScenario action (spec §4.7): execute another scenario inline or
//! dispatch it to a cluster node, then join the resulting session and merge.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ActionOutcome, ScenarioFn};
use crate::cluster::ClusterHandle;
use crate::config::ConfigValue;
use crate::errors::ActionError;
use crate::scenario::Scenario;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Local,
    Cluster,
}

#[derive(Clone)]
pub struct RunScenarioAction {
    pub scenario: String,
    pub func: ScenarioFn,
    pub placement: Placement,
    /// The config a `Cluster`-placed run is submitted with (spec §4.8
    /// `start(scenario, config)`); unused by `Local`.
    pub config: ConfigValue,
    /// The node set a `Cluster`-placed run is drawn from; unused by `Local`.
    pub cluster: ClusterHandle,
}

/// Adapts a [`ScenarioFn`] closure into a [`Scenario`] so `Cluster`
/// placement can go through the same `worker::start_one_random` placement
/// primitive any top-level scenario uses (spec §4.8).
struct FnScenario {
    name: String,
    func: ScenarioFn,
}

#[async_trait]
impl Scenario for FnScenario {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: Session) -> Session {
        (self.func)(session).await
    }
}

pub async fn run(action: &RunScenarioAction, session: Session) -> ActionOutcome {
    match action.placement {
        Placement::Local => {
            // Inline: reuse the caller's own session identity for the
            // duration of the nested run (spec §4.3 `execute_nested`).
            let (child_seed, _previous) = session.clone().swap_scenario(&action.scenario);
            let child = (action.func)(child_seed).await;
            // Joins as a plain `merge`, not `prepare_merge` — name-prefixing
            // is a LoadTest-runner-level concern (spec §4.9) for combining
            // independent top-level worker sessions, not for a scenario
            // joining its own nested child inline.
            Ok(session.merge(child))
        }
        Placement::Cluster => {
            // Submitted to a worker on any cluster node (spec §4.7): placed
            // via the same single-random-node primitive `worker::start`
            // exposes for a standalone scenario (spec §4.8), so the result
            // is a freshly built session rather than the caller's own — the
            // node it lands on may not share process memory with us.
            let nodes = action.cluster.known_nodes();
            let scenario: Arc<dyn Scenario> = Arc::new(FnScenario {
                name: action.scenario.clone(),
                func: action.func.clone(),
            });
            let worker = crate::worker::start_one_random(scenario, action.config.clone(), &nodes);
            match worker.join().await {
                Ok(child) => Ok(session.merge(child)),
                Err(join_err) => {
                    tracing::error!(
                        scenario = %action.scenario,
                        error = %join_err,
                        "cluster-placed scenario panicked"
                    );
                    Err((ActionError::Other(join_err.to_string()), session))
                }
            }
        }
    }
}
