//! The scenario lifecycle: `init`/`run`, initial delay, async-task drain,
//! nested execution, sequence composition, and the retry combinator (spec
//! §4.3).

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigValue;
use crate::errors::ActionError;
use crate::metrics::SnapshotOptions;
use crate::session::Session;
use crate::timing::DurationSpec;

/// `init`'s outcome mirrors [`crate::action::ActionOutcome`]'s shape so a
/// failed `init` can still report the session it failed on.
pub type InitOutcome = Result<Session, (ActionError, Session)>;

/// How a [`VariableExtraction`] pulls a value out of an HTTP response (spec
/// §11 supplement: extraction/assertions are optional helpers a scenario's
/// `CallFunction` body may call, not a dispatch-table action variant in
/// their own right — see [`crate::extractor`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    JsonPath(String),
    Regex { pattern: String, group: String },
    Header(String),
    Cookie(String),
}

/// Names the `assigned` key a scenario should stash an [`Extractor`]'s
/// result under.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableExtraction {
    pub name: String,
    pub extractor: Extractor,
}

/// A response-shape check a scenario's `CallFunction` body may run via
/// [`crate::assertions::run_assertions`].
#[derive(Debug, Clone, PartialEq)]
pub enum Assertion {
    StatusCode(u16),
    ResponseTime(Duration),
    JsonPath { path: String, expected: Option<String> },
    BodyContains(String),
    BodyMatches(String),
    HeaderExists(String),
}

/// A user-defined workload: optional `init`, mandatory `run`.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self, session: Session) -> InitOutcome {
        Ok(session)
    }

    async fn run(&self, session: Session) -> Session;
}

/// Drives one full scenario execution (spec §4.3 `execute`):
/// build session → init → initial delay → run → drain async tasks →
/// collapse to histograms unless the caller is deferring to a global merge.
pub async fn execute(scenario: &dyn Scenario, config: ConfigValue) -> Session {
    let merge_scenario_sessions = config
        .get("merge_scenario_sessions")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let session = Session::new(scenario.name(), config, merge_scenario_sessions);
    let name = scenario.name().to_string();

    crate::prom_metrics::CONCURRENT_SCENARIOS.inc();
    let start = crate::timing::timestamp();

    let session = match scenario.init(session).await {
        Ok(s) => s,
        Err((err, s)) => {
            crate::prom_metrics::CONCURRENT_SCENARIOS.dec();
            crate::prom_metrics::SCENARIO_EXECUTIONS_TOTAL
                .with_label_values(&[&name, "error"])
                .inc();
            return s.cancel(err.to_string());
        }
    };

    let session = apply_initial_delay(session).await;
    let session = scenario.run(session).await;
    let session = drain_async_tasks(session).await;

    let elapsed = crate::timing::timestamp().saturating_sub(start);
    crate::prom_metrics::CONCURRENT_SCENARIOS.dec();
    crate::prom_metrics::SCENARIO_DURATION_SECONDS
        .with_label_values(&[&name])
        .observe(elapsed as f64 / 1000.0);
    crate::prom_metrics::SCENARIO_EXECUTIONS_TOTAL
        .with_label_values(&[&name, if session.is_cancelled() { "error" } else { "ok" }])
        .inc();

    if merge_scenario_sessions {
        session
    } else {
        session.add_histogram_metrics(&SnapshotOptions::default())
    }
}

async fn apply_initial_delay(session: Session) -> Session {
    if let Some(fixed) = session.config.get("delay").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(fixed)).await;
    } else if let Some(bound) = session.config.get("random_delay").and_then(Value::as_u64) {
        tokio::time::sleep(DurationSpec::RandomUpTo(bound).as_duration()).await;
    }
    session
}

/// Joins every outstanding `async_tasks` entry in insertion order, merging
/// each child session back in as it completes (spec §4.3 step 5, §5
/// "reunion order ... is insertion order in `async_tasks`").
async fn drain_async_tasks(mut session: Session) -> Session {
    let names = session.async_task_names.clone();
    for name in names {
        let handles = session.async_tasks.lock().await.remove(&name).unwrap_or_default();
        for handle in handles {
            match handle.await {
                Ok(child) => session = session.merge(child),
                Err(join_err) => {
                    tracing::error!(task = %name, error = %join_err, "async task panicked");
                }
            }
        }
    }
    session
}

/// `execute_nested` (spec §4.3): reuses the caller's session identity,
/// swapping the scenario reference only for the duration of the nested run.
/// Configs deep-merge into the caller's unless `disable_config_merge` is set.
pub async fn execute_nested(scenario: &dyn Scenario, session: Session, config: ConfigValue) -> Session {
    let disable_merge = config
        .get("disable_config_merge")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (nested, previous_scenario) = session.swap_scenario(scenario.name());
    let nested = if disable_merge {
        nested.set_config(config)
    } else {
        nested.update_config(config)
    };

    let nested = scenario.run(nested).await;
    let (restored, _) = nested.swap_scenario(&previous_scenario);
    restored
}

/// A synthetic scenario that threads `[A, B, C, …]` through `execute_nested`,
/// forwarding each step's `assigned` map as additional config to the next
/// (spec §4.3 "Scenario Sequence").
pub struct Sequence {
    pub name: String,
    pub steps: Vec<Arc<dyn Scenario>>,
}

#[async_trait]
impl Scenario for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: Session) -> Session {
        let mut session = session;
        for step in &self.steps {
            let forwarded = ConfigValue::from_value(session.assigned.inner().clone());
            session = execute_nested(step.as_ref(), session, forwarded).await;
        }
        session
    }
}

/// How many times `retry_on_error` may still retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Count(u32),
    Infinity,
}

/// A scenario function that may fail, the unit `retry_on_error` operates on.
pub type FallibleScenarioFn =
    Arc<dyn Fn(Session) -> BoxFuture<'static, Result<Session, ActionError>> + Send + Sync>;

/// `retry_on_error(func, args, {retries, delay|random_delay})` (spec §5):
/// retries `func` on failure, waiting `delay` between attempts, rethrowing
/// once the budget is exhausted. `RetryBudget::Infinity` never gives up.
pub async fn retry_on_error(
    func: FallibleScenarioFn,
    session: Session,
    mut budget: RetryBudget,
    delay: Option<DurationSpec>,
) -> Result<Session, ActionError> {
    loop {
        match func(session.clone()).await {
            Ok(session) => return Ok(session),
            Err(err) => {
                let can_retry = match budget {
                    RetryBudget::Infinity => true,
                    RetryBudget::Count(0) => false,
                    RetryBudget::Count(n) => {
                        budget = RetryBudget::Count(n - 1);
                        true
                    }
                };
                if !can_retry {
                    return Err(err);
                }
                if let Some(d) = delay {
                    tokio::time::sleep(d.as_duration()).await;
                }
            }
        }
    }
}
