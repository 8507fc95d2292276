//! Async and SpreadAsync actions (spec §4.7): fire-and-continue child
//! workers, joined later by name via `await(task_name)` (spec §4.3 step 5).

use std::time::Duration;

use super::{ActionOutcome, ScenarioFn};
use crate::metrics::MetricKey;
use crate::session::Session;

/// Spawns a worker evaluating `func` against a snapshot of the current
/// session; the spawn is recorded under `async_tasks[task_name]` and the
/// parent continues immediately without waiting. The child's own elapsed
/// time is recorded under `duration_<task_name>` in *its* metrics, merged
/// back into the parent when the task is awaited.
#[derive(Clone)]
pub struct AsyncAction {
    pub func: ScenarioFn,
    pub module: String,
    pub function: String,
    pub task_name: String,
}

pub async fn run_async(action: &AsyncAction, session: Session) -> ActionOutcome {
    let task_name = action.task_name.clone();
    let func = action.func.clone();
    let child_session = session.clone();
    let duration_key = format!("duration_{task_name}");

    let join = tokio::spawn(async move {
        let start = crate::timing::timestamp();
        let result = func(child_session).await;
        let elapsed = crate::timing::timestamp().saturating_sub(start);
        result.record_metric(MetricKey::Action(duration_key), elapsed)
    });

    session
        .async_tasks
        .lock()
        .await
        .entry(task_name.clone())
        .or_default()
        .push(join);

    Ok(session.push_async_task(task_name))
}

/// Spawns `rate` copies of `func`, each delayed by an incremental
/// `interval/rate` ms so the arrivals spread roughly uniformly across
/// `interval` rather than bursting at once.
#[derive(Clone)]
pub struct SpreadAsyncAction {
    pub func: ScenarioFn,
    pub rate: u32,
    pub interval_ms: u64,
    pub task_name: String,
}

pub async fn run_spread_async(action: &SpreadAsyncAction, session: Session) -> ActionOutcome {
    let step_ms = if action.rate == 0 {
        0
    } else {
        action.interval_ms / action.rate as u64
    };

    for i in 0..action.rate {
        let delay = Duration::from_millis(step_ms * i as u64);
        let func = action.func.clone();
        let child_session = session.clone();
        let duration_key = format!("duration_{}", action.task_name);

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let start = crate::timing::timestamp();
            let result = func(child_session).await;
            let elapsed = crate::timing::timestamp().saturating_sub(start);
            result.record_metric(MetricKey::Action(duration_key), elapsed)
        });

        session
            .async_tasks
            .lock()
            .await
            .entry(action.task_name.clone())
            .or_default()
            .push(join);
    }

    Ok(session.push_async_task(action.task_name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;
    use std::sync::Arc;

    #[tokio::test]
    async fn async_registers_spawn_under_task_name() {
        let session = Session::new("T", ConfigValue::empty(), false);
        let func: ScenarioFn = Arc::new(|s: Session| Box::pin(async move { s }));
        let action = AsyncAction {
            func,
            module: "Checkout".into(),
            function: "notify".into(),
            task_name: "notify_task".into(),
        };
        let out = run_async(&action, session).await.unwrap();
        assert_eq!(out.async_task_names, vec!["notify_task".to_string()]);
        assert!(out.async_tasks.lock().await.contains_key("notify_task"));
    }

    #[tokio::test]
    async fn spread_async_spawns_rate_copies() {
        let session = Session::new("T", ConfigValue::empty(), false);
        let func: ScenarioFn = Arc::new(|s: Session| Box::pin(async move { s }));
        let action = SpreadAsyncAction {
            func,
            rate: 3,
            interval_ms: 30,
            task_name: "burst".into(),
        };
        let out = run_spread_async(&action, session).await.unwrap();
        let registry = out.async_tasks.lock().await;
        assert_eq!(registry.get("burst").map(Vec::len), Some(3));
    }
}
