//! Loop and Delay actions (spec §4.7).

use std::sync::Arc;

use super::{Action, ActionOutcome};
use crate::session::Session;
use crate::timing::DurationSpec;

/// Repeats `inner` while `now - start <= duration`, then returns. A failure
/// from `inner` propagates as the Loop's own failure.
#[derive(Clone)]
pub struct LoopAction {
    pub inner: Arc<Action>,
    pub duration: DurationSpec,
}

pub async fn run_loop(action: &LoopAction, session: Session) -> ActionOutcome {
    let start = crate::timing::timestamp();
    let bound = action.duration.resolve_ms();
    let mut session = session;
    loop {
        if crate::timing::timestamp().saturating_sub(start) > bound {
            return Ok(session);
        }
        session = action.inner.run(session).await?;
    }
}

/// Suspends the worker for a fixed or `[1, N]`-random duration.
#[derive(Clone)]
pub struct DelayAction {
    pub duration: DurationSpec,
}

pub async fn run_delay(action: &DelayAction, session: Session) -> ActionOutcome {
    tokio::time::sleep(action.duration.as_duration()).await;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    #[tokio::test]
    async fn loop_runs_inner_at_least_once_with_zero_duration() {
        let session = Session::new("T", ConfigValue::empty(), false);
        let inner = Arc::new(Action::Delay(DelayAction {
            duration: DurationSpec::Fixed(0),
        }));
        let action = LoopAction {
            inner,
            duration: DurationSpec::Fixed(0),
        };
        let out = run_loop(&action, session).await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn delay_returns_the_same_session_unchanged() {
        let session = Session::new("T", ConfigValue::empty(), false).record_result("x", serde_json::json!(1));
        let action = DelayAction {
            duration: DurationSpec::Fixed(1),
        };
        let out = run_delay(&action, session.clone()).await.unwrap();
        assert_eq!(out.results.get("x"), session.results.get("x"));
    }
}
