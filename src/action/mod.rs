//! The polymorphic action abstraction and its dispatch table (spec §4.4,
//! §9 "a new action is a new variant plus two functions").
//!
//! Every action variant is implemented by a free `run` (and, where cleanup
//! matters, `abort`) function in its own submodule; [`Action`] just routes to
//! them. This avoids the deep-inheritance trap the design notes call out —
//! adding an action means adding a variant and its pair of functions, not a
//! new trait impl hierarchy.

pub mod async_task;
pub mod call;
pub mod http;
pub mod loop_delay;
pub mod run_scenario;
pub mod websocket;
pub mod ws_client;

use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::errors::SessionError;
use crate::session::Session;

pub use async_task::{AsyncAction, SpreadAsyncAction};
pub use call::CallAction;
pub use http::HttpAction;
pub use loop_delay::{DelayAction, LoopAction};
pub use run_scenario::{Placement, RunScenarioAction};
pub use websocket::{WsAwaitRecvAction, WsCloseAction, WsConnectAction, WsRecvAction, WsSendAction};

/// `run` returns the advanced session, or the action error paired with the
/// *original* session so `run_action` can record the failure without losing
/// state (spec §4.4).
pub type ActionOutcome = Result<Session, (crate::errors::ActionError, Session)>;

/// A scenario function reference used by Call/Async/SpreadAsync and Sequence
/// composition: a boxed async closure over a session (spec §4.7).
pub type ScenarioFn = Arc<dyn Fn(Session) -> BoxFuture<'static, Session> + Send + Sync>;

/// A tagged action variant (spec §3). Each holds its own payload and is
/// routed to its submodule's `run`/`abort` pair below.
#[derive(Clone)]
pub enum Action {
    Http(HttpAction),
    WsConnect(WsConnectAction),
    WsSend(WsSendAction),
    WsRecv(WsRecvAction),
    WsAwaitRecv(WsAwaitRecvAction),
    WsClose(WsCloseAction),
    Loop(LoopAction),
    Delay(DelayAction),
    Call(CallAction),
    Async(AsyncAction),
    SpreadAsync(SpreadAsyncAction),
    RunScenario(RunScenarioAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Http(_) => "http",
            Action::WsConnect(_) => "ws_connect",
            Action::WsSend(_) => "ws_send",
            Action::WsRecv(_) => "ws_recv",
            Action::WsAwaitRecv(_) => "ws_await_recv",
            Action::WsClose(_) => "ws_close",
            Action::Loop(_) => "loop",
            Action::Delay(_) => "delay",
            Action::Call(_) => "call",
            Action::Async(_) => "async",
            Action::SpreadAsync(_) => "spread_async",
            Action::RunScenario(_) => "run_scenario",
        }
    }

    pub fn run(&self, session: Session) -> BoxFuture<'_, ActionOutcome> {
        Box::pin(async move {
            match self {
                Action::Http(a) => http::run(a, session).await,
                Action::WsConnect(a) => websocket::run_connect(a, session).await,
                Action::WsSend(a) => websocket::run_send(a, session).await,
                Action::WsRecv(a) => websocket::run_recv(a, session).await,
                Action::WsAwaitRecv(a) => websocket::run_await_recv(a, session).await,
                Action::WsClose(a) => websocket::run_close(a, session).await,
                Action::Loop(a) => loop_delay::run_loop(a, session).await,
                Action::Delay(a) => loop_delay::run_delay(a, session).await,
                Action::Call(a) => call::run(a, session).await,
                Action::Async(a) => async_task::run_async(a, session).await,
                Action::SpreadAsync(a) => async_task::run_spread_async(a, session).await,
                Action::RunScenario(a) => run_scenario::run(a, session).await,
            }
        })
    }

    /// `abort(action, session) -> ok+Action+Session` (spec §4.4): default is
    /// a no-op; WebSocket actions override it to drop connection slots.
    pub fn abort(&self, session: Session) -> (Action, Session) {
        match self {
            Action::WsConnect(a) => websocket::abort_connect(a, session),
            Action::WsClose(a) => websocket::abort_close(a, session),
            other => (other.clone(), session),
        }
    }
}

/// `run_action(session, action)` (spec §4.4): cancellation short-circuits to
/// a no-op; otherwise run the action and, on error, record it under
/// `errors[descriptor]` without aborting the pipeline — the scenario author
/// opts into abort explicitly (spec §7 propagation policy).
pub async fn run_action(action: &Action, session: Session, descriptor: &str) -> Session {
    if session.is_cancelled() {
        return session;
    }

    let scenario_name = session.scenario.clone();
    let start = crate::timing::timestamp();
    let outcome = action.run(session).await;
    let elapsed = crate::timing::timestamp().saturating_sub(start);
    crate::prom_metrics::SCENARIO_STEP_DURATION_SECONDS
        .with_label_values(&[&scenario_name, descriptor])
        .observe(elapsed as f64 / 1000.0);

    match outcome {
        Ok(new_session) => {
            crate::prom_metrics::SCENARIO_STEPS_TOTAL
                .with_label_values(&[&scenario_name, descriptor, "ok"])
                .inc();
            new_session
        }
        Err((err, original_session)) => {
            crate::prom_metrics::SCENARIO_STEPS_TOTAL
                .with_label_values(&[&scenario_name, descriptor, "error"])
                .inc();
            tracing::warn!(action = descriptor, error = %err, "action failed");
            let timestamp = crate::timing::timestamp();
            let session_error = SessionError::new(descriptor, &err, timestamp);
            original_session.record_error(descriptor, session_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    #[tokio::test]
    async fn run_action_is_noop_once_cancelled() {
        let session = Session::new("T", ConfigValue::empty(), false).cancel("done");
        let action = Action::Delay(DelayAction {
            duration: crate::timing::DurationSpec::Fixed(0),
        });
        let out = run_action(&action, session.clone(), "delay").await;
        assert_eq!(out.cancellation, session.cancellation);
        assert!(out.errors.is_empty());
    }
}
