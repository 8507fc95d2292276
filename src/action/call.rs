//! CallFunction action (spec §4.7): invokes a named scenario function and
//! records its wall time under `MetricKey::Call(module, func)`.

use super::{ActionOutcome, ScenarioFn};
use crate::metrics::MetricKey;
use crate::session::Session;

#[derive(Clone)]
pub struct CallAction {
    pub func: ScenarioFn,
    pub scenario_module: String,
    pub func_name: String,
}

pub async fn run(action: &CallAction, session: Session) -> ActionOutcome {
    let start = crate::timing::timestamp();
    let session = (action.func)(session).await;
    let elapsed = crate::timing::timestamp().saturating_sub(start);
    Ok(session.record_metric(
        MetricKey::Call(action.scenario_module.clone(), action.func_name.clone()),
        elapsed,
    ))
}
