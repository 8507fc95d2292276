//! WebSocket actions: connect/send/recv/await-recv/close (spec §4.6).

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::ws_client::WsClientHandle;
use super::ActionOutcome;
use crate::errors::ActionError;
use crate::metrics::MetricKey;
use crate::session::Session;

const DEFAULT_CONNECT_BACKOFF_MS: u64 = 3_000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn named_slot(name: &Option<String>) -> String {
    name.clone().unwrap_or_default()
}

fn session_timeout(session: &Session) -> Duration {
    let ms = session
        .config
        .get("timeout")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

fn ws_connect_backoff(session: &Session) -> u64 {
    session
        .config
        .get("ws.connect_timeout")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_CONNECT_BACKOFF_MS)
}

fn derive_ws_url(session: &Session) -> Option<String> {
    let base = session.config.get("base_url")?.as_str()?;
    Some(if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    })
}

#[derive(Clone)]
pub struct WsConnectAction {
    pub name: Option<String>,
    pub url: Option<String>,
}

pub async fn run_connect(action: &WsConnectAction, session: Session) -> ActionOutcome {
    let slot = named_slot(&action.name);
    let url = match action.url.clone().or_else(|| derive_ws_url(&session)) {
        Some(url) => url,
        None => {
            return Err((
                ActionError::RequiredConfigMissing(vec!["base_url".into()]),
                session,
            ))
        }
    };
    let overall_timeout = session_timeout(&session);
    let backoff_bound = ws_connect_backoff(&session);
    let url_for_retry = url.clone();

    let attempt = async move {
        loop {
            match WsClientHandle::connect(&url_for_retry).await {
                Ok(handle) => return Ok(handle),
                Err(err) if WsClientHandle::is_transport_timeout(&err) => {
                    let delay = crate::timing::random_in_range(1, backoff_bound.max(1));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(ActionError::WebSocket(format!("ws_failed: {err}"))),
            }
        }
    };

    match tokio::time::timeout(overall_timeout, attempt).await {
        Ok(Ok(handle)) => {
            session.ws_connections.lock().await.insert(slot.clone(), Arc::new(handle));
            let assigned = session
                .assigned
                .set(["websocket", "url"], json!(url))
                .set(["websocket", "connection"], json!(true));
            let assigned = if slot.is_empty() {
                assigned
            } else {
                assigned.set(["websocket", "named_connections", slot.as_str()], json!(url))
            };
            Ok(session.with_assigned(assigned))
        }
        Ok(Err(err)) => Err((err, session)),
        Err(_) => Err((ActionError::WebSocket("ws_closed".into()), session)),
    }
}

pub fn abort_connect(action: &WsConnectAction, session: Session) -> (super::Action, Session) {
    (super::Action::WsConnect(action.clone()), session)
}

#[derive(Clone)]
pub struct WsSendAction {
    pub name: Option<String>,
    pub json: Option<Value>,
    pub text: Option<String>,
}

pub async fn run_send(action: &WsSendAction, session: Session) -> ActionOutcome {
    let slot = named_slot(&action.name);
    let handle = {
        let registry = session.ws_connections.lock().await;
        registry.get(&slot).cloned()
    };
    let Some(handle) = handle else {
        return Err((ActionError::ConnectionNotFound(slot), session));
    };

    let message = if let Some(value) = &action.json {
        Message::Text(value.to_string())
    } else {
        Message::Text(action.text.clone().unwrap_or_default())
    };

    match handle.send(message).await {
        Ok(()) => Ok(session),
        Err(err) => Err((err, session)),
    }
}

#[derive(Clone)]
pub struct WsRecvAction {
    pub name: Option<String>,
    pub timeout_ms: Option<u64>,
    pub decode_json: bool,
}

pub async fn run_recv(action: &WsRecvAction, session: Session) -> ActionOutcome {
    let slot = named_slot(&action.name);
    let handle = {
        let registry = session.ws_connections.lock().await;
        registry.get(&slot).cloned()
    };
    let Some(handle) = handle else {
        return Err((ActionError::ConnectionNotFound(slot), session));
    };

    let timeout = action
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| session_timeout(&session));
    let start = crate::timing::timestamp();

    let frame = match handle.recv(timeout).await {
        Ok(frame) => frame,
        Err(err) => return Err((err, session)),
    };
    let elapsed = crate::timing::timestamp().saturating_sub(start);

    let decoded: Value = if action.decode_json {
        match frame_to_text(&frame).and_then(|t| serde_json::from_str(&t).ok()) {
            Some(value) => value,
            None => {
                return Err((
                    ActionError::WebSocket("ws_recv decode failed".into()),
                    session,
                ))
            }
        }
    } else {
        Value::String(frame_to_text(&frame).unwrap_or_default())
    };

    let store_results = session
        .config
        .get("store_results")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut session = session.record_metric(
        MetricKey::ActionUrl("ws_recv".into(), handle.url.clone()),
        elapsed,
    );
    if store_results {
        session = session.record_result("ws_recv", decoded);
    }
    Ok(session)
}

#[derive(Clone)]
pub struct WsAwaitRecvAction {
    pub name: Option<String>,
    pub expected: Value,
}

pub async fn run_await_recv(action: &WsAwaitRecvAction, session: Session) -> ActionOutcome {
    let slot = named_slot(&action.name);
    let handle = {
        let registry = session.ws_connections.lock().await;
        registry.get(&slot).cloned()
    };
    let Some(handle) = handle else {
        return Err((ActionError::ConnectionNotFound(slot), session));
    };

    let overall_timeout = session_timeout(&session);
    let deadline = tokio::time::Instant::now() + overall_timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err((ActionError::Timeout(overall_timeout.as_millis() as u64), session));
        }
        let frame = match handle.recv(remaining).await {
            Ok(frame) => frame,
            Err(err) => return Err((err, session)),
        };
        let text = frame_to_text(&frame).unwrap_or_default();
        let matches = match &action.expected {
            Value::String(expected) => expected == &text,
            other => serde_json::from_str::<Value>(&text).map(|v| &v == other).unwrap_or(false),
        };
        if matches {
            return Ok(session);
        }
    }
}

#[derive(Clone)]
pub struct WsCloseAction {
    pub name: Option<String>,
}

pub async fn run_close(action: &WsCloseAction, session: Session) -> ActionOutcome {
    let slot = named_slot(&action.name);
    let handle = session.ws_connections.lock().await.remove(&slot);
    if let Some(handle) = handle {
        handle.close();
    }
    Ok(session)
}

pub fn abort_close(action: &WsCloseAction, session: Session) -> (super::Action, Session) {
    (super::Action::WsClose(action.clone()), session)
}

fn frame_to_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(s) => Some(s.clone()),
        Message::Binary(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;

    #[test]
    fn derives_wss_scheme_from_https_base_url() {
        let cfg = ConfigValue::from_value(json!({"base_url": "https://h:5000"}));
        let session = Session::new("T", cfg, false);
        assert_eq!(derive_ws_url(&session), Some("wss://h:5000".to_string()));
    }

    #[test]
    fn derives_ws_scheme_from_http_base_url() {
        let cfg = ConfigValue::from_value(json!({"base_url": "http://h:5000"}));
        let session = Session::new("T", cfg, false);
        assert_eq!(derive_ws_url(&session), Some("ws://h:5000".to_string()));
    }

    #[tokio::test]
    async fn send_without_connect_errors_with_connection_not_found() {
        let session = Session::new("T", ConfigValue::empty(), false);
        let action = WsSendAction {
            name: None,
            json: None,
            text: Some("hi".into()),
        };
        let result = run_send(&action, session).await;
        assert!(matches!(
            result,
            Err((ActionError::ConnectionNotFound(_), _))
        ));
    }
}
