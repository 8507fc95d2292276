//! HTTP action driver (spec §4.5).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::ActionOutcome;
use crate::errors::ActionError;
use crate::metrics::MetricKey;
use crate::session::Session;

/// `add_body`'s two encodings (spec §4.5).
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Form(Value),
}

/// One HTTP action (spec §4.5). `client` is the process-wide named
/// connection-pool handle (spec §5 shared resources), built once per worker
/// and shared by every HTTP action it runs.
#[derive(Clone)]
pub struct HttpAction {
    pub client: Arc<reqwest::Client>,
    pub method: reqwest::Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub params: Value,
    pub body: Option<Body>,
    pub metrics_url: Option<String>,
}

/// URL synthesis: absolute paths pass through untouched, relative ones are
/// joined to `config.base_url` (spec §4.5).
pub fn synthesize_url(base_url: Option<&str>, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match base_url {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
        None => path.to_string(),
    }
}

/// The metric key url: `metrics_url` wins over the literal path/url when set
/// so high-cardinality ids don't explode the histogram key space (spec
/// §4.5).
fn metrics_key_url(action: &HttpAction, base_url: Option<&str>, skip_query_params: bool) -> String {
    if let Some(template) = &action.metrics_url {
        return synthesize_url(base_url, template);
    }
    let url = synthesize_url(base_url, &action.path);
    if skip_query_params {
        url.split('?').next().unwrap_or(&url).to_string()
    } else {
        url
    }
}

pub async fn run(action: &HttpAction, session: Session) -> ActionOutcome {
    let base_url = session
        .config
        .get("base_url")
        .and_then(Value::as_str)
        .map(str::to_string);
    let url = synthesize_url(base_url.as_deref(), &action.path);
    let skip_query_params = session
        .config
        .get("skip_query_params_in_metrics")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let metrics_url = metrics_key_url(action, base_url.as_deref(), skip_query_params);

    let mut builder = action.client.request(action.method.clone(), &url);

    // config.http options merge in first, per-call params/body override.
    if let Some(http_opts) = session.config.get("http").and_then(Value::as_object) {
        if let Some(extra_headers) = http_opts.get("headers").and_then(Value::as_object) {
            for (k, v) in extra_headers {
                if let Some(v) = v.as_str() {
                    builder = builder.header(k, v);
                }
            }
        }
    }
    for (k, v) in &action.headers {
        builder = builder.header(k, v);
    }

    if action.method == reqwest::Method::GET {
        if let Some(params) = action.params.as_object() {
            let query: Vec<(String, String)> = params
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect();
            builder = builder.query(&query);
        }
    } else if let Some(params) = action.params.as_object() {
        if !params.is_empty() {
            builder = builder.query(
                &params
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect::<Vec<_>>(),
            );
        }
    }

    builder = match &action.body {
        Some(Body::Json(value)) => builder.json(value),
        Some(Body::Form(value)) => builder.form(value),
        None => builder,
    };

    if !session.cookies.is_empty() {
        builder = builder.header("cookie", session.cookies.join("; "));
    }

    if let Some(auth) = session.config.get("basic_auth").and_then(Value::as_object) {
        let user = auth.get("user").and_then(Value::as_str).unwrap_or("");
        let pass = auth.get("password").and_then(Value::as_str);
        builder = builder.basic_auth(user, pass);
    }

    crate::prom_metrics::CONCURRENT_REQUESTS.inc();
    let start = crate::timing::timestamp();
    let result = builder.send().await;
    let elapsed = crate::timing::timestamp().saturating_sub(start);
    crate::prom_metrics::CONCURRENT_REQUESTS.dec();
    crate::prom_metrics::REQUEST_TOTAL.inc();
    crate::prom_metrics::REQUEST_DURATION_SECONDS.observe(elapsed as f64 / 1000.0);

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            let categorized = crate::errors::CategorizedError::from_reqwest(&err, Some(url.clone()));
            return Err((ActionError::Http(categorized.to_string()), session));
        }
    };
    crate::prom_metrics::REQUEST_STATUS_CODES
        .with_label_values(&[response.status().as_str()])
        .inc();

    let store_results = session
        .config
        .get("store_results")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let captured: Vec<String> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
        .collect();

    let status = response.status();
    let body_text = if store_results {
        response.text().await.unwrap_or_default()
    } else {
        String::new()
    };

    let mut session = session.record_metric(
        MetricKey::ActionUrl(http_method_label(&action.method), metrics_url),
        elapsed,
    );
    if !captured.is_empty() {
        session = session.append_cookie(captured.join("; "));
    }

    if store_results {
        session = session.record_result(
            "http",
            serde_json::json!({"status": status.as_u16(), "body": body_text}),
        );
    }

    Ok(session)
}

fn http_method_label(method: &reqwest::Method) -> String {
    method.as_str().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_passes_through() {
        assert_eq!(
            synthesize_url(Some("http://h:5000/api"), "https://other.example/x"),
            "https://other.example/x"
        );
    }

    #[test]
    fn relative_path_joins_base_url() {
        assert_eq!(
            synthesize_url(Some("http://h:5000/api"), "/x/1.json"),
            "http://h:5000/api/x/1.json"
        );
    }

    #[test]
    fn metrics_url_template_overrides_real_path() {
        let action = HttpAction {
            client: Arc::new(reqwest::Client::new()),
            method: reqwest::Method::GET,
            path: "/x/1.json".into(),
            headers: HashMap::new(),
            params: Value::Null,
            body: None,
            metrics_url: Some("/x/ID.json".into()),
        };
        assert_eq!(
            metrics_key_url(&action, Some("http://h:5000/api"), false),
            "http://h:5000/api/x/ID.json"
        );
    }

    #[test]
    fn skip_query_params_strips_query_string() {
        let action = HttpAction {
            client: Arc::new(reqwest::Client::new()),
            method: reqwest::Method::GET,
            path: "/x?id=42".into(),
            headers: HashMap::new(),
            params: Value::Null,
            body: None,
            metrics_url: None,
        };
        assert_eq!(
            metrics_key_url(&action, Some("http://h"), true),
            "http://h/x"
        );
    }
}
