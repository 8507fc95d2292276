//! The HTTP administration surface (spec §6): a contract-only hyper
//! service that schedules load tests against the [`MasterHandle`], mirroring
//! the teacher's `cluster.rs::start_health_server`/
//! `prom_metrics.rs::start_metrics_server` hyper-service pattern. This is
//! not a production auth/rate-limit layer (spec §1 "out of scope"); it
//! exists so the core's scheduling contract has a concrete external-facing
//! shape to exercise in tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::ConfigValue;
use crate::load_test::{LoadTestEntry, LoadTestSpec, ScenarioRef};
use crate::master::MasterHandle;
use crate::scenario::Scenario;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maps the dotted `"Module.Scenario"` names accepted by `POST /load_tests`
/// to a constructed scenario instance (spec §6 "test: Dotted.Module").
#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: HashMap<String, Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, dotted_name: impl Into<String>, scenario: Arc<dyn Scenario>) -> Self {
        self.scenarios.insert(dotted_name.into(), scenario);
        self
    }

    pub fn lookup(&self, dotted_name: &str) -> Option<Arc<dyn Scenario>> {
        self.scenarios.get(dotted_name).cloned()
    }
}

/// HTTP Basic auth credentials required to reach `/load_tests` (spec §6
/// "Requires Basic auth with a configured realm").
#[derive(Clone)]
pub struct BasicAuthConfig {
    pub realm: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AdminState {
    pub master: MasterHandle,
    pub registry: Arc<ScenarioRegistry>,
    pub auth: BasicAuthConfig,
}

#[derive(Debug, Deserialize)]
struct LoadTestRequest {
    test: String,
    #[serde(default)]
    options: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PostBody {
    load_tests: Vec<LoadTestRequest>,
}

#[derive(Debug, Serialize)]
struct LoadTestsResponse {
    load_tests: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScheduledResponse {
    scheduled: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body.into()))
        .unwrap()
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Response<Body> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn unauthorized(realm: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("WWW-Authenticate", format!("Basic realm=\"{}\"", realm))
        .body(Body::from("unauthorized"))
        .unwrap()
}

fn check_basic_auth(req: &Request<Body>, auth: &BasicAuthConfig) -> bool {
    let header = match req.headers().get(hyper::header::AUTHORIZATION) {
        Some(v) => v,
        None => return false,
    };
    let header = match header.to_str() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let encoded = match header.strip_prefix("Basic ") {
        Some(v) => v,
        None => return false,
    };
    let decoded = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let decoded = match String::from_utf8(decoded) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match decoded.split_once(':') {
        Some((user, pass)) => user == auth.username && pass == auth.password,
        None => false,
    }
}

/// Builds a single-entry [`LoadTestSpec`] from one `{test, options}` request
/// item, looking the scenario up by its dotted name in the registry.
fn build_spec(req: LoadTestRequest, registry: &ScenarioRegistry) -> Result<LoadTestSpec, String> {
    let scenario = registry
        .lookup(&req.test)
        .ok_or_else(|| format!("unknown load test: {}", req.test))?;
    let options = req.options;
    let default_config = ConfigValue::from_value(
        options
            .get("config")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})),
    );
    let concurrency = options
        .get("concurrency")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1) as usize;
    let session_name = options
        .get("session_name")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    Ok(LoadTestSpec {
        name: req.test.clone(),
        default_config,
        entries: vec![LoadTestEntry {
            scenario: ScenarioRef::Single(scenario),
            session_name,
            config: ConfigValue::empty(),
            concurrency,
        }],
    })
}

/// The routing table itself, exposed so a caller embedding this surface in
/// its own hyper server (or an integration test) can dispatch a request
/// without going through [`start`]'s bound listener.
pub async fn handle(req: Request<Body>, state: AdminState) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/") | (&Method::GET, "/healthcheck") | (&Method::GET, "/version") => {
            Ok(text_response(StatusCode::OK, VERSION))
        }
        (&Method::GET, "/load_tests") => {
            let running = state.master.running_load_tests().await;
            Ok(json_response(
                StatusCode::OK,
                &LoadTestsResponse { load_tests: running },
            ))
        }
        (&Method::POST, "/load_tests") => {
            if !check_basic_auth(&req, &state.auth) {
                return Ok(unauthorized(&state.auth.realm));
            }
            let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
                Ok(b) => b,
                Err(e) => {
                    error!(error = %e, "failed reading admin request body");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &ErrorResponse { error: e.to_string() },
                    ));
                }
            };
            let parsed: PostBody = match serde_json::from_slice(&body_bytes) {
                Ok(p) => p,
                Err(e) => {
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &ErrorResponse { error: e.to_string() },
                    ))
                }
            };

            let mut scheduled = Vec::new();
            for req in parsed.load_tests {
                let test_name = req.test.clone();
                match build_spec(req, &state.registry) {
                    Ok(spec) => {
                        info!(test = %test_name, "scheduling load test via admin surface");
                        let id = state.master.schedule(spec).await;
                        scheduled.push(id);
                    }
                    Err(e) => {
                        warn!(test = %test_name, error = %e, "rejecting unschedulable load test");
                        return Ok(json_response(
                            StatusCode::BAD_REQUEST,
                            &ErrorResponse { error: e },
                        ));
                    }
                }
            }
            Ok(json_response(
                StatusCode::ACCEPTED,
                &ScheduledResponse { scheduled },
            ))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "not found")),
    }
}

/// Starts the admin HTTP server on `addr`, serving the contract described in
/// spec §6 until the process exits.
pub async fn start(addr: SocketAddr, state: AdminState) {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { handle(req, state).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(addr = %addr, "admin HTTP surface listening");
    if let Err(e) = server.await {
        error!(error = %e, "admin HTTP server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterConfig, ClusterHandle};
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;
    #[async_trait]
    impl Scenario for Noop {
        fn name(&self) -> &str {
            "Noop"
        }
        async fn run(&self, session: crate::session::Session) -> crate::session::Session {
            session
        }
    }

    fn test_state() -> AdminState {
        let cluster = ClusterHandle::new(ClusterConfig::for_testing("n0", &[]));
        let master = MasterHandle::spawn(cluster);
        let registry = Arc::new(ScenarioRegistry::new().register("Demo.Noop", Arc::new(Noop)));
        AdminState {
            master,
            registry,
            auth: BasicAuthConfig {
                realm: "loadtest".into(),
                username: "admin".into(),
                password: "secret".into(),
            },
        }
    }

    #[tokio::test]
    async fn healthcheck_returns_version() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/healthcheck")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_load_tests_requires_basic_auth() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/load_tests")
            .body(Body::from(json!({"load_tests": []}).to_string()))
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn post_load_tests_schedules_known_scenario() {
        let state = test_state();
        let creds = base64::engine::general_purpose::STANDARD.encode("admin:secret");
        let body = json!({"load_tests": [{"test": "Demo.Noop", "options": {"concurrency": 2}}]});
        let req = Request::builder()
            .method(Method::POST)
            .uri("/load_tests")
            .header("Authorization", format!("Basic {}", creds))
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn post_load_tests_rejects_unknown_scenario() {
        let state = test_state();
        let creds = base64::engine::general_purpose::STANDARD.encode("admin:secret");
        let body = json!({"load_tests": [{"test": "Nope.Nope", "options": {}}]});
        let req = Request::builder()
            .method(Method::POST)
            .uri("/load_tests")
            .header("Authorization", format!("Basic {}", creds))
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_load_tests_lists_running() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/load_tests")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
