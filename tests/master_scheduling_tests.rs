//! The admin HTTP surface schedules a load test onto the Master and reports
//! it back out through `GET /load_tests` before completion.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Body, Method, Request, StatusCode};
use serde_json::json;

use base64::Engine;
use rust_loadtest::admin::{self, AdminState, BasicAuthConfig, ScenarioRegistry};
use rust_loadtest::cluster::{ClusterConfig, ClusterHandle};
use rust_loadtest::master::MasterHandle;
use rust_loadtest::scenario::Scenario;
use rust_loadtest::session::Session;

struct SlowNoop;

#[async_trait]
impl Scenario for SlowNoop {
    fn name(&self) -> &str {
        "SlowNoop"
    }

    async fn run(&self, session: Session) -> Session {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session
    }
}

fn state() -> AdminState {
    let cluster = ClusterHandle::new(ClusterConfig {
        self_node: "n0".into(),
        peers: vec![],
    });
    let master = MasterHandle::spawn(cluster);
    let registry = Arc::new(ScenarioRegistry::new().register("Demo.SlowNoop", Arc::new(SlowNoop)));
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
async fn scheduled_load_test_is_visible_before_it_completes() {
    let state = state();
    let creds = base64::engine::general_purpose::STANDARD.encode("admin:secret");

    let body = json!({"load_tests": [{"test": "Demo.SlowNoop", "options": {"concurrency": 1}}]});
    let post = Request::builder()
        .method(Method::POST)
        .uri("/load_tests")
        .header("Authorization", format!("Basic {}", creds))
        .body(Body::from(body.to_string()))
        .unwrap();

    let resp = admin::handle(post, state.clone()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let running = state.master.running_load_tests().await;
    assert_eq!(running.len(), 1);

    let get = Request::builder()
        .method(Method::GET)
        .uri("/load_tests")
        .body(Body::empty())
        .unwrap();
    let resp = admin::handle(get, state).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
