//! A load test with several concurrent workers ends up with one merged
//! session whose per-worker result/metric counts all survive the merge.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use rust_loadtest::cluster::{ClusterConfig, ClusterHandle};
use rust_loadtest::config::ConfigValue;
use rust_loadtest::load_test::{LoadTestEntry, LoadTestSpec};
use rust_loadtest::metrics::MetricKey;
use rust_loadtest::scenario::{self, Scenario};
use rust_loadtest::session::Session;

struct Touch;

#[async_trait]
impl Scenario for Touch {
    fn name(&self) -> &str {
        "Touch"
    }

    async fn run(&self, session: Session) -> Session {
        session
            .record_result("hit", json!(true))
            .record_metric(MetricKey::Action("noop".into()), 7)
    }
}

#[tokio::test]
async fn concurrent_workers_merge_into_one_session_with_all_hits() {
    let cluster = ClusterHandle::new(ClusterConfig {
        self_node: "n0".into(),
        peers: vec![],
    });
    let spec = LoadTestSpec {
        name: "MergeDemo".into(),
        default_config: ConfigValue::empty(),
        entries: vec![LoadTestEntry {
            scenario: rust_loadtest::load_test::ScenarioRef::Single(Arc::new(Touch)),
            session_name: None,
            config: ConfigValue::empty(),
            concurrency: 5,
        }],
    };

    let results = rust_loadtest::load_test::run(&spec, &cluster).await;
    assert_eq!(results.timed_out, 0);

    let hits: usize = results
        .session
        .results
        .iter()
        .filter(|(k, _)| k.ends_with("/hit"))
        .map(|(_, v)| v.len())
        .sum();
    assert_eq!(hits, 5);
}

#[tokio::test]
async fn execute_nested_merges_session_name_prefixed_results() {
    struct Inner;
    #[async_trait]
    impl Scenario for Inner {
        fn name(&self) -> &str {
            "Inner"
        }
        async fn run(&self, session: Session) -> Session {
            session.record_result("step", json!("done"))
        }
    }

    let outer = Session::new("Outer", ConfigValue::empty(), false);
    let merged = scenario::execute_nested(&Inner, outer, ConfigValue::empty()).await;
    assert_eq!(
        merged.results.get("step").and_then(|v| v.first()),
        Some(&json!("done"))
    );
}
