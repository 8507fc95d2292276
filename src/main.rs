//! Thin CLI driver (spec §1 "out of scope: the command-line driver"): wires
//! the cluster node set, the [`Master`], and the admin HTTP surface together
//! and leaves the process running until it's asked to stop. A real
//! deployment registers its own [`rust_loadtest::admin::ScenarioRegistry`]
//! entries before calling [`run`]; this binary only demonstrates the wiring
//! with an empty registry, mirroring the teacher's `main.rs` role of reading
//! env config and starting the metrics/health servers.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rust_loadtest::admin::{AdminState, BasicAuthConfig, ScenarioRegistry};
use rust_loadtest::cluster::{ClusterConfig, ClusterHandle};
use rust_loadtest::config_merge::AdminConfig;
use rust_loadtest::master::MasterHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    rust_loadtest::prom_metrics::register_metrics()?;
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);
    tokio::spawn(rust_loadtest::prom_metrics::start_metrics_server(
        metrics_port,
        std::sync::Arc::new(std::sync::Mutex::new(prometheus::default_registry().clone())),
    ));

    let cluster = ClusterHandle::new(ClusterConfig::from_env());
    let master = MasterHandle::spawn(cluster.clone());
    let registry = Arc::new(ScenarioRegistry::new());
    let admin_config = AdminConfig::from_env();

    tracing::info!(
        node = %cluster.config().self_node,
        peers = ?cluster.config().peers,
        "starting rust_loadtest driver"
    );

    let addr: SocketAddr = admin_config
        .bind_addr
        .parse()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 8089).into());

    let admin_state = AdminState {
        master,
        registry,
        auth: BasicAuthConfig {
            realm: admin_config.realm,
            username: admin_config.username,
            password: admin_config.password,
        },
    };

    rust_loadtest::admin::start(addr, admin_state).await;
    Ok(())
}
