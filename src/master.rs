//! The Master (spec §4.9): a single globally-named coordinator behind a
//! request/reply queue — no shared locks, every mutation sequences through
//! the channel (spec §9 "Global Master").

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::cluster::ClusterHandle;
use crate::load_test::{LoadTestSpec, Results};

enum Command {
    Schedule {
        spec: LoadTestSpec,
        reply: oneshot::Sender<String>,
    },
    IgnoreNode {
        node: String,
    },
    RunningLoadTests {
        reply: oneshot::Sender<Vec<String>>,
    },
    AwaitLoadTest {
        id: String,
        reply: oneshot::Sender<Option<Arc<Results>>>,
    },
}

/// A handle to the running Master actor; cheap to clone, every clone talks
/// to the same single-writer state machine.
#[derive(Clone)]
pub struct MasterHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl MasterHandle {
    pub fn spawn(cluster: ClusterHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, cluster));
        MasterHandle { commands: tx }
    }

    /// `schedule(lt, options)`: spawns a driver task and returns its task id
    /// immediately; the caller later joins it via [`MasterHandle::await_load_test`]
    /// to get the reply the spec describes ("reply to the client when the
    /// driver reports completion").
    pub async fn schedule(&self, spec: LoadTestSpec) -> String {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Schedule { spec, reply });
        rx.await.unwrap_or_default()
    }

    pub fn ignore_node(&self, node: impl Into<String>) {
        let _ = self.commands.send(Command::IgnoreNode { node: node.into() });
    }

    pub async fn running_load_tests(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::RunningLoadTests { reply });
        rx.await.unwrap_or_default()
    }

    pub async fn await_load_test(&self, id: impl Into<String>) -> Option<Arc<Results>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::AwaitLoadTest { id: id.into(), reply });
        rx.await.ok().flatten()
    }
}

struct DriverEntry {
    task: tokio::task::JoinHandle<Results>,
    completed: Option<Arc<Results>>,
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>, cluster: ClusterHandle) {
    let mut drivers: HashMap<String, DriverEntry> = HashMap::new();

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Schedule { spec, reply } => {
                let id = format!("{}-{}", spec.name, uuid::Uuid::new_v4());
                let cluster_for_driver = cluster.clone();
                info!(load_test = %id, "scheduling load test");
                let task = tokio::spawn(async move { crate::load_test::run(&spec, &cluster_for_driver).await });
                drivers.insert(id.clone(), DriverEntry { task, completed: None });
                let _ = reply.send(id);
            }
            Command::IgnoreNode { node } => cluster.ignore_node(&node),
            Command::RunningLoadTests { reply } => {
                let running: Vec<String> = drivers
                    .iter()
                    .filter(|(_, entry)| entry.completed.is_none())
                    .map(|(id, _)| id.clone())
                    .collect();
                let _ = reply.send(running);
            }
            Command::AwaitLoadTest { id, reply } => {
                let result = match drivers.remove(&id) {
                    Some(DriverEntry { completed: Some(results), .. }) => Some(results),
                    Some(DriverEntry { task, .. }) => match task.await {
                        Ok(results) => Some(Arc::new(results)),
                        Err(e) => {
                            tracing::error!(load_test = %id, error = %e, "driver task panicked");
                            None
                        }
                    },
                    None => None,
                };
                let _ = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterConfig;
    use crate::config::ConfigValue;
    use crate::load_test::LoadTestEntry;
    use crate::scenario::Scenario;
    use crate::session::Session;
    use async_trait::async_trait;
    use std::sync::Arc as StdArc;

    struct Noop;
    #[async_trait]
    impl Scenario for Noop {
        fn name(&self) -> &str {
            "Noop"
        }
        async fn run(&self, session: Session) -> Session {
            session
        }
    }

    #[tokio::test]
    async fn schedule_then_await_returns_results() {
        let master = MasterHandle::spawn(ClusterHandle::new(ClusterConfig::for_testing("n0", &[])));
        let spec = LoadTestSpec {
            name: "LT".into(),
            default_config: ConfigValue::empty(),
            entries: vec![LoadTestEntry::new(StdArc::new(Noop))],
        };
        let id = master.schedule(spec).await;
        assert!(master.running_load_tests().await.contains(&id));
        let results = master.await_load_test(&id).await;
        assert!(results.is_some());
    }

    #[tokio::test]
    async fn ignore_node_removes_it_from_placement() {
        let cluster = ClusterHandle::new(ClusterConfig::for_testing("n0", &["n1"]));
        let master = MasterHandle::spawn(cluster.clone());
        master.ignore_node("n1");
        // give the actor a tick to process the message
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(!cluster.known_nodes().contains(&"n1".to_string()));
    }
}
