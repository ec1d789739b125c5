mod docker;
mod error;

use std::collections::VecDeque;
use std::sync::Arc;

use ::log::{error, info, warn};
use tokio::sync::mpsc;

pub use self::docker::DockerOrchestrator;
pub use self::error::OrchestratorError;

/// Process-management backend the failure detector escalates to.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    /// Force-terminates a named process.
    async fn kill(&self, name: &str) -> Result<(), OrchestratorError>;

    /// (Re)starts a named process.
    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Returns a sink for restart requests and starts consuming it.
    fn start_restart_sink(self: Arc<Self>) -> RestartSink;
}

/// Write-only handle onto which names needing a restart are pushed.
#[derive(Debug, Clone)]
pub struct RestartSink {
    tx: mpsc::UnboundedSender<String>,
}

impl RestartSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a restart for `name`. Returns false once the consumer is gone.
    pub fn request(&self, name: &str) -> bool {
        self.tx.send(name.to_string()).is_ok()
    }
}

/// Spawns the task that turns restart requests into kill + start calls.
pub fn spawn_restart_worker(orchestrator: Arc<dyn Orchestrator>) -> RestartSink {
    let (sink, rx) = RestartSink::channel();
    tokio::spawn(run_restart_worker(orchestrator, rx));
    sink
}

pub async fn run_restart_worker(
    orchestrator: Arc<dyn Orchestrator>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let name = match pending.pop_front() {
            Some(name) => name,
            None => match rx.recv().await {
                Some(name) => name,
                None => break,
            },
        };

        restart(orchestrator.as_ref(), &name).await;

        // Requests for the process we just restarted are already satisfied.
        while let Ok(next) = rx.try_recv() {
            if next != name && !pending.contains(&next) {
                pending.push_back(next);
            }
        }
    }

    info!("restart worker stopped");
}

async fn restart(orchestrator: &dyn Orchestrator, name: &str) {
    info!("restarting {name}");

    // The process is usually already dead, so a failed kill is expected.
    if let Err(e) = orchestrator.kill(name).await {
        warn!("kill {name} failed: {e}");
    }

    if let Err(e) = orchestrator.start_container(name).await {
        error!("start {name} failed: {e}");
    }
}

/// Backend that only logs; used when no container runtime is available.
#[derive(Debug, Default, Clone)]
pub struct NoopOrchestrator;

#[async_trait::async_trait]
impl Orchestrator for NoopOrchestrator {
    async fn kill(&self, name: &str) -> Result<(), OrchestratorError> {
        info!("noop orchestrator: kill {name}");
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError> {
        info!("noop orchestrator: start {name}");
        Ok(())
    }

    fn start_restart_sink(self: Arc<Self>) -> RestartSink {
        spawn_restart_worker(self)
    }
}
