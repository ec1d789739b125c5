use std::sync::Arc;

use tokio::process::Command;

use super::{spawn_restart_worker, Orchestrator, OrchestratorError, RestartSink};

/// Drives containers through the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerOrchestrator {
    binary: String,
}

impl DockerOrchestrator {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    async fn run(&self, verb: &str, name: &str) -> Result<(), OrchestratorError> {
        let output = Command::new(&self.binary)
            .arg(verb)
            .arg(name)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    OrchestratorError::Unavailable(format!("'{}' not found", self.binary))
                }
                _ => OrchestratorError::IoError(e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(OrchestratorError::CommandFailed {
            command: format!("{} {} {}", self.binary, verb, name),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl Default for DockerOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn kill(&self, name: &str) -> Result<(), OrchestratorError> {
        self.run("kill", name).await
    }

    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError> {
        self.run("start", name).await
    }

    fn start_restart_sink(self: Arc<Self>) -> RestartSink {
        spawn_restart_worker(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_reported_unavailable() {
        let docker = DockerOrchestrator::with_binary("/nonexistent/warden-docker");
        let err = docker.kill("worker_1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_with_command() {
        let docker = DockerOrchestrator::with_binary("false");
        let err = docker.start_container("worker_1").await.unwrap_err();
        match err {
            OrchestratorError::CommandFailed { command, .. } => {
                assert_eq!(command, "false start worker_1");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
