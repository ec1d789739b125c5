mod detector;
mod error;
mod resolver;
mod responder;

use std::sync::Arc;
use std::time::Duration;

use ::log::info;

pub use self::detector::FailureDetector;
pub use self::error::HeartbeatError;
pub use self::resolver::{DnsResolver, Resolver, StaticResolver};
pub use self::responder::Responder;

use crate::election::Role;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Logical name this node answers probes with.
    pub name: String,
    /// Where the responder listens (the well-known heartbeat port).
    pub listen_addr: String,
    /// Local address the detector probes from.
    pub probe_bind_addr: String,
    /// Names monitored while this node coordinates.
    pub watch: Vec<String>,
    pub interval: Duration,
    pub retries: u32,
}

impl HeartbeatConfig {
    pub fn new(name: &str, listen_addr: &str) -> Self {
        Self {
            name: name.to_string(),
            listen_addr: listen_addr.to_string(),
            probe_bind_addr: "0.0.0.0:0".to_string(),
            watch: Vec::new(),
            interval: Duration::from_millis(100),
            retries: 3,
        }
    }
}

#[derive(Debug)]
pub enum ActiveHeartbeat {
    Idle,
    Responding(Responder),
    Monitoring(FailureDetector),
}

/// Keeps exactly one heartbeat role running, matching the election role.
pub struct HeartbeatSupervisor {
    config: HeartbeatConfig,
    resolver: Arc<dyn Resolver>,
    orchestrator: Arc<dyn Orchestrator>,
    metrics: Arc<Metrics>,
    active: ActiveHeartbeat,
}

impl HeartbeatSupervisor {
    pub fn new(
        config: HeartbeatConfig,
        resolver: Arc<dyn Resolver>,
        orchestrator: Arc<dyn Orchestrator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            resolver,
            orchestrator,
            metrics,
            active: ActiveHeartbeat::Idle,
        }
    }

    pub fn active(&self) -> &ActiveHeartbeat {
        &self.active
    }

    /// Starts the heartbeat role for `role`, stopping the previous one first.
    /// Electing and Member share the responder, so switching between them is
    /// a no-op.
    pub async fn switch_to(&mut self, role: Role) -> Result<(), HeartbeatError> {
        let monitor = role == Role::Coordinator;
        match (&self.active, monitor) {
            (ActiveHeartbeat::Monitoring(_), true) | (ActiveHeartbeat::Responding(_), false) => {
                return Ok(())
            }
            _ => {}
        }

        self.shutdown().await;

        self.active = if monitor {
            let sink = Arc::clone(&self.orchestrator).start_restart_sink();
            let detector = FailureDetector::start(
                &self.config,
                Arc::clone(&self.resolver),
                sink,
                Arc::clone(&self.metrics),
            )
            .await?;
            ActiveHeartbeat::Monitoring(detector)
        } else {
            ActiveHeartbeat::Responding(
                Responder::start(&self.config.listen_addr, &self.config.name).await?,
            )
        };

        info!("heartbeat role switched for {:?}", role);
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.active, ActiveHeartbeat::Idle) {
            ActiveHeartbeat::Idle => {}
            ActiveHeartbeat::Responding(responder) => responder.stop().await,
            ActiveHeartbeat::Monitoring(detector) => detector.stop().await,
        }
    }
}
