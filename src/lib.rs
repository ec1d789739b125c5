// Coordination core
pub mod election;
pub mod heartbeat;
pub mod protocol;

// Plumbing shared by the core
pub mod config;
pub mod metrics;
pub mod network;
pub mod orchestrator;

// Public exports
pub use config::{Config, ConfigError};
pub use election::{Election, NodeStatus, Role};
pub use heartbeat::HeartbeatSupervisor;
pub use metrics::Metrics;
pub use protocol::{Message, PeerId};
