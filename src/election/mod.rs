mod chooser;
mod config;
mod directory;
mod error;
mod node;
mod state;

pub use self::chooser::Chooser;
pub use self::config::ElectionConfig;
pub use self::directory::PeerDirectory;
pub use self::error::ElectionError;
pub use self::node::Election;
pub use self::state::{NodeStatus, Role};
