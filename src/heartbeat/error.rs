use thiserror::Error;

use crate::network::NetworkError;

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cannot resolve '{name}': {reason}")]
    Unresolvable { name: String, reason: String },
}
