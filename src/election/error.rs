use thiserror::Error;

use crate::heartbeat::HeartbeatError;
use crate::network::NetworkError;
use crate::protocol::PeerId;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Cannot resolve address '{address}' of peer {id}")]
    Unresolvable { id: PeerId, address: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),
}
