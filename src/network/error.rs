use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::CodecError;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Timeout")]
    Timeout,

    #[error("Gave up after {0} datagrams from unexpected senders while waiting for {1}")]
    UnexpectedSender(usize, SocketAddr),
}

impl NetworkError {
    /// Errors that only abort the current exchange; the caller may retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NetworkError::Bind { .. })
    }
}
