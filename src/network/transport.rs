use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ::log::debug;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use super::{BackoffTimer, NetworkError};
use crate::protocol::{CodecError, Message, MAX_DATAGRAM};

/// Datagrams from other senders tolerated by a single `read_from` call.
pub const DEFAULT_MAX_STRAY_DATAGRAMS: usize = 16;

/// One datagram as it came off the socket: the sender is known even when the
/// payload failed to decode.
#[derive(Debug)]
pub struct Datagram {
    pub from: SocketAddr,
    pub message: Result<Message, CodecError>,
}

/// Message-level view over a shared UDP socket.
#[derive(Debug, Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    max_stray: usize,
}

impl Transport {
    pub async fn bind(addr: &str) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::from_socket(socket))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            max_stray: DEFAULT_MAX_STRAY_DATAGRAMS,
        }
    }

    pub fn with_max_stray(mut self, max_stray: usize) -> Self {
        self.max_stray = max_stray.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, message: &Message, to: SocketAddr) -> Result<(), NetworkError> {
        let bytes = message.encode()?;
        self.socket.send_to(&bytes, to).await?;
        debug!("sent {:?} to {}", message.tag(), to);
        Ok(())
    }

    /// Waits for the next datagram from anyone, with no deadline.
    pub async fn next(&self) -> Result<Datagram, NetworkError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;

        Ok(Datagram {
            from,
            message: Message::decode(&buf[..len]),
        })
    }

    /// Waits up to `wait` for the next datagram from anyone.
    pub async fn recv(&self, wait: Duration) -> Result<Datagram, NetworkError> {
        timeout(wait, self.next())
            .await
            .map_err(|_| NetworkError::Timeout)?
    }

    /// Waits up to `wait` for a datagram from `expected`.
    ///
    /// Datagrams from other senders are handed to `on_stray`; a returned
    /// message is sent back to its recipient. The number of strays handled in
    /// one call is bounded, after which the read fails.
    pub async fn read_from<F>(
        &self,
        expected: SocketAddr,
        wait: Duration,
        on_stray: &mut F,
    ) -> Result<Message, NetworkError>
    where
        F: FnMut(Datagram) -> Option<(Message, SocketAddr)>,
    {
        let deadline = Instant::now() + wait;
        let mut strays = 0usize;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetworkError::Timeout);
            }

            let datagram = self.recv(remaining).await?;
            if datagram.from == expected {
                return Ok(datagram.message?);
            }

            strays += 1;
            debug!(
                "datagram from {} while waiting for {} ({}/{})",
                datagram.from, expected, strays, self.max_stray
            );
            if let Some((reply, to)) = on_stray(datagram) {
                if let Err(e) = self.send(&reply, to).await {
                    debug!("reply to stray sender {to} failed: {e}");
                }
            }
            if strays >= self.max_stray {
                return Err(NetworkError::UnexpectedSender(strays, expected));
            }
        }
    }

    /// Sends `message` and waits for the peer's reply, retrying up to
    /// `attempts` times. Every failed attempt widens `backoff`.
    pub async fn write_with_retry<F>(
        &self,
        message: &Message,
        to: SocketAddr,
        backoff: &mut BackoffTimer,
        attempts: u32,
        mut on_stray: F,
    ) -> Result<Message, NetworkError>
    where
        F: FnMut(Datagram) -> Option<(Message, SocketAddr)>,
    {
        let attempts = attempts.max(1);
        let mut last_err = NetworkError::Timeout;

        for attempt in 1..=attempts {
            let result = match self.send(message, to).await {
                Ok(()) => {
                    self.read_from(to, backoff.next_deadline(), &mut on_stray)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!(
                        "{:?} to {} failed on attempt {}/{}: {}",
                        message.tag(),
                        to,
                        attempt,
                        attempts,
                        e
                    );
                    backoff.increase_timeout();
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

/// Stray handler that drops everything.
pub fn ignore_strays(_: Datagram) -> Option<(Message, SocketAddr)> {
    None
}
