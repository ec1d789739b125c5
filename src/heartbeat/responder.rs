use std::net::SocketAddr;

use ::log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::HeartbeatError;
use crate::network::Transport;
use crate::protocol::Message;

/// Member-side half of the heartbeat protocol: answers every probe with this
/// node's logical name until stopped.
#[derive(Debug)]
pub struct Responder {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Responder {
    pub async fn start(listen_addr: &str, name: &str) -> Result<Self, HeartbeatError> {
        let transport = Transport::bind(listen_addr).await?;
        let local_addr = transport.local_addr()?;
        let (stop, stop_rx) = oneshot::channel();

        info!("heartbeat responder '{name}' listening on {local_addr}");
        let task = tokio::spawn(respond(transport, name.to_string(), stop_rx));

        Ok(Self {
            local_addr,
            stop,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops answering probes. The socket is closed once this returns.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("heartbeat responder task failed: {e}");
        }
        info!("heartbeat responder on {} stopped", self.local_addr);
    }
}

async fn respond(transport: Transport, name: String, mut stop: oneshot::Receiver<()>) {
    let reply = Message::Ok { name };

    loop {
        let datagram = tokio::select! {
            _ = &mut stop => break,
            res = transport.next() => res,
        };

        match datagram {
            Ok(datagram) => match datagram.message {
                Ok(Message::Heartbeat) => {
                    if let Err(e) = transport.send(&reply, datagram.from).await {
                        debug!("failed to answer probe from {}: {e}", datagram.from);
                    }
                }
                Ok(other) => debug!("responder ignoring {:?} from {}", other.tag(), datagram.from),
                Err(e) => debug!("malformed probe from {}: {e}", datagram.from),
            },
            Err(e) => debug!("responder receive error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ignore_strays;
    use std::time::Duration;

    #[tokio::test]
    async fn answers_probe_with_its_name() {
        let responder = Responder::start("127.0.0.1:0", "filter_1").await.unwrap();
        let client = Transport::bind("127.0.0.1:0").await.unwrap();

        client
            .send(&Message::Heartbeat, responder.local_addr())
            .await
            .unwrap();
        let reply = client
            .read_from(responder.local_addr(), Duration::from_secs(1), &mut ignore_strays)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Message::Ok {
                name: "filter_1".to_string()
            }
        );

        responder.stop().await;
    }

    #[tokio::test]
    async fn ignores_garbage_and_keeps_answering() {
        let responder = Responder::start("127.0.0.1:0", "w").await.unwrap();
        let client = Transport::bind("127.0.0.1:0").await.unwrap();
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        raw.send_to(&[200, 1], responder.local_addr()).await.unwrap();
        client
            .send(&Message::Reject { leader_id: 1 }, responder.local_addr())
            .await
            .unwrap();
        client
            .send(&Message::Heartbeat, responder.local_addr())
            .await
            .unwrap();

        let reply = client
            .read_from(responder.local_addr(), Duration::from_secs(1), &mut ignore_strays)
            .await
            .unwrap();
        assert_eq!(reply, Message::Ok { name: "w".into() });

        responder.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_the_port() {
        let responder = Responder::start("127.0.0.1:0", "w").await.unwrap();
        let addr = responder.local_addr();
        responder.stop().await;

        let again = Responder::start(&addr.to_string(), "w").await.unwrap();
        assert_eq!(again.local_addr(), addr);
        again.stop().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_an_error() {
        let first = Responder::start("127.0.0.1:0", "a").await.unwrap();
        let err = Responder::start(&first.local_addr().to_string(), "b")
            .await
            .unwrap_err();
        assert!(matches!(err, HeartbeatError::Network(_)));
        first.stop().await;
    }
}
