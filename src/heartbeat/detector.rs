use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ::log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::{HeartbeatConfig, HeartbeatError, Resolver};
use crate::metrics::Metrics;
use crate::network::Transport;
use crate::orchestrator::RestartSink;
use crate::protocol::Message;

/// Unresolvable names are retried after this many heartbeat intervals.
const RESOLVE_RETRY_FACTOR: u32 = 5;

const PROBE_QUEUE: usize = 256;

/// Coordinator-side failure detector: one timer task per watched name, one
/// shared writer for probes and one shared reader that routes acknowledgments
/// to the timer owning the name.
///
/// The timer table is owned here; tasks only see their own channels.
#[derive(Debug)]
pub struct FailureDetector {
    local_addr: SocketAddr,
    timers: Vec<TimerHandle>,
    reader_stop: oneshot::Sender<()>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

#[derive(Debug)]
struct TimerHandle {
    name: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FailureDetector {
    pub async fn start(
        config: &HeartbeatConfig,
        resolver: Arc<dyn Resolver>,
        restart_sink: RestartSink,
        metrics: Arc<Metrics>,
    ) -> Result<Self, HeartbeatError> {
        let transport = Transport::bind(&config.probe_bind_addr).await?;
        let local_addr = transport.local_addr()?;

        let (probe_tx, probe_rx) = mpsc::channel::<SocketAddr>(PROBE_QUEUE);
        let mut routes: HashMap<String, mpsc::Sender<()>> = HashMap::new();
        let mut timers = Vec::with_capacity(config.watch.len());

        for name in &config.watch {
            if routes.contains_key(name) {
                continue;
            }
            let (ack_tx, ack_rx) = mpsc::channel(1);
            routes.insert(name.clone(), ack_tx);

            let (stop, stop_rx) = oneshot::channel();
            let timer = ProcessTimer {
                name: name.clone(),
                address: None,
                interval: config.interval,
                retries: config.retries.max(1),
                resolver: Arc::clone(&resolver),
                probes: probe_tx.clone(),
                acks: ack_rx,
                restart_sink: restart_sink.clone(),
                metrics: Arc::clone(&metrics),
            };
            timers.push(TimerHandle {
                name: name.clone(),
                stop,
                task: tokio::spawn(timer.run(stop_rx)),
            });
        }
        drop(probe_tx);

        let (reader_stop, reader_stop_rx) = oneshot::channel();
        let reader = tokio::spawn(route_acks(transport.clone(), routes, reader_stop_rx));
        let writer = tokio::spawn(send_probes(transport, probe_rx));

        info!(
            "failure detector watching {} processes from {}",
            timers.len(),
            local_addr
        );

        Ok(Self {
            local_addr,
            timers,
            reader_stop,
            reader,
            writer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn watched(&self) -> impl Iterator<Item = &str> {
        self.timers.iter().map(|t| t.name.as_str())
    }

    /// Signals every timer, waits for all of them, then releases the socket.
    pub async fn stop(self) {
        let mut tasks = Vec::with_capacity(self.timers.len());
        for timer in self.timers {
            debug!("stopping timer for {}", timer.name);
            let _ = timer.stop.send(());
            tasks.push((timer.name, timer.task));
        }
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!("timer for {name} failed: {e}");
            }
        }

        // Every probe sender lived in a timer, so the writer drains and exits.
        if let Err(e) = self.writer.await {
            warn!("probe writer failed: {e}");
        }
        let _ = self.reader_stop.send(());
        if let Err(e) = self.reader.await {
            warn!("ack reader failed: {e}");
        }

        info!("failure detector on {} stopped", self.local_addr);
    }
}

async fn send_probes(transport: Transport, mut probes: mpsc::Receiver<SocketAddr>) {
    while let Some(addr) = probes.recv().await {
        if let Err(e) = transport.send(&Message::Heartbeat, addr).await {
            debug!("probe to {addr} failed: {e}");
        }
    }
}

async fn route_acks(
    transport: Transport,
    routes: HashMap<String, mpsc::Sender<()>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let datagram = tokio::select! {
            _ = &mut stop => break,
            res = transport.next() => res,
        };

        match datagram {
            Ok(datagram) => match datagram.message {
                Ok(Message::Ok { name }) => match routes.get(&name) {
                    // A full channel already holds an unread ack.
                    Some(ack) => {
                        let _ = ack.try_send(());
                    }
                    None => debug!("ack for unwatched process '{name}' from {}", datagram.from),
                },
                Ok(other) => debug!("detector ignoring {:?} from {}", other.tag(), datagram.from),
                Err(e) => debug!("malformed ack from {}: {e}", datagram.from),
            },
            Err(e) => debug!("detector receive error: {e}"),
        }
    }
}

enum Verdict {
    Stopped,
    Dead,
}

struct ProcessTimer {
    name: String,
    address: Option<SocketAddr>,
    interval: Duration,
    retries: u32,
    resolver: Arc<dyn Resolver>,
    probes: mpsc::Sender<SocketAddr>,
    acks: mpsc::Receiver<()>,
    restart_sink: RestartSink,
    metrics: Arc<Metrics>,
}

impl ProcessTimer {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        loop {
            let Some(addr) = self.resolve(&mut stop).await else {
                break;
            };
            match self.watch(addr, &mut stop).await {
                Verdict::Stopped => break,
                Verdict::Dead => continue,
            }
        }
        debug!("timer for {} exited", self.name);
    }

    async fn resolve(&mut self, stop: &mut oneshot::Receiver<()>) -> Option<SocketAddr> {
        loop {
            let resolved = tokio::select! {
                _ = &mut *stop => return None,
                res = self.resolver.resolve(&self.name) => res,
            };

            match resolved {
                Ok(addr) => {
                    if self.address != Some(addr) {
                        info!("{} resolved to {}", self.name, addr);
                    }
                    self.address = Some(addr);
                    return Some(addr);
                }
                Err(e) => {
                    warn!("{e}; requesting restart of {}", self.name);
                    self.request_restart();
                    tokio::select! {
                        _ = &mut *stop => return None,
                        _ = sleep(self.interval * RESOLVE_RETRY_FACTOR) => {}
                    }
                }
            }
        }
    }

    async fn watch(&mut self, addr: SocketAddr, stop: &mut oneshot::Receiver<()>) -> Verdict {
        let mut retries_left = self.retries;

        loop {
            while self.acks.try_recv().is_ok() {}

            if self.probes.send(addr).await.is_err() {
                return Verdict::Stopped;
            }

            let ack = tokio::select! {
                _ = &mut *stop => return Verdict::Stopped,
                ack = timeout(self.interval, self.acks.recv()) => ack,
            };

            match ack {
                Ok(Some(())) => {
                    retries_left = self.retries;
                    tokio::select! {
                        _ = &mut *stop => return Verdict::Stopped,
                        _ = sleep(self.interval / 2) => {}
                    }
                }
                Ok(None) => return Verdict::Stopped,
                Err(_) => {
                    self.metrics.record_heartbeat_timeout();
                    retries_left -= 1;
                    debug!(
                        "no heartbeat from {} at {} ({} retries left)",
                        self.name, addr, retries_left
                    );
                    if retries_left == 0 {
                        warn!("{} at {} is unresponsive; requesting restart", self.name, addr);
                        self.request_restart();
                        return Verdict::Dead;
                    }
                }
            }
        }
    }

    fn request_restart(&self) {
        self.metrics.record_restart_request();
        if !self.restart_sink.request(&self.name) {
            warn!("restart sink closed; dropping restart of {}", self.name);
        }
    }
}
