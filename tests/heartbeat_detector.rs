use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use warden::heartbeat::{
    FailureDetector, HeartbeatConfig, HeartbeatError, Resolver, Responder, StaticResolver,
};
use warden::network::Transport;
use warden::orchestrator::RestartSink;
use warden::protocol::Message;
use warden::Metrics;

fn detector_config(watch: &[&str]) -> HeartbeatConfig {
    let mut config = HeartbeatConfig::new("coordinator_1", "127.0.0.1:0");
    config.probe_bind_addr = "127.0.0.1:0".to_string();
    config.watch = watch.iter().map(|w| w.to_string()).collect();
    config.interval = Duration::from_millis(50);
    config.retries = 3;
    config
}

/// Hands out the first address once, the second one from then on: a process
/// that comes back somewhere else after being restarted.
struct MovingResolver {
    calls: AtomicUsize,
    before: SocketAddr,
    after: SocketAddr,
}

#[async_trait::async_trait]
impl Resolver for MovingResolver {
    async fn resolve(&self, _name: &str) -> Result<SocketAddr, HeartbeatError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if call == 0 { self.before } else { self.after })
    }
}

async fn next_restart(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("restart request in time")
        .expect("sink open")
}

#[tokio::test]
async fn silent_process_gets_one_restart_then_is_re_resolved() {
    let silent = Transport::bind("127.0.0.1:0").await.unwrap();
    let responder = Responder::start("127.0.0.1:0", "worker_a").await.unwrap();
    let resolver = Arc::new(MovingResolver {
        calls: AtomicUsize::new(0),
        before: silent.local_addr().unwrap(),
        after: responder.local_addr(),
    });
    let metrics = Arc::new(Metrics::default());
    let (sink, mut restarts) = RestartSink::channel();

    let detector = FailureDetector::start(
        &detector_config(&["worker_a"]),
        resolver.clone(),
        sink,
        Arc::clone(&metrics),
    )
    .await
    .unwrap();

    assert_eq!(next_restart(&mut restarts).await, "worker_a");

    // Once re-resolved to a live process no further restarts follow.
    sleep(Duration::from_millis(600)).await;
    assert!(restarts.try_recv().is_err());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.restart_requests, 1);
    assert!(snapshot.heartbeat_timeouts >= 3);

    // The silent socket saw exactly `retries` probes.
    let mut probes = 0;
    while let Ok(datagram) = silent.recv(Duration::from_millis(50)).await {
        assert_eq!(datagram.message, Ok(Message::Heartbeat));
        probes += 1;
    }
    assert_eq!(probes, 3);

    detector.stop().await;
    responder.stop().await;
}

#[tokio::test]
async fn unresolvable_name_requests_restart_and_keeps_trying() {
    let resolver = Arc::new(StaticResolver::new());
    let (sink, mut restarts) = RestartSink::channel();
    let detector = FailureDetector::start(
        &detector_config(&["ghost"]),
        resolver.clone(),
        sink,
        Arc::new(Metrics::default()),
    )
    .await
    .unwrap();

    assert_eq!(next_restart(&mut restarts).await, "ghost");

    // Resolution is retried every five intervals, each failure asking again.
    assert_eq!(next_restart(&mut restarts).await, "ghost");

    let responder = Responder::start("127.0.0.1:0", "ghost").await.unwrap();
    resolver.insert("ghost", responder.local_addr());
    sleep(Duration::from_millis(400)).await;
    while restarts.try_recv().is_ok() {}

    sleep(Duration::from_millis(400)).await;
    assert!(restarts.try_recv().is_err());

    detector.stop().await;
    responder.stop().await;
}

#[tokio::test]
async fn acks_are_routed_by_name() {
    let healthy = Responder::start("127.0.0.1:0", "worker_b").await.unwrap();
    // Answers probes for worker_c, but under the wrong name.
    let imposter = Responder::start("127.0.0.1:0", "someone_else").await.unwrap();

    let resolver = Arc::new(StaticResolver::new());
    resolver.insert("worker_b", healthy.local_addr());
    resolver.insert("worker_c", imposter.local_addr());

    let (sink, mut restarts) = RestartSink::channel();
    let detector = FailureDetector::start(
        &detector_config(&["worker_b", "worker_c"]),
        resolver,
        sink,
        Arc::new(Metrics::default()),
    )
    .await
    .unwrap();

    let mut watched: Vec<&str> = detector.watched().collect();
    watched.sort_unstable();
    assert_eq!(watched, vec!["worker_b", "worker_c"]);

    assert_eq!(next_restart(&mut restarts).await, "worker_c");
    sleep(Duration::from_millis(300)).await;
    while let Ok(name) = restarts.try_recv() {
        assert_eq!(name, "worker_c");
    }

    detector.stop().await;
    healthy.stop().await;
    imposter.stop().await;
}

#[tokio::test]
async fn responder_answers_detector_probes() {
    let responder = Responder::start("127.0.0.1:0", "filter_1").await.unwrap();
    let resolver = Arc::new(StaticResolver::new());
    resolver.insert("filter_1", responder.local_addr());

    let metrics = Arc::new(Metrics::default());
    let (sink, mut restarts) = RestartSink::channel();
    let detector = FailureDetector::start(
        &detector_config(&["filter_1"]),
        resolver,
        sink,
        Arc::clone(&metrics),
    )
    .await
    .unwrap();

    sleep(Duration::from_millis(500)).await;
    assert!(restarts.try_recv().is_err());
    assert_eq!(metrics.snapshot().restart_requests, 0);

    timeout(Duration::from_secs(2), detector.stop())
        .await
        .expect("detector stops promptly");
    responder.stop().await;
}
