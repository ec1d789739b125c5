use std::collections::BTreeMap;
use std::time::Duration;

use crate::protocol::PeerId;

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub node_id: PeerId,
    /// Name returned when a heartbeat arrives on the election socket.
    pub name: String,
    pub peers: BTreeMap<PeerId, String>, // peer id -> election address
    pub initial_timeout: Duration,
    pub max_backoff: Duration,
    pub exchange_attempts: u32,
    pub chooser_max_retries: u32,
    pub max_redirects: u32,
    pub member_poll_timeout: Duration,
    pub reinvite_interval: Duration,
    pub coordinator_idle_timeout: Duration,
}

impl ElectionConfig {
    pub fn new(node_id: PeerId) -> Self {
        Self {
            node_id,
            name: format!("node_{node_id}"),
            peers: BTreeMap::new(),
            initial_timeout: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            exchange_attempts: 3,
            chooser_max_retries: 3,
            max_redirects: 3,
            member_poll_timeout: Duration::from_millis(500),
            reinvite_interval: Duration::from_secs(1),
            coordinator_idle_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn add_peer(&mut self, peer_id: PeerId, address: &str) {
        self.peers.insert(peer_id, address.to_string());
    }
}
