use std::collections::BTreeMap;

use crate::protocol::PeerId;

/// Static candidate set plus the group this node currently leads or belongs to.
///
/// `members` never contains `self_id`, never contains duplicates and only
/// holds ids present in `peers`.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    self_id: PeerId,
    peers: BTreeMap<PeerId, String>,
    members: Vec<PeerId>,
}

impl PeerDirectory {
    pub fn new(self_id: PeerId, peers: BTreeMap<PeerId, String>) -> Self {
        let mut peers = peers;
        peers.remove(&self_id);
        Self {
            self_id,
            peers,
            members: Vec::new(),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn address(&self, id: PeerId) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    pub fn is_peer(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn members(&self) -> &[PeerId] {
        &self.members
    }

    pub fn group_size(&self) -> u32 {
        self.members.len() as u32
    }

    /// Idempotent union into `members`. Returns how many ids were new.
    pub fn add_members<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = PeerId>,
    {
        let before = self.members.len();
        for id in ids {
            if id == self.self_id || !self.peers.contains_key(&id) || self.is_member(id) {
                continue;
            }
            self.members.push(id);
        }
        self.members.len() - before
    }

    pub fn is_member(&self, id: PeerId) -> bool {
        self.members.contains(&id)
    }

    /// Drops the whole group, handing back what it held.
    pub fn clear_members(&mut self) -> Vec<PeerId> {
        std::mem::take(&mut self.members)
    }

    pub fn get_missing(&self) -> Vec<PeerId> {
        self.peers
            .keys()
            .copied()
            .filter(|id| !self.is_member(*id))
            .collect()
    }

    pub fn group_is_complete(&self) -> bool {
        self.members.len() == self.peers.len()
    }
}
