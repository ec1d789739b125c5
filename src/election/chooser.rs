use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::PeerId;

/// Per-round bookkeeping of the peers that still have to be invited.
#[derive(Debug)]
pub struct Chooser {
    missing: Vec<PeerId>,
    retries: HashMap<PeerId, u32>,
    max_retries: u32,
    rng: StdRng,
}

impl Chooser {
    pub fn new(missing: Vec<PeerId>, max_retries: u32) -> Self {
        Self::with_rng(missing, max_retries, StdRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(missing: Vec<PeerId>, max_retries: u32, rng: StdRng) -> Self {
        let mut deduped = Vec::with_capacity(missing.len());
        for id in missing {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Self {
            missing: deduped,
            retries: HashMap::new(),
            max_retries,
            rng,
        }
    }

    pub fn peers_left(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn missing(&self) -> &[PeerId] {
        &self.missing
    }

    /// Removes and returns a uniformly random peer, or `None` when nobody is left.
    pub fn choose(&mut self) -> Option<PeerId> {
        if self.missing.is_empty() {
            return None;
        }
        let idx = self.rng.random_range(0..self.missing.len());
        Some(self.missing.swap_remove(idx))
    }

    /// Puts `id` back in the round if it still has retry budget. Returns
    /// whether the peer was re-queued; once the budget is spent the peer is
    /// dropped for the rest of the round and further calls are no-ops.
    pub fn retry(&mut self, id: PeerId) -> bool {
        if self.missing.contains(&id) {
            return false;
        }
        let used = self.retries.entry(id).or_insert(0);
        if *used >= self.max_retries {
            return false;
        }
        *used += 1;
        self.missing.push(id);
        true
    }

    /// Forgets `id` for this round, e.g. after it joined through someone else.
    pub fn discard(&mut self, id: PeerId) {
        self.missing.retain(|m| *m != id);
    }
}
