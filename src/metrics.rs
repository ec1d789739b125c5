use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by the election loop and the heartbeat detector.
#[derive(Debug, Default)]
pub struct Metrics {
    elections_started: AtomicU64,
    elections_won: AtomicU64,
    invites_sent: AtomicU64,
    leader_changes: AtomicU64,
    member_demotions: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    restart_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub elections_started: u64,
    pub elections_won: u64,
    pub invites_sent: u64,
    pub leader_changes: u64,
    pub member_demotions: u64,
    pub heartbeat_timeouts: u64,
    pub restart_requests: u64,
}

impl Metrics {
    pub fn record_election_started(&self) {
        self.elections_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_election_won(&self) {
        self.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invite_sent(&self) {
        self.invites_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leader_change(&self) {
        self.leader_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_member_demotion(&self) {
        self.member_demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart_request(&self) {
        self.restart_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elections_started: self.elections_started.load(Ordering::Relaxed),
            elections_won: self.elections_won.load(Ordering::Relaxed),
            invites_sent: self.invites_sent.load(Ordering::Relaxed),
            leader_changes: self.leader_changes.load(Ordering::Relaxed),
            member_demotions: self.member_demotions.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            restart_requests: self.restart_requests.load(Ordering::Relaxed),
        }
    }
}
