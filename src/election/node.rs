use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use ::log::{debug, info, warn};
use tokio::net::lookup_host;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{Chooser, ElectionConfig, ElectionError, NodeStatus, PeerDirectory, Role};
use crate::heartbeat::HeartbeatSupervisor;
use crate::metrics::Metrics;
use crate::network::{BackoffTimer, Datagram, NetworkError, Transport};
use crate::protocol::{Message, PeerId, UNKNOWN_LEADER};

type Reply = Option<(Message, SocketAddr)>;

/// Invitation-based election for one node.
///
/// The node starts out `Electing` with itself as leader, invites missing
/// peers one at a time and ends the round either leading (`Coordinator`) or
/// following someone else (`Member`). A member that loses its leader falls
/// back to `Electing`.
pub struct Election {
    id: PeerId,
    role: Role,
    leader_id: PeerId,
    directory: PeerDirectory,
    config: ElectionConfig,
    transport: Transport,
    heartbeat: Option<HeartbeatSupervisor>,
    metrics: Arc<Metrics>,
    status_tx: watch::Sender<NodeStatus>,
    last_reinvite: Option<Instant>,
}

impl Election {
    pub fn new(config: ElectionConfig, transport: Transport, metrics: Arc<Metrics>) -> Self {
        let id = config.node_id;
        let directory = PeerDirectory::new(id, config.peers.clone());
        let (status_tx, _) = watch::channel(NodeStatus {
            id,
            role: Role::Electing,
            leader_id: id,
            members: Vec::new(),
        });

        Self {
            id,
            role: Role::Electing,
            leader_id: id,
            directory,
            config,
            transport,
            heartbeat: None,
            metrics,
            status_tx,
            last_reinvite: None,
        }
    }

    /// Keeps a heartbeat role in step with the election role.
    pub fn with_heartbeat(mut self, supervisor: HeartbeatSupervisor) -> Self {
        self.heartbeat = Some(supervisor);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            role: self.role,
            leader_id: self.leader_id,
            members: self.directory.members().to_vec(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ElectionError> {
        Ok(self.transport.local_addr()?)
    }

    /// Drives the node until `shutdown` resolves.
    ///
    /// Only a heartbeat role that cannot start or a socket that cannot be
    /// bound ends the loop early; other network trouble is absorbed by the
    /// protocol.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ElectionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "node {} starting with {} peers on {}",
            self.id,
            self.directory.peer_ids().count(),
            self.local_addr()?
        );

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.switch_to(self.role).await?;
        }
        self.publish();

        let result = loop {
            let step = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                step = self.step() => step,
            };

            match step {
                Ok(next) => {
                    if let Err(e) = self.transition(next).await {
                        break Err(e);
                    }
                }
                Err(ElectionError::Network(e)) if !e.is_transient() => {
                    break Err(ElectionError::Network(e))
                }
                Err(e) => warn!("node {} election step failed: {}", self.id, e),
            }
        };

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.shutdown().await;
        }
        info!("node {} stopped as {:?}", self.id, self.role);
        result
    }

    async fn step(&mut self) -> Result<Role, ElectionError> {
        match self.role {
            Role::Electing => self.run_election().await,
            Role::Coordinator => self.act_as_leader().await,
            Role::Member => self.act_as_member().await,
        }
    }

    async fn transition(&mut self, next: Role) -> Result<(), ElectionError> {
        if next == self.role {
            self.publish();
            return Ok(());
        }

        info!(
            "node {}: {:?} -> {:?} (leader {}, members {:?})",
            self.id,
            self.role,
            next,
            self.leader_id,
            self.directory.members()
        );

        match next {
            Role::Electing => {
                self.leader_id = self.id;
                self.directory.clear_members();
            }
            Role::Coordinator => self.last_reinvite = None,
            Role::Member => {}
        }
        self.role = next;

        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.switch_to(next).await?;
        }
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// One election round. Returns `Coordinator` when this node is still its
    /// own leader once the round is over, `Member` otherwise.
    pub(crate) async fn run_election(&mut self) -> Result<Role, ElectionError> {
        self.metrics.record_election_started();
        let missing = self.directory.get_missing();
        info!(
            "node {} electing, group {:?}, inviting {:?}",
            self.id,
            self.directory.members(),
            missing
        );

        let mut chooser = Chooser::new(missing, self.config.chooser_max_retries);
        let mut listen = BackoffTimer::new(self.config.initial_timeout, self.config.max_backoff);

        while self.leader_id == self.id
            && !self.directory.group_is_complete()
            && chooser.peers_left()
        {
            match self.transport.recv(listen.next_deadline()).await {
                Err(NetworkError::Timeout) => {
                    listen.increase_timeout();
                    let Some(peer) = chooser.choose() else {
                        break;
                    };
                    if self.directory.is_member(peer) {
                        continue;
                    }
                    // Only an answered invite resets the listen wait, so a
                    // run of silent peers keeps stretching it.
                    if self.invite(peer, &mut chooser).await {
                        listen.reset();
                    }
                }
                Err(e) => debug!("node {} receive failed while electing: {}", self.id, e),
                Ok(datagram) => self.on_electing_datagram(datagram, &mut chooser).await,
            }
        }

        if self.leader_id == self.id {
            self.metrics.record_election_won();
            Ok(Role::Coordinator)
        } else {
            Ok(Role::Member)
        }
    }

    async fn on_electing_datagram(&mut self, datagram: Datagram, chooser: &mut Chooser) {
        let from = datagram.from;
        match datagram.message {
            Ok(Message::Invite {
                inviter_id,
                group_size,
            }) => {
                self.handle_invite(inviter_id, group_size, from).await;
            }
            Ok(Message::Accept {
                from_id, members, ..
            }) => self.merge(from_id, members, Some(chooser)),
            Ok(Message::Heartbeat) => {
                let ok = self.ok_reply();
                self.reply(ok, from).await;
            }
            Ok(other) => debug!("node {} ignoring {:?} from {}", self.id, other.tag(), from),
            Err(e) => debug!("node {} dropped malformed datagram from {}: {}", self.id, from, e),
        }
    }

    /// Invites `peer`, following redirects to its leader. Returns true when
    /// any peer answered.
    async fn invite(&mut self, peer: PeerId, chooser: &mut Chooser) -> bool {
        let mut target = peer;

        for _ in 0..=self.config.max_redirects {
            let addr = match self.peer_addr(target).await {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("node {} cannot invite {}: {}", self.id, target, e);
                    chooser.retry(peer);
                    return false;
                }
            };

            let invite = Message::Invite {
                inviter_id: self.id,
                group_size: self.directory.group_size(),
            };
            debug!("node {} inviting {} at {}", self.id, target, addr);
            self.metrics.record_invite_sent();

            let transport = self.transport.clone();
            let mut backoff =
                BackoffTimer::new(self.config.initial_timeout, self.config.max_backoff);
            let attempts = self.config.exchange_attempts;
            let reply = transport
                .write_with_retry(&invite, addr, &mut backoff, attempts, |d| {
                    self.on_electing_stray(d, &mut *chooser)
                })
                .await;

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("node {} got no answer from {}: {}", self.id, target, e);
                    chooser.retry(peer);
                    return false;
                }
            };

            match reply {
                Message::Accept {
                    from_id, members, ..
                } => {
                    self.merge(from_id, members, Some(&mut *chooser));
                    return true;
                }
                Message::Reject { leader_id } if leader_id == target => {
                    // The invited peer outranks us.
                    self.accept_leader(target, addr).await;
                    return true;
                }
                Message::Reject { leader_id }
                    if leader_id != UNKNOWN_LEADER
                        && leader_id != self.id
                        && self.directory.is_peer(leader_id)
                        && !self.directory.is_member(leader_id) =>
                {
                    debug!(
                        "node {}: {} follows {}, redirecting",
                        self.id, target, leader_id
                    );
                    target = leader_id;
                }
                Message::Reject { leader_id } => {
                    debug!(
                        "node {}: {} rejected with leader {}, retrying later",
                        self.id, target, leader_id
                    );
                    chooser.retry(peer);
                    return true;
                }
                Message::Invite {
                    inviter_id,
                    group_size,
                } => {
                    // Crossing invitations: both sides apply the same ordering.
                    self.handle_invite(inviter_id, group_size, addr).await;
                    if self.leader_id == self.id {
                        chooser.retry(peer);
                    }
                    return true;
                }
                Message::Heartbeat => {
                    let ok = self.ok_reply();
                    self.reply(ok, addr).await;
                    chooser.retry(peer);
                    return true;
                }
                other => {
                    debug!(
                        "node {}: unexpected {:?} from {}",
                        self.id,
                        other.tag(),
                        target
                    );
                    chooser.retry(peer);
                    return true;
                }
            }
        }

        debug!("node {}: too many redirects inviting {}", self.id, peer);
        chooser.retry(peer);
        true
    }

    /// Traffic from third parties while an invitation is in flight.
    fn on_electing_stray(&mut self, datagram: Datagram, chooser: &mut Chooser) -> Reply {
        let from = datagram.from;
        match datagram.message {
            Ok(Message::Heartbeat) => Some((self.ok_reply(), from)),
            Ok(Message::Invite { inviter_id, .. }) => {
                debug!(
                    "node {} busy electing, deferring invite from {}",
                    self.id, inviter_id
                );
                Some((
                    Message::Reject {
                        leader_id: UNKNOWN_LEADER,
                    },
                    from,
                ))
            }
            Ok(Message::Accept {
                from_id, members, ..
            }) => {
                self.merge(from_id, members, Some(chooser));
                None
            }
            Ok(_) | Err(_) => None,
        }
    }

    /// Decides on an invitation: the larger group wins, ties go to the higher
    /// id. Returns true when the inviter became our leader.
    pub(crate) async fn handle_invite(
        &mut self,
        inviter_id: PeerId,
        their_size: u32,
        from: SocketAddr,
    ) -> bool {
        if !self.directory.is_peer(inviter_id) {
            warn!(
                "node {} ignoring invite from unknown peer {} at {}",
                self.id, inviter_id, from
            );
            return false;
        }

        let ours = self.directory.group_size();
        if their_size > ours || (their_size == ours && inviter_id > self.id) {
            self.accept_leader(inviter_id, from).await;
            true
        } else {
            debug!(
                "node {} rejects {} (theirs {}, ours {})",
                self.id, inviter_id, their_size, ours
            );
            let reject = Message::Reject {
                leader_id: self.leader_id,
            };
            self.reply(reject, from).await;
            false
        }
    }

    /// Joins `leader`: our group travels with the Accept and every former
    /// member is told where to go.
    async fn accept_leader(&mut self, leader: PeerId, addr: SocketAddr) {
        let accept = self.accept_reply();
        self.reply(accept, addr).await;

        let former = self.directory.clear_members();
        for member in former.into_iter().filter(|m| *m != leader) {
            match self.peer_addr(member).await {
                Ok(member_addr) => {
                    let change = Message::Change {
                        new_leader_id: leader,
                    };
                    self.reply(change, member_addr).await;
                }
                Err(e) => warn!("node {} cannot notify {}: {}", self.id, member, e),
            }
        }

        info!("node {} now follows {}", self.id, leader);
        self.leader_id = leader;
        self.metrics.record_leader_change();
        self.publish();
    }

    fn merge(&mut self, from_id: PeerId, members: Vec<PeerId>, chooser: Option<&mut Chooser>) {
        if !self.directory.is_peer(from_id) {
            warn!("node {} ignoring accept from unknown peer {}", self.id, from_id);
            return;
        }

        let mut joined = members;
        joined.push(from_id);
        if let Some(chooser) = chooser {
            for id in &joined {
                chooser.discard(*id);
            }
        }

        let added = self.directory.add_members(joined);
        if added > 0 {
            info!(
                "node {} group grew by {} to {:?}",
                self.id,
                added,
                self.directory.members()
            );
            self.publish();
        }
    }

    /// One wake of the coordinator loop.
    async fn act_as_leader(&mut self) -> Result<Role, ElectionError> {
        let missing = self.directory.get_missing();
        self.reinvite(&missing).await;

        let wait = if missing.is_empty() {
            self.config.coordinator_idle_timeout
        } else {
            self.config.reinvite_interval
        };

        let datagram = match self.transport.recv(wait).await {
            Ok(datagram) => datagram,
            Err(NetworkError::Timeout) => return Ok(Role::Coordinator),
            Err(e) => {
                debug!("node {} receive failed while leading: {}", self.id, e);
                return Ok(Role::Coordinator);
            }
        };

        let from = datagram.from;
        match datagram.message {
            Ok(Message::Invite {
                inviter_id,
                group_size,
            }) => {
                if self.handle_invite(inviter_id, group_size, from).await {
                    return Ok(Role::Member);
                }
            }
            Ok(Message::Accept {
                from_id, members, ..
            }) => self.merge(from_id, members, None),
            Ok(Message::Heartbeat) => {
                let ok = self.ok_reply();
                self.reply(ok, from).await;
            }
            Ok(Message::Reject { leader_id })
                if leader_id != UNKNOWN_LEADER
                    && leader_id != self.id
                    && self.directory.is_peer(leader_id)
                    && !self.directory.is_member(leader_id) =>
            {
                // Judge the other group on current sizes, not on a reply that
                // may predate our latest merge.
                let mut single = Chooser::new(Vec::new(), 0);
                self.invite(leader_id, &mut single).await;
                if self.leader_id != self.id {
                    return Ok(Role::Member);
                }
            }
            Ok(other) => debug!(
                "node {} leading, ignoring {:?} from {}",
                self.id,
                other.tag(),
                from
            ),
            Err(e) => debug!("node {} dropped malformed datagram from {}: {}", self.id, from, e),
        }

        Ok(Role::Coordinator)
    }

    async fn reinvite(&mut self, missing: &[PeerId]) {
        if missing.is_empty() {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_reinvite {
            if now.duration_since(last) < self.config.reinvite_interval {
                return;
            }
        }
        self.last_reinvite = Some(now);

        for peer in missing {
            match self.peer_addr(*peer).await {
                Ok(addr) => self.send_invite(*peer, addr).await,
                Err(e) => debug!("node {} cannot reinvite {}: {}", self.id, peer, e),
            }
        }
    }

    async fn send_invite(&self, peer: PeerId, addr: SocketAddr) {
        let invite = Message::Invite {
            inviter_id: self.id,
            group_size: self.directory.group_size(),
        };
        debug!("node {} inviting {} at {}", self.id, peer, addr);
        self.metrics.record_invite_sent();
        self.reply(invite, addr).await;
    }

    /// One wake of the member loop: serve whatever arrived, then check that
    /// the leader is still there.
    async fn act_as_member(&mut self) -> Result<Role, ElectionError> {
        let leader_addr = match self.peer_addr(self.leader_id).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("node {} lost track of leader: {}", self.id, e);
                self.metrics.record_member_demotion();
                return Ok(Role::Electing);
            }
        };

        let poll = BackoffTimer::new(self.config.member_poll_timeout, self.config.max_backoff);
        match self.transport.recv(poll.next_deadline()).await {
            Ok(datagram) => {
                if let Some((reply, to)) = self.on_member_datagram(datagram, leader_addr) {
                    self.reply(reply, to).await;
                }
            }
            Err(NetworkError::Timeout) => {}
            Err(e) => debug!("node {} receive failed as member: {}", self.id, e),
        }

        // A Change may have moved us to another leader.
        let leader = self.leader_id;
        let leader_addr = match self.peer_addr(leader).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("node {} lost track of leader: {}", self.id, e);
                self.metrics.record_member_demotion();
                return Ok(Role::Electing);
            }
        };

        let transport = self.transport.clone();
        let mut backoff = BackoffTimer::new(self.config.initial_timeout, self.config.max_backoff);
        let attempts = self.config.exchange_attempts;
        let answer = transport
            .write_with_retry(&Message::Heartbeat, leader_addr, &mut backoff, attempts, |d| {
                self.on_member_datagram(d, leader_addr)
            })
            .await;

        match answer {
            Ok(Message::Ok { .. }) => Ok(Role::Member),
            Ok(other) => {
                let datagram = Datagram {
                    from: leader_addr,
                    message: Ok(other),
                };
                if let Some((reply, to)) = self.on_member_datagram(datagram, leader_addr) {
                    self.reply(reply, to).await;
                }
                Ok(Role::Member)
            }
            Err(e) => {
                warn!(
                    "node {}: leader {} at {} unreachable ({}), starting election",
                    self.id, leader, leader_addr, e
                );
                self.metrics.record_member_demotion();
                Ok(Role::Electing)
            }
        }
    }

    fn on_member_datagram(&mut self, datagram: Datagram, leader_addr: SocketAddr) -> Reply {
        let from = datagram.from;
        let message = match datagram.message {
            Ok(message) => message,
            Err(e) => {
                debug!("node {} dropped malformed datagram from {}: {}", self.id, from, e);
                return None;
            }
        };

        match message {
            Message::Invite { inviter_id, .. } if inviter_id == self.leader_id => {
                Some((self.accept_reply(), from))
            }
            Message::Invite { .. } => Some((
                Message::Reject {
                    leader_id: self.leader_id,
                },
                from,
            )),
            Message::Change { new_leader_id } if from == leader_addr => {
                if new_leader_id == self.leader_id
                    || new_leader_id == self.id
                    || !self.directory.is_peer(new_leader_id)
                {
                    debug!("node {} ignoring change to {}", self.id, new_leader_id);
                    return None;
                }
                info!(
                    "node {}: leader {} handed over to {}",
                    self.id, self.leader_id, new_leader_id
                );
                self.leader_id = new_leader_id;
                self.metrics.record_leader_change();
                self.publish();
                None
            }
            Message::Change { new_leader_id } => {
                debug!(
                    "node {} ignoring change to {} from non-leader {}",
                    self.id, new_leader_id, from
                );
                None
            }
            _ => None,
        }
    }

    fn ok_reply(&self) -> Message {
        Message::Ok {
            name: self.config.name.clone(),
        }
    }

    fn accept_reply(&self) -> Message {
        Message::Accept {
            from_id: self.id,
            group_size: self.directory.group_size(),
            members: self.directory.members().to_vec(),
        }
    }

    async fn reply(&self, message: Message, to: SocketAddr) {
        if let Err(e) = self.transport.send(&message, to).await {
            debug!(
                "node {} failed to send {:?} to {}: {}",
                self.id,
                message.tag(),
                to,
                e
            );
        }
    }

    async fn peer_addr(&self, id: PeerId) -> Result<SocketAddr, ElectionError> {
        let address = self
            .directory
            .address(id)
            .ok_or(ElectionError::UnknownPeer(id))?;
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }

        let unresolvable = || ElectionError::Unresolvable {
            id,
            address: address.to_string(),
        };
        lookup_host(address)
            .await
            .map_err(|_| unresolvable())?
            .next()
            .ok_or_else(unresolvable)
    }
}
