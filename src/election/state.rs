use serde::{Deserialize, Serialize};

use crate::protocol::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Electing,
    Coordinator,
    Member,
}

/// Externally visible snapshot of the election state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: PeerId,
    pub role: Role,
    pub leader_id: PeerId,
    pub members: Vec<PeerId>,
}

impl NodeStatus {
    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }
}
