mod error;
mod message;

pub use self::error::CodecError;
pub use self::message::{Message, Tag, MAX_DATAGRAM};

/// Identity of a node in the election. Stable for the lifetime of the cluster.
pub type PeerId = u32;

/// Leader id carried by a `Reject` when the sender is itself mid-election.
pub const UNKNOWN_LEADER: PeerId = 0;
