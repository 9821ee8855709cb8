use core::fmt;

use thiserror::Error;

pub mod remote_node;
pub use remote_node::RemoteNode;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("node id {0} outside 1..=127")]
pub struct InvalidNodeId(pub u8);

/// CANopen node id, 1..=127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    pub const fn new(raw: u8) -> Option<Self> {
        if raw >= 1 && raw <= 127 {
            Some(NodeId(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidNodeId;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        NodeId::new(raw).ok_or(InvalidNodeId(raw))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
