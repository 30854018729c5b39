//! Group member identity.
//!
//! A [`Member`] names one process in the group: the node it runs on plus its
//! process id on that node. On the wire a member is the string `"nodeid:pid"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EnvelopeError;

/// Identity of one process in the group.
///
/// Equality, ordering and hashing are structural, so a `Member` can be used
/// as a map key or set element.
///
/// # Example
///
/// ```rust
/// use cohort::Member;
///
/// let member: Member = "3:4021".parse().unwrap();
/// assert_eq!(member, Member::new(3, 4021));
/// assert_eq!(member.to_string(), "3:4021");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Member {
    node_id: u32,
    pid: u32,
}

impl Member {
    /// Create a member from a node id and a process id.
    pub const fn new(node_id: u32, pid: u32) -> Self {
        Self { node_id, pid }
    }

    /// The node this process runs on.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The process id on that node.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.pid)
    }
}

impl FromStr for Member {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, pid) = s
            .split_once(':')
            .ok_or_else(|| EnvelopeError::InvalidMember(s.to_string()))?;
        let node_id = node
            .parse()
            .map_err(|_| EnvelopeError::InvalidMember(s.to_string()))?;
        let pid = pid
            .parse()
            .map_err(|_| EnvelopeError::InvalidMember(s.to_string()))?;
        Ok(Self { node_id, pid })
    }
}

impl Serialize for Member {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Member {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
