//! In-process group transport.
//!
//! A [`LocalCluster`] hosts named groups of [`LocalTransport`]s living in the
//! same process. Every delivery of the cluster happens under one lock, so all
//! members of a group observe a single total order of messages and membership
//! changes. That order satisfies FIFO per sender, self-delivery and virtual
//! synchrony.
//!
//! # Membership events
//!
//! | event           | delivered to            | change                       |
//! |-----------------|-------------------------|------------------------------|
//! | join            | every member and joiner | `(members, [], [joiner])`    |
//! | leave / kill    | survivors               | `(members, [leaver], [])`    |
//!
//! A member whose event queue has been dropped is evicted, as if killed, the
//! next time its group is written to.
//!
//! Members are reported in join order.
//!
//! # Example
//!
//! ```rust,ignore
//! let cluster = LocalCluster::new();
//! let a = Commander::connect(cluster.transport(1), config.clone()).await?;
//! let b = Commander::connect(cluster.transport(2), config).await?;
//!
//! // Crash b without a graceful disconnect
//! cluster.kill(b.local_member());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{EventSink, GroupTransport, MembershipChange};
use crate::error::TransportError;
use crate::member::Member;

#[derive(Debug)]
struct Joined {
    member: Member,
    sink: EventSink,
}

#[derive(Debug)]
struct ClusterState {
    next_pid: u32,
    /// Group id → members in join order.
    groups: HashMap<String, Vec<Joined>>,
    /// Member → group it currently belongs to.
    placement: HashMap<Member, String>,
}

/// A set of in-process groups.
///
/// Cheap to clone; clones share the same groups.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl LocalCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                next_pid: 1,
                groups: HashMap::new(),
                placement: HashMap::new(),
            })),
        }
    }

    /// Create a transport for a new process on `node_id`.
    ///
    /// Process ids are allocated sequentially across the cluster.
    pub fn transport(&self, node_id: u32) -> LocalTransport {
        let mut state = self.state.lock().expect("local cluster lock poisoned");
        let pid = state.next_pid;
        state.next_pid += 1;
        LocalTransport {
            cluster: self.clone(),
            member: Member::new(node_id, pid),
        }
    }

    /// Current members of `group`, in join order.
    pub fn members(&self, group: &str) -> Vec<Member> {
        let state = self.state.lock().expect("local cluster lock poisoned");
        state
            .groups
            .get(group)
            .map(|joined| joined.iter().map(|j| j.member).collect())
            .unwrap_or_default()
    }

    /// Remove `member` abruptly, as if its process crashed.
    ///
    /// Survivors observe the departure. Later sends from the member fail with
    /// [`TransportError::NotConnected`]. Returns `false` if the member was not
    /// in any group.
    pub fn kill(&self, member: Member) -> bool {
        let removed = self.remove(member).is_ok();
        if removed {
            tracing::debug!(member = %member, "Member killed");
        }
        removed
    }

    fn join(&self, member: Member, group: &str, sink: EventSink) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("local cluster lock poisoned");
        if let Some(current) = state.placement.get(&member) {
            return Err(TransportError::AlreadyConnected(current.clone()));
        }
        state.evict_closed(group);
        state.placement.insert(member, group.to_string());

        let joined = state.groups.entry(group.to_string()).or_default();
        joined.push(Joined { member, sink });

        let change = MembershipChange {
            members: joined.iter().map(|j| j.member).collect(),
            left: Vec::new(),
            joined: vec![member],
        };
        for target in joined.iter() {
            notify(target, change.clone());
        }
        Ok(())
    }

    fn remove(&self, member: Member) -> Result<(), TransportError> {
        self.state
            .lock()
            .expect("local cluster lock poisoned")
            .depart(member)
    }

    fn multicast(&self, sender: Member, data: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("local cluster lock poisoned");
        let group = state
            .placement
            .get(&sender)
            .cloned()
            .ok_or(TransportError::NotConnected)?;

        // Members whose queue is gone leave before the message is ordered
        state.evict_closed(&group);
        if !state.placement.contains_key(&sender) {
            return Err(TransportError::NotConnected);
        }

        let joined = state
            .groups
            .get(&group)
            .ok_or(TransportError::NotConnected)?;
        let mut dropped = false;
        for target in joined {
            if target.sink.deliver(sender, data.clone()).is_err() {
                tracing::trace!(member = %target.member, "Event queue closed, message dropped");
                dropped = true;
            }
        }
        if dropped {
            state.evict_closed(&group);
        }
        Ok(())
    }
}

impl ClusterState {
    /// Remove `member` from its group and tell the survivors.
    fn depart(&mut self, member: Member) -> Result<(), TransportError> {
        let group = self
            .placement
            .remove(&member)
            .ok_or(TransportError::NotConnected)?;

        let Some(joined) = self.groups.get_mut(&group) else {
            return Err(TransportError::NotConnected);
        };
        joined.retain(|j| j.member != member);

        let change = MembershipChange {
            members: joined.iter().map(|j| j.member).collect(),
            left: vec![member],
            joined: Vec::new(),
        };
        for target in joined.iter() {
            notify(target, change.clone());
        }
        if joined.is_empty() {
            self.groups.remove(&group);
        }
        Ok(())
    }

    /// Treat members of `group` whose event queue is closed as crashed.
    fn evict_closed(&mut self, group: &str) {
        let closed: Vec<Member> = self
            .groups
            .get(group)
            .map(|joined| {
                joined
                    .iter()
                    .filter(|j| j.sink.is_closed())
                    .map(|j| j.member)
                    .collect()
            })
            .unwrap_or_default();

        for member in closed {
            tracing::debug!(member = %member, group = %group, "Evicting member with closed event queue");
            let _ = self.depart(member);
        }
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(target: &Joined, change: MembershipChange) {
    if target.sink.membership_changed(change).is_err() {
        tracing::trace!(member = %target.member, "Event queue closed, membership change dropped");
    }
}

/// Transport of one process of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    cluster: LocalCluster,
    member: Member,
}

impl LocalTransport {
    /// Identity this transport joins with.
    pub fn member(&self) -> Member {
        self.member
    }

    /// Cluster this transport belongs to.
    pub fn cluster(&self) -> &LocalCluster {
        &self.cluster
    }

    fn is_connected(&self) -> bool {
        self.cluster
            .state
            .lock()
            .expect("local cluster lock poisoned")
            .placement
            .contains_key(&self.member)
    }
}

#[async_trait::async_trait]
impl GroupTransport for LocalTransport {
    async fn connect(&self, group: &str, sink: EventSink) -> Result<Member, TransportError> {
        self.cluster.join(self.member, group, sink)?;
        tracing::debug!(member = %self.member, group = %group, "Joined local group");
        Ok(self.member)
    }

    fn local_member(&self) -> Option<Member> {
        self.is_connected().then_some(self.member)
    }

    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.cluster.multicast(self.member, data)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.cluster.remove(self.member)?;
        tracing::debug!(member = %self.member, "Left local group");
        Ok(())
    }

    fn abandon(&self) {
        if self.cluster.remove(self.member).is_ok() {
            tracing::debug!(member = %self.member, "Abandoned local group");
        }
    }
}
