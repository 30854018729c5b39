//! Leadership tracking from membership changes.
//!
//! Every process keeps an ordered *leadership pool*. The pool is seeded from
//! the first membership change this process observes, in transport order.
//! Afterwards departed members are removed and joiners are appended, so
//! survivors keep their relative order and index 0 is always the member with
//! the longest continuous membership.
//!
//! ```text
//! first change   members [a, b, c]          pool [a, b, c]
//! c joins late   members [a, b, c, d]       pool [a, b, c, d]
//! a leaves       members [b, c, d]          pool [b, c, d]   b leads
//! ```
//!
//! Only the dispatch router writes the pool. Readers never block on each
//! other.

use std::sync::RwLock;

use tokio::sync::watch;

use crate::member::Member;
use crate::transport::MembershipChange;

#[derive(Debug, Default)]
struct LeadershipState {
    /// `None` until the first membership change.
    pool: Option<Vec<Member>>,
    /// Latest member list reported by the transport.
    members: Vec<Member>,
}

/// Leadership pool of one process.
#[derive(Debug)]
pub struct LeadershipTracker {
    local: Member,
    state: RwLock<LeadershipState>,
    /// Flips to `true` once, on the first membership change.
    ready: watch::Sender<bool>,
}

impl LeadershipTracker {
    /// Create a tracker for the process `local`.
    pub fn new(local: Member) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            local,
            state: RwLock::new(LeadershipState::default()),
            ready,
        }
    }

    /// Apply a membership change.
    pub fn observe(&self, change: &MembershipChange) {
        let mut state = self.state.write().expect("leadership lock poisoned");
        state.members = change.members.clone();

        match state.pool.as_mut() {
            None => {
                tracing::debug!(
                    member = %self.local,
                    pool_size = change.members.len(),
                    "Leadership pool initialized"
                );
                state.pool = Some(change.members.clone());
            }
            Some(pool) => {
                pool.retain(|m| !change.left.contains(m));
                for joiner in &change.joined {
                    if !pool.contains(joiner) {
                        pool.push(*joiner);
                    }
                }
            }
        }
        drop(state);

        self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
    }

    /// Whether a membership change has been observed.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Index of this process in the pool.
    ///
    /// `None` before the first membership change, or if this process is not
    /// in the pool.
    pub fn leader_position(&self) -> Option<usize> {
        let state = self.state.read().expect("leadership lock poisoned");
        state
            .pool
            .as_ref()
            .and_then(|pool| pool.iter().position(|m| *m == self.local))
    }

    /// Whether this process leads the group.
    ///
    /// Waits for the first membership change without polling.
    pub async fn is_leader(&self) -> bool {
        let mut ready = self.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            return false;
        }
        self.leader_position() == Some(0)
    }

    /// Latest member list reported by the transport.
    pub fn members(&self) -> Vec<Member> {
        self.state
            .read()
            .expect("leadership lock poisoned")
            .members
            .clone()
    }

    /// Current leadership pool, empty before the first membership change.
    pub fn pool(&self) -> Vec<Member> {
        self.state
            .read()
            .expect("leadership lock poisoned")
            .pool
            .clone()
            .unwrap_or_default()
    }
}
