//! Correlation of in-flight executions with their response channels.
//!
//! The [`ExecutionTracker`] maps a correlation id to the channel feeding one
//! [`Execution`](crate::Execution). The dispatch router pushes echo, leave and
//! reply events into it; the caller pulls from the other end.
//!
//! # Flow
//!
//! ```text
//! caller                          router
//!   1. next_correlation_id()
//!   2. register(id) -> rx
//!   3. send Command(id)  ───────►  4. own Command(id) comes back
//!                                     push(Echo(snapshot))
//!                                  5. Response/Exception(id) arrives
//!                                     push(reply)
//!                                  6. membership change, left = [m]
//!                                     push_leave([m])
//!   7. rx.recv() ... until every pending responder is accounted for
//!   8. deregister(id)
//! ```
//!
//! Registration must happen before the command is sent, otherwise the echo
//! could be processed while no entry exists and the execution would never
//! learn its responder set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::member::Member;
use crate::messaging::Envelope;

/// Receiving end of an execution's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Correlation id → response channel map.
///
/// Insert and remove are exclusive; pushing into a channel and pulling from
/// it are independent of the map lock once the sender has been cloned out.
#[derive(Debug)]
pub struct ExecutionTracker {
    /// Next correlation id, shared by every caller of this process.
    next_id: AtomicU64,

    /// Live executions.
    entries: Mutex<HashMap<u64, mpsc::UnboundedSender<Envelope>>>,
}

impl ExecutionTracker {
    /// Create an empty tracker. Correlation ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next correlation id.
    pub fn next_correlation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a channel for `correlation_id` and return its receiving end.
    ///
    /// Re-registering an id replaces the previous channel, which then ends.
    pub fn register(&self, correlation_id: u64) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries
            .lock()
            .expect("execution tracker lock poisoned")
            .insert(correlation_id, tx);
        rx
    }

    /// Remove the entry for `correlation_id`. Safe to call if absent.
    ///
    /// Returns `true` if an entry was removed.
    pub fn deregister(&self, correlation_id: u64) -> bool {
        self.entries
            .lock()
            .expect("execution tracker lock poisoned")
            .remove(&correlation_id)
            .is_some()
    }

    /// Whether an execution is registered under `correlation_id`.
    pub fn contains(&self, correlation_id: u64) -> bool {
        self.entries
            .lock()
            .expect("execution tracker lock poisoned")
            .contains_key(&correlation_id)
    }

    /// Number of live executions.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("execution tracker lock poisoned")
            .len()
    }

    /// Whether no execution is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push an event to the execution named by its correlation id.
    ///
    /// Returns `false` when nobody is listening (unknown id, discarded or
    /// completed execution).
    pub fn push(&self, event: Envelope) -> bool {
        let correlation_id = event.correlation_id;
        let sender = self
            .entries
            .lock()
            .expect("execution tracker lock poisoned")
            .get(&correlation_id)
            .cloned();

        match sender {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::trace!(correlation_id, "Execution receiver gone, dropping entry");
                    self.deregister(correlation_id);
                    return false;
                }
                true
            }
            None => {
                tracing::trace!(correlation_id, "No execution listening for event");
                false
            }
        }
    }

    /// Push a `Leave` event for every departed member into every live
    /// execution.
    ///
    /// Returns the number of events delivered.
    pub fn push_leave(&self, departed: &[Member]) -> usize {
        if departed.is_empty() {
            return 0;
        }

        let live: Vec<(u64, mpsc::UnboundedSender<Envelope>)> = self
            .entries
            .lock()
            .expect("execution tracker lock poisoned")
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (correlation_id, tx) in live {
            for member in departed {
                if tx.send(Envelope::leave(*member, correlation_id)).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drop every entry. Receivers observe the end of their channel.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("execution tracker lock poisoned")
            .clear();
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}
