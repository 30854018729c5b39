//! Group transport abstraction.
//!
//! A [`GroupTransport`] joins a process group and multicasts opaque byte
//! payloads to every member. It reports two kinds of events, both pushed into
//! one [`EventSink`]:
//!
//! ```text
//! transport callbacks                      dispatch router
//!   on message(sender, bytes)  ──┐
//!                                ├──► EventSink ──► EventStream (one ordered queue)
//!   on membership(change)      ──┘
//! ```
//!
//! Feeding both sources into a single queue keeps the relative order the
//! transport decided, which the router depends on.
//!
//! # Required guarantees
//!
//! - **FIFO per sender**: messages from one sender arrive at every member in
//!   send order.
//! - **Self-delivery**: a member receives its own messages, after its earlier
//!   ones.
//! - **Virtual synchrony**: every member observes the same relative order of
//!   messages and membership changes.
//!
//! [`LocalCluster`] is an in-process implementation with a single total order.

mod local;

pub use local::{LocalCluster, LocalTransport};

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::member::Member;

/// A membership change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    /// Current members, in transport order.
    pub members: Vec<Member>,
    /// Members that left since the previous change.
    pub left: Vec<Member>,
    /// Members that joined since the previous change.
    pub joined: Vec<Member>,
}

/// One event delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message multicast by `sender`.
    Message {
        /// Member that sent the message.
        sender: Member,
        /// Encoded envelope.
        data: Vec<u8>,
    },
    /// The group membership changed.
    Membership(MembershipChange),
}

/// Receiving end of the transport event queue.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending end of the transport event queue, handed to the transport on
/// connect.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Create a sink and the stream it feeds.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a delivered message.
    pub fn deliver(&self, sender: Member, data: Vec<u8>) -> Result<(), TransportError> {
        self.push(TransportEvent::Message { sender, data })
    }

    /// Report a membership change.
    pub fn membership_changed(&self, change: MembershipChange) -> Result<(), TransportError> {
        self.push(TransportEvent::Membership(change))
    }

    /// Whether the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }
}

/// A virtually synchronous multicast group.
///
/// Implementations must provide the ordering guarantees listed in the
/// [module documentation](self).
#[async_trait::async_trait]
pub trait GroupTransport: Send + Sync + 'static {
    /// Join `group` and start reporting events into `sink`.
    ///
    /// Returns the identity of this process in the group.
    async fn connect(&self, group: &str, sink: EventSink) -> Result<Member, TransportError>;

    /// Identity of this process, once connected.
    fn local_member(&self) -> Option<Member>;

    /// Multicast `data` to every member of the group, this process included.
    async fn send(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Leave the group.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Leave the group without waiting, when the owner goes away without
    /// disconnecting.
    ///
    /// Backends that notice a closed [`EventSink`] on their own can keep the
    /// default, which does nothing.
    fn abandon(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_fans_in_both_event_kinds_in_order() {
        let (sink, mut events) = EventSink::channel();
        let member = Member::new(1, 1);

        sink.membership_changed(MembershipChange {
            members: vec![member],
            left: vec![],
            joined: vec![member],
        })
        .unwrap();
        sink.deliver(member, b"[]".to_vec()).unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Membership(_))));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message {
                sender: member,
                data: b"[]".to_vec()
            })
        );
    }

    #[test]
    fn test_sink_reports_closed_queue() {
        let (sink, events) = EventSink::channel();
        drop(events);

        assert!(sink.is_closed());
        assert_eq!(
            sink.deliver(Member::new(1, 1), vec![]),
            Err(TransportError::Closed)
        );
    }
}
