//! Dispatch router: the single ordered consumer of transport events.
//!
//! One router task runs per [`Commander`](crate::Commander). It drains the
//! transport event queue strictly in delivery order and is the only place
//! where envelopes are classified and command handlers run.
//!
//! # Message classification
//!
//! For an envelope from `S` received by `L` (the local member):
//!
//! | envelope                                 | action                                   |
//! |------------------------------------------|------------------------------------------|
//! | `Command`, `S == L`                      | push `Echo(current members)` to tracker  |
//! | `Response`/`Exception`, `L` in recipients| push to tracker                          |
//! | `Command`, broadcast or `L` in recipients| run handler, reply to `S`                |
//! | anything else                            | ignore                                   |
//!
//! An own broadcast command matches both the first and third rows: the echo is
//! pushed first, then the local handler runs like on any other member.
//!
//! # Membership changes
//!
//! ```text
//! 1. update the leadership pool
//! 2. push Leave(m) into every live execution, for each departed m
//! 3. publish the change to application subscribers
//! ```
//!
//! Handler failures and panics are turned into `Exception` replies; they never
//! stop the router. Undecodable envelopes are logged and dropped.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};

use super::correlation::ExecutionTracker;
use super::envelope::{Body, Envelope, ErrorReport};
use crate::config::CommanderConfig;
use crate::error::{HandlerError, RemoteErrorKind};
use crate::leadership::LeadershipTracker;
use crate::member::Member;
use crate::registry::CommandRegistry;
use crate::transport::{EventStream, GroupTransport, MembershipChange, TransportEvent};

/// Shared state the router reads and feeds.
pub(crate) struct DispatchRouter {
    local: Member,
    transport: Arc<dyn GroupTransport>,
    registry: Arc<CommandRegistry>,
    tracker: Arc<ExecutionTracker>,
    leadership: Arc<LeadershipTracker>,
    membership: broadcast::Sender<MembershipChange>,
    capture_traces: bool,
    max_trace_frames: usize,
}

impl DispatchRouter {
    pub(crate) fn new(
        local: Member,
        transport: Arc<dyn GroupTransport>,
        registry: Arc<CommandRegistry>,
        tracker: Arc<ExecutionTracker>,
        leadership: Arc<LeadershipTracker>,
        membership: broadcast::Sender<MembershipChange>,
        config: &CommanderConfig,
    ) -> Self {
        Self {
            local,
            transport,
            registry,
            tracker,
            leadership,
            membership,
            capture_traces: config.capture_traces(),
            max_trace_frames: config.max_trace_frames(),
        }
    }

    /// Process events until the queue closes or `shutdown` fires.
    pub(crate) async fn run(self, mut events: EventStream, mut shutdown: oneshot::Receiver<()>) {
        tracing::debug!(member = %self.local, "Dispatch router started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!(member = %self.local, "Dispatch router shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::debug!(member = %self.local, "Transport event queue closed");
                        break;
                    }
                },
            }
        }
        tracing::debug!(member = %self.local, "Dispatch router stopped");
    }

    /// Process one transport event.
    pub(crate) async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { sender, data } => self.on_message(sender, &data).await,
            TransportEvent::Membership(change) => self.on_membership(change),
        }
    }

    async fn on_message(&self, sender: Member, data: &[u8]) {
        let envelope = match Envelope::decode(data, sender) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(sender = %sender, error = %err, "Dropping undecodable envelope");
                return;
            }
        };

        match envelope.body {
            Body::Command { .. } => {
                if envelope.sender == self.local {
                    self.echo(&envelope);
                }
                if envelope.is_addressed_to(&self.local) {
                    self.invoke(envelope).await;
                }
            }
            Body::Response(_) | Body::Exception(_) => {
                if envelope.recipients.contains(&self.local) {
                    let correlation_id = envelope.correlation_id;
                    if !self.tracker.push(envelope) {
                        tracing::trace!(correlation_id, sender = %sender, "Reply for unknown execution dropped");
                    }
                }
            }
            Body::Echo(_) | Body::Leave => {
                tracing::warn!(sender = %sender, kind = %envelope.kind(), "Local-only envelope received from transport");
            }
        }
    }

    /// Hand the sender of `command` (ourselves) the membership it was sent to.
    fn echo(&self, command: &Envelope) {
        let snapshot = self.leadership.members();
        tracing::trace!(
            correlation_id = command.correlation_id,
            members = snapshot.len(),
            "Echo of own command"
        );
        self.tracker
            .push(Envelope::echo(self.local, command.correlation_id, snapshot));
    }

    async fn invoke(&self, command: Envelope) {
        let Body::Command { name, args } = &command.body else {
            return;
        };

        let reply = match self.registry.lookup(name) {
            None => {
                tracing::debug!(command = %name, sender = %command.sender, "Unknown command");
                command.reply_error(self.local, ErrorReport::command_not_found(name))
            }
            Some(handler) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.call(&command.sender, args.clone())
                }));
                let result = match outcome {
                    Ok(result) => result,
                    Err(payload) => Err(HandlerError::new("panic", panic_message(payload.as_ref()))),
                };
                match result {
                    Ok(value) => command.reply(self.local, value),
                    Err(err) => {
                        tracing::warn!(
                            command = %name,
                            sender = %command.sender,
                            error = %err,
                            "Command handler failed"
                        );
                        command.reply_error(self.local, self.report(err))
                    }
                }
            }
        };

        self.send(reply).await;
    }

    fn report(&self, err: HandlerError) -> ErrorReport {
        let (type_name, message, mut trace) = err.into_parts();
        if self.capture_traces {
            trace.truncate(self.max_trace_frames);
        } else {
            trace.clear();
        }
        ErrorReport {
            kind: RemoteErrorKind::Handler,
            type_name,
            message,
            trace,
        }
    }

    async fn send(&self, reply: Envelope) {
        let correlation_id = reply.correlation_id;
        let data = match reply.encode() {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(correlation_id, error = %err, "Failed to encode reply");
                return;
            }
        };
        if let Err(err) = self.transport.send(data).await {
            tracing::warn!(correlation_id, error = %err, "Failed to send reply");
        }
    }

    fn on_membership(&self, change: MembershipChange) {
        tracing::debug!(
            member = %self.local,
            members = ?change.members,
            left = ?change.left,
            joined = ?change.joined,
            "Membership changed"
        );

        self.leadership.observe(&change);

        let delivered = self.tracker.push_leave(&change.left);
        if delivered > 0 {
            tracing::trace!(delivered, "Leave events pushed to executions");
        }

        // No subscribers is fine.
        let _ = self.membership.send(change);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
