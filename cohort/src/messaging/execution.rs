//! Caller-side handle of a group command.
//!
//! An [`Execution`] is returned by [`Commander::execute`](crate::Commander::execute).
//! It pulls events from the channel registered in the
//! [`ExecutionTracker`](super::ExecutionTracker) and turns them into the
//! responses of the members that were present when the command was sent.
//!
//! # Protocol
//!
//! ```text
//! 1. Wait for Echo(snapshot), ignoring Leave events.
//!      pending = recipients.is_empty() ? snapshot : recipients ∩ snapshot
//!    Anything else first is a protocol violation.
//! 2. pending empty -> deregister, end of stream.
//! 3. Pull:
//!      Leave(m)              remove m, keep pulling
//!      Response/Exception(m) remove m, yield it
//!    Deregister once pending becomes empty.
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::correlation::{EventReceiver, ExecutionTracker};
use super::envelope::{Body, Envelope};
use crate::error::ExecutionError;
use crate::member::Member;

/// A successful reply from one member.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Member that produced the value.
    pub sender: Member,
    /// Value returned by the member's handler.
    pub value: Value,
}

impl Response {
    /// Decode the value into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}

/// Cancels an [`Execution`] from any task.
///
/// Removes the tracker entry so the router stops feeding the execution, and
/// marks it discarded so buffered events are dropped. Idempotent, and safe to
/// race with the arrival of the final response: whichever happens first, the
/// entry ends up removed.
#[derive(Debug, Clone)]
pub struct DiscardHandle {
    correlation_id: u64,
    tracker: Arc<ExecutionTracker>,
    discarded: Arc<AtomicBool>,
}

impl DiscardHandle {
    /// Discard the execution.
    pub fn discard(&self) {
        if !self.discarded.swap(true, Ordering::AcqRel) {
            tracing::trace!(correlation_id = self.correlation_id, "Execution discarded");
        }
        self.tracker.deregister(self.correlation_id);
    }

    /// Whether the execution was discarded.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }
}

/// Handle of one in-flight group command.
///
/// Dropping the handle discards it.
///
/// # Example
///
/// ```rust,ignore
/// let mut execution = commander.execute([], "sum", vec![json!(3), json!(4)]).await?;
/// while let Some(response) = execution.next_response().await? {
///     println!("{} answered {}", response.sender, response.value);
/// }
/// ```
#[derive(Debug)]
pub struct Execution {
    id: u64,
    recipients: BTreeSet<Member>,
    /// Unset until the echo is observed; only shrinks afterwards.
    pending: Option<HashSet<Member>>,
    command: String,
    args: Vec<Value>,
    /// `None` once the execution completed or was discarded.
    events: Option<EventReceiver>,
    handle: DiscardHandle,
}

impl Execution {
    pub(crate) fn new(
        id: u64,
        recipients: BTreeSet<Member>,
        command: String,
        args: Vec<Value>,
        events: EventReceiver,
        tracker: Arc<ExecutionTracker>,
    ) -> Self {
        Self {
            id,
            recipients,
            pending: None,
            command,
            args,
            events: Some(events),
            handle: DiscardHandle {
                correlation_id: id,
                tracker,
                discarded: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Correlation id of the command.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Recipients requested by the caller; empty means every member.
    pub fn recipients(&self) -> &BTreeSet<Member> {
        &self.recipients
    }

    /// Members whose answer is still outstanding, once the echo was seen.
    pub fn pending_responders(&self) -> Option<&HashSet<Member>> {
        self.pending.as_ref()
    }

    /// Command name.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Whether every expected responder has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.is_empty())
    }

    /// Handle that can discard this execution from another task.
    pub fn discard_handle(&self) -> DiscardHandle {
        self.handle.clone()
    }

    /// Pull the next response.
    ///
    /// Returns `Ok(None)` at end of stream. A remote failure is returned as
    /// [`ExecutionError::Remote`]; calling again resumes with the remaining
    /// responses.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Remote`] when a member answered with an exception.
    /// - [`ExecutionError::ProtocolViolation`] when the first event is not the
    ///   echo. The execution is finished afterwards.
    /// - [`ExecutionError::Disconnected`] when the commander shut down first.
    pub async fn next_response(&mut self) -> Result<Option<Response>, ExecutionError> {
        // 1. Wait for the echo to learn who will answer
        while self.pending.is_none() {
            let Some(event) = self.recv().await else {
                return self.closed();
            };
            match event.body {
                Body::Leave => continue,
                Body::Echo(snapshot) => {
                    let pending: HashSet<Member> = if self.recipients.is_empty() {
                        snapshot.into_iter().collect()
                    } else {
                        snapshot
                            .into_iter()
                            .filter(|m| self.recipients.contains(m))
                            .collect()
                    };
                    tracing::trace!(
                        correlation_id = self.id,
                        responders = pending.len(),
                        "Echo received"
                    );
                    self.pending = Some(pending);
                }
                _ => return Err(self.violation(&event)),
            }
        }

        loop {
            // 2. Nobody (left) to wait for
            if self.is_complete() {
                self.finish();
                return Ok(None);
            }

            // 3. Account for the next responder
            let Some(event) = self.recv().await else {
                return self.closed();
            };
            if let Some(pending) = self.pending.as_mut() {
                pending.remove(&event.sender);
            }
            if self.is_complete() {
                self.complete();
            }

            match event.body {
                Body::Leave => {
                    tracing::trace!(
                        correlation_id = self.id,
                        member = %event.sender,
                        "Responder left before answering"
                    );
                }
                Body::Response(value) => {
                    return Ok(Some(Response {
                        sender: event.sender,
                        value,
                    }));
                }
                Body::Exception(report) => {
                    return Err(ExecutionError::Remote(
                        report.into_remote_error(event.sender),
                    ));
                }
                Body::Echo(_) | Body::Command { .. } => return Err(self.violation(&event)),
            }
        }
    }

    /// Drain every response, discarding values.
    ///
    /// Returns `Ok(true)` when no remote error was seen. With
    /// `ignore_exceptions`, remote errors are skipped and `Ok(false)` is
    /// returned at the end; otherwise the first one is returned as an error.
    pub async fn wait_all(&mut self, ignore_exceptions: bool) -> Result<bool, ExecutionError> {
        let mut clean = true;
        loop {
            match self.next_response().await {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(clean),
                Err(ExecutionError::Remote(err)) if ignore_exceptions => {
                    tracing::debug!(correlation_id = self.id, error = %err, "Ignoring remote error");
                    clean = false;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stop tracking this execution and drop buffered events.
    ///
    /// Idempotent. Later calls to [`next_response`](Self::next_response)
    /// return end of stream.
    pub fn discard(&mut self) {
        self.handle.discard();
        self.events = None;
    }

    /// Turn the execution into a stream of responses.
    ///
    /// Remote errors are yielded as items and the stream keeps going; it
    /// ends at end of stream or after a fatal error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Response, ExecutionError>> {
        futures::stream::unfold(self, |mut execution| async move {
            match execution.next_response().await {
                Ok(Some(response)) => Some((Ok(response), execution)),
                Ok(None) => None,
                Err(err) => Some((Err(err), execution)),
            }
        })
    }

    async fn recv(&mut self) -> Option<Envelope> {
        if self.handle.is_discarded() {
            self.events = None;
            return None;
        }
        let event = self.events.as_mut()?.recv().await;
        if self.handle.is_discarded() {
            self.events = None;
            return None;
        }
        event
    }

    /// Remove the tracker entry; buffered events stay readable.
    fn complete(&mut self) {
        self.handle.tracker.deregister(self.id);
    }

    fn finish(&mut self) {
        self.complete();
        self.events = None;
    }

    fn closed(&mut self) -> Result<Option<Response>, ExecutionError> {
        let was_open = self.events.take().is_some();
        if was_open && !self.handle.is_discarded() && !self.is_complete() {
            return Err(ExecutionError::Disconnected);
        }
        Ok(None)
    }

    fn violation(&mut self, event: &Envelope) -> ExecutionError {
        tracing::error!(
            correlation_id = self.id,
            kind = %event.kind(),
            sender = %event.sender,
            "Protocol violation: transport ordering broken"
        );
        self.finish();
        ExecutionError::ProtocolViolation {
            correlation_id: self.id,
            got: event.kind(),
        }
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.handle.tracker.deregister(self.id);
    }
}
