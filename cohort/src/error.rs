//! Error types for the cohort command system.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::member::Member;
use crate::messaging::EnvelopeKind;

/// Errors returned by [`Commander`](crate::Commander) operations.
///
/// Only local problems surface here. Failures on remote members are
/// reported per response through [`ExecutionError::Remote`].
#[derive(Debug, Error)]
pub enum CommanderError {
    /// The group transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An envelope could not be encoded.
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The command name is not usable (empty).
    #[error("Invalid command name: {0:?}")]
    InvalidCommand(String),

    /// [`Commander::shutdown`](crate::Commander::shutdown) was called.
    #[error("Commander is shut down")]
    ShutDown,
}

/// Errors raised while encoding or decoding a wire envelope.
///
/// Inbound decoding failures are logged and dropped by the dispatch router;
/// they never stop message processing.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The payload is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON does not have the envelope shape.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The kind tag is not one of `command`, `response`, `exception`.
    #[error("Unknown envelope kind: {0:?}")]
    UnknownKind(String),

    /// A recipient is not a `"nodeid:pid"` string.
    #[error("Invalid member (expected 'nodeid:pid'): {0:?}")]
    InvalidMember(String),

    /// Echo and Leave envelopes exist only inside a process.
    #[error("{0} envelopes are local-only and never encoded")]
    LocalOnly(EnvelopeKind),
}

/// Errors reported by a [`GroupTransport`](crate::transport::GroupTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport has not joined a group (or has been removed from it).
    #[error("Transport is not connected to a group")]
    NotConnected,

    /// `connect` was called twice.
    #[error("Transport is already connected to group {0:?}")]
    AlreadyConnected(String),

    /// The event queue consumer is gone.
    #[error("Transport event queue closed")]
    Closed,

    /// Backend specific failure.
    #[error("Transport backend failed: {0}")]
    Backend(String),
}

/// Errors from [`CommanderConfig`](crate::CommanderConfig) validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No group id was given.
    #[error("Group id cannot be empty")]
    EmptyGroup,

    /// The membership subscription buffer must hold at least one event.
    #[error("Membership buffer must be greater than zero")]
    ZeroMembershipBuffer,
}

/// Errors surfaced while pulling responses from an
/// [`Execution`](crate::Execution).
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A remote member answered with an exception.
    ///
    /// Non-fatal: pulling again continues with the remaining responses.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An event arrived out of protocol order, e.g. a reply before the echo.
    ///
    /// Fatal: the transport broke its ordering guarantees.
    #[error("Protocol violation on execution {correlation_id}: unexpected {got} event")]
    ProtocolViolation {
        /// Execution whose stream was out of order.
        correlation_id: u64,
        /// Kind of the offending event.
        got: EnvelopeKind,
    },

    /// The commander shut down before all responders were accounted for.
    #[error("Commander disconnected before the execution completed")]
    Disconnected,
}

/// Which side of the remote invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The remote member has no handler registered under the command name.
    CommandNotFound,
    /// The remote handler returned an error or panicked.
    Handler,
}

impl RemoteErrorKind {
    /// Wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandNotFound => "command_not_found",
            Self::Handler => "handler",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "command_not_found" => Some(Self::CommandNotFound),
            "handler" => Some(Self::Handler),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side reconstruction of a failure on a remote member.
///
/// The remote error type is carried as an opaque name; no attempt is made to
/// rebuild the original type locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote {kind} error from {origin}: {type_name}: {message}")]
pub struct RemoteError {
    /// Member that produced the error.
    pub origin: Member,
    /// Whether the command was missing or the handler failed.
    pub kind: RemoteErrorKind,
    /// Best-effort name of the remote error type.
    pub type_name: String,
    /// Error message.
    pub message: String,
    /// Diagnostic trace lines (error source chain), possibly empty.
    pub trace: Vec<String>,
}

/// Failure raised by a command handler.
///
/// Any `std::error::Error` converts into a `HandlerError`, so handlers can use
/// `?` freely. The router turns it into an `Exception` reply.
///
/// # Example
///
/// ```rust
/// use cohort::HandlerError;
///
/// fn parse(raw: &str) -> Result<u32, HandlerError> {
///     Ok(raw.parse::<u32>()?)
/// }
///
/// let err = parse("nope").unwrap_err();
/// assert!(err.type_name().contains("ParseIntError"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    type_name: String,
    message: String,
    trace: Vec<String>,
}

impl HandlerError {
    /// Create a handler error with an explicit type name and message.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Attach trace lines.
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    /// Name of the failing error type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Trace lines captured with the error.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub(crate) fn into_parts(self) -> (String, String, Vec<String>) {
        (self.type_name, self.message, self.trace)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            trace,
        }
    }
}
