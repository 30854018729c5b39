//! Wire envelope for group commands.
//!
//! Every message exchanged through the group transport is an [`Envelope`].
//! On the wire it is a JSON array:
//!
//! ```text
//! [recipients, correlation_id, kind, payload...]
//!
//! recipients      ["nodeid:pid", ...]   empty = every member
//! correlation_id  u64                   binds replies to their command
//! kind            "command" | "response" | "exception"
//! payload         command:   name, arg0, arg1, ...
//!                 response:  value
//!                 exception: error_kind, type_name, message, [trace...]
//! ```
//!
//! The sender is not encoded: the transport reports it on delivery.
//! [`EnvelopeKind::Echo`] and [`EnvelopeKind::Leave`] are synthesized by the
//! dispatch router and never cross the wire.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::error::{EnvelopeError, RemoteError, RemoteErrorKind};
use crate::member::Member;

const TAG_COMMAND: &str = "command";
const TAG_RESPONSE: &str = "response";
const TAG_EXCEPTION: &str = "exception";

/// Kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Request to run a named command.
    Command,
    /// Successful command result.
    Response,
    /// Command failure.
    Exception,
    /// Local loop-back of our own command, carrying the membership snapshot.
    Echo,
    /// Local notice that a member left the group.
    Leave,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "Command",
            Self::Response => "Response",
            Self::Exception => "Exception",
            Self::Echo => "Echo",
            Self::Leave => "Leave",
        };
        f.write_str(name)
    }
}

/// Failure details carried by an `Exception` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Missing command or failing handler.
    pub kind: RemoteErrorKind,
    /// Best-effort name of the failing error type.
    pub type_name: String,
    /// Error message.
    pub message: String,
    /// Diagnostic trace lines.
    pub trace: Vec<String>,
}

impl ErrorReport {
    /// Report for a command name with no registered handler.
    pub fn command_not_found(name: &str) -> Self {
        Self {
            kind: RemoteErrorKind::CommandNotFound,
            type_name: "CommandNotFound".to_string(),
            message: format!("No handler registered for command '{}'", name),
            trace: Vec::new(),
        }
    }

    /// Attach the originating member, producing the caller-side error.
    pub fn into_remote_error(self, origin: Member) -> RemoteError {
        RemoteError {
            origin,
            kind: self.kind,
            type_name: self.type_name,
            message: self.message,
            trace: self.trace,
        }
    }
}

/// Kind-specific content of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Run `name` with `args`.
    Command {
        /// Command name looked up in the receiver's registry.
        name: String,
        /// Positional arguments.
        args: Vec<Value>,
    },
    /// Handler result.
    Response(Value),
    /// Handler failure or missing command.
    Exception(ErrorReport),
    /// Membership snapshot taken when our own command looped back.
    Echo(Vec<Member>),
    /// The envelope's sender left the group.
    Leave,
}

/// A message exchanged between group members.
///
/// # Invariant
///
/// `Response`/`Exception` envelopes carry exactly one recipient, the sender of
/// the command they answer, and that command's correlation id. [`reply`] and
/// [`reply_error`] are the only constructors used for them.
///
/// [`reply`]: Envelope::reply
/// [`reply_error`]: Envelope::reply_error
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Member that sent (or, for local events, caused) this envelope.
    pub sender: Member,
    /// Intended recipients; empty means every member.
    pub recipients: BTreeSet<Member>,
    /// Correlation id of the command this envelope belongs to.
    pub correlation_id: u64,
    /// Kind-specific content.
    pub body: Body,
}

impl Envelope {
    /// Build a command envelope.
    pub fn command(
        sender: Member,
        recipients: BTreeSet<Member>,
        correlation_id: u64,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            sender,
            recipients,
            correlation_id,
            body: Body::Command {
                name: name.into(),
                args,
            },
        }
    }

    /// Local echo event for an execution.
    pub fn echo(local: Member, correlation_id: u64, snapshot: Vec<Member>) -> Self {
        Self {
            sender: local,
            recipients: BTreeSet::new(),
            correlation_id,
            body: Body::Echo(snapshot),
        }
    }

    /// Local leave event for an execution.
    pub fn leave(departed: Member, correlation_id: u64) -> Self {
        Self {
            sender: departed,
            recipients: BTreeSet::new(),
            correlation_id,
            body: Body::Leave,
        }
    }

    /// Answer this envelope with a successful result.
    ///
    /// The reply goes only to this envelope's sender and keeps its
    /// correlation id. `from` is the replying member.
    pub fn reply(&self, from: Member, value: Value) -> Self {
        Self {
            sender: from,
            recipients: BTreeSet::from([self.sender]),
            correlation_id: self.correlation_id,
            body: Body::Response(value),
        }
    }

    /// Answer this envelope with a failure.
    pub fn reply_error(&self, from: Member, report: ErrorReport) -> Self {
        Self {
            sender: from,
            recipients: BTreeSet::from([self.sender]),
            correlation_id: self.correlation_id,
            body: Body::Exception(report),
        }
    }

    /// The envelope kind.
    pub fn kind(&self) -> EnvelopeKind {
        match self.body {
            Body::Command { .. } => EnvelopeKind::Command,
            Body::Response(_) => EnvelopeKind::Response,
            Body::Exception(_) => EnvelopeKind::Exception,
            Body::Echo(_) => EnvelopeKind::Echo,
            Body::Leave => EnvelopeKind::Leave,
        }
    }

    /// Whether the envelope is addressed to every member.
    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Whether `member` should act on this envelope.
    pub fn is_addressed_to(&self, member: &Member) -> bool {
        self.is_broadcast() || self.recipients.contains(member)
    }

    /// Encode to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::LocalOnly`] for Echo and Leave envelopes.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let recipients: Vec<Value> = self
            .recipients
            .iter()
            .map(|m| Value::String(m.to_string()))
            .collect();

        let mut fields = vec![
            Value::Array(recipients),
            Value::from(self.correlation_id),
        ];

        match &self.body {
            Body::Command { name, args } => {
                fields.push(Value::from(TAG_COMMAND));
                fields.push(Value::from(name.as_str()));
                fields.extend(args.iter().cloned());
            }
            Body::Response(value) => {
                fields.push(Value::from(TAG_RESPONSE));
                fields.push(value.clone());
            }
            Body::Exception(report) => {
                fields.push(Value::from(TAG_EXCEPTION));
                fields.push(Value::from(report.kind.as_str()));
                fields.push(Value::from(report.type_name.as_str()));
                fields.push(Value::from(report.message.as_str()));
                fields.push(Value::from(report.trace.clone()));
            }
            Body::Echo(_) | Body::Leave => return Err(EnvelopeError::LocalOnly(self.kind())),
        }

        Ok(serde_json::to_vec(&Value::Array(fields))?)
    }

    /// Decode wire bytes delivered by the transport from `sender`.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] for invalid JSON, a wrong shape, an
    /// unknown kind tag or a malformed recipient.
    pub fn decode(data: &[u8], sender: Member) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(data)?;
        let Value::Array(fields) = value else {
            return Err(EnvelopeError::Malformed("expected a JSON array".to_string()));
        };
        if fields.len() < 3 {
            return Err(EnvelopeError::Malformed(format!(
                "expected at least 3 fields, got {}",
                fields.len()
            )));
        }
        let mut fields = fields.into_iter();

        // 1. Recipients
        let recipients = match fields.next() {
            Some(Value::Array(list)) => list
                .iter()
                .map(|entry| match entry {
                    Value::String(s) => s.parse::<Member>(),
                    other => Err(EnvelopeError::InvalidMember(other.to_string())),
                })
                .collect::<Result<BTreeSet<_>, _>>()?,
            _ => {
                return Err(EnvelopeError::Malformed(
                    "recipients must be a list".to_string(),
                ))
            }
        };

        // 2. Correlation id
        let correlation_id = fields
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| EnvelopeError::Malformed("correlation id must be a u64".to_string()))?;

        // 3. Kind tag and payload
        let tag = match fields.next() {
            Some(Value::String(tag)) => tag,
            _ => return Err(EnvelopeError::Malformed("kind must be a string".to_string())),
        };
        let body = match tag.as_str() {
            TAG_COMMAND => {
                let name = match fields.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(EnvelopeError::Malformed(
                            "command name must be a string".to_string(),
                        ))
                    }
                };
                Body::Command {
                    name,
                    args: fields.collect(),
                }
            }
            TAG_RESPONSE => {
                let value = fields.next().unwrap_or(Value::Null);
                if fields.next().is_some() {
                    return Err(EnvelopeError::Malformed(
                        "response carries a single value".to_string(),
                    ));
                }
                Body::Response(value)
            }
            TAG_EXCEPTION => Body::Exception(Self::decode_report(&mut fields)?),
            _ => return Err(EnvelopeError::UnknownKind(tag)),
        };

        // Replies go back to exactly one member: the command's sender
        if matches!(body, Body::Response(_) | Body::Exception(_)) && recipients.len() != 1 {
            return Err(EnvelopeError::Malformed(format!(
                "{} must have exactly one recipient, got {}",
                tag,
                recipients.len()
            )));
        }

        Ok(Self {
            sender,
            recipients,
            correlation_id,
            body,
        })
    }

    fn decode_report(fields: &mut impl Iterator<Item = Value>) -> Result<ErrorReport, EnvelopeError> {
        let mut next_string = |what: &str| match fields.next() {
            Some(Value::String(s)) => Ok(s),
            _ => Err(EnvelopeError::Malformed(format!(
                "exception {} must be a string",
                what
            ))),
        };

        let kind_tag = next_string("kind")?;
        let kind = RemoteErrorKind::from_tag(&kind_tag)
            .ok_or_else(|| EnvelopeError::Malformed(format!("unknown error kind {:?}", kind_tag)))?;
        let type_name = next_string("type")?;
        let message = next_string("message")?;

        // Trace is optional; non-string lines are stringified.
        let trace = match fields.next() {
            Some(Value::Array(lines)) => lines
                .into_iter()
                .map(|line| match line {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            None => Vec::new(),
            Some(_) => {
                return Err(EnvelopeError::Malformed(
                    "exception trace must be a list".to_string(),
                ))
            }
        };
        if fields.next().is_some() {
            return Err(EnvelopeError::Malformed(
                "unexpected fields after exception trace".to_string(),
            ));
        }

        Ok(ErrorReport {
            kind,
            type_name,
            message,
            trace,
        })
    }
}
