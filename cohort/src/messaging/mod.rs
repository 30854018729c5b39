//! Wire envelopes, execution tracking and dispatch.

pub mod correlation;
pub mod envelope;
pub mod execution;
pub(crate) mod router;

pub use correlation::{EventReceiver, ExecutionTracker};
pub use envelope::{Body, Envelope, EnvelopeKind, ErrorReport};
pub use execution::{DiscardHandle, Execution, Response};
