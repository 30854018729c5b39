//! # Cohort
//!
//! Run named commands on every member of a process group and collect one
//! outcome per member.
//!
//! Cohort sits on top of a virtually synchronous multicast transport. Each
//! process joins a group, registers command handlers, and can execute a
//! command on the whole group (or on chosen members). The caller gets an
//! [`Execution`] that yields exactly one response or error per member that was
//! in the group when the command was delivered, and stops waiting for members
//! that leave before answering.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Commander                                                  │
//! │  execute / notify / register / is_leader / members         │
//! ├──────────────┬──────────────────────┬──────────────────────┤
//! │ Command      │ Execution Tracker    │ Leadership Tracker   │
//! │ Registry     │  id → channel        │  ordered pool        │
//! ├──────────────┴──────────┬───────────┴──────────────────────┤
//! │        Dispatch Router (one task, delivery order)          │
//! ├─────────────────────────┴──────────────────────────────────┤
//! │ GroupTransport: FIFO, self-delivery, virtual synchrony     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## How a broadcast completes
//!
//! The caller registers the execution before sending. When the command loops
//! back to the sender, the router pushes an *echo* carrying the membership at
//! that point of the agreed order. Those members are exactly the ones that
//! will see the command, so the execution waits for each of them to either
//! answer or leave.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cohort::{Commander, CommanderConfig, HandlerError, LocalCluster, Member};
//! use serde_json::json;
//!
//! let cluster = LocalCluster::new();
//! let config = CommanderConfig::for_group("calc")?;
//! let commander = Commander::connect(cluster.transport(1), config).await?;
//!
//! commander.register_fn("sum", |_: &Member, (a, b): (i64, i64)| Ok::<_, HandlerError>(a + b));
//!
//! let mut execution = commander.execute([], "sum", vec![json!(3), json!(4)]).await?;
//! while let Some(response) = execution.next_response().await? {
//!     println!("{} says {}", response.sender, response.value);
//! }
//! ```

#![deny(missing_docs)]

pub mod commander;
pub mod config;
pub mod error;
pub mod leadership;
pub mod member;
pub mod messaging;
pub mod registry;
pub mod transport;

pub use commander::Commander;
pub use config::{CommanderConfig, CommanderConfigBuilder};
pub use error::{
    CommanderError, ConfigError, EnvelopeError, ExecutionError, HandlerError, RemoteError,
    RemoteErrorKind, TransportError,
};
pub use leadership::LeadershipTracker;
pub use member::Member;
pub use messaging::{DiscardHandle, Envelope, EnvelopeKind, Execution, ExecutionTracker, Response};
pub use registry::{CommandHandler, CommandRegistry};
pub use transport::{
    EventSink, GroupTransport, LocalCluster, LocalTransport, MembershipChange, TransportEvent,
};
