//! The [`Commander`]: one process's handle on a command group.
//!
//! A commander joins a group through a [`GroupTransport`], spawns the dispatch
//! router, and exposes the library surface: registering handlers, executing
//! commands on the group, and querying membership and leadership.
//!
//! # Lifecycle
//!
//! 1. **Connect**: join the group, spawn the router task
//! 2. **Active**: execute commands, serve registered handlers
//! 3. **Shutdown**: leave the group, stop the router, end pending executions
//!
//! Dropping a commander without calling [`shutdown`](Commander::shutdown)
//! abandons the group through [`GroupTransport::abandon`], stops the router
//! and ends its pending executions with
//! [`ExecutionError::Disconnected`](crate::ExecutionError::Disconnected).
//!
//! # Example
//!
//! ```rust,ignore
//! let cluster = LocalCluster::new();
//! let config = CommanderConfig::for_group("calc")?;
//!
//! let a = Commander::connect(cluster.transport(1), config.clone()).await?;
//! let b = Commander::connect(cluster.transport(2), config).await?;
//! for commander in [&a, &b] {
//!     commander.register_fn("sum", |_: &Member, (x, y): (i64, i64)| Ok::<_, HandlerError>(x + y));
//! }
//!
//! let mut execution = a.execute([], "sum", vec![json!(3), json!(4)]).await?;
//! while let Some(response) = execution.next_response().await? {
//!     assert_eq!(response.value, json!(7));
//! }
//!
//! a.shutdown().await?;
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::CommanderConfig;
use crate::error::{CommanderError, HandlerError, TransportError};
use crate::leadership::LeadershipTracker;
use crate::member::Member;
use crate::messaging::router::DispatchRouter;
use crate::messaging::{Envelope, Execution, ExecutionTracker};
use crate::registry::CommandRegistry;
use crate::transport::{EventSink, GroupTransport, MembershipChange};

struct RouterTask {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A member of a command group.
pub struct Commander {
    local: Member,
    config: CommanderConfig,
    transport: Arc<dyn GroupTransport>,
    registry: Arc<CommandRegistry>,
    tracker: Arc<ExecutionTracker>,
    leadership: Arc<LeadershipTracker>,
    membership: broadcast::Sender<MembershipChange>,
    /// `None` once shut down.
    router: Mutex<Option<RouterTask>>,
}

impl Commander {
    /// Join the configured group and start dispatching.
    ///
    /// Must be called within a tokio runtime.
    pub async fn connect<T: GroupTransport>(
        transport: T,
        config: CommanderConfig,
    ) -> Result<Self, CommanderError> {
        config.validate()?;

        let transport: Arc<dyn GroupTransport> = Arc::new(transport);
        let (sink, events) = EventSink::channel();
        let local = transport.connect(config.group(), sink).await?;

        let registry = Arc::new(CommandRegistry::new());
        let tracker = Arc::new(ExecutionTracker::new());
        let leadership = Arc::new(LeadershipTracker::new(local));
        let (membership, _) = broadcast::channel(config.membership_buffer());

        let router = DispatchRouter::new(
            local,
            transport.clone(),
            registry.clone(),
            tracker.clone(),
            leadership.clone(),
            membership.clone(),
            &config,
        );
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(router.run(events, shutdown_rx));

        tracing::info!(member = %local, group = %config.group(), "Commander connected");

        Ok(Self {
            local,
            config,
            transport,
            registry,
            tracker,
            leadership,
            membership,
            router: Mutex::new(Some(RouterTask { shutdown, task })),
        })
    }

    /// Identity of this process in the group.
    pub fn local_member(&self) -> Member {
        self.local
    }

    /// Configuration this commander was started with.
    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    /// The command registry served by this process.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Register a handler. See [`CommandRegistry::register`].
    pub fn register<F>(&self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&Member, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.registry.register(name, handler)
    }

    /// Register a typed handler. See [`CommandRegistry::register_fn`].
    pub fn register_fn<A, R, E, F>(&self, name: impl Into<String>, func: F) -> bool
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        E: Into<HandlerError> + 'static,
        F: Fn(&Member, A) -> Result<R, E> + Send + Sync + 'static,
    {
        self.registry.register_fn(name, func)
    }

    /// Remove a handler. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    /// Run `name` on `recipients` (every member when empty).
    ///
    /// The returned [`Execution`] yields one outcome per member that was in the
    /// group when the command was delivered. Remote failures never make this
    /// call fail; they surface when the matching response is pulled.
    ///
    /// # Errors
    ///
    /// - [`CommanderError::InvalidCommand`] for an empty name.
    /// - [`CommanderError::ShutDown`] after [`shutdown`](Self::shutdown).
    /// - [`CommanderError::Transport`] if the send fails.
    pub async fn execute(
        &self,
        recipients: impl IntoIterator<Item = Member>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Execution, CommanderError> {
        self.check_command(name)?;
        let recipients: BTreeSet<Member> = recipients.into_iter().collect();

        // 1. Register before sending so the echo finds the entry
        let id = self.tracker.next_correlation_id();
        let events = self.tracker.register(id);
        let execution = Execution::new(
            id,
            recipients.clone(),
            name.to_string(),
            args.clone(),
            events,
            self.tracker.clone(),
        );

        // 2. Send; on failure dropping the execution releases the entry
        let envelope = Envelope::command(self.local, recipients, id, name, args);
        self.transport.send(envelope.encode()?).await?;

        tracing::debug!(correlation_id = id, command = %name, "Command sent");
        Ok(execution)
    }

    /// Send `name` to `recipients` without collecting responses.
    pub async fn notify(
        &self,
        recipients: impl IntoIterator<Item = Member>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(), CommanderError> {
        self.check_command(name)?;
        let id = self.tracker.next_correlation_id();
        let envelope = Envelope::command(self.local, recipients.into_iter().collect(), id, name, args);
        self.transport.send(envelope.encode()?).await?;

        tracing::debug!(correlation_id = id, command = %name, "Notification sent");
        Ok(())
    }

    /// Whether this process leads the group.
    ///
    /// Waits until the first membership change has been processed.
    pub async fn is_leader(&self) -> bool {
        self.leadership.is_leader().await
    }

    /// Index of this process in the leadership pool; `None` until the first
    /// membership change.
    pub fn leader_position(&self) -> Option<usize> {
        self.leadership.leader_position()
    }

    /// Current group members, in transport order.
    pub fn members(&self) -> Vec<Member> {
        self.leadership.members()
    }

    /// Current leadership pool; index 0 is the leader.
    pub fn leadership_pool(&self) -> Vec<Member> {
        self.leadership.pool()
    }

    /// Subscribe to membership changes processed from now on.
    ///
    /// Slow subscribers miss changes once the configured buffer overflows.
    pub fn subscribe_membership(&self) -> broadcast::Receiver<MembershipChange> {
        self.membership.subscribe()
    }

    /// Number of executions still tracked.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.router
            .lock()
            .expect("commander router lock poisoned")
            .is_none()
    }

    /// Leave the group and stop dispatching.
    ///
    /// Pending executions end with
    /// [`ExecutionError::Disconnected`](crate::ExecutionError::Disconnected).
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), CommanderError> {
        let Some(router) = self
            .router
            .lock()
            .expect("commander router lock poisoned")
            .take()
        else {
            return Ok(());
        };

        let disconnected = match self.transport.disconnect().await {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) => {
                tracing::debug!(member = %self.local, "Already removed from group");
                Ok(())
            }
            Err(err) => Err(err),
        };

        let _ = router.shutdown.send(());
        if let Err(err) = router.task.await {
            tracing::warn!(member = %self.local, error = %err, "Dispatch router task failed");
        }
        self.tracker.clear();

        tracing::info!(member = %self.local, "Commander shut down");
        disconnected.map_err(CommanderError::from)
    }

    fn check_command(&self, name: &str) -> Result<(), CommanderError> {
        if name.is_empty() {
            return Err(CommanderError::InvalidCommand(name.to_string()));
        }
        if self.is_shut_down() {
            return Err(CommanderError::ShutDown);
        }
        Ok(())
    }
}

impl Drop for Commander {
    fn drop(&mut self) {
        let router = match self.router.get_mut() {
            Ok(router) => router.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(router) = router else {
            return;
        };

        // Nothing answers pending executions once the router is gone
        self.transport.abandon();
        router.task.abort();
        self.tracker.clear();
        tracing::debug!(member = %self.local, "Commander dropped without shutdown");
    }
}

impl std::fmt::Debug for Commander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commander")
            .field("local", &self.local)
            .field("group", &self.config.group())
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}
