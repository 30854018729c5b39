//! Command registry: name → handler mapping.
//!
//! The dispatch router resolves the command name of every inbound `Command`
//! envelope here. Applications register and unregister handlers from any task
//! while the router is running.
//!
//! # Concurrency
//!
//! Backed by an `RwLock`: lookups from the router and from callers run
//! concurrently, while `register`/`unregister` are exclusive. Handlers are
//! stored as `Arc`s so a lookup never holds the lock while the handler runs.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;
use crate::member::Member;

/// A command handler.
///
/// Handlers run synchronously on the dispatch task, so a slow handler delays
/// every later message and membership change of this process. Offload slow
/// work and answer quickly.
///
/// Closures with the signature
/// `Fn(&Member, Vec<Value>) -> Result<Value, HandlerError>` implement this
/// trait.
pub trait CommandHandler: Send + Sync + 'static {
    /// Run the command for `sender` with positional `args`.
    ///
    /// `Value::Null` is the result of a command with nothing to return. It is
    /// still sent back as a normal response, so the caller gets one outcome from
    /// every member whether or not the command produces a value.
    fn call(&self, sender: &Member, args: Vec<Value>) -> Result<Value, HandlerError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Member, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn call(&self, sender: &Member, args: Vec<Value>) -> Result<Value, HandlerError> {
        self(sender, args)
    }
}

/// Adapts a typed function to [`CommandHandler`].
///
/// The argument list is decoded into `A` (a tuple, a struct, a `Vec`...), and
/// the result is encoded from `R`.
struct TypedHandler<A, R, E, F> {
    func: F,
    _marker: PhantomData<fn(A) -> Result<R, E>>,
}

impl<A, R, E, F> CommandHandler for TypedHandler<A, R, E, F>
where
    A: DeserializeOwned + 'static,
    R: Serialize + 'static,
    E: Into<HandlerError> + 'static,
    F: Fn(&Member, A) -> Result<R, E> + Send + Sync + 'static,
{
    fn call(&self, sender: &Member, args: Vec<Value>) -> Result<Value, HandlerError> {
        let decoded: A = serde_json::from_value(Value::Array(args))
            .map_err(|e| HandlerError::new("invalid_arguments", e.to_string()))?;
        let result = (self.func)(sender, decoded).map_err(Into::into)?;
        serde_json::to_value(result).map_err(|e| HandlerError::new("invalid_result", e.to_string()))
    }
}

/// Registry of command handlers.
///
/// # Example
///
/// ```rust
/// use cohort::{CommandRegistry, HandlerError, Member};
/// use serde_json::json;
///
/// let registry = CommandRegistry::new();
/// registry.register_fn("sum", |_sender: &Member, (a, b): (i64, i64)| {
///     Ok::<_, HandlerError>(a + b)
/// });
///
/// let handler = registry.lookup("sum").unwrap();
/// let result = handler.call(&Member::new(1, 1), vec![json!(3), json!(4)]).unwrap();
/// assert_eq!(result, json!(7));
/// ```
#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under `name`, replacing any previous handler.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register<F>(&self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&Member, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(handler))
    }

    /// Register a typed function under `name`.
    ///
    /// Arguments that do not decode into `A` are answered with a
    /// `invalid_arguments` handler error.
    pub fn register_fn<A, R, E, F>(&self, name: impl Into<String>, func: F) -> bool
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        E: Into<HandlerError> + 'static,
        F: Fn(&Member, A) -> Result<R, E> + Send + Sync + 'static,
    {
        self.register_handler(
            name,
            Arc::new(TypedHandler {
                func,
                _marker: PhantomData,
            }),
        )
    }

    /// Register a shared handler object under `name`.
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> bool {
        let name = name.into();
        let replaced = self
            .handlers
            .write()
            .expect("command registry lock poisoned")
            .insert(name.clone(), handler)
            .is_some();
        tracing::debug!(command = %name, replaced, "Command registered");
        replaced
    }

    /// Remove the handler for `name`. Returns `true` if one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .handlers
            .write()
            .expect("command registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            tracing::debug!(command = %name, "Command unregistered");
        }
        removed
    }

    /// Look up the handler for `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .expect("command registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Whether a handler is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .expect("command registry lock poisoned")
            .contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .expect("command registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .expect("command registry lock poisoned")
            .len()
    }

    /// Whether no command is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}
