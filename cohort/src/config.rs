//! Configuration for a [`Commander`](crate::Commander).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_MAX_TRACE_FRAMES: usize = 32;
const DEFAULT_MEMBERSHIP_BUFFER: usize = 64;

/// Commander settings.
///
/// Can be built in code or loaded from JSON; missing optional fields take
/// their defaults. Call [`validate`](Self::validate) on loaded configs.
///
/// # Example
///
/// ```rust
/// use cohort::CommanderConfig;
///
/// let config = CommanderConfig::builder()
///     .group("inventory")
///     .max_trace_frames(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.group(), "inventory");
///
/// let loaded: CommanderConfig = serde_json::from_str(r#"{"group": "inventory"}"#).unwrap();
/// assert_eq!(loaded.membership_buffer(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderConfig {
    group: String,
    #[serde(default = "default_capture_traces")]
    capture_traces: bool,
    #[serde(default = "default_max_trace_frames")]
    max_trace_frames: usize,
    #[serde(default = "default_membership_buffer")]
    membership_buffer: usize,
}

fn default_capture_traces() -> bool {
    true
}

fn default_max_trace_frames() -> usize {
    DEFAULT_MAX_TRACE_FRAMES
}

fn default_membership_buffer() -> usize {
    DEFAULT_MEMBERSHIP_BUFFER
}

impl CommanderConfig {
    /// Configuration for `group` with default settings.
    pub fn for_group(group: impl Into<String>) -> Result<Self, ConfigError> {
        Self::builder().group(group).build()
    }

    /// Start building a configuration.
    pub fn builder() -> CommanderConfigBuilder {
        CommanderConfigBuilder::default()
    }

    /// Check the invariants a builder would enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group.is_empty() {
            return Err(ConfigError::EmptyGroup);
        }
        if self.membership_buffer == 0 {
            return Err(ConfigError::ZeroMembershipBuffer);
        }
        Ok(())
    }

    /// Group id to join.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Whether exception replies carry trace lines.
    pub fn capture_traces(&self) -> bool {
        self.capture_traces
    }

    /// Maximum number of trace lines forwarded with an exception.
    pub fn max_trace_frames(&self) -> usize {
        self.max_trace_frames
    }

    /// Capacity of the membership subscription channel.
    pub fn membership_buffer(&self) -> usize {
        self.membership_buffer
    }
}

/// Builder for [`CommanderConfig`].
#[derive(Debug, Clone)]
pub struct CommanderConfigBuilder {
    group: Option<String>,
    capture_traces: bool,
    max_trace_frames: usize,
    membership_buffer: usize,
}

impl Default for CommanderConfigBuilder {
    fn default() -> Self {
        Self {
            group: None,
            capture_traces: true,
            max_trace_frames: DEFAULT_MAX_TRACE_FRAMES,
            membership_buffer: DEFAULT_MEMBERSHIP_BUFFER,
        }
    }
}

impl CommanderConfigBuilder {
    /// Set the group id to join.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Include handler error traces in exception replies.
    pub fn capture_traces(mut self, capture: bool) -> Self {
        self.capture_traces = capture;
        self
    }

    /// Cap the number of trace lines forwarded with an exception.
    pub fn max_trace_frames(mut self, frames: usize) -> Self {
        self.max_trace_frames = frames;
        self
    }

    /// Set the capacity of the membership subscription channel.
    pub fn membership_buffer(mut self, capacity: usize) -> Self {
        self.membership_buffer = capacity;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<CommanderConfig, ConfigError> {
        let config = CommanderConfig {
            group: self.group.unwrap_or_default(),
            capture_traces: self.capture_traces,
            max_trace_frames: self.max_trace_frames,
            membership_buffer: self.membership_buffer,
        };
        config.validate()?;
        Ok(config)
    }
}
