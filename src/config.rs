//! Pipeline configuration.

use crate::error::ConfigError;
use crate::truncation::TruncationPolicy;
use crate::types::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`BatchExecutor`](crate::BatchExecutor).
///
/// Deserializable from TOML or JSON; every key is optional.
///
/// ```toml
/// execution_mode = "sequential"
/// tool_timeout_ms = 60000
///
/// [truncation]
/// max_chars = "unbounded"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scheduling of the calls within one batch
    pub execution_mode: ExecutionMode,
    /// Bound applied to every string result
    pub truncation: TruncationConfig,
    /// Optional per-call deadline in milliseconds
    pub tool_timeout_ms: Option<u64>,
    /// Capacity of the output event channel
    pub channel_capacity: usize,
    /// How long a send waits on a full channel before the slow consumer
    /// is logged; the send keeps waiting after that
    pub send_timeout_ms: u64,
    /// When `false`, tools get a disabled stream handler
    pub stream_sub_events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Parallel,
            truncation: TruncationConfig::default(),
            tool_timeout_ms: None,
            channel_capacity: 100,
            send_timeout_ms: 30_000,
            stream_sub_events: true,
        }
    }
}

/// The `[truncation]` table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    /// A positive integer, or `"unbounded"`
    pub max_chars: TruncationPolicy,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document is malformed or a value is out of range.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns an error naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.truncation.max_chars.max_chars() == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "truncation.max_chars",
                reason: "must be positive or \"unbounded\"".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "channel_capacity",
                reason: "must be positive".to_string(),
            });
        }
        if self.tool_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "tool_timeout_ms",
                reason: "must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_truncation(mut self, policy: TruncationPolicy) -> Self {
        self.truncation.max_chars = policy;
        self
    }

    #[must_use]
    pub const fn with_tool_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.tool_timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub const fn with_stream_sub_events(mut self, enabled: bool) -> Self {
        self.stream_sub_events = enabled;
        self
    }

    /// The truncation policy applied to results.
    #[must_use]
    pub const fn truncation_policy(&self) -> TruncationPolicy {
        self.truncation.max_chars
    }

    #[must_use]
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
