//! Errors that callers must handle as hard failures.
//!
//! Failures of individual tool calls are never errors at this level: they
//! are recorded in the call's [`ToolCallRecord`](crate::ToolCallRecord) and
//! the batch carries on.

use thiserror::Error;

/// A batch that cannot be started. Returned before any event is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("tool call at position {index} has an empty id")]
    EmptyId { index: usize },

    #[error("tool call '{id}' has an empty tool name")]
    EmptyName { id: String },

    #[error("duplicate tool call id '{id}' in batch")]
    DuplicateId { id: String },

    #[error("arguments of tool call '{id}' must be a JSON object, got {found}")]
    InvalidArguments { id: String, found: &'static str },
}

/// Invalid pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
