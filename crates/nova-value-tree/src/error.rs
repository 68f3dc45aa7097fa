use std::time::Duration;

use thiserror::Error;

pub type ValueNodeResult<T> = Result<T, ValueNodeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueNodeError {
    /// Malformed request, detected before anything is scheduled.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The debuggee can't be inspected right now (exited, running, detached, torn down).
    ///
    /// Callers should treat the node's subtree as stale and re-query
    /// `has_children`/`children_count` before retrying.
    #[error("evaluation unavailable: {0}")]
    EvaluationUnavailable(String),

    #[error("evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),

    /// A blocking call was made from a context that would deadlock waiting on itself.
    #[error("blocking evaluation requested from inside an evaluation callback")]
    Reentrancy,

    /// The language evaluator reported a failure of its own.
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),
}

impl ValueNodeError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::EvaluationUnavailable(reason.into())
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Whether retrying the same request later may succeed without re-querying the node.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EvaluationTimeout(_))
    }

    /// Whether the node subtree that produced this error must be considered stale.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::EvaluationUnavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}
