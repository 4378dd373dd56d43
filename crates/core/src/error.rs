//! # Engine Errors
//!
//! Two layers of failure live here:
//!
//! - [`FailureKind`] classifies what went wrong inside a single command
//!   attempt. These never escape the engine; they are recorded on
//!   [`AttemptOutcome`](crate::tools::runner::AttemptOutcome)s and reported
//!   to the observer as `error` events.
//! - [`EngineError`] is the only error type that propagates out of the
//!   coordinator, and only for configuration problems that prevent any
//!   agent from being launched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::template::TemplateError;

/// Why a single attempt (or a whole command) did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process could not be launched, or its pipes failed mid-read
    ProcessSpawnFailure,
    /// The wall-clock timeout elapsed before the process finished
    CommandTimeout,
    /// The process exited with a nonzero code (or was killed by a signal)
    NonZeroExit,
    /// Output contained invalid UTF-8; recovered by lossy decoding
    StreamDecodeAnomaly,
    /// A sandbox diff could not be produced; absorbed into diagnostic text
    DiffExtractionFailure,
    /// Every allowed attempt failed
    RetriesExhausted,
    /// The run was cancelled by the caller
    Cancelled,
}

impl FailureKind {
    /// Whether the runner should schedule another attempt after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::ProcessSpawnFailure | FailureKind::CommandTimeout | FailureKind::NonZeroExit
        )
    }
}

/// Configuration errors that prevent the engine from launching agents
#[derive(Error, Debug)]
pub enum EngineError {
    /// A command template could not be rendered
    #[error("agent '{agent}' has an invalid command template: {source}")]
    InvalidTemplate {
        agent: String,
        #[source]
        source: TemplateError,
    },

    /// Two agents were given the same identifier
    #[error("duplicate agent id '{0}' in swarm")]
    DuplicateAgent(String),

    /// An agent's sandbox directory does not exist
    #[error("sandbox for agent '{agent}' does not exist: {path}")]
    MissingSandbox { agent: String, path: String },

    /// A swarm was requested with no agents at all
    #[error("swarm has no agents to run")]
    EmptySwarm,

    /// The caller cancelled the run
    #[error("run was cancelled")]
    Cancelled,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
