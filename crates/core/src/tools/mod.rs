//! # Tools
//!
//! Deterministic machinery underneath the agents.
//!
//! ## Modules
//!
//! - `runner` - Retrying, timed, streaming process execution
//! - `template` - `{variable}` command templates
//! - `git` - Workspace provisioning and integration finalization

pub mod git;
pub mod runner;
pub mod template;

pub use git::{FinalizeOutcome, Sandbox, Workspace};
pub use runner::{CommandExecution, ExecutionOutcome, ExecutionSettings, ProcessRunner};
