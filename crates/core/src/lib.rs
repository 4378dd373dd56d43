//! # Swarm Core
//!
//! The multi-agent execution engine: several coding-assistant CLIs run
//! against isolated copies of a repository, their output is streamed to an
//! observer, and once all of them have finished an integrator merges their
//! work.
//!
//! ## Architecture
//!
//! - `tools/` - Process runner, command templates, workspace and git helpers
//! - `models` - Built-in agent roles and model resolution
//! - `state/` - Run configuration and the credential store
//! - `swarm/` - Agents, coordinator, synthesis step and the event sink
//!
//! ## Usage
//!
//! ```rust,ignore
//! use swarm_core::swarm::{EventSink, Pipeline, PipelineRequest};
//!
//! let (sink, mut events) = EventSink::channel();
//! let mut pipeline = Pipeline::new(config, sink);
//! let report = pipeline.run(request, &cancel).await?;
//! ```

pub mod error;
pub mod models;
pub mod state;
pub mod swarm;
pub mod tools;

pub use error::{EngineError, FailureKind};
pub use models::{AgentId, AgentProfile, AgentRole, Invocation};
