//! # Swarm Orchestration
//!
//! ## Run Flow
//!
//! ```text
//! prompt → Claude ┐
//!        → Gemini ├─ barrier → diffs → Integrator
//!        → Codex  ┘
//! ```
//!
//! Every agent reports through one [`EventSink`] owned by the caller.

pub mod agent;
pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod synthesis;

pub use agent::{Agent, RunResult, SwarmAgent};
pub use coordinator::{SwarmCoordinator, SwarmResults};
pub use events::{EventChannel, EventEmitter, EventSink, ExecutionEvent};
pub use pipeline::{AgentSpec, Pipeline, PipelineReport, PipelineRequest, PipelineStage};
pub use synthesis::{
    build_synthesis_prompt, capture_base, extract_diff, SandboxRef, SynthesisEntry,
    SynthesisInput, SynthesisStep,
};
