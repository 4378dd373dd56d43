//! # Pipeline
//!
//! The full run: swarm fan-out, barrier, diff gathering, integration.
//!
//! ```text
//! Swarming → Integrating → Complete
//!     ↓            ↓
//!   Failed      Failed
//! ```
//!
//! Version-control finalization is left to the caller so that a CLI run can
//! stop before pushing anything.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::models::{AgentId, AgentProfile, AgentRole};
use crate::state::EngineConfig;
use crate::tools::git::Sandbox;

use super::agent::{Agent, RunResult, SwarmAgent};
use super::coordinator::{SwarmCoordinator, SwarmResults};
use super::events::{EventEmitter, EventSink};
use super::synthesis::{capture_base, SandboxRef, SynthesisStep};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Not started yet
    Pending,
    /// Swarm agents running in their sandboxes
    Swarming,
    /// Integrator merging the swarm's changes
    Integrating,
    Complete,
    Failed,
}

/// One agent to run, and where
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub profile: AgentProfile,
    pub sandbox: PathBuf,
    /// Commit the sandbox started from; read from HEAD before launch when unset
    pub base: Option<String>,
}

/// Inputs for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub prompt: String,
    pub agents: Vec<AgentSpec>,
    pub integrator: AgentSpec,
    /// Repository the integrator should write the final result into
    pub target: Option<PathBuf>,
}

impl PipelineRequest {
    /// Built-in roles, each with its sandbox; the integrator works in `integrator_dir`
    pub fn builtin(
        prompt: impl Into<String>,
        sandboxes: Vec<Sandbox>,
        integrator_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            agents: sandboxes
                .into_iter()
                .map(|sandbox| AgentSpec {
                    profile: sandbox.role.profile(),
                    sandbox: sandbox.path,
                    base: sandbox.base,
                })
                .collect(),
            integrator: AgentSpec {
                profile: AgentRole::Integrator.profile(),
                sandbox: integrator_dir.into(),
                base: None,
            },
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Terminal results of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub swarm: SwarmResults,
    pub integration: RunResult,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.integration.succeeded
    }

    pub fn failed_agents(&self) -> Vec<&AgentId> {
        self.swarm
            .values()
            .filter(|r| !r.succeeded)
            .map(|r| &r.agent_id)
            .collect()
    }
}

/// Runs a swarm followed by its synthesis step
pub struct Pipeline {
    stage: PipelineStage,
    config: Arc<EngineConfig>,
    sink: EventSink,
    emitter: EventEmitter,
}

impl Pipeline {
    pub fn new(config: Arc<EngineConfig>, sink: EventSink) -> Self {
        let emitter = sink.emitter(AgentId::coordinator());
        Self {
            stage: PipelineStage::Pending,
            config,
            sink,
            emitter,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn build_agent(&self, spec: &AgentSpec) -> SwarmAgent {
        SwarmAgent::new(
            spec.profile.clone(),
            self.config.model_for(&spec.profile.id),
            &spec.sandbox,
            &self.config.base_environment,
            self.config.execution_settings(),
            &self.sink,
        )
    }

    #[tracing::instrument(skip_all, fields(prompt_preview = %request.prompt.chars().take(50).collect::<String>()))]
    pub async fn run(
        &mut self,
        request: PipelineRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport> {
        let agents: Vec<SwarmAgent> = request.agents.iter().map(|s| self.build_agent(s)).collect();
        let integrator = self.build_agent(&request.integrator);

        // Configuration problems surface before anything launches
        if let Err(e) = SwarmCoordinator::validate(&agents).and_then(|_| integrator.validate()) {
            self.fail(&e);
            return Err(e);
        }

        // Pin every base before any agent can commit
        let mut sandboxes = Vec::with_capacity(request.agents.len());
        for spec in &request.agents {
            let base = match &spec.base {
                Some(base) => Some(base.clone()),
                None => capture_base(&spec.sandbox).await,
            };
            sandboxes.push(SandboxRef {
                agent_id: spec.profile.id.clone(),
                display_name: spec.profile.display_name.clone(),
                path: spec.sandbox.clone(),
                base,
            });
        }

        self.stage = PipelineStage::Swarming;
        self.emitter.status("Starting agents...");
        let coordinator = SwarmCoordinator::new(&self.sink);
        let swarm = match coordinator.run_swarm(agents, &request.prompt, cancel).await {
            Ok(results) => results,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.stage = PipelineStage::Integrating;
        self.emitter
            .status("All agents finished. Starting integration...");

        let mut step = SynthesisStep::new(integrator, sandboxes);
        if let Some(target) = &request.target {
            step = step.with_target(target);
        }
        let integration = step.run(&request.prompt, cancel).await;

        if cancel.is_cancelled() {
            let e = EngineError::Cancelled;
            self.fail(&e);
            return Err(e);
        }

        if integration.succeeded {
            self.stage = PipelineStage::Complete;
            self.emitter.status("Integration complete.");
        } else {
            self.stage = PipelineStage::Failed;
            self.emitter.error("Integration failed.");
        }

        Ok(PipelineReport { swarm, integration })
    }

    fn fail(&mut self, e: &EngineError) {
        self.stage = PipelineStage::Failed;
        tracing::warn!(error = %e, "pipeline aborted");
        self.emitter.error(format!("Error during project execution: {}", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Invocation;

    fn echo_profile(id: &str) -> AgentProfile {
        AgentProfile {
            id: AgentId::new(id),
            display_name: id.to_string(),
            model_env_var: "TEST_MODEL".to_string(),
            default_model_env: "TEST_DEFAULT".to_string(),
            fallback_model: "m".to_string(),
            invocation: Invocation::Cli {
                template: "echo {prompt}".to_string(),
            },
        }
    }

    #[test]
    fn test_builtin_request_uses_role_profiles() {
        let request = PipelineRequest::builtin(
            "task",
            vec![
                Sandbox {
                    role: AgentRole::Claude,
                    path: PathBuf::from("/w/claude_sandbox"),
                    base: Some("abc123".to_string()),
                },
                Sandbox {
                    role: AgentRole::Codex,
                    path: PathBuf::from("/w/codex_sandbox"),
                    base: None,
                },
            ],
            "/w",
        )
        .with_target("/w/repository");

        assert_eq!(request.agents.len(), 2);
        assert_eq!(request.agents[0].base.as_deref(), Some("abc123"));
        assert_eq!(request.integrator.profile.id, AgentRole::Integrator.id());
        assert_eq!(request.target, Some(PathBuf::from("/w/repository")));
    }

    #[tokio::test]
    async fn test_missing_sandbox_fails_before_launch() {
        let mut pipeline = Pipeline::new(Arc::new(EngineConfig::default()), EventSink::disabled());
        let request = PipelineRequest {
            prompt: "p".to_string(),
            agents: vec![AgentSpec {
                profile: echo_profile("a"),
                sandbox: PathBuf::from("/no/such/sandbox"),
                base: None,
            }],
            integrator: AgentSpec {
                profile: echo_profile("integrator"),
                sandbox: std::env::temp_dir(),
                base: None,
            },
            target: None,
        };

        let err = pipeline
            .run(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingSandbox { .. }));
        assert_eq!(pipeline.stage(), PipelineStage::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_run_reports_every_agent() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let mut pipeline = Pipeline::new(Arc::new(EngineConfig::default()), EventSink::disabled());
        let request = PipelineRequest {
            prompt: "hello".to_string(),
            agents: vec![
                AgentSpec {
                    profile: echo_profile("a"),
                    sandbox: a.path().to_path_buf(),
                    base: None,
                },
                AgentSpec {
                    profile: echo_profile("b"),
                    sandbox: b.path().to_path_buf(),
                    base: None,
                },
            ],
            integrator: AgentSpec {
                profile: echo_profile("integrator"),
                sandbox: root.path().to_path_buf(),
                base: None,
            },
            target: None,
        };

        let report = pipeline
            .run(request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.swarm.len(), 2);
        assert!(report.failed_agents().is_empty());
        assert!(report.succeeded());
        assert_eq!(pipeline.stage(), PipelineStage::Complete);
    }
}
