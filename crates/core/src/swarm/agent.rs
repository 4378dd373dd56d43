//! # Agents
//!
//! An agent turns a prompt into one external command and governs its
//! execution inside its own sandbox. Retry, timeout and streaming semantics
//! all belong to the composed [`ProcessRunner`]; agents only differ in how
//! they build the command line (see [`Invocation`]).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, FailureKind};
use crate::models::{AgentId, AgentProfile, AgentRole, Invocation};
use crate::state::EngineConfig;
use crate::tools::runner::{CommandExecution, ExecutionSettings, ProcessRunner};
use crate::tools::template::{render_template, validate_template};

use super::events::{EventEmitter, EventSink};

/// Terminal result of one agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub agent_id: AgentId,
    pub succeeded: bool,
    pub duration_seconds: f64,
    /// Attempts made by the runner (0 if the command could not be built)
    pub attempts: u32,
    pub failure: Option<FailureKind>,
}

/// Something the coordinator can run against a prompt
#[async_trait]
pub trait Agent: Send {
    fn id(&self) -> &AgentId;

    /// Directory this agent exclusively owns for the run
    fn sandbox(&self) -> &Path;

    /// Reject configurations that could never launch
    fn validate(&self) -> Result<(), EngineError>;

    /// Run the prompt to a terminal result; never fails
    ///
    /// Taking `&mut self` keeps at most one command in flight per agent.
    async fn run(&mut self, prompt: &str, cancel: &CancellationToken) -> RunResult;
}

#[async_trait]
impl<T: Agent + ?Sized> Agent for Box<T> {
    fn id(&self) -> &AgentId {
        (**self).id()
    }

    fn sandbox(&self) -> &Path {
        (**self).sandbox()
    }

    fn validate(&self) -> Result<(), EngineError> {
        (**self).validate()
    }

    async fn run(&mut self, prompt: &str, cancel: &CancellationToken) -> RunResult {
        (**self).run(prompt, cancel).await
    }
}

/// A rendered command line plus any helper file it depends on
///
/// Dropping this removes the helper file, whatever the command's outcome.
#[derive(Debug)]
struct PreparedCommand {
    line: String,
    _script: Option<NamedTempFile>,
}

/// Agent backed by a role profile and a shell command
#[derive(Debug)]
pub struct SwarmAgent {
    profile: AgentProfile,
    model: String,
    sandbox: PathBuf,
    environment: HashMap<String, String>,
    settings: ExecutionSettings,
    emitter: EventEmitter,
    runner: ProcessRunner,
}

impl SwarmAgent {
    /// Build an agent with its own copy of `base_environment`
    pub fn new(
        profile: AgentProfile,
        explicit_model: Option<&str>,
        sandbox: impl Into<PathBuf>,
        base_environment: &HashMap<String, String>,
        settings: ExecutionSettings,
        sink: &EventSink,
    ) -> Self {
        let mut environment = base_environment.clone();
        let model = profile.resolve_model(explicit_model, &environment);
        environment.insert(profile.model_env_var.clone(), model.clone());

        let emitter = sink.emitter(profile.id.clone());
        let runner = ProcessRunner::new(emitter.clone());

        Self {
            profile,
            model,
            sandbox: sandbox.into(),
            environment,
            settings,
            emitter,
            runner,
        }
    }

    /// Build a built-in role from the run configuration
    pub fn from_role(
        role: AgentRole,
        config: &EngineConfig,
        sandbox: impl Into<PathBuf>,
        sink: &EventSink,
    ) -> Self {
        let id = role.id();
        Self::new(
            role.profile(),
            config.model_for(&id),
            sandbox,
            &config.base_environment,
            config.execution_settings(),
            sink,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn display_name(&self) -> &str {
        &self.profile.display_name
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    fn prepare(&self, prompt: &str) -> Result<PreparedCommand> {
        match &self.profile.invocation {
            Invocation::Cli { template } => {
                let vars = variables(&[
                    ("prompt", shell_words::quote(prompt).into_owned()),
                    ("model", shell_words::quote(&self.model).into_owned()),
                ]);
                let line = render_template(template, &vars)?;
                Ok(PreparedCommand {
                    line,
                    _script: None,
                })
            }
            Invocation::Script {
                template,
                extension,
                body,
            } => {
                let script_vars = variables(&[
                    ("prompt", serde_json::to_string(prompt)?),
                    ("model", serde_json::to_string(&self.model)?),
                ]);
                let script = render_template(body, &script_vars)?;

                let mut file = tempfile::Builder::new()
                    .prefix(&format!("swarm-{}-", self.profile.id))
                    .suffix(&format!(".{}", extension))
                    .tempfile()
                    .context("Failed to create helper script")?;
                file.write_all(script.as_bytes())
                    .and_then(|_| file.flush())
                    .context("Failed to write helper script")?;

                let path = file.path().to_string_lossy().into_owned();
                let vars = variables(&[
                    ("prompt", shell_words::quote(prompt).into_owned()),
                    ("model", shell_words::quote(&self.model).into_owned()),
                    ("script", shell_words::quote(&path).into_owned()),
                ]);
                let line = render_template(template, &vars)?;
                Ok(PreparedCommand {
                    line,
                    _script: Some(file),
                })
            }
        }
    }
}

#[async_trait]
impl Agent for SwarmAgent {
    fn id(&self) -> &AgentId {
        &self.profile.id
    }

    fn sandbox(&self) -> &Path {
        &self.sandbox
    }

    fn validate(&self) -> Result<(), EngineError> {
        for template in self.profile.invocation.templates() {
            validate_template(template).map_err(|source| EngineError::InvalidTemplate {
                agent: self.profile.id.to_string(),
                source,
            })?;
        }
        if !self.sandbox.is_dir() {
            return Err(EngineError::MissingSandbox {
                agent: self.profile.id.to_string(),
                path: self.sandbox.display().to_string(),
            });
        }
        Ok(())
    }

    async fn run(&mut self, prompt: &str, cancel: &CancellationToken) -> RunResult {
        let started = Instant::now();
        self.emitter.status(format!(
            "Starting {} (model: {})...",
            self.profile.display_name, self.model
        ));
        tracing::info!(agent = %self.profile.id, model = %self.model, "agent starting");

        let (attempts, failure) = match self.prepare(prompt) {
            Ok(prepared) => {
                let cmd = CommandExecution::new(prepared.line.clone(), &self.sandbox)
                    .with_environment(self.environment.clone())
                    .with_settings(self.settings);
                let outcome = self.runner.execute(&cmd, cancel).await;
                drop(prepared);

                if outcome.succeeded() {
                    self.emitter.status("Execution completed.");
                } else {
                    self.emitter.status(format!(
                        "Execution failed after {} attempt(s).",
                        outcome.attempts.len()
                    ));
                }
                (outcome.attempts.len() as u32, outcome.failure)
            }
            Err(e) => {
                self.emitter.error(format!("Failed to execute: {:#}", e));
                (0, Some(FailureKind::ProcessSpawnFailure))
            }
        };

        let duration = started.elapsed().as_secs_f64();
        self.emitter
            .status(format!("Finished in {:.2} seconds.", duration));
        tracing::info!(
            agent = %self.profile.id,
            succeeded = failure.is_none(),
            duration_seconds = duration,
            "agent finished"
        );

        RunResult {
            agent_id: self.profile.id.clone(),
            succeeded: failure.is_none(),
            duration_seconds: duration,
            attempts,
            failure,
        }
    }
}

fn variables(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
