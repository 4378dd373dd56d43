//! # Project Runs
//!
//! One end-to-end run shared by the WebSocket endpoint and the `run`
//! subcommand: provision the workspace, run the pipeline, finalize, clean up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use swarm_core::models::{AgentId, AgentRole};
use swarm_core::state::{CredentialStore, EngineConfig};
use swarm_core::swarm::{EventSink, Pipeline, PipelineReport, PipelineRequest};
use swarm_core::tools::{FinalizeOutcome, Workspace};

/// What a client asks for
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRequest {
    pub github_url: String,
    pub project_prompt: String,
    /// Explicit model per agent id
    #[serde(default)]
    pub agent_models: HashMap<String, String>,
}

/// Where and how to run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Created for this run and removed afterwards
    pub workspace_dir: PathBuf,
    /// Directory holding the credential file
    pub config_dir: PathBuf,
    pub push: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub report: PipelineReport,
    pub branch: String,
    pub committed: bool,
    pub pushed: bool,
}

impl RunSummary {
    pub fn message(&self) -> String {
        if self.pushed {
            format!(
                "Successfully pushed branch '{}'. Please create a PR on GitHub.",
                self.branch
            )
        } else {
            format!("Integration committed on local branch '{}'.", self.branch)
        }
    }
}

/// Run a project to completion; the workspace is always removed
pub async fn run_project(
    request: ProjectRequest,
    options: RunOptions,
    sink: EventSink,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let result = execute(&request, &options, &sink, &cancel).await;

    if tokio::fs::metadata(&options.workspace_dir).await.is_ok() {
        if let Err(e) = tokio::fs::remove_dir_all(&options.workspace_dir).await {
            tracing::warn!(dir = ?options.workspace_dir, error = %e, "failed to remove workspace");
        }
    }
    result
}

async fn execute(
    request: &ProjectRequest,
    options: &RunOptions,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let emitter = sink.emitter(AgentId::coordinator());

    let credentials = CredentialStore::load_from_dir(&options.config_dir).await;
    let config = Arc::new(
        EngineConfig::from_env()
            .with_credentials(&credentials)
            .with_agent_models(request.agent_models.clone()),
    );

    emitter.status(format!("Cloning {}...", request.github_url));
    let workspace = {
        let source = request.github_url.clone();
        let dir = options.workspace_dir.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            Workspace::provision(&source, dir, &AgentRole::swarm_roles(), &config)
        })
        .await
        .context("Provisioning task failed")??
    };
    for sandbox in workspace.sandboxes() {
        emitter.status(format!("Created {} sandbox.", sandbox.role.id()));
    }

    let pipeline_request = PipelineRequest::builtin(
        request.project_prompt.clone(),
        workspace.sandboxes().to_vec(),
        workspace.root(),
    )
    .with_target(workspace.repository());

    let mut pipeline = Pipeline::new(config, sink.clone());
    let report = pipeline.run(pipeline_request, cancel).await?;
    if !report.succeeded() {
        anyhow::bail!("integration agent did not succeed");
    }

    emitter.status("Integration complete. Committing changes...");
    let FinalizeOutcome {
        branch,
        committed,
        pushed,
    } = {
        let workspace = workspace.clone();
        let prompt = request.project_prompt.clone();
        let push = options.push;
        tokio::task::spawn_blocking(move || workspace.finalize(&prompt, push))
            .await
            .context("Finalize task failed")??
    };
    if pushed {
        emitter.status(format!("Pushed branch '{}' to origin.", branch));
    }

    Ok(RunSummary {
        report,
        branch,
        committed,
        pushed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_models_are_optional() {
        let req: ProjectRequest = serde_json::from_str(
            r#"{"github_url": "https://example.com/r.git", "project_prompt": "do it"}"#,
        )
        .unwrap();
        assert!(req.agent_models.is_empty());
    }

    #[tokio::test]
    async fn test_failed_clone_still_removes_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace_dir = tmp.path().join("ws");
        let options = RunOptions {
            workspace_dir: workspace_dir.clone(),
            config_dir: tmp.path().to_path_buf(),
            push: false,
        };
        let request = ProjectRequest {
            github_url: tmp.path().join("missing-repo").display().to_string(),
            project_prompt: "p".to_string(),
            agent_models: HashMap::new(),
        };

        let result = run_project(
            request,
            options,
            EventSink::disabled(),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
        assert!(!workspace_dir.exists());
    }
}
