//! Swarm Server
//!
//! Axum server that runs agent swarms over a WebSocket, plus a `run`
//! subcommand that drives a single swarm from the terminal.

mod api;
mod run;

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use swarm_core::swarm::{EventChannel, EventSink};

use crate::api::AppState;
use crate::run::{run_project, ProjectRequest, RunOptions};

#[derive(Parser, Clone)]
#[command(author, version, about = "Agent Swarm - parallel coding agents with an integrator")]
struct Args {
    /// Directory holding api_keys.json
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Parent directory for per-run workspaces
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
    /// Run one swarm against a repository (CLI mode, no server)
    Run {
        /// Repository URL or local path
        #[arg(long)]
        repo: String,
        /// Task for the agents
        prompt: String,
        /// Push the integration branch to origin
        #[arg(long)]
        push: bool,
        /// Explicit model per agent, e.g. `--model claude=claude-opus-4`
        #[arg(long = "model", value_parser = parse_model)]
        models: Vec<(String, String)>,
        /// Parent directory for the run's workspace
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
}

fn parse_model(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(agent, model)| !agent.is_empty() && !model.is_empty())
        .map(|(agent, model)| (agent.to_string(), model.to_string()))
        .ok_or_else(|| format!("expected AGENT=MODEL, got '{}'", raw))
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("agent-swarm")
}

async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&state.workspace_root).await?;
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "swarm server listening");
    tracing::info!("routes: /ws/project/:project_id, /api/keys, /health");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_cli(
    request: ProjectRequest,
    workspace_root: PathBuf,
    config_dir: PathBuf,
    push: bool,
) -> anyhow::Result<()> {
    let options = RunOptions {
        workspace_dir: workspace_root.join(format!(
            "cli-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        )),
        config_dir,
        push,
    };

    let (sink, events) = EventSink::channel();
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            ctrl_c.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(events);
        while let Some(event) = events.next().await {
            match event.channel {
                EventChannel::Error => {
                    tracing::error!(agent = %event.source, "{}", event.payload)
                }
                EventChannel::Stderr => {
                    tracing::warn!(agent = %event.source, "{}", event.payload)
                }
                _ => tracing::info!(agent = %event.source, channel = ?event.channel, "{}", event.payload),
            }
        }
    });

    let result = run_project(request, options, sink, cancel).await;
    let _ = printer.await;

    let summary = result?;
    for result in summary.report.swarm.values() {
        tracing::info!(
            agent = %result.agent_id,
            succeeded = result.succeeded,
            duration_seconds = result.duration_seconds,
            "agent result"
        );
    }
    tracing::info!("{}", summary.message());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command.unwrap_or(CliCommand::Serve {
        port: 8080,
        workspace_root: None,
    }) {
        CliCommand::Serve {
            port,
            workspace_root,
        } => {
            let state = AppState::new(
                workspace_root.unwrap_or_else(default_workspace_root),
                args.config_dir,
            );
            serve(port, state).await
        }
        CliCommand::Run {
            repo,
            prompt,
            push,
            models,
            workspace_root,
        } => {
            let request = ProjectRequest {
                github_url: repo,
                project_prompt: prompt,
                agent_models: models.into_iter().collect::<HashMap<_, _>>(),
            };
            run_cli(
                request,
                workspace_root.unwrap_or_else(default_workspace_root),
                args.config_dir,
                push,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model() {
        assert_eq!(
            parse_model("codex=gpt-4o").unwrap(),
            ("codex".to_string(), "gpt-4o".to_string())
        );
        assert!(parse_model("codex").is_err());
        assert!(parse_model("=gpt").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let args = Args::try_parse_from([
            "swarm",
            "run",
            "--repo",
            "https://example.com/r.git",
            "--model",
            "claude=claude-opus-4",
            "Add tests",
        ])
        .unwrap();
        match args.command {
            Some(CliCommand::Run {
                repo,
                prompt,
                push,
                models,
                ..
            }) => {
                assert_eq!(repo, "https://example.com/r.git");
                assert_eq!(prompt, "Add tests");
                assert!(!push);
                assert_eq!(models.len(), 1);
            }
            _ => panic!("expected run command"),
        }
    }
}
