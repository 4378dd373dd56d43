//! # Workspace Isolation
//!
//! One workspace per run:
//!
//! ```text
//! <root>/
//!   repository/        clone of the source; receives the integrated result
//!   claude_sandbox/    full copy of repository/, history included
//!   gemini_sandbox/
//!   codex_sandbox/
//! ```
//!
//! Everything here is blocking; async callers wrap it in `spawn_blocking`.

use anyhow::{Context, Result};
use chrono::Local;
use git2::Repository;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::models::AgentRole;
use crate::state::EngineConfig;

pub const REPOSITORY_DIR: &str = "repository";
pub const CLAUDE_FLOW_DIR: &str = ".claude-flow-swarm";

const CLAUDE_MD: &str = "\
*This configuration optimizes Claude for direct, efficient pair programming with implicit mode adaptation and complete solution generation.*
## Core Operating Principles
### 1. Direct Implementation Philosophy
- Generate complete, working code that realizes the conceptualized solution
- Avoid partial implementations, mocks, or placeholders
### 2. Multi-Dimensional Analysis with Linear Execution
- Think at SYSTEM level in latent space
- Linearize complex thoughts into actionable strategies
### 3. Precision and Token Efficiency
- Eliminate unnecessary context or explanations
- Focus tokens on solution generation
## Execution Patterns
### Tool Usage Optimization
- Batch related operations for efficiency
- Execute in parallel where dependencies allow
## Anti-Patterns (STRICTLY AVOID)
### Implementation Hedging
**NEVER USE:** \"In a full implementation...\", \"This is a simplified version...\", \"TODO\", \"mock\", \"fake\", \"stub\"
### Unnecessary Qualifiers
**NEVER USE:** \"profound\", difficulty assessments, future tense deferrals (\"would\", \"could\", \"should\")
";

/// One agent's copy of the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    pub role: AgentRole,
    pub path: PathBuf,
    /// Commit the copy was checked out at; `None` for an empty repository
    pub base: Option<String>,
}

/// Directories prepared for one run
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    repository: PathBuf,
    sandboxes: Vec<Sandbox>,
}

/// What `finalize` did to the target repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub branch: String,
    /// False when the integrator left nothing to commit
    pub committed: bool,
    pub pushed: bool,
}

impl Workspace {
    /// Clone `source` under `root` and give every role its own copy
    #[tracing::instrument(skip_all, fields(source = %source))]
    pub fn provision(
        source: &str,
        root: impl AsRef<Path>,
        roles: &[AgentRole],
        config: &EngineConfig,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace directory: {:?}", root))?;

        let repository = root.join(REPOSITORY_DIR);
        Repository::clone(source, &repository)
            .with_context(|| format!("Failed to clone {}", source))?;
        tracing::info!(source, "repository cloned");

        let mut sandboxes = Vec::with_capacity(roles.len());
        for role in roles {
            let sandbox = root.join(format!("{}_sandbox", role.id()));
            copy_tree(&repository, &sandbox)?;
            // Re-init keeps the copied history
            let repo = Repository::init(&sandbox)
                .with_context(|| format!("Failed to initialize sandbox {:?}", sandbox))?;
            let base = head_commit(&repo);

            if *role == AgentRole::Claude {
                let profile = role.profile();
                let model =
                    profile.resolve_model(config.model_for(&profile.id), &config.base_environment);
                seed_claude_flow(&sandbox, &model)?;
            }
            tracing::debug!(role = %role.id(), ?base, "sandbox ready");
            sandboxes.push(Sandbox {
                role: *role,
                path: sandbox,
                base,
            });
        }

        Ok(Self {
            root,
            repository,
            sandboxes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    pub fn sandboxes(&self) -> &[Sandbox] {
        &self.sandboxes
    }

    pub fn sandbox(&self, role: AgentRole) -> Option<&Sandbox> {
        self.sandboxes.iter().find(|s| s.role == role)
    }

    /// Branch, commit everything and (optionally) push the integrated result
    pub fn finalize(&self, prompt: &str, push: bool) -> Result<FinalizeOutcome> {
        let branch = integration_branch_name();
        let repo = &self.repository;

        git(repo, &["checkout", "-b", &branch])?;
        git(repo, &["add", "-A"])?;

        let message = format!("AI Swarm Integration: {}", prompt);
        let mut args: Vec<&str> = Vec::new();
        if !has_identity(repo) {
            args.extend(["-c", "user.name=AI Swarm", "-c", "user.email=swarm@localhost"]);
        }
        args.extend(["commit", "-m", message.as_str()]);

        let commit = Command::new("git")
            .args(&args)
            .current_dir(repo)
            .output()
            .context("Failed to run git commit")?;
        let committed = if commit.status.success() {
            true
        } else {
            let stdout = String::from_utf8_lossy(&commit.stdout);
            let stderr = String::from_utf8_lossy(&commit.stderr);
            // No changes to commit is ok
            if !stdout.contains("nothing to commit") && !stderr.contains("nothing to commit") {
                return Err(anyhow::anyhow!("Failed to commit: {}", stderr));
            }
            false
        };

        if push {
            git(repo, &["push", "origin", &branch])?;
            tracing::info!(%branch, "integration branch pushed");
        }

        Ok(FinalizeOutcome {
            branch,
            committed,
            pushed: push,
        })
    }

    /// Remove the whole workspace
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove workspace: {:?}", self.root))?;
        }
        Ok(())
    }
}

/// Id of the commit HEAD points at, if any
pub fn head_commit(repo: &Repository) -> Option<String> {
    repo.head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok())
        .map(|commit| commit.id().to_string())
}

/// `ai-swarm-integration-YYYYMMDD-HHMMSS`
pub fn integration_branch_name() -> String {
    format!(
        "ai-swarm-integration-{}",
        Local::now().format("%Y%m%d-%H%M%S")
    )
}

/// Write the claude-flow constitution and config into `sandbox`
pub fn seed_claude_flow(sandbox: &Path, model: &str) -> Result<()> {
    let dir = sandbox.join(CLAUDE_FLOW_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {:?}", dir))?;

    std::fs::write(dir.join("CLAUDE.md"), CLAUDE_MD).context("Failed to write CLAUDE.md")?;

    let config = serde_json::json!({
        "orchestrator": {
            "maxConcurrentAgents": 10,
            "taskQueueSize": 100,
            "agentTimeoutMs": 1_800_000,
            "defaultAgentConfig": {
                "model": model,
                "temperature": 0.7
            }
        },
        "swarm": {
            "strategy": "development",
            "maxAgents": 5,
            "maxDepth": 3,
            "timeout": 180
        }
    });
    std::fs::write(
        dir.join("claude-flow.config.json"),
        serde_json::to_string_pretty(&config)?,
    )
    .context("Failed to write claude-flow.config.json")
}

/// Recursively copy `from` into `to`, `.git` included
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", from))?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {:?}", target))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?}", entry.path()))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let link = std::fs::read_link(from)?;
    std::os::unix::fs::symlink(&link, to)
        .with_context(|| format!("Failed to recreate symlink {:?}", to))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to)
        .map(|_| ())
        .with_context(|| format!("Failed to copy {:?}", from))
}

fn git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn has_identity(repo: &Path) -> bool {
    git(repo, &["config", "user.email"])
        .map(|email| !email.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn source_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("README.md"), "# demo\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("swarm", "swarm@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_branch_name_format() {
        let name = integration_branch_name();
        let stamp = name.strip_prefix("ai-swarm-integration-").unwrap();
        assert_eq!(stamp.len(), "YYYYMMDD-HHMMSS".len());
        assert_eq!(stamp.as_bytes()[8], b'-');
    }

    #[test]
    fn test_provision_creates_sandboxes_with_history() {
        let source = tempfile::tempdir().unwrap();
        source_repo(source.path());
        let root = tempfile::tempdir().unwrap();
        let root = root.path().join("ws");

        let workspace = Workspace::provision(
            &source.path().to_string_lossy(),
            &root,
            &AgentRole::swarm_roles(),
            &EngineConfig::default(),
        )
        .unwrap();

        assert!(workspace.repository().join("README.md").exists());
        assert_eq!(workspace.sandboxes().len(), 3);
        let source_head = head_commit(&Repository::open(source.path()).unwrap());
        assert!(source_head.is_some());
        for sandbox in workspace.sandboxes() {
            assert!(sandbox.path.join("README.md").exists());
            let repo = Repository::open(&sandbox.path).unwrap();
            assert!(repo.head().is_ok());
            assert_eq!(sandbox.base, source_head);
        }

        let claude = &workspace.sandbox(AgentRole::Claude).unwrap().path;
        let config =
            std::fs::read_to_string(claude.join(CLAUDE_FLOW_DIR).join("claude-flow.config.json"))
                .unwrap();
        assert!(config.contains("claude-sonnet-4"));
        let constitution =
            std::fs::read_to_string(claude.join(CLAUDE_FLOW_DIR).join("CLAUDE.md")).unwrap();
        assert!(constitution.contains("## Anti-Patterns (STRICTLY AVOID)"));
        assert!(constitution.contains("### Unnecessary Qualifiers"));
        assert!(!workspace
            .sandbox(AgentRole::Gemini)
            .unwrap()
            .path
            .join(CLAUDE_FLOW_DIR)
            .exists());

        workspace.cleanup().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_finalize_commits_on_new_branch() {
        if Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let source = tempfile::tempdir().unwrap();
        source_repo(source.path());
        let root = tempfile::tempdir().unwrap();

        let workspace = Workspace::provision(
            &source.path().to_string_lossy(),
            root.path().join("ws"),
            &[AgentRole::Gemini],
            &EngineConfig::default(),
        )
        .unwrap();
        std::fs::write(workspace.repository().join("merged.txt"), "done\n").unwrap();

        let outcome = workspace.finalize("merge it", false).unwrap();
        assert!(outcome.committed);
        assert!(!outcome.pushed);

        let repo = Repository::open(workspace.repository()).unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head.shorthand(), Some(outcome.branch.as_str()));
        let commit = head.peel_to_commit().unwrap();
        assert_eq!(commit.message(), Some("AI Swarm Integration: merge it\n"));
    }
}
