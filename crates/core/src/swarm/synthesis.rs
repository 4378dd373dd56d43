//! # Synthesis Step
//!
//! Runs after the swarm barrier. Each sandbox's changes are turned into a
//! textual diff, folded into one prompt, and handed to the integrator agent,
//! which executes under exactly the same runner contract as the swarm.
//!
//! Diffs are taken against the commit a sandbox started from, so work an
//! agent commits on its own still shows up.
//!
//! Diff extraction never fails: a sandbox without history yields a fixed
//! placeholder and any other problem is described inline.

use std::path::{Path, PathBuf};

use git2::{DiffFormat, DiffOptions, ErrorCode, Oid, Repository};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::FailureKind;
use crate::models::AgentId;
use crate::tools::git::head_commit;

use super::agent::{Agent, RunResult};

pub const NO_REPOSITORY: &str = "No git repository found.";
pub const NO_CHANGES: &str = "No changes made";

/// One swarm agent's contribution to the synthesis prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisEntry {
    pub agent_id: AgentId,
    /// Name used in the section header, e.g. `Claude`
    pub display_name: String,
    pub sandbox: PathBuf,
    pub diff: String,
    /// Set when `diff` is a diagnostic instead of real changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

/// Everything the integrator is told about the finished swarm
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisInput {
    pub prompt: String,
    /// Ordered by agent
    pub entries: Vec<SynthesisEntry>,
    /// Where the integrated result should be written, if anywhere
    pub target: Option<PathBuf>,
}

/// A sandbox to collect changes from
#[derive(Debug, Clone)]
pub struct SandboxRef {
    pub agent_id: AgentId,
    pub display_name: String,
    pub path: PathBuf,
    /// Commit the agent started from; HEAD is used when unknown
    pub base: Option<String>,
}

/// Commit HEAD of `path` points at, or `None` without history
pub async fn capture_base(path: impl Into<PathBuf>) -> Option<String> {
    let path = path.into();
    tokio::task::spawn_blocking(move || {
        Repository::open(&path).ok().and_then(|repo| head_commit(&repo))
    })
    .await
    .ok()
    .flatten()
}

/// Diff of everything changed in `path` since `base` (or HEAD)
///
/// Covers committed, tracked and untracked changes. Never returns an error:
/// failures are rendered as text in place of the diff.
pub async fn extract_diff(path: impl Into<PathBuf>, base: Option<&str>) -> String {
    read_diff(path.into(), base.map(str::to_string)).await.0
}

async fn read_diff(path: PathBuf, base: Option<String>) -> (String, Option<FailureKind>) {
    let shown = path.display().to_string();
    let failed = |message: String| {
        tracing::warn!(
            sandbox = %shown,
            kind = ?FailureKind::DiffExtractionFailure,
            error = %message,
            "diff extraction failed"
        );
        (
            format!("Error getting diff: {}", message),
            Some(FailureKind::DiffExtractionFailure),
        )
    };

    match tokio::task::spawn_blocking(move || diff_workdir(&path, base.as_deref())).await {
        Ok(Ok(diff)) => (diff, None),
        Ok(Err(DiffError::NoRepository)) => (NO_REPOSITORY.to_string(), None),
        Ok(Err(DiffError::Git(e))) => failed(e.message().to_string()),
        Err(e) => failed(e.to_string()),
    }
}

enum DiffError {
    NoRepository,
    Git(git2::Error),
}

impl From<git2::Error> for DiffError {
    fn from(e: git2::Error) -> Self {
        DiffError::Git(e)
    }
}

fn diff_workdir(path: &Path, base: Option<&str>) -> Result<String, DiffError> {
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => return Err(DiffError::NoRepository),
        Err(e) => return Err(e.into()),
    };

    // No base and an unborn HEAD diffs against the empty tree
    let base_tree = match base {
        Some(id) => Some(repo.find_commit(Oid::from_str(id)?)?.tree()?),
        None => match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                None
            }
            Err(e) => return Err(e.into()),
        },
    };

    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true);

    let diff = repo.diff_tree_to_workdir_with_index(base_tree.as_ref(), Some(&mut opts))?;

    let mut out = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            out.push(line.origin());
        }
        out.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(out)
}

/// Collect diffs for every sandbox, in the given order
pub async fn gather(sandboxes: &[SandboxRef]) -> Vec<SynthesisEntry> {
    let mut entries = Vec::with_capacity(sandboxes.len());
    for sandbox in sandboxes {
        let (diff, failure) = read_diff(sandbox.path.clone(), sandbox.base.clone()).await;
        entries.push(SynthesisEntry {
            agent_id: sandbox.agent_id.clone(),
            display_name: sandbox.display_name.clone(),
            sandbox: sandbox.path.clone(),
            diff,
            failure,
        });
    }
    entries
}

/// Render the integrator's prompt
///
/// The original prompt appears exactly once; each entry gets a delimited
/// section whether or not it changed anything.
pub fn build_synthesis_prompt(input: &SynthesisInput) -> String {
    let mut prompt = String::from(
        "You are an expert software integration specialist. Your task is to analyze \
         solutions from several AI agents and synthesize the best combined solution.\n\n",
    );
    prompt.push_str(&format!("Original Task: {}\n\n", input.prompt));

    if !input.entries.is_empty() {
        prompt.push_str("Each agent worked in its own copy of the repository:\n");
        for entry in &input.entries {
            prompt.push_str(&format!(
                "- {}: {}\n",
                entry.display_name,
                entry.sandbox.display()
            ));
        }
        if let Some(target) = &input.target {
            prompt.push_str(&format!(
                "Write the final integrated code to the repository at: {}\n",
                target.display()
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("Agent Solutions:\n");
    for entry in &input.entries {
        let diff = if entry.diff.trim().is_empty() {
            NO_CHANGES
        } else {
            entry.diff.trim_end()
        };
        prompt.push_str(&format!(
            "\n--- {}'S CHANGES ---\n{}\n",
            entry.display_name.to_uppercase(),
            diff
        ));
    }

    prompt.push_str(
        "\nPlease analyze these changes and create an integrated solution that:\n\
         1. Identifies the strengths of each approach\n\
         2. Resolves any conflicts between implementations\n\
         3. Combines the best aspects of all solutions\n\
         4. Ensures code quality and consistency\n\
         5. Provides a cohesive, production-ready implementation\n\n\
         Output your analysis and the final integrated solution.",
    );
    prompt
}

/// Integrator agent plus the sandboxes it reads from
pub struct SynthesisStep<A: Agent> {
    integrator: A,
    sandboxes: Vec<SandboxRef>,
    target: Option<PathBuf>,
}

impl<A: Agent> SynthesisStep<A> {
    pub fn new(integrator: A, sandboxes: Vec<SandboxRef>) -> Self {
        Self {
            integrator,
            sandboxes,
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Build the input; only call once every swarm agent has finished
    pub async fn prepare(&self, prompt: &str) -> SynthesisInput {
        SynthesisInput {
            prompt: prompt.to_string(),
            entries: gather(&self.sandboxes).await,
            target: self.target.clone(),
        }
    }

    pub async fn run(&mut self, prompt: &str, cancel: &CancellationToken) -> RunResult {
        let input = self.prepare(prompt).await;
        let synthesis_prompt = build_synthesis_prompt(&input);
        tracing::info!(
            agents = input.entries.len(),
            unreadable = input.entries.iter().filter(|e| e.failure.is_some()).count(),
            prompt_len = synthesis_prompt.len(),
            "starting synthesis"
        );
        self.integrator.run(&synthesis_prompt, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn entry(name: &str, diff: &str) -> SynthesisEntry {
        SynthesisEntry {
            agent_id: AgentId::new(name.to_lowercase()),
            display_name: name.to_string(),
            sandbox: PathBuf::from(format!("/work/{}_sandbox", name.to_lowercase())),
            diff: diff.to_string(),
            failure: None,
        }
    }

    fn commit_all(repo: &Repository, message: &str) {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("swarm", "swarm@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
    }

    #[test]
    fn test_prompt_contains_every_section_and_prompt_once() {
        let input = SynthesisInput {
            prompt: "Add a login page".to_string(),
            entries: vec![entry("X", "diffX"), entry("Y", "")],
            target: None,
        };
        let prompt = build_synthesis_prompt(&input);

        assert_eq!(prompt.matches("Add a login page").count(), 1);
        assert!(prompt.contains("--- X'S CHANGES ---\ndiffX"));
        assert!(prompt.contains("--- Y'S CHANGES ---\nNo changes made"));
    }

    #[test]
    fn test_prompt_lists_target_repository() {
        let input = SynthesisInput {
            prompt: "task".to_string(),
            entries: vec![entry("Claude", "+x")],
            target: Some(PathBuf::from("/work/repository")),
        };
        let prompt = build_synthesis_prompt(&input);
        assert!(prompt.contains("- Claude: /work/claude_sandbox"));
        assert!(prompt.contains("/work/repository"));
    }

    #[tokio::test]
    async fn test_directory_without_history_yields_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(extract_diff(dir.path(), None).await, NO_REPOSITORY);
    }

    #[tokio::test]
    async fn test_diff_covers_modified_and_untracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("tracked.txt"), "before\n").unwrap();
        commit_all(&repo, "initial");

        std::fs::write(dir.path().join("tracked.txt"), "after\n").unwrap();
        std::fs::write(dir.path().join("new.txt"), "brand new\n").unwrap();

        let diff = extract_diff(dir.path(), None).await;
        assert!(diff.contains("-before"));
        assert!(diff.contains("+after"));
        assert!(diff.contains("+brand new"));
    }

    #[tokio::test]
    async fn test_clean_repository_has_empty_diff() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        commit_all(&repo, "initial");

        assert!(extract_diff(dir.path(), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_unborn_head_diffs_against_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("fresh.txt"), "hello\n").unwrap();

        assert!(extract_diff(dir.path(), None).await.contains("+hello"));
    }

    #[tokio::test]
    async fn test_committed_work_is_diffed_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("app.txt"), "v1\n").unwrap();
        commit_all(&repo, "base");
        let base = capture_base(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("app.txt"), "v2\n").unwrap();
        commit_all(&repo, "agent work");
        std::fs::write(dir.path().join("notes.txt"), "pending\n").unwrap();

        let diff = extract_diff(dir.path(), Some(base.as_str())).await;
        assert!(diff.contains("-v1"));
        assert!(diff.contains("+v2"));
        assert!(diff.contains("+pending"));

        let entries = gather(&[SandboxRef {
            agent_id: AgentId::new("claude"),
            display_name: "Claude".to_string(),
            path: dir.path().to_path_buf(),
            base: Some(base),
        }])
        .await;
        assert!(entries[0].diff.contains("+v2"));
        assert_eq!(entries[0].failure, None);
    }

    #[tokio::test]
    async fn test_unknown_base_is_reported_inline() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        commit_all(&repo, "initial");

        let entries = gather(&[SandboxRef {
            agent_id: AgentId::new("gemini"),
            display_name: "Gemini".to_string(),
            path: dir.path().to_path_buf(),
            base: Some("not-a-commit".to_string()),
        }])
        .await;
        assert!(entries[0].diff.starts_with("Error getting diff:"));
        assert_eq!(entries[0].failure, Some(FailureKind::DiffExtractionFailure));
    }

    #[tokio::test]
    async fn test_capture_base_without_history() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(capture_base(dir.path()).await, None);
        Repository::init(dir.path()).unwrap();
        assert_eq!(capture_base(dir.path()).await, None);
    }
}
