//! # Agent Models
//!
//! Role definitions for the swarm: which CLI each role shells out to, which
//! environment variable carries its model selection, and how that model is
//! resolved.
//!
//! ## Model Resolution
//!
//! Order matters and is fixed:
//!
//! 1. An explicit model passed for the run
//! 2. The role's default environment variable (e.g. `CLAUDE_MODEL`)
//! 3. The role's hardcoded fallback
//!
//! The resolved model is then injected into the agent's own environment
//! under the variable the underlying tool reads (e.g. `ANTHROPIC_MODEL`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of an agent within one swarm run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Source id used for events emitted by the coordinator itself
    pub fn coordinator() -> Self {
        Self::new("coordinator")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// How an agent turns a prompt into a command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Invocation {
    /// Run `template` directly; `{prompt}` and `{model}` are shell-quoted
    Cli { template: String },
    /// Write `body` to a temporary `.{extension}` file and run `template`
    /// against it; `{script}` is the temp file path. Inside `body`,
    /// `{prompt}` and `{model}` are JSON string literals.
    Script {
        template: String,
        extension: String,
        body: String,
    },
}

impl Invocation {
    /// Every template string this invocation will render
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Invocation::Cli { template } => vec![template],
            Invocation::Script { template, body, .. } => vec![template, body],
        }
    }
}

/// Everything needed to build one agent, independent of any sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable id (also the sandbox key)
    pub id: AgentId,
    /// Human-facing name used as the event source label
    pub display_name: String,
    /// Variable the tool reads its model from; the resolved model is injected here
    pub model_env_var: String,
    /// Variable consulted for a default model when none is given explicitly
    pub default_model_env: String,
    /// Model used when neither explicit nor environment selection exists
    pub fallback_model: String,
    pub invocation: Invocation,
}

impl AgentProfile {
    /// Resolve the model for this profile (explicit → env default → fallback)
    pub fn resolve_model(&self, explicit: Option<&str>, env: &HashMap<String, String>) -> String {
        resolve_model(
            explicit,
            env,
            &self.default_model_env,
            &self.fallback_model,
        )
    }
}

/// Built-in swarm roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Claude,
    Gemini,
    Codex,
    Integrator,
}

const CODEX_SCRIPT: &str = r#"const OpenAI = require('openai');
const openai = new OpenAI({{ apiKey: process.env.OPENAI_API_KEY }});

async function main() {{
    const completion = await openai.chat.completions.create({{
        model: {model},
        messages: [{{ role: "user", content: {prompt} }}],
    }});
    console.log(completion.choices[0].message.content);
}}

main().catch((err) => {{
    console.error(err);
    process.exit(1);
}});
"#;

impl AgentRole {
    /// All built-in roles, integrator last
    pub fn all() -> Vec<AgentRole> {
        vec![
            AgentRole::Claude,
            AgentRole::Gemini,
            AgentRole::Codex,
            AgentRole::Integrator,
        ]
    }

    /// Roles that work in their own sandbox during the fan-out phase
    pub fn swarm_roles() -> Vec<AgentRole> {
        vec![AgentRole::Claude, AgentRole::Gemini, AgentRole::Codex]
    }

    pub fn id(&self) -> AgentId {
        AgentId::new(match self {
            AgentRole::Claude => "claude",
            AgentRole::Gemini => "gemini",
            AgentRole::Codex => "codex",
            AgentRole::Integrator => "integrator",
        })
    }

    /// Display name for events and the UI
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::Claude => "Claude",
            AgentRole::Gemini => "Gemini",
            AgentRole::Codex => "Codex",
            AgentRole::Integrator => "Integrator",
        }
    }

    pub fn model_env_var(&self) -> &'static str {
        match self {
            AgentRole::Claude => "ANTHROPIC_MODEL",
            AgentRole::Gemini | AgentRole::Integrator => "GEMINI_MODEL",
            AgentRole::Codex => "OPENAI_MODEL",
        }
    }

    pub fn default_model_env(&self) -> &'static str {
        match self {
            AgentRole::Claude => "CLAUDE_MODEL",
            AgentRole::Gemini => "GEMINI_MODEL",
            AgentRole::Codex => "OPENAI_MODEL",
            AgentRole::Integrator => "INTEGRATION_MODEL",
        }
    }

    pub fn fallback_model(&self) -> &'static str {
        match self {
            AgentRole::Claude => "claude-sonnet-4",
            AgentRole::Gemini | AgentRole::Integrator => "gemini-2.5-pro",
            AgentRole::Codex => "gpt-4o-mini",
        }
    }

    pub fn invocation(&self) -> Invocation {
        match self {
            AgentRole::Claude => Invocation::Cli {
                template: "claude-flow swarm {prompt}".to_string(),
            },
            AgentRole::Gemini | AgentRole::Integrator => Invocation::Cli {
                template: "gemini {prompt}".to_string(),
            },
            AgentRole::Codex => Invocation::Script {
                template: "node {script}".to_string(),
                extension: "js".to_string(),
                body: CODEX_SCRIPT.to_string(),
            },
        }
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id(),
            display_name: self.display_name().to_string(),
            model_env_var: self.model_env_var().to_string(),
            default_model_env: self.default_model_env().to_string(),
            fallback_model: self.fallback_model().to_string(),
            invocation: self.invocation(),
        }
    }
}

/// Resolve a model: explicit → `env[default_env]` → `fallback`
///
/// Empty strings count as absent at every level.
pub fn resolve_model(
    explicit: Option<&str>,
    env: &HashMap<String, String>,
    default_env: &str,
    fallback: &str,
) -> String {
    explicit
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            env.get(default_env)
                .filter(|m| !m.trim().is_empty())
                .cloned()
        })
        .unwrap_or_else(|| fallback.to_string())
}
