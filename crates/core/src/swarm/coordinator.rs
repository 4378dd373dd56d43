//! # Swarm Coordinator
//!
//! Fans a prompt out to every agent concurrently and waits for all of them
//! to reach a terminal [`RunResult`]. One agent failing never affects the
//! others; the only errors out of [`SwarmCoordinator::run_swarm`] are
//! configuration problems found before launch and caller cancellation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, FailureKind, Result};
use crate::models::AgentId;

use super::agent::{Agent, RunResult};
use super::events::{EventEmitter, EventSink};

/// Terminal results keyed by agent
pub type SwarmResults = BTreeMap<AgentId, RunResult>;

pub struct SwarmCoordinator {
    emitter: EventEmitter,
}

impl SwarmCoordinator {
    pub fn new(sink: &EventSink) -> Self {
        Self {
            emitter: sink.emitter(AgentId::coordinator()),
        }
    }

    /// Reject a swarm that could not run as configured
    pub fn validate<A: Agent>(agents: &[A]) -> Result<()> {
        if agents.is_empty() {
            return Err(EngineError::EmptySwarm);
        }
        let mut seen = BTreeSet::new();
        for agent in agents {
            if !seen.insert(agent.id().clone()) {
                return Err(EngineError::DuplicateAgent(agent.id().to_string()));
            }
            agent.validate()?;
        }
        Ok(())
    }

    /// Run every agent against `prompt` and wait for all of them
    ///
    /// Returns exactly one result per agent, only after the slowest one has
    /// resolved.
    #[tracing::instrument(skip_all, fields(agents = agents.len()))]
    pub async fn run_swarm<A>(
        &self,
        agents: Vec<A>,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<SwarmResults>
    where
        A: Agent + 'static,
    {
        Self::validate(&agents)?;

        let expected: Vec<AgentId> = agents.iter().map(|a| a.id().clone()).collect();
        let prompt: Arc<str> = Arc::from(prompt);
        let mut join_set = JoinSet::new();

        // SCATTER
        for mut agent in agents {
            tracing::debug!(
                agent = %agent.id(),
                sandbox = %agent.sandbox().display(),
                "launching agent"
            );
            let prompt = prompt.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move { agent.run(&prompt, &cancel).await });
        }
        tracing::info!("swarm launched");

        // GATHER
        let mut results = SwarmResults::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.agent_id.clone(), result);
                }
                Err(e) => tracing::warn!("Agent task panicked: {}", e),
            }
        }

        // A task that panicked never produced a result
        for id in expected {
            if !results.contains_key(&id) {
                self.emitter
                    .error(format!("Agent '{}' terminated unexpectedly.", id));
                results.insert(
                    id.clone(),
                    RunResult {
                        agent_id: id,
                        succeeded: false,
                        duration_seconds: 0.0,
                        attempts: 0,
                        failure: Some(FailureKind::ProcessSpawnFailure),
                    },
                );
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("swarm cancelled");
            return Err(EngineError::Cancelled);
        }

        let succeeded = results.values().filter(|r| r.succeeded).count();
        tracing::info!(succeeded, total = results.len(), "swarm finished");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct FakeAgent {
        id: AgentId,
        sandbox: PathBuf,
        delay: Duration,
        succeed: bool,
        panic: bool,
    }

    impl FakeAgent {
        fn new(id: &str, delay_ms: u64, succeed: bool) -> Self {
            Self {
                id: AgentId::new(id),
                sandbox: std::env::temp_dir(),
                delay: Duration::from_millis(delay_ms),
                succeed,
                panic: false,
            }
        }
    }

    #[async_trait]
    impl Agent for FakeAgent {
        fn id(&self) -> &AgentId {
            &self.id
        }

        fn sandbox(&self) -> &Path {
            &self.sandbox
        }

        fn validate(&self) -> std::result::Result<(), EngineError> {
            Ok(())
        }

        async fn run(&mut self, _prompt: &str, cancel: &CancellationToken) -> RunResult {
            if self.panic {
                panic!("boom");
            }
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = cancel.cancelled() => true,
            };
            RunResult {
                agent_id: self.id.clone(),
                succeeded: self.succeed && !cancelled,
                duration_seconds: self.delay.as_secs_f64(),
                attempts: 1,
                failure: (!self.succeed || cancelled).then_some(FailureKind::RetriesExhausted),
            }
        }
    }

    #[tokio::test]
    async fn test_one_result_per_agent() {
        let coordinator = SwarmCoordinator::new(&EventSink::disabled());
        let agents = vec![
            FakeAgent::new("a", 5, true),
            FakeAgent::new("b", 1, false),
            FakeAgent::new("c", 20, true),
        ];
        let results = coordinator
            .run_swarm(agents, "prompt", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[&AgentId::new("a")].succeeded);
        assert!(!results[&AgentId::new("b")].succeeded);
        assert!(results[&AgentId::new("c")].succeeded);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_swarms_rejected() {
        let coordinator = SwarmCoordinator::new(&EventSink::disabled());
        let err = coordinator
            .run_swarm(
                vec![FakeAgent::new("a", 0, true), FakeAgent::new("a", 0, true)],
                "p",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAgent(id) if id == "a"));

        let err = coordinator
            .run_swarm(Vec::<FakeAgent>::new(), "p", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptySwarm));
    }

    #[tokio::test]
    async fn test_panicking_agent_is_isolated() {
        let coordinator = SwarmCoordinator::new(&EventSink::disabled());
        let mut bad = FakeAgent::new("bad", 0, true);
        bad.panic = true;
        let results = coordinator
            .run_swarm(
                vec![bad, FakeAgent::new("good", 1, true)],
                "p",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!results[&AgentId::new("bad")].succeeded);
        assert!(results[&AgentId::new("good")].succeeded);
    }

    #[tokio::test]
    async fn test_cancellation_waits_then_reports() {
        let coordinator = SwarmCoordinator::new(&EventSink::disabled());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = coordinator
            .run_swarm(vec![FakeAgent::new("slow", 60_000, true)], "p", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
