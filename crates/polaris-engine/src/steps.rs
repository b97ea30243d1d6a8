//! Durable step execution.
//!
//! A job is a sequence of named steps. The output of every successful step
//! is journaled under `(run_id, step)`; running the same step again for the
//! same run replays the recorded output instead of redoing the work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use polaris_core::events::AgentEvent;
use polaris_core::ids::MessageId;
use polaris_store::jobs::JobRepo;

use crate::error::EngineError;

/// Where step outputs are recorded.
pub trait StepJournal: Send + Sync {
    fn load(&self, run_id: &str, step: &str) -> Result<Option<String>, EngineError>;
    /// Record an output. The first recorded output for a step wins.
    fn record(&self, run_id: &str, step: &str, output: &str) -> Result<(), EngineError>;
}

impl StepJournal for JobRepo {
    fn load(&self, run_id: &str, step: &str) -> Result<Option<String>, EngineError> {
        Ok(self.step_output(run_id, step)?)
    }

    fn record(&self, run_id: &str, step: &str, output: &str) -> Result<(), EngineError> {
        Ok(self.record_step(run_id, step, output)?)
    }
}

/// Process-local journal. Progress does not survive a restart.
#[derive(Default)]
pub struct MemoryJournal {
    entries: DashMap<(String, String), String>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StepJournal for MemoryJournal {
    fn load(&self, run_id: &str, step: &str) -> Result<Option<String>, EngineError> {
        Ok(self
            .entries
            .get(&(run_id.to_string(), step.to_string()))
            .map(|e| e.value().clone()))
    }

    fn record(&self, run_id: &str, step: &str, output: &str) -> Result<(), EngineError> {
        self.entries
            .entry((run_id.to_string(), step.to_string()))
            .or_insert_with(|| output.to_string());
        Ok(())
    }
}

/// Per-step retry policy for transient failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Executes the steps of one run.
pub struct StepRunner {
    run_id: MessageId,
    journal: Arc<dyn StepJournal>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    events: broadcast::Sender<AgentEvent>,
}

impl StepRunner {
    pub fn new(
        run_id: MessageId,
        journal: Arc<dyn StepJournal>,
        policy: RetryPolicy,
        cancel: CancellationToken,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            run_id,
            journal,
            policy,
            cancel,
            events,
        }
    }

    pub fn run_id(&self) -> &MessageId {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn events(&self) -> &broadcast::Sender<AgentEvent> {
        &self.events
    }

    /// The cooperative cut-point between steps.
    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a named step: replay its journaled output if present, otherwise
    /// execute it with retries and journal the result.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        self.check_cancelled()?;

        if let Some(recorded) = self.journal.load(self.run_id.as_str(), name)? {
            debug!(run_id = %self.run_id, step = name, "replaying journaled step");
            let value = serde_json::from_str(&recorded)?;
            self.emit_completed(name, true);
            return Ok(value);
        }

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    let encoded = serde_json::to_string(&value)?;
                    self.journal.record(self.run_id.as_str(), name, &encoded)?;
                    self.emit_completed(name, false);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        run_id = %self.run_id,
                        step = name,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "step failed, retrying"
                    );
                    self.wait(delay).await?;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(run_id = %self.run_id, step = name, error = %e, "step failed");
                    return Err(e);
                }
            }
        }
    }

    /// A journaled sleep. Skipped on replay; wakes early with `Cancelled`.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), EngineError> {
        self.check_cancelled()?;
        if self.journal.load(self.run_id.as_str(), name)?.is_some() {
            self.emit_completed(name, true);
            return Ok(());
        }
        self.wait(duration).await?;
        self.journal.record(self.run_id.as_str(), name, "null")?;
        self.emit_completed(name, false);
        Ok(())
    }

    async fn wait(&self, duration: Duration) -> Result<(), EngineError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }

    fn emit_completed(&self, step: &str, replayed: bool) {
        let event = AgentEvent::StepCompleted {
            message_id: self.run_id.clone(),
            step: step.to_string(),
            replayed,
        };
        if self.events.send(event).is_err() {
            debug!(step, "no event receivers, step_completed dropped");
        }
    }
}
