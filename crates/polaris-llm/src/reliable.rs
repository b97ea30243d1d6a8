//! Retries and a circuit breaker around any [`LlmProvider`].
//!
//! Transient gateway failures are retried with capped exponential back-off.
//! A run of consecutive failures opens the breaker; while open, calls fail
//! fast with [`GatewayError::ProviderOverloaded`] until the cooldown elapses
//! and a single probe call is let through.
//!
//! Inside a message job the step runner already retries each model turn, so
//! the job builds this wrapper with [`ReliableConfig::breaker_only`]: one
//! attempt per step try, with the breaker still shared across jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use polaris_core::context::LlmContext;
use polaris_core::errors::{Disposition, GatewayError};
use polaris_core::messages::AssistantMessage;
use polaris_core::provider::{GenerateOptions, LlmProvider};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added or removed at random.
    pub jitter: f64,
    pub trip_after: u32,
    pub cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            trip_after: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl ReliableConfig {
    /// No retries of its own. For callers that retry at a higher layer.
    pub fn breaker_only() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call is a probe.
    Probing,
}

#[derive(Debug)]
struct Breaker {
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

impl Breaker {
    fn new() -> Self {
        Self {
            failures: 0,
            opened_at: None,
            probing: false,
        }
    }

    fn state(&self) -> BreakerState {
        match (self.opened_at, self.probing) {
            (_, true) => BreakerState::Probing,
            (Some(_), false) => BreakerState::Open,
            (None, false) => BreakerState::Closed,
        }
    }

    /// Whether a call may go out now. Moves an expired open breaker to probing.
    fn admit(&mut self, cooldown: Duration) -> bool {
        match self.opened_at {
            None => true,
            Some(_) if self.probing => true,
            Some(at) if at.elapsed() >= cooldown => {
                self.probing = true;
                true
            }
            Some(_) => false,
        }
    }

    /// Returns true when this success closed an open breaker.
    fn succeed(&mut self) -> bool {
        let was_open = self.opened_at.is_some();
        *self = Self::new();
        was_open
    }

    /// Returns true when this failure opened the breaker.
    fn fail(&mut self, trip_after: u32) -> bool {
        self.failures += 1;
        if self.probing {
            self.probing = false;
            self.opened_at = Some(Instant::now());
            return false;
        }
        if self.opened_at.is_none() && self.failures >= trip_after {
            self.opened_at = Some(Instant::now());
            return true;
        }
        false
    }
}

pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: Mutex<Breaker>,
    retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(Breaker::new()),
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().state()
    }

    /// Retries performed over the provider's lifetime.
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    fn admit(&self) -> Result<(), GatewayError> {
        if self.breaker.lock().admit(self.config.cooldown) {
            Ok(())
        } else {
            Err(GatewayError::ProviderOverloaded)
        }
    }

    fn on_success(&self) {
        if self.breaker.lock().succeed() {
            info!(provider = self.inner.name(), model = self.inner.model(), "circuit closed");
        }
    }

    fn on_failure(&self) {
        let mut breaker = self.breaker.lock();
        if breaker.fail(self.config.trip_after) {
            warn!(
                provider = self.inner.name(),
                model = self.inner.model(),
                failures = breaker.failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    /// A gateway hint wins; otherwise `base * 2^attempt`, capped, then jittered.
    fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let base = self.config.base_delay.as_millis() as f64;
        let capped = (base * 2f64.powi(attempt as i32)).min(self.config.max_delay.as_millis() as f64);
        let spread = capped * self.config.jitter;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + offset).max(0.0) as u64)
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(
        &self,
        context: &LlmContext,
        options: &GenerateOptions,
    ) -> Result<AssistantMessage, GatewayError> {
        self.admit()?;

        let mut attempt = 0;
        loop {
            let err = match self.inner.generate(context, options).await {
                Ok(message) => {
                    self.on_success();
                    return Ok(message);
                }
                Err(err) => err,
            };

            let hint = match err.disposition() {
                Disposition::Retry { after } if attempt < self.config.max_retries => after,
                Disposition::Abandoned => return Err(err),
                _ => {
                    self.on_failure();
                    return Err(err);
                }
            };

            let delay = self.backoff(attempt, hint);
            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                provider = self.inner.name(),
                model = self.inner.model(),
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "model call failed, retrying"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
            self.admit()?;
        }
    }
}
