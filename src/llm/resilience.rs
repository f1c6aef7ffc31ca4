//! Retry and circuit breaking for LLM calls.
//!
//! A single [`CircuitBreaker`] instance is shared process-wide across all
//! enrichment services: LLM outages are provider-wide, so any caller's
//! failures should fail-fast every other caller. Breaker state does not
//! survive restarts; a fresh process starts closed.

use super::LlmProvider;
use crate::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Resilience tuning for LLM calls.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Attempts per call: first try plus retries.
    pub max_attempts: u32,
    /// Initial backoff between retries; doubles per retry.
    pub initial_backoff: Duration,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub reset_after: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            failure_threshold: 5,
            reset_after: Duration::from_secs(30),
        }
    }
}

impl ResilienceConfig {
    /// Builds resilience settings from the LLM configuration section.
    #[must_use]
    pub fn from_config(config: &crate::config::LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            failure_threshold: config.breaker_threshold.max(1),
            reset_after: Duration::from_millis(config.breaker_reset_ms),
        }
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Three-state circuit breaker guarding the LLM provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker in the closed state.
    #[must_use]
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
            failure_threshold: failure_threshold.max(1),
            reset_after,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether a call may proceed.
    ///
    /// In the open state, the first call after `reset_after` has elapsed
    /// transitions to half-open and is allowed through as the probe; while
    /// half-open, exactly one probe is in flight at a time.
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        let allowed = match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_after {
                    *state = BreakerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen {
                ref mut probe_in_flight,
            } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            },
        };
        let gauge = state_gauge(&state);
        drop(state);
        metrics::gauge!("llm_circuit_breaker_state").set(gauge);
        allowed
    }

    /// Records a successful call; the circuit closes.
    pub fn record_success(&self) {
        let mut state = self.lock();
        *state = BreakerState::Closed { failures: 0 };
        drop(state);
        metrics::gauge!("llm_circuit_breaker_state").set(0.0);
    }

    /// Records a failed call; after `failure_threshold` consecutive
    /// failures the circuit opens. A failed half-open probe re-opens it.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        let tripped = match *state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { .. } => {
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                true
            },
            BreakerState::Open { .. } => false,
        };
        let gauge = state_gauge(&state);
        drop(state);
        metrics::gauge!("llm_circuit_breaker_state").set(gauge);
        if tripped {
            metrics::counter!("llm_circuit_breaker_trips_total").increment(1);
            tracing::warn!("llm circuit breaker opened");
        }
    }
}

const fn state_gauge(state: &BreakerState) -> f64 {
    match state {
        BreakerState::Closed { .. } => 0.0,
        BreakerState::Open { .. } => 1.0,
        BreakerState::HalfOpen { .. } => 2.0,
    }
}

/// The shared LLM entry point: provider + breaker + retry policy.
///
/// All enrichment services call through one `LlmRuntime` so breaker state
/// is genuinely process-wide.
pub struct LlmRuntime {
    provider: Arc<dyn LlmProvider>,
    breaker: Arc<CircuitBreaker>,
    config: ResilienceConfig,
}

impl LlmRuntime {
    /// Creates a runtime with a fresh breaker.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: ResilienceConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.failure_threshold,
            config.reset_after,
        ));
        Self {
            provider,
            breaker,
            config,
        }
    }

    /// The shared breaker, for tests and status surfaces.
    #[must_use]
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Completes a prompt behind the breaker with bounded retries.
    ///
    /// The breaker is consulted once per call; a call that exhausts its
    /// retries records a single failure against it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] without touching the provider when
    /// the circuit is open, or the last provider error after retries.
    pub fn complete_guarded(&self, system: &str, user: &str) -> Result<String> {
        let provider = self.provider.name();
        let span = tracing::info_span!("llm.request", provider = provider);
        let _enter = span.enter();

        if !self.breaker.allow() {
            metrics::counter!(
                "llm_requests_total",
                "provider" => provider,
                "status" => "circuit_open"
            )
            .increment(1);
            return Err(Error::CircuitOpen);
        }

        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            let started = Instant::now();
            match self.provider.complete_with_system(system, user) {
                Ok(text) => {
                    self.breaker.record_success();
                    metrics::counter!(
                        "llm_requests_total",
                        "provider" => provider,
                        "status" => "success"
                    )
                    .increment(1);
                    metrics::histogram!("llm_request_duration_ms", "provider" => provider)
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(text);
                },
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "llm call failed"
                    );
                    last_error = Some(err);
                    if attempt < self.config.max_attempts {
                        metrics::counter!("llm_retries_total", "provider" => provider)
                            .increment(1);
                        std::thread::sleep(backoff);
                        backoff *= 2;
                    }
                },
            }
        }

        self.breaker.record_failure();
        metrics::counter!(
            "llm_requests_total",
            "provider" => provider,
            "status" => "error"
        )
        .increment(1);
        Err(last_error.unwrap_or_else(|| Error::llm("exhausted retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::llm("provider down"))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_breaker_success_resets_counter() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_single_probe_then_close() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(20));
        // First call after reset_after is the probe.
        assert!(breaker.allow());
        // A second concurrent call is held back while the probe runs.
        assert!(!breaker.allow());

        breaker.record_success();
        assert!(breaker.allow());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn test_runtime_retries_then_succeeds() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let runtime = LlmRuntime::new(
            provider.clone(),
            ResilienceConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                ..ResilienceConfig::default()
            },
        );
        let out = runtime.complete_guarded("s", "u").unwrap();
        assert_eq!(out, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_runtime_records_one_breaker_failure_per_call() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let runtime = LlmRuntime::new(
            provider,
            ResilienceConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                failure_threshold: 2,
                reset_after: Duration::from_secs(30),
            },
        );
        assert!(runtime.complete_guarded("s", "u").is_err());
        // One exhausted call = one breaker failure; circuit still closed.
        assert!(runtime.breaker().allow());
        assert!(runtime.complete_guarded("s", "u").is_err());
        // Second exhausted call trips the threshold of 2.
        assert!(matches!(
            runtime.complete_guarded("s", "u"),
            Err(Error::CircuitOpen)
        ));
    }
}
