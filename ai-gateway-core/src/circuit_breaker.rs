//! Per-provider circuit breaker.
//!
//! Three states — closed, open, half-open — exactly as described for the
//! provider proxy's failure isolation. The one behavior that differs from a
//! generic breaker: callers classify each failure as a client fault (HTTP
//! 400/401/403/429) or a provider fault before calling [`CircuitBreaker::record_failure`].
//! Client faults never move the failure counter; the caller is wrong, not the
//! provider.

use crate::models::{CircuitBreakerSnapshot, CircuitBreakerStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub timeout: Duration,
    #[serde(with = "crate::common::duration_serde")]
    pub half_open_retry_delay: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_millis(60_000),
            half_open_retry_delay: Duration::from_millis(30_000),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct State {
    status: CircuitBreakerStatus,
    failures: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<chrono::DateTime<Utc>>,
    next_retry: Option<Instant>,
    next_retry_wall: Option<chrono::DateTime<Utc>>,
    half_open_calls: u32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            status: CircuitBreakerStatus::Closed,
            failures: 0,
            last_failure: None,
            last_failure_wall: None,
            next_retry: None,
            next_retry_wall: None,
            half_open_calls: 0,
        }
    }
}

pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<State>>,
}

impl CircuitBreaker {
    pub fn new(provider_id: String, config: CircuitBreakerConfig) -> Self {
        Self {
            provider_id,
            config,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Whether a candidate may currently be attempted: closed, or open past
    /// its `next_retry` deadline (which flips it to half-open and consumes
    /// one of its limited trial calls).
    pub async fn is_available(&self) -> bool {
        let mut state = self.state.write().await;
        match state.status {
            CircuitBreakerStatus::Closed => true,
            CircuitBreakerStatus::Open => {
                let now = Instant::now();
                if state.next_retry.map(|t| now > t).unwrap_or(false) {
                    state.status = CircuitBreakerStatus::HalfOpen;
                    state.half_open_calls = 0;
                    tracing::info!(provider = %self.provider_id, "circuit breaker half-open");
                    state.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
            CircuitBreakerStatus::HalfOpen => {
                if state.half_open_calls < self.config.half_open_max_calls {
                    state.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.failures = 0;
        state.half_open_calls = 0;
        if state.status != CircuitBreakerStatus::Closed {
            tracing::info!(provider = %self.provider_id, "circuit breaker closed");
        }
        state.status = CircuitBreakerStatus::Closed;
        state.next_retry = None;
        state.next_retry_wall = None;
    }

    /// Record a failed invocation. `is_client_fault` must be `true` for HTTP
    /// 400/401/403/429 — those never increment the failure counter (§4.1.2).
    pub async fn record_failure(&self, is_client_fault: bool) {
        if is_client_fault {
            return;
        }
        let mut state = self.state.write().await;
        state.failures += 1;
        let now = Instant::now();
        state.last_failure = Some(now);
        state.last_failure_wall = Some(Utc::now());

        match state.status {
            CircuitBreakerStatus::Closed => {
                if state.failures >= self.config.failure_threshold {
                    state.status = CircuitBreakerStatus::Open;
                    state.next_retry = Some(now + self.config.timeout);
                    state.next_retry_wall = Some(Utc::now() + self.config.timeout);
                    tracing::warn!(
                        provider = %self.provider_id,
                        failures = state.failures,
                        "circuit breaker open"
                    );
                }
            }
            CircuitBreakerStatus::HalfOpen => {
                state.status = CircuitBreakerStatus::Open;
                state.half_open_calls = 0;
                state.next_retry = Some(now + self.config.half_open_retry_delay);
                state.next_retry_wall = Some(Utc::now() + self.config.half_open_retry_delay);
                tracing::warn!(provider = %self.provider_id, "circuit breaker re-opened from half-open");
            }
            CircuitBreakerStatus::Open => {}
        }
    }

    pub async fn status(&self) -> CircuitBreakerStatus {
        self.state.read().await.status
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.read().await;
        CircuitBreakerSnapshot {
            status: state.status,
            failures: state.failures,
            last_failure: state.last_failure_wall,
            next_retry: state.next_retry_wall,
        }
    }

    pub async fn force_open(&self) {
        let mut state = self.state.write().await;
        state.status = CircuitBreakerStatus::Open;
        state.next_retry = Some(Instant::now() + self.config.timeout);
        state.next_retry_wall = Some(Utc::now() + self.config.timeout);
    }

    pub async fn force_closed(&self) {
        *self.state.write().await = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CircuitBreakerStatus as S;

    fn cfg(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_millis(50),
            half_open_retry_delay: Duration::from_millis(20),
            half_open_max_calls: 2,
        }
    }

    #[tokio::test]
    async fn closed_by_default() {
        let cb = CircuitBreaker::new("p".into(), cfg(3));
        assert_eq!(cb.status().await, S::Closed);
        assert!(cb.is_available().await);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("p".into(), cfg(3));
        for _ in 0..3 {
            cb.record_failure(false).await;
        }
        assert_eq!(cb.status().await, S::Open);
        let snap = cb.snapshot().await;
        assert!(snap.next_retry.is_some());
    }

    #[tokio::test]
    async fn client_faults_never_trip_breaker() {
        let cb = CircuitBreaker::new("p".into(), cfg(2));
        for _ in 0..10 {
            cb.record_failure(true).await;
        }
        assert_eq!(cb.status().await, S::Closed);
        assert_eq!(cb.snapshot().await.failures, 0);
    }

    #[tokio::test]
    async fn half_open_then_closed_on_success() {
        let cb = CircuitBreaker::new("p".into(), cfg(1));
        cb.record_failure(false).await;
        assert_eq!(cb.status().await, S::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.is_available().await);
        assert_eq!(cb.status().await, S::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.status().await, S::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("p".into(), cfg(1));
        cb.record_failure(false).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.is_available().await);
        assert_eq!(cb.status().await, S::HalfOpen);

        cb.record_failure(false).await;
        assert_eq!(cb.status().await, S::Open);
    }
}
