//! Per-resource rate limiting and circuit breaking for outbound REST calls.
//!
//! Both guards key off [`signal_protocol::Resource`] and are shared across
//! the worker pool behind a single registry (see [`ResilienceRegistry`]).

mod circuit_breaker;
mod rate_limiter;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimiterConfig, TokenBucket};

use signal_protocol::Resource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Error returned when a call is refused before ever reaching the network.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("circuit breaker open for resource {0:?}")]
    BreakerOpen(Resource),
}

/// Owns one [`TokenBucket`] and one [`CircuitBreaker`] per resource.
pub struct ResilienceRegistry {
    buckets: HashMap<Resource, Arc<Mutex<TokenBucket>>>,
    breakers: HashMap<Resource, Arc<CircuitBreaker>>,
}

impl ResilienceRegistry {
    pub fn new(rate_limit: RateLimiterConfig, breaker: CircuitBreakerConfig) -> Self {
        let mut buckets = HashMap::new();
        let mut breakers = HashMap::new();
        for resource in Resource::ALL {
            buckets.insert(
                resource,
                Arc::new(Mutex::new(TokenBucket::new(rate_limit))),
            );
            breakers.insert(resource, Arc::new(CircuitBreaker::new(breaker)));
        }
        Self { buckets, breakers }
    }

    /// Wait for a rate-limit token and check the breaker, in that order.
    /// Returns `Err` immediately if the breaker is open; never consumes a
    /// token when refused.
    pub async fn guard(&self, resource: Resource) -> Result<BreakerPermit, GuardError> {
        let breaker = &self.breakers[&resource];
        if !breaker.allow_request() {
            metrics::counter!(signal_metrics::MESSAGES_DROPPED_TOTAL, "reason" => "breaker_open")
                .increment(1);
            return Err(GuardError::BreakerOpen(resource));
        }
        let bucket = &self.buckets[&resource];
        let wait = {
            let mut b = bucket.lock().await;
            b.acquire()
        };
        if let Some(wait) = wait {
            let started = tokio::time::Instant::now();
            tokio::time::sleep(wait).await;
            metrics::histogram!(
                signal_metrics::RATE_LIMITER_WAIT_SECONDS,
                "resource" => resource.as_str()
            )
            .record(started.elapsed().as_secs_f64());
        } else {
            metrics::histogram!(
                signal_metrics::RATE_LIMITER_WAIT_SECONDS,
                "resource" => resource.as_str()
            )
            .record(0.0);
        }
        Ok(BreakerPermit {
            breaker: breaker.clone(),
            resource,
        })
    }

    pub fn breaker_state(&self, resource: Resource) -> CircuitState {
        self.breakers[&resource].state()
    }
}

/// Returned by [`ResilienceRegistry::guard`]; the caller reports the outcome
/// of the call it guarded so the breaker can update its counters.
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    resource: Resource,
}

impl BreakerPermit {
    pub fn record_success(self) {
        self.breaker.record_success();
        metrics::gauge!(signal_metrics::CIRCUIT_BREAKER_STATE, "resource" => self.resource.as_str())
            .set(self.breaker.state().as_metric_value());
    }

    pub fn record_failure(self) {
        self.breaker.record_failure();
        metrics::gauge!(signal_metrics::CIRCUIT_BREAKER_STATE, "resource" => self.resource.as_str())
            .set(self.breaker.state().as_metric_value());
    }
}

pub fn jittered(base: Duration, factor: f64) -> Duration {
    use rand::Rng;
    let factor = factor.clamp(0.0, 1.0);
    let mult = rand::rng().random_range(1.0 - factor..=1.0 + factor);
    Duration::from_secs_f64((base.as_secs_f64() * mult).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn guard_refuses_when_breaker_open() {
        let registry = ResilienceRegistry::new(
            RateLimiterConfig {
                capacity: 10,
                refill_per_second: 10.0,
            },
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(30),
                rolling_window: Duration::from_secs(60),
            },
        );
        let permit = registry.guard(Resource::Messages).await.unwrap();
        permit.record_failure();
        assert!(registry.guard(Resource::Messages).await.is_err());
    }
}
