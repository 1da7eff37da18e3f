use crate::breaker::CircuitBreaker;
use crate::breaker::CircuitState;
use crate::classify::ErrorClassifier;
use crate::classify::OperationKind;
use crate::clock::Clock;
use crate::error::FetchError;
use crate::error::RequestError;
use crate::logging::ErrorLogger;
use crate::logging::LogContext;
use crate::logging::LogEvent;
use crate::monitor::PerformanceMonitor;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;

/// One guarded call site: who is being called and how hard to try.
pub(crate) struct Operation<'a> {
    pub(crate) endpoint: &'a str,
    pub(crate) sample_key: &'a str,
    pub(crate) kind: OperationKind,
    pub(crate) policy: &'a RetryPolicy,
    pub(crate) max_attempts: u32,
}

/// Classifier → circuit breaker → retry policy, shared by queries and mutations.
#[derive(Debug, Clone)]
pub(crate) struct ResilienceChain {
    pub(crate) classifier: ErrorClassifier,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) monitor: Arc<PerformanceMonitor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) logger: Arc<dyn ErrorLogger>,
}

impl ResilienceChain {
    pub(crate) async fn execute<T, F, Fut>(
        &self,
        op: Operation<'_>,
        mut call: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut failures = 0u32;
        loop {
            let trial = match self.breaker.try_acquire(op.endpoint) {
                CircuitState::Open => return Err(self.refuse(&op, failures)),
                CircuitState::HalfOpen => true,
                CircuitState::Closed => false,
            };

            let started = self.clock.now();
            let result = call().await;
            let elapsed = self.clock.now().saturating_duration_since(started);
            self.monitor
                .record_sample_for(op.sample_key, elapsed, result.is_ok(), op.kind);

            let raw = match result {
                Ok(value) => {
                    self.breaker.record_success(op.endpoint);
                    return Ok(value);
                }
                Err(raw) => raw,
            };
            failures += 1;
            let error = self
                .classifier
                .classify(raw, Some(op.endpoint), Some(op.kind));

            if self.breaker.is_open(op.endpoint) {
                self.report_open(&op, failures);
                return Err(error.into());
            }
            // The half-open trial is never retried.
            if trial || !op.policy.should_retry(&error, failures, op.max_attempts) {
                if self.breaker.record_failure(op.endpoint) == CircuitState::Open {
                    warn!(
                        endpoint = op.endpoint,
                        threshold = self.breaker.config().threshold,
                        "circuit breaker tripped"
                    );
                }
                return Err(error.into());
            }

            let delay = op.policy.compute_delay(failures - 1, &error);
            debug!(
                endpoint = op.endpoint,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind(),
                "retrying after failure"
            );
            self.clock.sleep(delay).await;
        }
    }

    fn refuse(&self, op: &Operation<'_>, failures: u32) -> RequestError {
        self.report_open(op, failures);
        RequestError::CircuitOpen {
            endpoint: op.endpoint.to_string(),
        }
    }

    fn report_open(&self, op: &Operation<'_>, failures: u32) {
        let error = RequestError::CircuitOpen {
            endpoint: op.endpoint.to_string(),
        };
        let context = LogContext::new(LogEvent::CircuitBreakerActivated, op.endpoint, op.kind)
            .with_attempt(failures);
        self.logger.log_error(&error, &context);
    }
}
