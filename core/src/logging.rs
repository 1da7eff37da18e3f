use crate::classify::OperationKind;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    ClassifiedError,
    CircuitBreakerActivated,
    SlowOperation,
    PrefetchFailed,
}

impl LogEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LogEvent::ClassifiedError => "classified_error",
            LogEvent::CircuitBreakerActivated => "circuit_breaker_activated",
            LogEvent::SlowOperation => "slow_operation",
            LogEvent::PrefetchFailed => "prefetch_failed",
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured context attached to every reported failure.
#[derive(Debug, Clone, Serialize)]
pub struct LogContext {
    pub event: LogEvent,
    pub endpoint: String,
    pub method: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub attempt: Option<u32>,
    pub duration_ms: Option<u64>,
}

impl LogContext {
    pub fn new(event: LogEvent, endpoint: impl Into<String>, method: OperationKind) -> Self {
        Self {
            event,
            endpoint: endpoint.into(),
            method,
            timestamp: Utc::now(),
            attempt: None,
            duration_ms: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Sink for classified errors and flagged slow operations.
pub trait ErrorLogger: Send + Sync + fmt::Debug {
    fn log_error(&self, error: &dyn fmt::Display, context: &LogContext);
}

/// Forwards every report to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ErrorLogger for TracingLogger {
    fn log_error(&self, error: &dyn fmt::Display, context: &LogContext) {
        match context.event {
            LogEvent::CircuitBreakerActivated => error!(
                event = %context.event,
                endpoint = %context.endpoint,
                method = %context.method,
                timestamp = %context.timestamp.to_rfc3339(),
                "{error}"
            ),
            _ => warn!(
                event = %context.event,
                endpoint = %context.endpoint,
                method = %context.method,
                timestamp = %context.timestamp.to_rfc3339(),
                attempt = ?context.attempt,
                duration_ms = ?context.duration_ms,
                "{error}"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggedError {
    pub message: String,
    pub context: LogContext,
}

/// Keeps every report in memory, newest last.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LoggedError>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LoggedError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, event: LogEvent) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|record| record.context.event == event)
            .count()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ErrorLogger for MemoryLogger {
    fn log_error(&self, error: &dyn fmt::Display, context: &LogContext) {
        let record = LoggedError {
            message: error.to_string(),
            context: context.clone(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn memory_logger_counts_by_event() {
        let logger = MemoryLogger::new();
        let ctx = LogContext::new(LogEvent::SlowOperation, "orders/list", OperationKind::Query)
            .with_duration_ms(2_000);
        logger.log_error(&"slow", &ctx);
        logger.log_error(
            &"boom",
            &LogContext::new(LogEvent::ClassifiedError, "orders/list", OperationKind::Query),
        );
        assert_eq!(logger.count(LogEvent::SlowOperation), 1);
        assert_eq!(logger.records()[0].context.duration_ms, Some(2_000));
        logger.clear();
        assert!(logger.records().is_empty());
    }

    #[test]
    #[traced_test]
    fn tracing_logger_emits_event_name() {
        let ctx = LogContext::new(
            LogEvent::CircuitBreakerActivated,
            "notifications/list",
            OperationKind::Query,
        );
        TracingLogger.log_error(&"circuit open", &ctx);
        assert!(logs_contain("circuit_breaker_activated"));
        assert!(logs_contain("notifications/list"));
    }
}
