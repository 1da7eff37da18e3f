use crate::error::ClassifiedError;
use crate::error::ErrorKind;
use crate::error::FetchError;
use crate::logging::ErrorLogger;
use crate::logging::LogContext;
use crate::logging::LogEvent;
use serde::Serialize;
use std::sync::Arc;
use strum_macros::Display;

pub const UNKNOWN_ENDPOINT: &str = "unknown";

const AUTH_CODES: &[&str] = &["PGRST301", "PGRST302", "not_authenticated", "invalid_jwt", "42501"];
const VALIDATION_CODES: &[&str] = &["PGRST102", "PGRST204", "22P02", "23502", "23505", "23514", "validation_failed"];
const SERVER_CODES: &[&str] = &["PGRST000", "PGRST001", "PGRST002", "server_error", "internal_error"];

/// Which side of the cache an error came from. Queries and mutations share
/// one classifier; when no hint is given the classifier assumes a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    logger: Arc<dyn ErrorLogger>,
}

impl ErrorClassifier {
    pub fn new(logger: Arc<dyn ErrorLogger>) -> Self {
        Self { logger }
    }

    /// Normalizes `raw` and reports it to the logging collaborator.
    pub fn classify(
        &self,
        raw: FetchError,
        endpoint: Option<&str>,
        method: Option<OperationKind>,
    ) -> ClassifiedError {
        let endpoint = endpoint.unwrap_or(UNKNOWN_ENDPOINT).to_string();
        let method = method.unwrap_or_default();
        let kind = classify_kind(&raw);
        let retryable = matches!(kind, ErrorKind::Network | ErrorKind::Server);
        let user_message = user_message_for(kind, &raw);
        let classified = ClassifiedError::new(endpoint, kind, retryable, user_message, raw);
        let context = LogContext::new(LogEvent::ClassifiedError, classified.endpoint(), method);
        self.logger.log_error(&classified, &context);
        classified
    }
}

/// First matching rule wins; anything unrecognized is `Unknown` and is not retried.
pub fn classify_kind(raw: &FetchError) -> ErrorKind {
    match raw {
        FetchError::Network { .. } => ErrorKind::Network,
        FetchError::Status { status, message } => match *status {
            401 | 403 => ErrorKind::Auth,
            400 | 422 => ErrorKind::Validation,
            500..=599 => ErrorKind::Server,
            _ => kind_from_message(message).unwrap_or(ErrorKind::Unknown),
        },
        FetchError::Backend { code, message } => {
            if AUTH_CODES.contains(&code.as_str()) {
                ErrorKind::Auth
            } else if VALIDATION_CODES.contains(&code.as_str()) {
                ErrorKind::Validation
            } else if SERVER_CODES.contains(&code.as_str()) {
                ErrorKind::Server
            } else {
                kind_from_message(message).unwrap_or(ErrorKind::Unknown)
            }
        }
        FetchError::Other(err) => kind_from_message(&err.to_string()).unwrap_or(ErrorKind::Unknown),
    }
}

fn kind_from_message(message: &str) -> Option<ErrorKind> {
    let message = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));
    if has(&["failed to fetch", "network", "connection refused", "connection reset", "timed out"]) {
        Some(ErrorKind::Network)
    } else if has(&["not authenticated", "unauthorized", "jwt expired", "invalid token"]) {
        Some(ErrorKind::Auth)
    } else if has(&["validation", "invalid input", "violates"]) {
        Some(ErrorKind::Validation)
    } else if has(&["internal server error", "server error", "service unavailable"]) {
        Some(ErrorKind::Server)
    } else {
        None
    }
}

pub fn user_message_for(kind: ErrorKind, raw: &FetchError) -> String {
    let message = match kind {
        ErrorKind::Network => "Unable to reach the server. Check your connection and try again.",
        ErrorKind::Auth => "Your session has expired. Please sign in again.",
        ErrorKind::Validation => {
            "Some of the information provided is invalid. Please review it and try again."
        }
        ErrorKind::Server => "The server ran into a problem. Please try again shortly.",
        ErrorKind::Unknown => {
            let raw_message = raw.message();
            return if raw_message.trim().is_empty() {
                "An unexpected error occurred.".to_string()
            } else {
                raw_message
            };
        }
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;
    use pretty_assertions::assert_eq;

    fn classifier() -> (ErrorClassifier, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        (ErrorClassifier::new(logger.clone()), logger)
    }

    #[test]
    fn classification_rules_in_order() {
        let cases = [
            (FetchError::network("socket closed"), ErrorKind::Network, true),
            (FetchError::status(401, "nope"), ErrorKind::Auth, false),
            (FetchError::status(403, "forbidden"), ErrorKind::Auth, false),
            (FetchError::status(422, "bad"), ErrorKind::Validation, false),
            (FetchError::status(400, "bad"), ErrorKind::Validation, false),
            (FetchError::status(503, "down"), ErrorKind::Server, true),
            (FetchError::backend("PGRST301", "JWT expired"), ErrorKind::Auth, false),
            (FetchError::backend("23505", "duplicate key"), ErrorKind::Validation, false),
            (FetchError::status(409, "conflict"), ErrorKind::Unknown, false),
            (
                FetchError::Other(anyhow::anyhow!("TypeError: Failed to fetch")),
                ErrorKind::Network,
                true,
            ),
        ];
        let (classifier, _) = classifier();
        for (raw, kind, retryable) in cases {
            let err = classifier.classify(raw, Some("orders/list"), None);
            assert_eq!((err.kind(), err.retryable()), (kind, retryable));
        }
    }

    #[test]
    fn unknown_falls_back_to_raw_message() {
        let (classifier, _) = classifier();
        let err = classifier.classify(FetchError::status(418, "teapot"), None, None);
        assert_eq!(err.user_message(), "teapot");
        assert_eq!(err.endpoint(), UNKNOWN_ENDPOINT);

        let auth = classifier.classify(FetchError::status(401, "raw"), None, None);
        assert_eq!(auth.user_message(), "Your session has expired. Please sign in again.");
    }

    #[test]
    fn every_classification_is_logged_with_context() {
        let (classifier, logger) = classifier();
        classifier.classify(
            FetchError::status(500, "boom"),
            Some("mutation/order_created"),
            Some(OperationKind::Mutation),
        );
        let records = logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context.event, LogEvent::ClassifiedError);
        assert_eq!(records[0].context.endpoint, "mutation/order_created");
        assert_eq!(records[0].context.method, OperationKind::Mutation);
    }
}
