use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::AsRefStr;
use strum_macros::Display;
use strum_macros::EnumString;
use thiserror::Error;

/// Raw failure produced by a caller-supplied fetch or mutation function.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No response was received.
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    /// Error code reported by the hosted backend.
    #[error("backend error {code}: {message}")]
    Backend { code: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            FetchError::Network { message }
            | FetchError::Status { message, .. }
            | FetchError::Backend { message, .. } => message.clone(),
            FetchError::Other(err) => err.to_string(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    Validation,
    Server,
    Unknown,
}

/// A failure normalized by [`crate::ErrorClassifier`].
#[derive(Debug, Clone, Error)]
#[error("{kind} error at `{endpoint}`: {raw}")]
pub struct ClassifiedError {
    endpoint: String,
    kind: ErrorKind,
    retryable: bool,
    user_message: String,
    raw: Arc<FetchError>,
}

impl ClassifiedError {
    pub(crate) fn new(
        endpoint: String,
        kind: ErrorKind,
        retryable: bool,
        user_message: String,
        raw: FetchError,
    ) -> Self {
        Self {
            endpoint,
            kind,
            retryable,
            user_message,
            raw: Arc::new(raw),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn raw(&self) -> &FetchError {
        &self.raw
    }
}

pub const CIRCUIT_OPEN_MESSAGE: &str =
    "This service is temporarily unavailable. Please try again in a few minutes.";

/// Caller-visible failure of a query or mutation.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error(transparent)]
    Failed(#[from] ClassifiedError),
    #[error("circuit breaker open for `{endpoint}`")]
    CircuitOpen { endpoint: String },
    #[error("query client has been disposed")]
    Disposed,
    #[error("cached data for {key} has an unexpected shape: {message}")]
    Decode { key: String, message: String },
}

impl RequestError {
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            RequestError::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(ClassifiedError::kind)
    }

    pub fn user_message(&self) -> &str {
        match self {
            RequestError::Failed(err) => err.user_message(),
            RequestError::CircuitOpen { .. } => CIRCUIT_OPEN_MESSAGE,
            RequestError::Disposed | RequestError::Decode { .. } => {
                "Something went wrong while loading data."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
