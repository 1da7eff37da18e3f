use crate::breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::retry::RetryOverrides;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use strum_macros::AsRefStr;
use strum_macros::Display;
use strum_macros::EnumIter;
use strum_macros::EnumString;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Named staleness presets callers pick when registering a query.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryClass {
    RealTime,
    Dashboard,
    Static,
    User,
    Analytics,
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub refetch_interval: Option<Duration>,
    pub refetch_on_focus: bool,
    /// Attempts per fetch. `None` follows the client's query retry policy.
    pub max_attempts: Option<u32>,
}

impl QueryOptions {
    pub fn for_class(class: QueryClass) -> Self {
        let base = Self {
            stale_time: 5 * MINUTE,
            gc_time: 10 * MINUTE,
            refetch_interval: None,
            refetch_on_focus: false,
            max_attempts: None,
        };
        match class {
            QueryClass::RealTime => Self {
                stale_time: 30 * SECOND,
                gc_time: 2 * MINUTE,
                refetch_interval: Some(MINUTE),
                ..base
            },
            QueryClass::Dashboard => Self {
                stale_time: 2 * MINUTE,
                gc_time: 10 * MINUTE,
                refetch_on_focus: true,
                ..base
            },
            QueryClass::Static => Self {
                stale_time: 15 * MINUTE,
                gc_time: 30 * MINUTE,
                ..base
            },
            QueryClass::User => Self {
                stale_time: 5 * MINUTE,
                gc_time: 15 * MINUTE,
                ..base
            },
            QueryClass::Analytics => Self {
                stale_time: 10 * MINUTE,
                gc_time: 20 * MINUTE,
                ..base
            },
            QueryClass::Notifications => Self {
                stale_time: 15 * SECOND,
                gc_time: MINUTE,
                refetch_interval: Some(30 * SECOND),
                ..base
            },
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_refetch_interval(mut self, interval: Option<Duration>) -> Self {
        self.refetch_interval = interval;
        self
    }

    pub fn with_refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// The `user` preset. Callers that pass no options to
/// [`QueryClient::get_or_fetch`](crate::cache::QueryClient::get_or_fetch) get
/// the client's configured `default_class` instead.
impl Default for QueryOptions {
    fn default() -> Self {
        Self::for_class(QueryClass::User)
    }
}

impl From<QueryClass> for QueryOptions {
    fn from(class: QueryClass) -> Self {
        Self::for_class(class)
    }
}

/// Client-wide settings, loadable from TOML.
///
/// ```toml
/// default_class = "dashboard"
/// slow_operation_ms = 2000
///
/// [query_retry]
/// max_attempts = 4
///
/// [circuit_breaker]
/// threshold = 3
/// cooldown_ms = 60000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryClientConfig {
    pub query_retry: RetryOverrides,
    pub mutation_retry: RetryOverrides,
    pub circuit_breaker: CircuitBreakerConfig,
    pub slow_operation_ms: u64,
    pub maintenance_interval_ms: u64,
    pub default_class: QueryClass,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            query_retry: RetryOverrides::default(),
            mutation_retry: RetryOverrides::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            slow_operation_ms: 1_500,
            maintenance_interval_ms: 1_000,
            default_class: QueryClass::User,
        }
    }
}

impl QueryClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn query_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::query().with_overrides(&self.query_retry)
    }

    pub fn mutation_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::mutation().with_overrides(&self.mutation_retry)
    }

    pub fn slow_operation_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_operation_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }

    pub fn default_options(&self) -> QueryOptions {
        QueryOptions::for_class(self.default_class)
    }
}
