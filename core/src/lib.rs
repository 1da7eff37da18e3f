//! Client-side query cache for the franchise dashboards.
//!
//! [`QueryClient`] owns the keyed cache and routes every fetch through the
//! error classifier, circuit breaker and retry policy. Mutations go through
//! [`MutationRunner`], which invalidates dependent keys via
//! [`InvalidationEngine`]; [`PrefetchScheduler`] warms keys ahead of
//! navigation and [`PerformanceMonitor`] aggregates latency and hit rates.

pub mod breaker;
pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
mod entry;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod mutation;
pub mod prefetch;
mod resilience;
pub mod retry;
pub mod services;

pub use breaker::CircuitBreaker;
pub use breaker::CircuitBreakerConfig;
pub use breaker::CircuitState;
pub use cache::MaintenanceReport;
pub use cache::QueryClient;
pub use cache::QueryClientBuilder;
pub use cache::QueryFn;
pub use cache::RefetchFilter;
pub use cache::Subscription;
pub use cache::query_fn;
pub use cache::typed_query_fn;
pub use classify::ErrorClassifier;
pub use classify::OperationKind;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::TokioClock;
pub use config::QueryClass;
pub use config::QueryClientConfig;
pub use config::QueryOptions;
pub use entry::QuerySnapshot;
pub use entry::QueryStatus;
pub use error::ClassifiedError;
pub use error::ConfigError;
pub use error::ErrorKind;
pub use error::FetchError;
pub use error::RequestError;
pub use invalidation::InvalidationContext;
pub use invalidation::InvalidationEngine;
pub use invalidation::InvalidationReport;
pub use invalidation::InvalidationRule;
pub use invalidation::MutationType;
pub use key::QueryKey;
pub use logging::ErrorLogger;
pub use logging::LogContext;
pub use logging::LogEvent;
pub use logging::LoggedError;
pub use logging::MemoryLogger;
pub use logging::TracingLogger;
pub use metrics::CacheStats;
pub use metrics::PrefetchStats;
pub use monitor::PerformanceMonitor;
pub use monitor::PerformanceSample;
pub use monitor::PerformanceSummary;
pub use mutation::MutationOptions;
pub use mutation::MutationRunner;
pub use prefetch::PrefetchContext;
pub use prefetch::PrefetchReport;
pub use prefetch::PrefetchScheduler;
pub use prefetch::PrefetchTarget;
pub use prefetch::PrefetchTrigger;
pub use retry::RetryOverrides;
pub use retry::RetryPolicy;
pub use services::QueryServices;
