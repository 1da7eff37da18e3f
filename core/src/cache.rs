use crate::breaker::CircuitBreaker;
use crate::classify::ErrorClassifier;
use crate::classify::OperationKind;
use crate::clock::Clock;
use crate::clock::TokioClock;
use crate::config::QueryClientConfig;
use crate::config::QueryOptions;
use crate::entry::CacheEntry;
use crate::entry::FetchOutcome;
use crate::entry::InFlight;
use crate::entry::QuerySnapshot;
use crate::entry::QueryStatus;
use crate::entry::SharedFetch;
use crate::error::FetchError;
use crate::error::RequestError;
use crate::invalidation::InvalidationReport;
use crate::key::QueryKey;
use crate::logging::ErrorLogger;
use crate::logging::TracingLogger;
use crate::metrics::CacheStats;
use crate::monitor::PerformanceMonitor;
use crate::resilience::Operation;
use crate::resilience::ResilienceChain;
use crate::retry::RetryPolicy;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

/// Caller-supplied fetch function for one key.
pub type QueryFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, FetchError>> + Send + Sync>;

pub fn query_fn<F, Fut>(fetch: F) -> QueryFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    Arc::new(move || fetch().boxed())
}

/// Wraps a fetch function whose result is any serializable type.
pub fn typed_query_fn<T, F, Fut>(fetch: F) -> QueryFn
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move || {
        let pending = fetch();
        async move {
            let value = pending.await?;
            serde_json::to_value(value).map_err(|err| FetchError::Other(err.into()))
        }
        .boxed()
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefetchFilter {
    /// Only refetch entries with at least one subscriber.
    pub active_only: bool,
}

impl RefetchFilter {
    pub fn all() -> Self {
        Self { active_only: false }
    }

    pub fn active() -> Self {
        Self { active_only: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub refetched: usize,
    pub collected: usize,
}

enum Lookup {
    Hit(Arc<Value>),
    Pending(SharedFetch),
}

struct MaintenanceTask {
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl MaintenanceTask {
    fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
    }
}

struct ClientInner {
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
    chain: ResilienceChain,
    query_policy: RetryPolicy,
    mutation_policy: RetryPolicy,
    config: QueryClientConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    disposed: AtomicBool,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl ClientInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> Instant {
        self.chain.clock.now()
    }

    /// Applies a finished fetch unless a newer generation already landed.
    fn apply_outcome(&self, key: &QueryKey, generation: u64, outcome: &FetchOutcome) {
        let now = self.now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(key) else {
            debug!(key = %key, generation, "entry removed before fetch finished");
            return;
        };
        if entry
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            entry.in_flight = None;
        }
        if generation <= entry.applied_generation {
            debug!(
                key = %key,
                generation,
                applied = entry.applied_generation,
                "discarding superseded fetch result"
            );
        } else {
            entry.applied_generation = generation;
            match outcome {
                Ok(data) => {
                    entry.data = Some(data.clone());
                    entry.fetched_at = Some(now);
                    entry.error = None;
                    if entry.invalidated_at.is_some_and(|mark| generation > mark) {
                        entry.invalidated_at = None;
                    }
                }
                Err(err) => entry.error = Some(err.clone()),
            }
        }
        entry.status = if entry.in_flight.is_some() {
            QueryStatus::Fetching
        } else if entry.error.is_some() {
            QueryStatus::Error
        } else if entry.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        };
    }

    fn release(&self, key: &QueryKey) {
        let now = self.now();
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
            if entry.subscriber_count == 0 {
                entry.idle_since = Some(now);
            }
        }
    }
}

/// Starts a new generation for `entry`. A fetch already in flight is awaited
/// first, so a key never has two network calls running at once.
fn begin_fetch(inner: &Arc<ClientInner>, entry: &mut CacheEntry, fetcher: QueryFn) -> SharedFetch {
    entry.generation += 1;
    let generation = entry.generation;
    let previous = entry.in_flight.take().map(|in_flight| in_flight.future);
    let key = entry.key.clone();
    let max_attempts = entry
        .options
        .max_attempts
        .unwrap_or(inner.query_policy.max_attempts);
    let weak = Arc::downgrade(inner);
    let chain = inner.chain.clone();
    let policy = inner.query_policy.clone();

    let future = async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        let endpoint = key.endpoint();
        let sample_key = key.sample_key();
        let op = Operation {
            endpoint: &endpoint,
            sample_key: &sample_key,
            kind: OperationKind::Query,
            policy: &policy,
            max_attempts,
        };
        let outcome = chain.execute(op, || fetcher()).await.map(Arc::new);
        if let Some(inner) = weak.upgrade() {
            inner.apply_outcome(&key, generation, &outcome);
        }
        outcome
    }
    .boxed()
    .shared();

    entry.in_flight = Some(InFlight {
        generation,
        future: future.clone(),
    });
    entry.status = QueryStatus::Fetching;
    future
}

/// Keyed query cache with request deduplication and background refresh.
///
/// Cloning is cheap; clones share one cache. Create one per session with
/// [`QueryClient::create`] or [`QueryClient::builder`] and tear it down with
/// [`QueryClient::dispose`].
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

#[derive(Default)]
pub struct QueryClientBuilder {
    config: QueryClientConfig,
    clock: Option<Arc<dyn Clock>>,
    logger: Option<Arc<dyn ErrorLogger>>,
}

impl QueryClientBuilder {
    pub fn with_config(mut self, config: QueryClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> QueryClient {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let chain = ResilienceChain {
            classifier: ErrorClassifier::new(logger.clone()),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker, clock.clone())),
            monitor: Arc::new(PerformanceMonitor::new(
                logger.clone(),
                config.slow_operation_threshold(),
            )),
            clock,
            logger,
        };
        QueryClient {
            inner: Arc::new(ClientInner {
                entries: Mutex::new(HashMap::new()),
                chain,
                query_policy: config.query_retry_policy(),
                mutation_policy: config.mutation_retry_policy(),
                config,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                maintenance: Mutex::new(None),
            }),
        }
    }
}

impl QueryClient {
    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::default()
    }

    pub fn create(config: QueryClientConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    pub fn config(&self) -> &QueryClientConfig {
        &self.inner.config
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.inner.chain.monitor
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.chain.breaker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.chain.clock
    }

    pub fn logger(&self) -> &Arc<dyn ErrorLogger> {
        &self.inner.chain.logger
    }

    pub fn query_policy(&self) -> &RetryPolicy {
        &self.inner.query_policy
    }

    pub fn mutation_policy(&self) -> &RetryPolicy {
        &self.inner.mutation_policy
    }

    pub(crate) fn chain(&self) -> &ResilienceChain {
        &self.inner.chain
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RequestError> {
        if self.is_disposed() {
            Err(RequestError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Options for callers that pass none: the configured `default_class`.
    pub fn default_options(&self) -> QueryOptions {
        self.inner.config.default_options()
    }

    /// Returns fresh cached data, or fetches it.
    ///
    /// Concurrent callers for one key share a single fetch. When a refetch of
    /// an entry that already holds data fails, the old data is returned and
    /// the error stays on the entry. `None` options resolve to
    /// [`default_options`](Self::default_options).
    pub async fn get_or_fetch(
        &self,
        key: &QueryKey,
        fetcher: QueryFn,
        options: impl Into<Option<QueryOptions>>,
    ) -> Result<Arc<Value>, RequestError> {
        self.ensure_live()?;
        let options = options.into().unwrap_or_else(|| self.default_options());
        let lookup = {
            let now = self.inner.now();
            let mut entries = self.inner.entries();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), options, now));
            entry.options = options;
            entry.fetcher = Some(fetcher.clone());
            let fresh = !entry.is_stale(now);
            match entry.data.clone() {
                Some(data) if fresh => Lookup::Hit(data),
                _ => match entry.current_fetch() {
                    Some(fetch) => Lookup::Pending(fetch),
                    None => Lookup::Pending(begin_fetch(&self.inner, entry, fetcher)),
                },
            }
        };

        let sample_key = key.sample_key();
        match lookup {
            Lookup::Hit(data) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                self.monitor().record_cache_hit(&sample_key);
                Ok(data)
            }
            Lookup::Pending(fetch) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                self.monitor().record_cache_miss(&sample_key);
                match fetch.await {
                    Ok(data) => Ok(data),
                    Err(err) => match self.get_cached(key) {
                        Some(stale) => {
                            debug!(key = %key, error = %err, "refetch failed; serving cached data");
                            Ok(stale)
                        }
                        None => Err(err),
                    },
                }
            }
        }
    }

    /// [`get_or_fetch`](Self::get_or_fetch) followed by a typed read of the JSON data.
    pub async fn fetch_as<T>(
        &self,
        key: &QueryKey,
        fetcher: QueryFn,
        options: impl Into<Option<QueryOptions>>,
    ) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let data = self.get_or_fetch(key, fetcher, options).await?;
        T::deserialize(data.as_ref()).map_err(|err| RequestError::Decode {
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    /// Marks every entry under `prefix` stale and refetches the subscribed
    /// ones in the background. Data is kept.
    pub fn invalidate(&self, prefix: &QueryKey) -> Result<InvalidationReport, RequestError> {
        self.ensure_live()?;
        let mut report = InvalidationReport::default();
        let mut started = Vec::new();
        {
            let mut entries = self.inner.entries();
            for entry in entries
                .values_mut()
                .filter(|entry| entry.key.starts_with(prefix))
            {
                entry.mark_stale();
                report.stale.push(entry.key.clone());
                if !entry.is_active() {
                    continue;
                }
                if entry.current_fetch().is_none() {
                    let Some(fetcher) = entry.fetcher.clone() else {
                        continue;
                    };
                    started.push(begin_fetch(&self.inner, entry, fetcher));
                }
                report.refetching.push(entry.key.clone());
            }
        }
        report.stale.sort();
        report.refetching.sort();
        debug!(
            prefix = %prefix,
            stale = report.stale.len(),
            refetching = report.refetching.len(),
            "invalidated queries"
        );
        self.spawn_background(started);
        Ok(report)
    }

    /// Forces a new fetch of every entry under `prefix` and waits for them.
    /// Returns how many entries were refetched.
    pub async fn refetch(
        &self,
        prefix: &QueryKey,
        filter: RefetchFilter,
    ) -> Result<usize, RequestError> {
        self.ensure_live()?;
        let fetches: Vec<SharedFetch> = {
            let mut entries = self.inner.entries();
            entries
                .values_mut()
                .filter(|entry| entry.key.starts_with(prefix))
                .filter(|entry| !filter.active_only || entry.is_active())
                .filter_map(|entry| {
                    let fetcher = entry.fetcher.clone()?;
                    Some(begin_fetch(&self.inner, entry, fetcher))
                })
                .collect()
        };
        let count = fetches.len();
        join_all(fetches).await;
        debug!(prefix = %prefix, count, active_only = filter.active_only, "refetched queries");
        Ok(count)
    }

    pub fn subscribe(&self, key: &QueryKey) -> Result<Subscription, RequestError> {
        self.ensure_live()?;
        let now = self.inner.now();
        let default_options = self.default_options();
        let mut entries = self.inner.entries();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), default_options, now));
        entry.subscriber_count += 1;
        entry.idle_since = None;
        Ok(Subscription {
            client: Arc::downgrade(&self.inner),
            key: key.clone(),
            released: false,
        })
    }

    /// Drops unsubscribed entries whose garbage-collection window has passed.
    pub fn collect_garbage(&self) -> usize {
        let now = self.inner.now();
        let mut entries = self.inner.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_collectable(now));
        let collected = before - entries.len();
        if collected > 0 {
            debug!(collected, remaining = entries.len(), "collected idle queries");
        }
        collected
    }

    /// Refetches subscribed entries whose refetch interval has elapsed.
    pub async fn refetch_intervals(&self) -> Result<usize, RequestError> {
        self.ensure_live()?;
        let now = self.inner.now();
        let fetches: Vec<SharedFetch> = {
            let mut entries = self.inner.entries();
            entries
                .values_mut()
                .filter(|entry| entry.is_active() && entry.interval_due(now))
                .filter(|entry| entry.in_flight.is_none())
                .filter_map(|entry| {
                    let fetcher = entry.fetcher.clone()?;
                    Some(begin_fetch(&self.inner, entry, fetcher))
                })
                .collect()
        };
        let count = fetches.len();
        join_all(fetches).await;
        Ok(count)
    }

    /// Refetches subscribed, stale entries that opted into refetch-on-focus.
    pub async fn on_window_focus(&self) -> Result<usize, RequestError> {
        self.ensure_live()?;
        let now = self.inner.now();
        let fetches: Vec<SharedFetch> = {
            let mut entries = self.inner.entries();
            entries
                .values_mut()
                .filter(|entry| {
                    entry.is_active() && entry.options.refetch_on_focus && entry.is_stale(now)
                })
                .filter_map(|entry| match entry.current_fetch() {
                    Some(fetch) => Some(fetch),
                    None => {
                        let fetcher = entry.fetcher.clone()?;
                        Some(begin_fetch(&self.inner, entry, fetcher))
                    }
                })
                .collect()
        };
        let count = fetches.len();
        join_all(fetches).await;
        debug!(count, "window focus refetch");
        Ok(count)
    }

    /// One maintenance pass: interval refetch, then garbage collection.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, RequestError> {
        let refetched = self.refetch_intervals().await?;
        let collected = self.collect_garbage();
        Ok(MaintenanceReport {
            refetched,
            collected,
        })
    }

    /// Spawns the maintenance timer on the current tokio runtime. Calling it
    /// again while the timer runs does nothing.
    pub fn start_maintenance(&self) -> Result<(), RequestError> {
        self.ensure_live()?;
        let mut slot = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let period = self.inner.config.maintenance_interval();
        let clock = Arc::clone(self.clock());
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            run_maintenance_loop(weak, clock, period, shutdown_rx).await;
        });
        *slot = Some(MaintenanceTask {
            handle,
            shutdown_tx,
        });
        Ok(())
    }

    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let now = self.inner.now();
        self.inner
            .entries()
            .get(key)
            .map(|entry| entry.snapshot(now))
    }

    pub fn get_cached(&self, key: &QueryKey) -> Option<Arc<Value>> {
        self.inner
            .entries()
            .get(key)
            .and_then(|entry| entry.data.clone())
    }

    /// Writes data directly (optimistic update). The entry becomes fresh and
    /// any fetch already in flight for it is superseded.
    pub fn set_data(&self, key: &QueryKey, value: Value) -> Result<(), RequestError> {
        self.ensure_live()?;
        let now = self.inner.now();
        let default_options = self.default_options();
        let mut entries = self.inner.entries();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), default_options, now));
        entry.generation += 1;
        entry.applied_generation = entry.generation;
        entry.data = Some(Arc::new(value));
        entry.fetched_at = Some(now);
        entry.error = None;
        entry.invalidated_at = None;
        entry.status = if entry.in_flight.is_some() {
            QueryStatus::Fetching
        } else {
            QueryStatus::Success
        };
        Ok(())
    }

    /// Deletes every entry under `prefix`. Results of their in-flight fetches
    /// are discarded.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.entries();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.inner.now();
        let entries = self.inner.entries();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            items: entries.len(),
            fetching: entries.values().filter(|e| e.in_flight.is_some()).count(),
            stale: entries.values().filter(|e| e.is_stale(now)).count(),
            subscribed: entries.values().filter(|e| e.is_active()).count(),
        }
    }

    /// Waits until no entry has a fetch in flight.
    pub async fn wait_for_fetches(&self) {
        loop {
            let pending: Vec<SharedFetch> = self
                .inner
                .entries()
                .values()
                .filter_map(|entry| entry.in_flight.as_ref())
                .map(|in_flight| in_flight.future.clone())
                .collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending).await;
        }
    }

    /// Stops the maintenance timer and drops every entry. Later calls fail
    /// with [`RequestError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = self
            .inner
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.shutdown();
        }
        let dropped = {
            let mut entries = self.inner.entries();
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        self.breaker().reset_all();
        info!(entries = dropped, "query client disposed");
    }

    fn spawn_background(&self, fetches: Vec<SharedFetch>) {
        if fetches.is_empty() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                for fetch in fetches {
                    handle.spawn(async move {
                        let _ = fetch.await;
                    });
                }
            }
            Err(_) => debug!(
                count = fetches.len(),
                "no async runtime; background refetches run on next access"
            ),
        }
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.inner.entries().len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

async fn run_maintenance_loop(
    inner: Weak<ClientInner>,
    clock: Arc<dyn Clock>,
    period: Duration,
    shutdown: oneshot::Receiver<()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = clock.sleep(period) => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let client = QueryClient { inner };
        match client.run_maintenance().await {
            Ok(report) if report.refetched > 0 || report.collected > 0 => {
                debug!(refetched = report.refetched, collected = report.collected, "maintenance pass");
            }
            Ok(_) => {}
            Err(_) => break,
        }
        drop(client);
        tokio::task::yield_now().await;
    }
}

/// Keeps an entry active. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) releases the subscription.
pub struct Subscription {
    client: Weak<ClientInner>,
    key: QueryKey,
    released: bool,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(inner) = self.client.upgrade() {
            inner.release(&self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}
