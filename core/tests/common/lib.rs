use franchise_query_core::FetchError;
use franchise_query_core::ManualClock;
use franchise_query_core::MemoryLogger;
use franchise_query_core::QueryClient;
use franchise_query_core::QueryClientConfig;
use franchise_query_core::QueryFn;
use franchise_query_core::QueryServices;
use franchise_query_core::RetryOverrides;
use franchise_query_core::query_fn;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// One scripted response of a fake backend.
#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    Network(&'static str),
    Status(u16),
    Backend(&'static str),
    Other(&'static str),
}

impl Reply {
    pub fn into_result(self) -> Result<Value, FetchError> {
        match self {
            Reply::Data(value) => Ok(value),
            Reply::Network(message) => Err(FetchError::network(message)),
            Reply::Status(status) => Err(FetchError::status(status, format!("status {status}"))),
            Reply::Backend(code) => Err(FetchError::backend(code, format!("backend error {code}"))),
            Reply::Other(message) => Err(FetchError::Other(anyhow::anyhow!(message))),
        }
    }
}

/// Fetch function that plays back a script and counts invocations.
///
/// Every call yields to the scheduler once before replying, so concurrent
/// callers can pile up behind a single in-flight request.
#[derive(Debug)]
pub struct ScriptedFetch {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    latency: Mutex<Option<(Arc<ManualClock>, Duration)>>,
}

impl ScriptedFetch {
    pub fn new(script: impl IntoIterator<Item = Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
        })
    }

    pub fn always(reply: Reply) -> Arc<Self> {
        Self::new([], reply)
    }

    pub fn data(value: Value) -> Arc<Self> {
        Self::always(Reply::Data(value))
    }

    /// Each call advances `clock` by `latency` before replying.
    pub fn set_latency(&self, clock: Arc<ManualClock>, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some((clock, latency));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn query_fn(self: &Arc<Self>) -> QueryFn {
        let fetch = Arc::clone(self);
        query_fn(move || {
            let reply = fetch.next_reply();
            async move {
                tokio::task::yield_now().await;
                reply.into_result()
            }
        })
    }

    fn next_reply(&self) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, latency)) = &*self.latency.lock().unwrap_or_else(PoisonError::into_inner)
        {
            clock.advance(*latency);
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Client wired to a manual clock and an in-memory logger.
pub struct TestHarness {
    pub client: QueryClient,
    pub clock: Arc<ManualClock>,
    pub logger: Arc<MemoryLogger>,
}

impl TestHarness {
    pub fn services(&self) -> QueryServices {
        QueryServices::new(self.client.clone())
    }
}

/// Default settings with retry jitter disabled so delays are exact.
pub fn deterministic_config() -> QueryClientConfig {
    let no_jitter = RetryOverrides {
        jitter_ratio: Some(0.0),
        ..RetryOverrides::default()
    };
    QueryClientConfig {
        query_retry: no_jitter.clone(),
        mutation_retry: no_jitter,
        ..QueryClientConfig::default()
    }
}

pub fn harness() -> TestHarness {
    harness_with(deterministic_config())
}

pub fn harness_with(config: QueryClientConfig) -> TestHarness {
    let clock = Arc::new(ManualClock::new());
    let logger = Arc::new(MemoryLogger::new());
    let client = QueryClient::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .with_logger(logger.clone())
        .build();
    TestHarness {
        client,
        clock,
        logger,
    }
}
