use crate::classify::OperationKind;
use crate::logging::ErrorLogger;
use crate::logging::LogContext;
use crate::logging::LogEvent;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1_500);
const LATENCY_WINDOW: usize = 256;
const MAX_SLOW_SAMPLES: usize = 64;
const APDEX_TARGET_MS: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub key: String,
    pub duration_ms: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for PerformanceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slow operation on {} took {:.0}ms", self.key, self.duration_ms)
    }
}

#[derive(Debug, Clone, Default)]
struct KeyCounters {
    count: u64,
    errors: u64,
    total_ms: f64,
    min_ms: Option<f64>,
    max_ms: f64,
    cache_hits: u64,
    cache_misses: u64,
    slow: u64,
    /// Latest durations, oldest first.
    window_ms: VecDeque<f64>,
}

impl KeyCounters {
    fn record(&mut self, duration_ms: f64, success: bool, slow: bool) {
        self.count += 1;
        if !success {
            self.errors += 1;
        }
        if slow {
            self.slow += 1;
        }
        self.total_ms += duration_ms;
        self.min_ms = Some(self.min_ms.map_or(duration_ms, |min| min.min(duration_ms)));
        self.max_ms = self.max_ms.max(duration_ms);
        if self.window_ms.len() == LATENCY_WINDOW {
            self.window_ms.pop_front();
        }
        self.window_ms.push_back(duration_ms);
    }

    fn absorb(&mut self, other: &KeyCounters) {
        self.count += other.count;
        self.errors += other.errors;
        self.total_ms += other.total_ms;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.slow += other.slow;
    }

    fn summary(&self) -> KeySummary {
        let mut window: Vec<f64> = self.window_ms.iter().copied().collect();
        KeySummary {
            count: self.count,
            avg_ms: ratio(self.total_ms, self.count as f64, 0.0),
            min_ms: self.min_ms.unwrap_or(0.0),
            max_ms: self.max_ms,
            p95_ms: nearest_rank(&mut window, 0.95),
            error_rate: ratio(self.errors as f64, self.count as f64, 0.0),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            hit_rate: ratio(
                self.cache_hits as f64,
                (self.cache_hits + self.cache_misses) as f64,
                1.0,
            ),
            slow_count: self.slow,
        }
    }
}

fn ratio(numerator: f64, denominator: f64, empty: f64) -> f64 {
    if denominator == 0.0 {
        empty
    } else {
        numerator / denominator
    }
}

/// Nearest-rank percentile; `values` is sorted in place.
fn nearest_rank(values: &mut [f64], quantile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let rank = (quantile * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}

/// Satisfied at or under the target, tolerating up to four times it.
fn apdex(latencies: &[f64]) -> f64 {
    if latencies.is_empty() {
        return 1.0;
    }
    let score: f64 = latencies
        .iter()
        .map(|&ms| {
            if ms <= APDEX_TARGET_MS {
                1.0
            } else if ms <= 4.0 * APDEX_TARGET_MS {
                0.5
            } else {
                0.0
            }
        })
        .sum();
    score / latencies.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub error_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub slow_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallSummary {
    pub samples: u64,
    pub avg_ms: f64,
    pub latency_p95_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub apdex: f64,
    pub slow_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub per_key: BTreeMap<String, KeySummary>,
    pub overall: OverallSummary,
}

#[derive(Default)]
struct MonitorInner {
    per_key: HashMap<String, KeyCounters>,
    recent_slow: VecDeque<PerformanceSample>,
}

impl MonitorInner {
    fn counters(&mut self, key: &str) -> &mut KeyCounters {
        self.per_key.entry(key.to_string()).or_default()
    }

    fn summary(&self) -> PerformanceSummary {
        let per_key: BTreeMap<_, _> = self
            .per_key
            .iter()
            .map(|(key, counters)| (key.clone(), counters.summary()))
            .collect();
        let mut totals = KeyCounters::default();
        let mut latencies = Vec::new();
        for counters in self.per_key.values() {
            totals.absorb(counters);
            latencies.extend(counters.window_ms.iter().copied());
        }
        let totals = totals.summary();
        PerformanceSummary {
            per_key,
            overall: OverallSummary {
                samples: totals.count,
                avg_ms: totals.avg_ms,
                apdex: apdex(&latencies),
                latency_p95_ms: nearest_rank(&mut latencies, 0.95),
                error_rate: totals.error_rate,
                cache_hit_rate: totals.hit_rate,
                slow_count: totals.slow_count,
            },
        }
    }
}

/// In-memory latency, error-rate and hit-rate aggregation per query key.
pub struct PerformanceMonitor {
    inner: Mutex<MonitorInner>,
    logger: Arc<dyn ErrorLogger>,
    slow_threshold: Duration,
}

impl PerformanceMonitor {
    pub fn new(logger: Arc<dyn ErrorLogger>, slow_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(MonitorInner::default()),
            logger,
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Records one fetch or mutation attempt. Samples above the slow threshold
    /// are reported to the logger.
    pub fn record_sample(&self, key: &str, duration: Duration, success: bool) {
        self.record_sample_for(key, duration, success, OperationKind::Query);
    }

    pub fn record_sample_for(
        &self,
        key: &str,
        duration: Duration,
        success: bool,
        method: OperationKind,
    ) {
        let duration_ms = duration.as_micros() as f64 / 1_000.0;
        let slow = duration > self.slow_threshold;
        let sample = PerformanceSample {
            key: key.to_string(),
            duration_ms,
            success,
            timestamp: Utc::now(),
        };
        {
            let mut inner = self.lock();
            inner.counters(key).record(duration_ms, success, slow);
            if slow {
                if inner.recent_slow.len() == MAX_SLOW_SAMPLES {
                    inner.recent_slow.pop_front();
                }
                inner.recent_slow.push_back(sample.clone());
            }
        }
        if slow {
            let context = LogContext::new(LogEvent::SlowOperation, key, method)
                .with_duration_ms(duration.as_millis() as u64);
            self.logger.log_error(&sample, &context);
        }
    }

    pub fn record_cache_hit(&self, key: &str) {
        self.lock().counters(key).cache_hits += 1;
    }

    pub fn record_cache_miss(&self, key: &str) {
        self.lock().counters(key).cache_misses += 1;
    }

    pub fn get_summary(&self) -> PerformanceSummary {
        self.lock().summary()
    }

    pub fn slow_samples(&self) -> Vec<PerformanceSample> {
        self.lock().recent_slow.iter().cloned().collect()
    }

    pub fn reset(&self) {
        *self.lock() = MonitorInner::default();
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}
