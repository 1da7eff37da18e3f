use crate::cache::QueryClient;
use crate::cache::QueryFn;
use crate::classify::OperationKind;
use crate::config::QueryOptions;
use crate::key::QueryKey;
use crate::logging::LogContext;
use crate::logging::LogEvent;
use crate::metrics::PrefetchStats;
use futures::future::join_all;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::PoisonError;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrefetchTrigger {
    Role(String),
    Route(String),
}

/// Navigation hint a screen passes when it wants its data warmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchContext {
    pub role: Option<String>,
    pub route: Option<String>,
}

impl PrefetchContext {
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            route: None,
        }
    }

    pub fn for_route(route: impl Into<String>) -> Self {
        Self {
            role: None,
            route: Some(route.into()),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    fn triggers(&self) -> Vec<PrefetchTrigger> {
        let mut triggers = Vec::new();
        if let Some(role) = &self.role {
            triggers.push(PrefetchTrigger::Role(role.clone()));
        }
        if let Some(route) = &self.route {
            triggers.push(PrefetchTrigger::Route(route.clone()));
        }
        triggers
    }
}

#[derive(Clone)]
pub struct PrefetchTarget {
    pub key: QueryKey,
    pub fetch: QueryFn,
    pub options: QueryOptions,
}

impl PrefetchTarget {
    pub fn new(key: QueryKey, fetch: QueryFn, options: QueryOptions) -> Self {
        Self {
            key,
            fetch,
            options,
        }
    }
}

impl fmt::Debug for PrefetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchTarget")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub attempted: usize,
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Best-effort cache warming keyed by role and route.
pub struct PrefetchScheduler {
    client: QueryClient,
    plans: RwLock<HashMap<PrefetchTrigger, Vec<PrefetchTarget>>>,
    usage: RwLock<HashMap<String, u64>>,
    stats: RwLock<PrefetchStats>,
}

impl PrefetchScheduler {
    pub fn new(client: &QueryClient) -> Self {
        Self {
            client: client.clone(),
            plans: RwLock::new(HashMap::new()),
            usage: RwLock::new(HashMap::new()),
            stats: RwLock::new(PrefetchStats::default()),
        }
    }

    pub fn register(&self, trigger: PrefetchTrigger, target: PrefetchTarget) {
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        let targets = plans.entry(trigger).or_default();
        targets.retain(|existing| existing.key != target.key);
        targets.push(target);
    }

    /// Targets for the context's role, then its route; each key once.
    pub fn targets_for(&self, context: &PrefetchContext) -> Vec<PrefetchTarget> {
        let plans = self.plans.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        context
            .triggers()
            .iter()
            .filter_map(|trigger| plans.get(trigger))
            .flatten()
            .filter(|target| seen.insert(target.key.clone()))
            .cloned()
            .collect()
    }

    /// Warms every target for `context` concurrently. Failures are logged
    /// and counted, never returned.
    pub async fn prefetch(&self, context: &PrefetchContext) -> PrefetchReport {
        let targets = self.targets_for(context);
        let mut report = PrefetchReport {
            attempted: targets.len(),
            ..PrefetchReport::default()
        };
        if targets.is_empty() || self.client.is_disposed() {
            return report;
        }

        let (fresh, due): (Vec<_>, Vec<_>) = targets.into_iter().partition(|target| {
            self.client
                .snapshot(&target.key)
                .is_some_and(|snapshot| snapshot.data.is_some() && !snapshot.is_stale)
        });
        report.skipped = fresh.len();

        let clock = self.client.clock();
        let started = clock.now();
        let results = join_all(due.iter().map(|target| async move {
            let result = self
                .client
                .get_or_fetch(&target.key, target.fetch.clone(), target.options)
                .await;
            (target, result)
        }))
        .await;
        let latency_ms = clock.now().saturating_duration_since(started).as_secs_f32() * 1_000.0;

        let mut warmed_keys = Vec::new();
        for (target, result) in results {
            // A failed refetch that fell back to cached data left its error on the entry.
            let outcome = result.and_then(|_| {
                match self.client.snapshot(&target.key).and_then(|snapshot| snapshot.error) {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            });
            match outcome {
                Ok(()) => warmed_keys.push(target.key.sample_key()),
                Err(err) => {
                    report.failed += 1;
                    let context =
                        LogContext::new(LogEvent::PrefetchFailed, target.key.endpoint(), OperationKind::Query);
                    self.client.logger().log_error(&err, &context);
                }
            }
        }
        report.warmed = warmed_keys.len();

        {
            let mut usage = self.usage.write().unwrap_or_else(PoisonError::into_inner);
            for key in warmed_keys {
                *usage.entry(key).or_insert(0) += 1;
            }
        }
        {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            stats.scheduled += report.attempted as u64;
            stats.skipped += report.skipped as u64;
            stats.failed += report.failed as u64;
            for _ in 0..report.warmed {
                stats.record_completed(latency_ms);
            }
        }
        debug!(
            role = context.role.as_deref().unwrap_or("-"),
            route = context.route.as_deref().unwrap_or("-"),
            warmed = report.warmed,
            skipped = report.skipped,
            failed = report.failed,
            "prefetch pass finished"
        );
        report
    }

    /// Most frequently warmed keys, busiest first.
    pub fn top(&self, limit: usize) -> Vec<(String, u64)> {
        let usage = self.usage.read().unwrap_or_else(PoisonError::into_inner);
        let mut pairs: Vec<_> = usage.iter().map(|(k, v)| (k.clone(), *v)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(limit);
        pairs
    }

    pub fn stats(&self) -> PrefetchStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
