use crate::cache::QueryFn;
use crate::config::QueryOptions;
use crate::error::RequestError;
use crate::key::QueryKey;
use futures::future::BoxFuture;
use futures::future::Shared;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use strum_macros::Display;

pub(crate) type FetchOutcome = Result<Arc<Value>, RequestError>;
pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueryStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

pub(crate) struct InFlight {
    pub(crate) generation: u64,
    pub(crate) future: SharedFetch,
}

/// State for one key. Only the client's entry map touches these.
pub(crate) struct CacheEntry {
    pub(crate) key: QueryKey,
    pub(crate) data: Option<Arc<Value>>,
    pub(crate) status: QueryStatus,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) options: QueryOptions,
    pub(crate) error: Option<RequestError>,
    pub(crate) subscriber_count: usize,
    /// Generation current when the entry was last invalidated. A success from
    /// a later generation clears it.
    pub(crate) invalidated_at: Option<u64>,
    pub(crate) idle_since: Option<Instant>,
    pub(crate) fetcher: Option<QueryFn>,
    /// Last generation handed to a fetch.
    pub(crate) generation: u64,
    /// Generation whose outcome currently backs `data`/`error`.
    pub(crate) applied_generation: u64,
    pub(crate) in_flight: Option<InFlight>,
}

impl CacheEntry {
    pub(crate) fn new(key: QueryKey, options: QueryOptions, now: Instant) -> Self {
        Self {
            key,
            data: None,
            status: QueryStatus::Idle,
            fetched_at: None,
            options,
            error: None,
            subscriber_count: 0,
            invalidated_at: None,
            idle_since: Some(now),
            fetcher: None,
            generation: 0,
            applied_generation: 0,
            in_flight: None,
        }
    }

    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated_at.is_some() {
            return true;
        }
        match self.fetched_at {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) > self.options.stale_time,
            None => true,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.subscriber_count > 0
    }

    /// In-flight fetch that already reflects the latest invalidation, if any.
    pub(crate) fn current_fetch(&self) -> Option<SharedFetch> {
        let in_flight = self.in_flight.as_ref()?;
        match self.invalidated_at {
            Some(mark) if in_flight.generation <= mark => None,
            _ => Some(in_flight.future.clone()),
        }
    }

    /// Marks the entry stale. Repeating the call while the refetch it caused
    /// is still running leaves the mark untouched.
    pub(crate) fn mark_stale(&mut self) {
        let covered = match (&self.in_flight, self.invalidated_at) {
            (Some(in_flight), Some(mark)) => in_flight.generation > mark,
            _ => false,
        };
        if !covered {
            self.invalidated_at = Some(self.generation);
        }
    }

    pub(crate) fn interval_due(&self, now: Instant) -> bool {
        match (self.options.refetch_interval, self.fetched_at) {
            (Some(interval), Some(fetched_at)) => now.saturating_duration_since(fetched_at) >= interval,
            _ => false,
        }
    }

    pub(crate) fn is_collectable(&self, now: Instant) -> bool {
        if self.subscriber_count > 0 || self.in_flight.is_some() {
            return false;
        }
        self.idle_since
            .is_some_and(|idle_since| now.saturating_duration_since(idle_since) >= self.options.gc_time)
    }

    pub(crate) fn snapshot(&self, now: Instant) -> QuerySnapshot {
        QuerySnapshot {
            key: self.key.clone(),
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_stale: self.is_stale(now),
            is_fetching: self.in_flight.is_some(),
            subscriber_count: self.subscriber_count,
            data_age: self
                .fetched_at
                .map(|fetched_at| now.saturating_duration_since(fetched_at)),
        }
    }
}

/// Read-only view of a cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<Arc<Value>>,
    pub error: Option<RequestError>,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub subscriber_count: usize,
    pub data_age: Option<Duration>,
}
