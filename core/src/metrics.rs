use serde::Serialize;

/// Point-in-time counters for the query cache.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub items: usize,
    pub fetching: usize,
    pub stale: usize,
    pub subscribed: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 1.0;
        }
        self.hits as f32 / total as f32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct PrefetchStats {
    pub scheduled: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub avg_latency_ms: f32,
}

impl PrefetchStats {
    pub(crate) fn record_completed(&mut self, latency_ms: f32) {
        let previous = self.completed as f32;
        self.completed += 1;
        self.avg_latency_ms = (self.avg_latency_ms * previous + latency_ms) / self.completed as f32;
    }
}
