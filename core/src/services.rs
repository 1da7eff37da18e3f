use crate::cache::QueryClient;
use crate::config::QueryClientConfig;
use crate::error::ConfigError;
use crate::invalidation::InvalidationEngine;
use crate::mutation::MutationRunner;
use crate::prefetch::PrefetchScheduler;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Everything a session needs, built around one [`QueryClient`].
#[derive(Clone)]
pub struct QueryServices {
    pub client: QueryClient,
    pub mutations: MutationRunner,
    pub invalidation: InvalidationEngine,
    pub prefetch: Arc<PrefetchScheduler>,
}

impl QueryServices {
    pub fn new(client: QueryClient) -> Self {
        Self {
            mutations: MutationRunner::new(&client),
            invalidation: InvalidationEngine::new(&client),
            prefetch: Arc::new(PrefetchScheduler::new(&client)),
            client,
        }
    }

    pub fn create(config: QueryClientConfig) -> Self {
        Self::new(QueryClient::create(config))
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::create(QueryClientConfig::load(path)?))
    }

    pub fn dispose(&self) {
        self.client.dispose();
    }
}

impl fmt::Debug for QueryServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryServices")
            .field("cache_items", &self.client.stats().items)
            .field("disposed", &self.client.is_disposed())
            .field("prefetch_top", &self.prefetch.top(3))
            .finish()
    }
}
