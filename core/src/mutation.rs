use crate::cache::QueryClient;
use crate::classify::OperationKind;
use crate::error::FetchError;
use crate::error::RequestError;
use crate::invalidation::InvalidationContext;
use crate::invalidation::InvalidationEngine;
use crate::invalidation::MutationType;
use crate::resilience::Operation;
use std::future::Future;
use tracing::debug;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct MutationOptions {
    pub mutation_type: MutationType,
    pub context: InvalidationContext,
}

impl MutationOptions {
    pub fn new(mutation_type: MutationType) -> Self {
        Self {
            mutation_type,
            context: InvalidationContext::default(),
        }
    }

    pub fn with_context(mut self, context: InvalidationContext) -> Self {
        self.context = context;
        self
    }
}

impl From<MutationType> for MutationOptions {
    fn from(mutation_type: MutationType) -> Self {
        Self::new(mutation_type)
    }
}

/// Runs writes with the mutation retry curve and invalidates dependent
/// queries once they succeed.
#[derive(Debug, Clone)]
pub struct MutationRunner {
    client: QueryClient,
    engine: InvalidationEngine,
}

impl MutationRunner {
    pub fn new(client: &QueryClient) -> Self {
        Self {
            client: client.clone(),
            engine: InvalidationEngine::new(client),
        }
    }

    pub fn engine(&self) -> &InvalidationEngine {
        &self.engine
    }

    /// Failures always reach the caller, after retries are exhausted.
    pub async fn run<V, R, F, Fut>(
        &self,
        mutation: F,
        variables: V,
        options: impl Into<MutationOptions>,
    ) -> Result<R, RequestError>
    where
        V: Clone,
        F: Fn(V) -> Fut,
        Fut: Future<Output = Result<R, FetchError>>,
    {
        self.client.ensure_live()?;
        let options = options.into();
        let endpoint = format!("mutation/{}", options.mutation_type);
        let sample_key = format!("mutation.{}", options.mutation_type);
        let policy = self.client.mutation_policy();
        let op = Operation {
            endpoint: &endpoint,
            sample_key: &sample_key,
            kind: OperationKind::Mutation,
            policy,
            max_attempts: policy.max_attempts,
        };
        let result = self
            .client
            .chain()
            .execute(op, || mutation(variables.clone()))
            .await?;

        // The write already landed; an invalidation problem must not turn it into a failure.
        match self
            .engine
            .apply(&options.mutation_type, &options.context)
            .await
        {
            Ok(report) => debug!(
                mutation = %options.mutation_type,
                stale = report.stale.len(),
                "mutation succeeded"
            ),
            Err(err) => warn!(
                mutation = %options.mutation_type,
                "mutation succeeded but invalidation failed: {err}"
            ),
        }
        Ok(result)
    }
}
