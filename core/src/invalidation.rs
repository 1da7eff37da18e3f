//! Mutation-driven cache invalidation.
//!
//! Each [`MutationType`] maps to a static [`InvalidationRule`]: prefixes to
//! mark stale and prefixes to refetch eagerly. Unrecognized mutation tags fall
//! back to invalidating the dashboard namespace.

use crate::cache::QueryClient;
use crate::cache::RefetchFilter;
use crate::error::RequestError;
use crate::key::QueryKey;
use crate::keys;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationType {
    OrderCreated,
    OrderApproved,
    OrderStatusUpdated,
    InventoryUpdated,
    ProfileUpdated,
    ProductUpdated,
    CartUpdated,
    NotificationRead,
    FranchiseUpdated,
    SupplierUpdated,
    /// Any tag without a dedicated rule.
    Other(String),
}

impl MutationType {
    pub fn as_str(&self) -> &str {
        match self {
            MutationType::OrderCreated => "order_created",
            MutationType::OrderApproved => "order_approved",
            MutationType::OrderStatusUpdated => "order_status_updated",
            MutationType::InventoryUpdated => "inventory_updated",
            MutationType::ProfileUpdated => "profile_updated",
            MutationType::ProductUpdated => "product_updated",
            MutationType::CartUpdated => "cart_updated",
            MutationType::NotificationRead => "notification_read",
            MutationType::FranchiseUpdated => "franchise_updated",
            MutationType::SupplierUpdated => "supplier_updated",
            MutationType::Other(tag) => tag,
        }
    }
}

impl FromStr for MutationType {
    type Err = Infallible;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Ok(match tag {
            "order_created" => MutationType::OrderCreated,
            "order_approved" => MutationType::OrderApproved,
            "order_status_updated" => MutationType::OrderStatusUpdated,
            "inventory_updated" => MutationType::InventoryUpdated,
            "profile_updated" => MutationType::ProfileUpdated,
            "product_updated" => MutationType::ProductUpdated,
            "cart_updated" => MutationType::CartUpdated,
            "notification_read" => MutationType::NotificationRead,
            "franchise_updated" => MutationType::FranchiseUpdated,
            "supplier_updated" => MutationType::SupplierUpdated,
            other => MutationType::Other(other.to_string()),
        })
    }
}

impl From<&str> for MutationType {
    fn from(tag: &str) -> Self {
        match tag.parse() {
            Ok(mutation_type) => mutation_type,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationRule {
    pub invalidate: Vec<QueryKey>,
    pub eager: Vec<QueryKey>,
}

impl InvalidationRule {
    fn invalidate(prefixes: impl IntoIterator<Item = QueryKey>) -> Self {
        Self {
            invalidate: prefixes.into_iter().collect(),
            eager: Vec::new(),
        }
    }

    fn with_eager(mut self, prefixes: impl IntoIterator<Item = QueryKey>) -> Self {
        self.eager = prefixes.into_iter().collect();
        self
    }
}

pub fn rule_for(mutation_type: &MutationType) -> InvalidationRule {
    match mutation_type {
        MutationType::OrderCreated => {
            InvalidationRule::invalidate([keys::orders::all(), keys::notifications::all()])
        }
        MutationType::OrderApproved => InvalidationRule::invalidate([keys::orders::all()])
            .with_eager([keys::dashboard::all()]),
        MutationType::OrderStatusUpdated => {
            InvalidationRule::invalidate([keys::orders::all(), keys::dashboard::all()])
        }
        MutationType::InventoryUpdated => {
            InvalidationRule::invalidate([keys::inventory::all(), keys::products::inventory()])
        }
        MutationType::ProfileUpdated => InvalidationRule::invalidate([
            keys::user::all(),
            keys::dashboard::all(),
            keys::orders::all(),
        ]),
        MutationType::ProductUpdated => {
            InvalidationRule::invalidate([keys::products::all(), keys::inventory::all()])
        }
        MutationType::CartUpdated => InvalidationRule::invalidate([keys::cart::all()]),
        MutationType::NotificationRead => {
            InvalidationRule::invalidate([keys::notifications::all()])
        }
        MutationType::FranchiseUpdated => {
            InvalidationRule::invalidate([keys::franchises::all(), keys::dashboard::all()])
        }
        MutationType::SupplierUpdated => {
            InvalidationRule::invalidate([keys::suppliers::all(), keys::products::all()])
        }
        MutationType::Other(_) => InvalidationRule::invalidate([keys::dashboard::all()]),
    }
}

/// Mutation-specific details passed alongside the mutation type.
#[derive(Debug, Clone, Default)]
pub struct InvalidationContext {
    pub entity_id: Option<String>,
    /// Extra prefixes to invalidate on top of the static rule.
    pub also_invalidate: Vec<QueryKey>,
}

impl InvalidationContext {
    pub fn for_entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            also_invalidate: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: QueryKey) -> Self {
        self.also_invalidate.push(prefix);
        self
    }
}

/// Keys touched by an invalidation, sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub stale: Vec<QueryKey>,
    /// Subscribed keys with a background refetch running.
    pub refetching: Vec<QueryKey>,
    pub eager_refetched: usize,
}

impl InvalidationReport {
    pub(crate) fn merge(&mut self, other: InvalidationReport) {
        self.stale.extend(other.stale);
        self.refetching.extend(other.refetching);
        self.eager_refetched += other.eager_refetched;
        self.stale.sort();
        self.stale.dedup();
        self.refetching.sort();
        self.refetching.dedup();
    }

    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.refetching.is_empty() && self.eager_refetched == 0
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationEngine {
    client: QueryClient,
}

impl InvalidationEngine {
    pub fn new(client: &QueryClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Applies the rule for `mutation_type`. Applying the same mutation twice
    /// leaves the cache as applying it once does.
    pub async fn apply(
        &self,
        mutation_type: &MutationType,
        context: &InvalidationContext,
    ) -> Result<InvalidationReport, RequestError> {
        let rule = rule_for(mutation_type);
        if let MutationType::Other(tag) = mutation_type {
            warn!(mutation = %tag, "no invalidation rule for mutation; invalidating dashboard");
        }

        let mut report = InvalidationReport::default();
        for prefix in rule.invalidate.iter().chain(&context.also_invalidate) {
            report.merge(self.client.invalidate(prefix)?);
        }
        for prefix in &rule.eager {
            report.eager_refetched += self
                .client
                .refetch(prefix, RefetchFilter::active())
                .await?;
        }

        info!(
            mutation = %mutation_type,
            entity_id = context.entity_id.as_deref().unwrap_or("-"),
            stale = report.stale.len(),
            refetching = report.refetching.len(),
            eager = report.eager_refetched,
            "applied invalidation rule"
        );
        Ok(report)
    }
}
