//! The remote catalog capability consumed by the engine.

use crate::{CollectionId, CollectionInfo, Product, ProductId, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeSet;

/// Lazy, finite sequence of products returned by a catalog query.
pub type ProductStream<'a> = BoxStream<'a, Result<Product>>;

/// Access to a remote merchant catalog.
///
/// Implementations own transport, authentication and pagination. Listing
/// calls must enumerate completely: a page that cannot be fetched or decoded
/// surfaces as [`CatalogError::Transient`](crate::CatalogError::Transient)
/// so that the caller restarts the listing instead of acting on a partial
/// view. Rate-limit signals must be surfaced as transient errors as well.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Describe a collection.
    async fn collection_info(&self, collection_id: &CollectionId) -> Result<CollectionInfo>;

    /// Products created at or after `since`.
    ///
    /// Each call issues a fresh query; no cursor state survives between
    /// calls. The remote side may return a superset.
    fn list_recent_products(&self, since: DateTime<Utc>) -> ProductStream<'_>;

    /// Current members of a collection.
    async fn list_members(&self, collection_id: &CollectionId) -> Result<BTreeSet<ProductId>>;

    /// Add one product to a collection.
    async fn add_member(&self, collection_id: &CollectionId, product_id: &ProductId) -> Result<()>;

    /// Remove one product from a collection.
    async fn remove_member(
        &self,
        collection_id: &CollectionId,
        product_id: &ProductId,
    ) -> Result<()>;
}
