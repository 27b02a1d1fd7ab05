//! An in-memory [`CatalogClient`].
//!
//! [`MemoryCatalog`] behaves like a well-mannered remote catalog: mutations
//! are reflected immediately, adding an existing member is a no-op, and
//! removing a non-member reports `NotFound`. Every call is recorded, and
//! failures can be scripted per operation and per product, which is what
//! the engine's own tests are built on.

use crate::{
    CatalogClient, CatalogError, CollectionId, CollectionInfo, Product, ProductId, ProductStream,
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which catalog operation a [`Call`] or a scripted fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOp {
    CollectionInfo,
    ListRecentProducts,
    ListMembers,
    AddMember,
    RemoveMember,
}

/// A recorded call against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CollectionInfo(CollectionId),
    ListRecentProducts(DateTime<Utc>),
    ListMembers(CollectionId),
    AddMember(CollectionId, ProductId),
    RemoveMember(CollectionId, ProductId),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::AddMember(..) | Call::RemoveMember(..))
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: CatalogOp,
    /// Restrict the fault to one product. For product listings the stream
    /// fails when it reaches this product.
    product: Option<ProductId>,
    error: CatalogError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl Fault {
    fn matches(&self, op: CatalogOp, product: Option<&ProductId>) -> bool {
        self.op == op
            && self.remaining != Some(0)
            && match (&self.product, product) {
                (None, _) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
            }
    }
}

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    collections: BTreeMap<CollectionId, (CollectionInfo, BTreeSet<ProductId>)>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
    ignore_since: bool,
}

impl State {
    fn take_fault(&mut self, op: CatalogOp, product: Option<&ProductId>) -> Option<CatalogError> {
        let fault = self.faults.iter_mut().find(|f| f.matches(op, product))?;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(fault.error.clone())
    }

    fn members_mut(&mut self, collection_id: &CollectionId) -> Result<&mut BTreeSet<ProductId>> {
        self.collections
            .get_mut(collection_id)
            .map(|(_, members)| members)
            .ok_or_else(|| CatalogError::not_found(format!("collection {collection_id}")))
    }
}

/// Catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a product to the catalog.
    pub fn with_product(mut self, product: Product) -> Self {
        self.state_mut().products.insert(product.id.clone(), product);
        self
    }

    /// Add a collection with its initial members.
    pub fn with_collection<I, P>(mut self, info: CollectionInfo, members: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProductId>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.state_mut()
            .collections
            .insert(info.id.clone(), (info, members));
        self
    }

    /// Return every product from recent-product listings, whatever `since`
    /// says, like an API that ignores the filter.
    pub fn with_superset_listing(mut self) -> Self {
        self.state_mut().ignore_since = true;
        self
    }

    /// Fail every call of `op` with `error`, forever.
    pub fn fail_always(&self, op: CatalogOp, error: CatalogError) {
        self.push_fault(op, None, error, None);
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_times(&self, op: CatalogOp, times: u32, error: CatalogError) {
        self.push_fault(op, None, error, Some(times));
    }

    /// Fail `op` for one product, `times` times or forever when `None`.
    pub fn fail_product(
        &self,
        op: CatalogOp,
        product_id: impl Into<ProductId>,
        error: CatalogError,
        times: Option<u32>,
    ) {
        self.push_fault(op, Some(product_id.into()), error, times);
    }

    fn push_fault(
        &self,
        op: CatalogOp,
        product: Option<ProductId>,
        error: CatalogError,
        remaining: Option<u32>,
    ) {
        self.lock().faults.push(Fault {
            op,
            product,
            error,
            remaining,
        });
    }

    /// Drop all scripted faults.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Change membership behind the engine's back.
    pub fn remove_externally(&self, collection_id: &str, product_id: &str) {
        if let Some((_, members)) = self.lock().collections.get_mut(collection_id) {
            members.remove(product_id);
        }
    }

    /// Current members of a collection (empty if it does not exist).
    pub fn members(&self, collection_id: &str) -> BTreeSet<ProductId> {
        self.lock()
            .collections
            .get(collection_id)
            .map(|(_, members)| members.clone())
            .unwrap_or_default()
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Only the add/remove calls made so far.
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn collection_info(&self, collection_id: &CollectionId) -> Result<CollectionInfo> {
        let mut state = self.lock();
        state.calls.push(Call::CollectionInfo(collection_id.clone()));
        if let Some(err) = state.take_fault(CatalogOp::CollectionInfo, None) {
            return Err(err);
        }
        state
            .collections
            .get(collection_id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| CatalogError::not_found(format!("collection {collection_id}")))
    }

    fn list_recent_products(&self, since: DateTime<Utc>) -> ProductStream<'_> {
        let mut state = self.lock();
        state.calls.push(Call::ListRecentProducts(since));

        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| state.ignore_since || p.created_at >= since)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut items = Vec::with_capacity(products.len());
        if let Some(err) = state.take_fault(CatalogOp::ListRecentProducts, None) {
            items.push(Err(err));
        } else {
            for product in products {
                let fault = state.take_fault(CatalogOp::ListRecentProducts, Some(&product.id));
                if let Some(err) = fault {
                    items.push(Err(err));
                    break;
                }
                items.push(Ok(product));
            }
        }

        futures::stream::iter(items).boxed()
    }

    async fn list_members(&self, collection_id: &CollectionId) -> Result<BTreeSet<ProductId>> {
        let mut state = self.lock();
        state.calls.push(Call::ListMembers(collection_id.clone()));
        if let Some(err) = state.take_fault(CatalogOp::ListMembers, None) {
            return Err(err);
        }
        state.members_mut(collection_id).map(|members| members.clone())
    }

    async fn add_member(&self, collection_id: &CollectionId, product_id: &ProductId) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::AddMember(collection_id.clone(), product_id.clone()));
        if let Some(err) = state.take_fault(CatalogOp::AddMember, Some(product_id)) {
            return Err(err);
        }
        if !state.products.contains_key(product_id) {
            return Err(CatalogError::not_found(format!("product {product_id}")));
        }
        state.members_mut(collection_id)?.insert(product_id.clone());
        Ok(())
    }

    async fn remove_member(
        &self,
        collection_id: &CollectionId,
        product_id: &ProductId,
    ) -> Result<()> {
        let mut state = self.lock();
        state
            .calls
            .push(Call::RemoveMember(collection_id.clone(), product_id.clone()));
        if let Some(err) = state.take_fault(CatalogOp::RemoveMember, Some(product_id)) {
            return Err(err);
        }
        if state.members_mut(collection_id)?.remove(product_id) {
            Ok(())
        } else {
            Err(CatalogError::not_found(format!(
                "product {product_id} in collection {collection_id}"
            )))
        }
    }
}
