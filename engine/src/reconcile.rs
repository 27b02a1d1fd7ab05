//! Reconciliation of a collection's membership against a target set.
//!
//! # Algorithm
//!
//! 1. Diff current members against the target set into a plan
//! 2. Re-read membership (unless the caller just did) and narrow the plan
//!    to what is still missing
//! 3. Apply removals, then additions, one item at a time
//! 4. Classify each item's failure: retry transient, accept not-found,
//!    abort on fatal
//!
//! Nothing is rolled back. A plan that was only partly applied converges on
//! the next run because step 2 skips everything already reflected remotely.

use crate::retry::{retry, RetryPolicy};
use crate::{CatalogClient, CatalogError, CollectionId, ProductId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Membership changes needed to turn the current set into the target set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    /// In the target set but not in the collection.
    pub to_add: BTreeSet<ProductId>,
    /// In the collection but not in the target set.
    pub to_remove: BTreeSet<ProductId>,
}

impl ReconciliationPlan {
    /// Diff `current` against `target`.
    pub fn compute(current: &BTreeSet<ProductId>, target: &BTreeSet<ProductId>) -> Self {
        Self {
            to_add: target.difference(current).cloned().collect(),
            to_remove: current.difference(target).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Number of planned mutations.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    /// The part of this plan not yet reflected in `current`.
    pub fn narrow_to(&self, current: &BTreeSet<ProductId>) -> Self {
        Self {
            to_add: self.to_add.difference(current).cloned().collect(),
            to_remove: self.to_remove.intersection(current).cloned().collect(),
        }
    }
}

/// Kind of membership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Add,
    Remove,
}

impl Mutation {
    fn operation(self) -> &'static str {
        match self {
            Mutation::Add => "add_member",
            Mutation::Remove => "remove_member",
        }
    }
}

/// An item whose mutation kept failing after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub product_id: ProductId,
    pub error: String,
}

/// Why an apply stopped before going through the whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AbortReason {
    /// A call failed with a fatal error.
    Fatal { message: String },
    /// Membership could not be re-read before mutating.
    Refresh { message: String },
    /// The cycle was cancelled between two items.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Fatal { message } => write!(f, "aborted on fatal error: {message}"),
            AbortReason::Refresh { message } => {
                write!(f, "could not read collection membership: {message}")
            }
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What happened when a plan was applied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    /// Added, or already present remotely.
    pub added_ok: Vec<ProductId>,
    /// Removed, or already absent remotely.
    pub removed_ok: Vec<ProductId>,
    pub added_failed: Vec<FailedItem>,
    pub removed_failed: Vec<FailedItem>,
    /// Planned items that were already reflected remotely and needed no call.
    pub skipped: usize,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

impl ApplyResult {
    pub fn added(&self) -> usize {
        self.added_ok.len()
    }

    pub fn removed(&self) -> usize {
        self.removed_ok.len()
    }

    /// Items that permanently failed.
    pub fn failed(&self) -> usize {
        self.added_failed.len() + self.removed_failed.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn abort(&mut self, reason: AbortReason) {
        self.aborted = true;
        self.abort_reason = Some(reason);
    }

    fn record_ok(&mut self, mutation: Mutation, product_id: &ProductId) {
        match mutation {
            Mutation::Add => self.added_ok.push(product_id.clone()),
            Mutation::Remove => self.removed_ok.push(product_id.clone()),
        }
    }

    fn record_failed(&mut self, mutation: Mutation, product_id: &ProductId, err: &CatalogError) {
        let item = FailedItem {
            product_id: product_id.clone(),
            error: err.to_string(),
        };
        match mutation {
            Mutation::Add => self.added_failed.push(item),
            Mutation::Remove => self.removed_failed.push(item),
        }
    }
}

/// Computes and applies membership plans for collections of one catalog.
pub struct CollectionReconciler {
    client: Arc<dyn CatalogClient>,
    retry: RetryPolicy,
}

impl CollectionReconciler {
    pub fn new(client: Arc<dyn CatalogClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Diff `current` against `target`. Pure and total.
    pub fn plan(current: &BTreeSet<ProductId>, target: &BTreeSet<ProductId>) -> ReconciliationPlan {
        ReconciliationPlan::compute(current, target)
    }

    /// Apply `plan` to a collection.
    pub async fn apply(
        &self,
        collection_id: &CollectionId,
        plan: &ReconciliationPlan,
    ) -> ApplyResult {
        self.apply_with_cancel(collection_id, plan, &CancellationToken::new())
            .await
    }

    /// Apply `plan`, checking `cancel` before every item.
    pub async fn apply_with_cancel(
        &self,
        collection_id: &CollectionId,
        plan: &ReconciliationPlan,
        cancel: &CancellationToken,
    ) -> ApplyResult {
        let current = match retry(&self.retry, "list_members", || {
            self.client.list_members(collection_id)
        })
        .await
        {
            Ok(current) => current,
            Err(err) => {
                let mut result = ApplyResult::default();
                result.abort(AbortReason::Refresh {
                    message: err.to_string(),
                });
                return result;
            }
        };

        self.apply_against(collection_id, plan, &current, cancel)
            .await
    }

    /// Apply `plan` against membership `current` that the caller has just
    /// read, without listing the collection again.
    pub(crate) async fn apply_against(
        &self,
        collection_id: &CollectionId,
        plan: &ReconciliationPlan,
        current: &BTreeSet<ProductId>,
        cancel: &CancellationToken,
    ) -> ApplyResult {
        let mut result = ApplyResult::default();

        let effective = plan.narrow_to(current);
        result.skipped = plan.len() - effective.len();
        if result.skipped > 0 {
            tracing::debug!(
                collection = %collection_id,
                skipped = result.skipped,
                "Planned items already reflected remotely"
            );
        }

        let items = effective
            .to_remove
            .iter()
            .map(|id| (Mutation::Remove, id))
            .chain(effective.to_add.iter().map(|id| (Mutation::Add, id)));

        for (mutation, product_id) in items {
            if cancel.is_cancelled() {
                result.abort(AbortReason::Cancelled);
                return result;
            }

            match self.mutate(mutation, collection_id, product_id).await {
                Ok(()) => result.record_ok(mutation, product_id),
                Err(CatalogError::NotFound(what)) => {
                    tracing::debug!(product = %product_id, %what, "Already consistent");
                    result.record_ok(mutation, product_id);
                }
                Err(err @ CatalogError::Transient { .. }) => {
                    result.record_failed(mutation, product_id, &err);
                }
                Err(CatalogError::Fatal(message)) => {
                    result.abort(AbortReason::Fatal { message });
                    return result;
                }
            }
        }

        result
    }

    async fn mutate(
        &self,
        mutation: Mutation,
        collection_id: &CollectionId,
        product_id: &ProductId,
    ) -> Result<()> {
        retry(&self.retry, mutation.operation(), || match mutation {
            Mutation::Add => self.client.add_member(collection_id, product_id),
            Mutation::Remove => self.client.remove_member(collection_id, product_id),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, CatalogOp, MemoryCatalog};
    use crate::{CollectionInfo, Product};
    use chrono::{TimeZone, Utc};

    fn ids(items: &[&str]) -> BTreeSet<ProductId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn catalog(products: &[&str], members: &[&str]) -> Arc<MemoryCatalog> {
        let created = Utc.timestamp_opt(1_000, 0).unwrap();
        let mut catalog = MemoryCatalog::new();
        for id in products {
            catalog = catalog.with_product(Product::new(*id, created));
        }
        let info = CollectionInfo::manual("c", "New");
        Arc::new(catalog.with_collection(info, members.iter().copied()))
    }

    fn reconciler(catalog: &Arc<MemoryCatalog>) -> CollectionReconciler {
        CollectionReconciler::new(catalog.clone(), RetryPolicy::immediate(3))
    }

    #[test]
    fn plan_diffs_both_ways() {
        let plan = CollectionReconciler::plan(&ids(&["a", "b"]), &ids(&["b", "c", "d"]));
        assert_eq!(plan.to_add, ids(&["c", "d"]));
        assert_eq!(plan.to_remove, ids(&["a"]));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn plan_of_equal_sets_is_empty() {
        let plan = CollectionReconciler::plan(&ids(&["a"]), &ids(&["a"]));
        assert!(plan.is_empty());
    }

    #[test]
    fn narrow_drops_reflected_items() {
        let plan = CollectionReconciler::plan(&ids(&["a", "b"]), &ids(&["c", "d"]));
        let narrowed = plan.narrow_to(&ids(&["b", "c"]));
        assert_eq!(narrowed.to_add, ids(&["d"]));
        assert_eq!(narrowed.to_remove, ids(&["b"]));
    }

    #[tokio::test]
    async fn apply_removes_before_adding() {
        let catalog = catalog(&["a", "b", "c"], &["a"]);
        let plan = CollectionReconciler::plan(&ids(&["a"]), &ids(&["b", "c"]));

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert_eq!(result.removed_ok, vec!["a".to_string()]);
        assert_eq!(result.added_ok, vec!["b".to_string(), "c".to_string()]);
        assert!(!result.aborted);
        assert_eq!(
            catalog.mutations(),
            vec![
                Call::RemoveMember("c".into(), "a".into()),
                Call::AddMember("c".into(), "b".into()),
                Call::AddMember("c".into(), "c".into()),
            ]
        );
        assert_eq!(catalog.members("c"), ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn second_apply_makes_no_mutation_calls() {
        let catalog = catalog(&["a", "b", "c"], &["a"]);
        let plan = CollectionReconciler::plan(&ids(&["a"]), &ids(&["b", "c"]));
        let reconciler = reconciler(&catalog);

        reconciler.apply(&"c".to_string(), &plan).await;
        catalog.clear_calls();
        let second = reconciler.apply(&"c".to_string(), &plan).await;

        assert!(catalog.mutations().is_empty());
        assert_eq!(second.skipped, 3);
        assert_eq!(second.added() + second.removed(), 0);
    }

    #[tokio::test]
    async fn partially_applied_plan_only_retries_the_rest() {
        let catalog = catalog(&["a", "b", "c"], &["a"]);
        let plan = CollectionReconciler::plan(&ids(&["a"]), &ids(&["b", "c"]));
        catalog.fail_product(CatalogOp::AddMember, "c", CatalogError::transient("503"), None);

        let reconciler = reconciler(&catalog);
        let first = reconciler.apply(&"c".to_string(), &plan).await;
        assert_eq!(first.added_failed.len(), 1);

        catalog.clear_faults();
        catalog.clear_calls();
        let second = reconciler.apply(&"c".to_string(), &plan).await;

        assert_eq!(catalog.mutations(), vec![Call::AddMember("c".into(), "c".into())]);
        assert_eq!(second.skipped, 2);
        assert_eq!(catalog.members("c"), ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn exhausted_transient_is_recorded_and_apply_continues() {
        let catalog = catalog(&["a", "b", "c", "d"], &["a", "b"]);
        let plan = CollectionReconciler::plan(&ids(&["a", "b"]), &ids(&["c", "d"]));
        let timeout = CatalogError::transient("timeout");
        catalog.fail_product(CatalogOp::RemoveMember, "a", timeout, None);

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert_eq!(result.removed_failed.len(), 1);
        assert_eq!(result.removed_failed[0].product_id, "a");
        assert_eq!(result.removed_ok, vec!["b".to_string()]);
        assert_eq!(result.added(), 2);
        assert!(!result.aborted);

        // Three attempts for "a", one call for every other item.
        let remove_a = catalog
            .mutations()
            .into_iter()
            .filter(|c| *c == Call::RemoveMember("c".into(), "a".into()))
            .count();
        assert_eq!(remove_a, 3);
    }

    #[tokio::test]
    async fn transient_then_success_counts_as_ok() {
        let catalog = catalog(&["a", "b"], &[]);
        let plan = CollectionReconciler::plan(&ids(&[]), &ids(&["a", "b"]));
        catalog.fail_product(CatalogOp::AddMember, "a", CatalogError::transient("429"), Some(2));

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert_eq!(result.added(), 2);
        assert!(!result.has_failures());
    }

    #[tokio::test]
    async fn not_found_counts_as_success() {
        let catalog = catalog(&["a", "b"], &["a"]);
        let plan = CollectionReconciler::plan(&ids(&["a"]), &ids(&["b"]));
        // Listing still shows "a", but the delete finds it already gone.
        let gone = CatalogError::not_found("collect");
        catalog.fail_product(CatalogOp::RemoveMember, "a", gone, None);

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert_eq!(result.removed_ok, vec!["a".to_string()]);
        assert!(result.removed_failed.is_empty());
    }

    #[tokio::test]
    async fn adding_a_deleted_product_is_a_no_op() {
        // "ghost" is in the plan but no longer exists in the catalog.
        let catalog = catalog(&["a"], &[]);
        let plan = CollectionReconciler::plan(&ids(&[]), &ids(&["a", "ghost"]));

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert_eq!(result.added(), 2);
        assert!(!result.has_failures());
        assert_eq!(catalog.members("c"), ids(&["a"]));
    }

    #[tokio::test]
    async fn fatal_error_stops_remaining_items() {
        let catalog = catalog(&["a", "b", "c", "d", "e"], &["a", "b"]);
        let plan = CollectionReconciler::plan(&ids(&["a", "b"]), &ids(&["c", "d", "e"]));
        assert_eq!(plan.len(), 5);
        catalog.fail_product(CatalogOp::RemoveMember, "b", CatalogError::fatal("403"), None);

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert!(result.aborted);
        assert_eq!(
            result.abort_reason,
            Some(AbortReason::Fatal {
                message: "403".into()
            })
        );
        assert_eq!(catalog.mutations().len(), 2);
        assert_eq!(result.added(), 0);
    }

    #[tokio::test]
    async fn refresh_failure_aborts_before_mutating() {
        let catalog = catalog(&["a"], &[]);
        let plan = CollectionReconciler::plan(&ids(&[]), &ids(&["a"]));
        catalog.fail_always(CatalogOp::ListMembers, CatalogError::transient("down"));

        let result = reconciler(&catalog).apply(&"c".to_string(), &plan).await;

        assert!(result.aborted);
        assert!(matches!(result.abort_reason, Some(AbortReason::Refresh { .. })));
        assert!(catalog.mutations().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_item() {
        let catalog = catalog(&["a", "b"], &[]);
        let plan = CollectionReconciler::plan(&ids(&[]), &ids(&["a", "b"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler(&catalog)
            .apply_with_cancel(&"c".to_string(), &plan, &cancel)
            .await;

        assert!(result.aborted);
        assert_eq!(result.abort_reason, Some(AbortReason::Cancelled));
        assert!(catalog.mutations().is_empty());
    }

    #[test]
    fn apply_result_serialization_format() {
        let mut result = ApplyResult::default();
        result.abort(AbortReason::Cancelled);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"addedOk\":[]"));
        assert!(json.contains("\"abortReason\":{\"kind\":\"cancelled\"}"));
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_ids() -> impl Strategy<Value = BTreeSet<ProductId>> {
            prop::collection::btree_set("[a-h]", 0..8)
        }

        proptest! {
            #[test]
            fn prop_plan_is_disjoint(current in arb_ids(), target in arb_ids()) {
                let plan = ReconciliationPlan::compute(&current, &target);
                prop_assert!(plan.to_add.is_disjoint(&plan.to_remove));
            }

            #[test]
            fn prop_plan_reaches_target(current in arb_ids(), target in arb_ids()) {
                let plan = ReconciliationPlan::compute(&current, &target);
                let result: BTreeSet<ProductId> = current
                    .union(&plan.to_add)
                    .filter(|id| !plan.to_remove.contains(*id))
                    .cloned()
                    .collect();
                prop_assert_eq!(result, target);
            }

            #[test]
            fn prop_plan_against_target_is_empty(target in arb_ids()) {
                let plan = ReconciliationPlan::compute(&target, &target);
                prop_assert!(plan.is_empty());
            }

            #[test]
            fn prop_narrowing_after_full_apply_is_empty(current in arb_ids(), target in arb_ids()) {
                let plan = ReconciliationPlan::compute(&current, &target);
                prop_assert!(plan.narrow_to(&target).is_empty());
            }
        }
    }
}
