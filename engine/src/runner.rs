//! One complete synchronization cycle.
//!
//! [`SyncRunner::run_cycle`] selects the products in the window, reads the
//! collection, plans and applies the diff, and reports a [`CycleOutcome`].
//! Retries happen per call inside the cycle; a failed cycle is never
//! retried here, that is left to whoever schedules cycles.

use crate::reconcile::{ApplyResult, CollectionReconciler};
use crate::retry::{retry, RetryPolicy};
use crate::{CatalogClient, CollectionId, CollectionKind, ProductWindowSelector};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Overall result of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Every planned change is reflected remotely (possibly none were needed).
    Success,
    /// Some items failed permanently; everything else was applied.
    Partial,
    /// The cycle was aborted or could not read the catalog.
    Failed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleStatus::Success => "success",
            CycleStatus::Partial => "partial",
            CycleStatus::Failed => "failed",
        })
    }
}

/// Structured summary of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub collection_id: CollectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_title: Option<String>,
    pub status: CycleStatus,
    /// Size of the target set.
    pub products_in_window: usize,
    pub planned_additions: usize,
    pub planned_removals: usize,
    /// Present once the cycle reached the apply step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleOutcome {
    fn begin(collection_id: CollectionId, started_at: DateTime<Utc>) -> Self {
        Self {
            collection_id,
            collection_title: None,
            status: CycleStatus::Failed,
            products_in_window: 0,
            planned_additions: 0,
            planned_removals: 0,
            apply: None,
            error: None,
            started_at,
            finished_at: started_at,
        }
    }

    fn fail(mut self, error: impl Into<String>, finished_at: DateTime<Utc>) -> Self {
        self.status = CycleStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = finished_at;
        self
    }

    fn complete(mut self, applied: ApplyResult, finished_at: DateTime<Utc>) -> Self {
        self.status = if applied.aborted {
            CycleStatus::Failed
        } else if applied.has_failures() {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        };
        self.error = applied.abort_reason.as_ref().map(ToString::to_string);
        self.apply = Some(applied);
        self.finished_at = finished_at;
        self
    }

    pub fn added(&self) -> usize {
        self.apply.as_ref().map_or(0, ApplyResult::added)
    }

    pub fn removed(&self) -> usize {
        self.apply.as_ref().map_or(0, ApplyResult::removed)
    }

    pub fn failed(&self) -> usize {
        self.apply.as_ref().map_or(0, ApplyResult::failed)
    }

    pub fn aborted(&self) -> bool {
        self.status == CycleStatus::Failed
    }

    /// Successful cycle in which no membership change was made.
    pub fn is_noop(&self) -> bool {
        self.status == CycleStatus::Success && self.added() == 0 && self.removed() == 0
    }
}

/// Runs sync cycles for one collection.
pub struct SyncRunner {
    client: Arc<dyn CatalogClient>,
    collection_id: CollectionId,
    selector: ProductWindowSelector,
    reconciler: CollectionReconciler,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncRunner {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        collection_id: impl Into<CollectionId>,
        window: TimeDelta,
    ) -> Self {
        let retry = RetryPolicy::default();
        Self {
            reconciler: CollectionReconciler::new(client.clone(), retry.clone()),
            client,
            collection_id: collection_id.into(),
            selector: ProductWindowSelector::new(window),
            retry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `policy` for every remote call of the cycle.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.reconciler = CollectionReconciler::new(self.client.clone(), policy.clone());
        self.retry = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    pub fn window(&self) -> TimeDelta {
        self.selector.duration()
    }

    /// Run one cycle to completion.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_with_cancel(&CancellationToken::new()).await
    }

    /// Run one cycle, stopping between items once `cancel` fires.
    pub async fn run_cycle_with_cancel(&self, cancel: &CancellationToken) -> CycleOutcome {
        let started_at = self.clock.now();
        let outcome = CycleOutcome::begin(self.collection_id.clone(), started_at);
        self.drive(outcome, cancel).await
    }

    async fn drive(&self, mut outcome: CycleOutcome, cancel: &CancellationToken) -> CycleOutcome {
        let collection_id = &self.collection_id;

        if cancel.is_cancelled() {
            return outcome.fail("cancelled before start", self.clock.now());
        }

        let info = match retry(&self.retry, "collection_info", || {
            self.client.collection_info(collection_id)
        })
        .await
        {
            Ok(info) => info,
            Err(err) => {
                return outcome.fail(format!("collection lookup failed: {err}"), self.clock.now())
            }
        };
        outcome.collection_title = Some(info.title);
        if info.kind == CollectionKind::Smart {
            return outcome.fail(
                format!(
                    "collection {collection_id} is a smart collection; membership cannot be edited"
                ),
                self.clock.now(),
            );
        }

        let target = match self
            .selector
            .select_new(self.client.as_ref(), outcome.started_at, &self.retry)
            .await
        {
            Ok(target) => target,
            Err(err) => {
                return outcome.fail(format!("product selection failed: {err}"), self.clock.now())
            }
        };
        outcome.products_in_window = target.len();

        let current = match retry(&self.retry, "list_members", || {
            self.client.list_members(collection_id)
        })
        .await
        {
            Ok(current) => current,
            Err(err) => {
                return outcome.fail(format!("membership listing failed: {err}"), self.clock.now())
            }
        };

        let plan = CollectionReconciler::plan(&current, &target);
        outcome.planned_additions = plan.to_add.len();
        outcome.planned_removals = plan.to_remove.len();
        tracing::debug!(
            collection = %collection_id,
            window = target.len(),
            members = current.len(),
            to_add = plan.to_add.len(),
            to_remove = plan.to_remove.len(),
            "Planned membership changes"
        );

        let applied = self
            .reconciler
            .apply_against(collection_id, &plan, &current, cancel)
            .await;
        outcome.complete(applied, self.clock.now())
    }
}
