//! Selection of recently created products.

use crate::retry::{retry, RetryPolicy};
use crate::{CatalogClient, ProductId, Result, SyncWindow};
use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use std::collections::BTreeSet;

/// Window length used when none is configured.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Picks the products created within a trailing time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductWindowSelector {
    duration: TimeDelta,
}

impl Default for ProductWindowSelector {
    fn default() -> Self {
        Self::new(TimeDelta::days(DEFAULT_WINDOW_DAYS))
    }
}

impl ProductWindowSelector {
    pub fn new(duration: TimeDelta) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// The window ending at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Result<SyncWindow> {
        SyncWindow::trailing(now, self.duration)
    }

    /// Ids of the products created in the window ending at `now`.
    ///
    /// A failure anywhere in the listing restarts it from the beginning
    /// under `policy`; a partial enumeration is never returned.
    pub async fn select_new(
        &self,
        client: &dyn CatalogClient,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<BTreeSet<ProductId>> {
        let window = self.window(now)?;
        retry(policy, "list_recent_products", || collect_window(client, window)).await
    }
}

async fn collect_window(
    client: &dyn CatalogClient,
    window: SyncWindow,
) -> Result<BTreeSet<ProductId>> {
    let mut products = client.list_recent_products(window.since);
    let mut ids = BTreeSet::new();
    let mut outside = 0usize;

    while let Some(product) = products.try_next().await? {
        if window.contains(product.created_at) {
            ids.insert(product.id);
        } else {
            outside += 1;
        }
    }

    if outside > 0 {
        tracing::debug!(outside, "Dropped listed products outside the window");
    }
    Ok(ids)
}
