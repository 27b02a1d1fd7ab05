//! Catalog entities as seen by the engine.
//!
//! Products and collections are owned by the remote catalog. The engine
//! never creates or edits them, it only reads products and changes which
//! products a collection holds.

use crate::{CatalogError, CollectionId, ProductId, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A product reference with its creation instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }
}

/// How a collection's membership is decided on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Members are added and removed explicitly.
    Manual,
    /// Members are computed by remote rules and cannot be edited.
    Smart,
}

/// Descriptive data about the target collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub id: CollectionId,
    pub title: String,
    pub kind: CollectionKind,
}

impl CollectionInfo {
    pub fn manual(id: impl Into<CollectionId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: CollectionKind::Manual,
        }
    }
}

/// The trailing time window `[since, until)` used for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SyncWindow {
    /// The window of length `duration` ending (exclusively) at `now`.
    ///
    /// Fails when the start would fall outside the representable range.
    pub fn trailing(now: DateTime<Utc>, duration: TimeDelta) -> Result<Self> {
        let since = now.checked_sub_signed(duration).ok_or_else(|| {
            CatalogError::fatal(format!("window of {duration} before {now} is out of range"))
        })?;
        Ok(Self { since, until: now })
    }

    /// Whether `instant` falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.since <= instant && instant < self.until
    }
}
