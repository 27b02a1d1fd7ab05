//! Shopify Admin REST payloads.

use chrono::{DateTime, FixedOffset, Utc};
use newshelf_engine::{CatalogError, CollectionInfo, CollectionKind, Product};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ProductsPage {
    pub products: Vec<ProductRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ProductRecord {
    pub id: u64,
    pub created_at: DateTime<FixedOffset>,
}

impl From<ProductRecord> for Product {
    fn from(record: ProductRecord) -> Self {
        Product::new(record.id.to_string(), record.created_at.with_timezone(&Utc))
    }
}

#[derive(Debug, Deserialize)]
pub struct CollectsPage {
    pub collects: Vec<CollectRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CollectRecord {
    pub id: u64,
    #[serde(default)]
    pub product_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionEnvelope {
    pub collection: CollectionRecord,
}

#[derive(Debug, Deserialize)]
pub struct CollectionRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub collection_type: Option<String>,
}

impl From<CollectionRecord> for CollectionInfo {
    fn from(record: CollectionRecord) -> Self {
        let kind = match record.collection_type.as_deref() {
            Some("smart") => CollectionKind::Smart,
            _ => CollectionKind::Manual,
        };
        CollectionInfo {
            id: record.id.to_string(),
            title: record.title,
            kind,
        }
    }
}

/// Body of `POST /collects.json`.
#[derive(Debug, Serialize)]
pub struct NewCollect {
    pub collect: NewCollectBody,
}

#[derive(Debug, Serialize)]
pub struct NewCollectBody {
    pub product_id: u64,
    pub collection_id: u64,
}

/// Shopify ids are numeric; anything else is a malformed request.
pub fn numeric_id(kind: &str, id: &str) -> Result<u64, CatalogError> {
    id.trim()
        .parse()
        .map_err(|_| CatalogError::fatal(format!("{kind} id {id:?} is not numeric")))
}
