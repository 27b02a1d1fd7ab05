//! # Newshelf Engine
//!
//! Keeps one storefront collection in step with the products a merchant
//! created recently.
//!
//! Each cycle re-derives everything from the remote catalog: which products
//! fall in the trailing window, what the collection currently holds, and
//! the smallest set of additions and removals that closes the gap. No local
//! state survives a cycle, so a crashed or partial cycle heals on the next
//! run.
//!
//! ## Design Principles
//!
//! - **No transport**: the catalog is reached through the [`CatalogClient`]
//!   trait; HTTP, credentials and pagination live outside this crate
//! - **Idempotent**: applying the same plan twice makes no second round of
//!   mutations
//! - **Explicit outcomes**: a cycle always reports [`CycleStatus`], so "nothing
//!   to do" is never confused with "something failed"
//! - **No sinks**: the engine emits `tracing` events but installs no
//!   subscriber and writes nothing itself
//!
//! ## Core Concepts
//!
//! ### Window
//!
//! [`ProductWindowSelector`] lists products created in `[now − window, now)`.
//! The catalog may return more; the selector filters.
//!
//! ### Reconciliation
//!
//! [`CollectionReconciler`] diffs the collection against the target set into
//! a [`ReconciliationPlan`] and applies it, removals first. Per item:
//! - [`CatalogError::Transient`] - retried with backoff, recorded if exhausted
//! - [`CatalogError::NotFound`] - already consistent, counted as done
//! - [`CatalogError::Fatal`] - stops the apply immediately
//!
//! ### Cycle
//!
//! [`SyncRunner`] strings the pieces together and returns a [`CycleOutcome`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{TimeDelta, Utc};
//! use newshelf_engine::{
//!     CollectionInfo, CycleStatus, MemoryCatalog, Product, RetryPolicy, SyncRunner,
//! };
//!
//! # block_on(async {
//! let now = Utc::now();
//! let catalog = Arc::new(
//!     MemoryCatalog::new()
//!         .with_product(Product::new("old", now - TimeDelta::days(30)))
//!         .with_product(Product::new("new", now - TimeDelta::days(1)))
//!         .with_collection(CollectionInfo::manual("weekly", "New this week"), ["old"]),
//! );
//!
//! let runner = SyncRunner::new(catalog.clone(), "weekly", TimeDelta::days(7))
//!     .with_retry(RetryPolicy::immediate(3));
//! let outcome = runner.run_cycle().await;
//!
//! assert_eq!(outcome.status, CycleStatus::Success);
//! assert_eq!(outcome.added(), 1);
//! assert_eq!(outcome.removed(), 1);
//! # });
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

pub mod catalog;
pub mod error;
pub mod memory;
pub mod product;
pub mod reconcile;
pub mod retry;
pub mod runner;
pub mod window;

// Re-export main types at crate root
pub use catalog::{CatalogClient, ProductStream};
pub use error::{CatalogError, Result};
pub use memory::{Call, CatalogOp, MemoryCatalog};
pub use product::{CollectionInfo, CollectionKind, Product, SyncWindow};
pub use reconcile::{
    AbortReason, ApplyResult, CollectionReconciler, FailedItem, Mutation, ReconciliationPlan,
};
pub use retry::{retry, retry_if, RetryPolicy};
pub use runner::{Clock, CycleOutcome, CycleStatus, FixedClock, SyncRunner, SystemClock};
pub use window::{ProductWindowSelector, DEFAULT_WINDOW_DAYS};

/// Type aliases for clarity
pub type ProductId = String;
pub type CollectionId = String;
