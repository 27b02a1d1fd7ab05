//! Shopify Admin REST implementation of the catalog port.

mod client;
mod pagination;
mod wire;

pub use client::ShopifyClient;
