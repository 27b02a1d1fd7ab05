//! `CatalogClient` backed by the Shopify Admin REST API.

use super::pagination::next_page_url;
use super::wire::{
    numeric_id, CollectionEnvelope, CollectsPage, NewCollect, NewCollectBody, ProductsPage,
};
use crate::config::{Credentials, ShopConfig};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use newshelf_engine::{
    CatalogClient, CatalogError, CollectionId, CollectionInfo, Product, ProductId, ProductStream,
    Result,
};
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::time::Duration;

/// Largest page Shopify serves.
const PAGE_LIMIT: &str = "250";

/// Delay assumed when a 429 carries no `Retry-After`.
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(2);

/// Shopify REST client for one store.
#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl ShopifyClient {
    /// Build a client for the configured store.
    pub fn new(config: &ShopConfig) -> std::result::Result<Self, reqwest::Error> {
        Self::with_base_url(config, config.base_url())
    }

    /// Build a client against an explicit API root.
    pub fn with_base_url(
        config: &ShopConfig,
        base_url: impl Into<String>,
    ) -> std::result::Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("newshelf/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: config.credentials.clone(),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), params)
            .map(String::from)
            .map_err(|e| CatalogError::fatal(format!("invalid request URL: {e}")))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Credentials::AccessToken(token) => builder.header("X-Shopify-Access-Token", token),
            Credentials::Basic { api_key, password } => builder.basic_auth(api_key, Some(password)),
        }
    }

    /// Send a request and turn every non-success status into a `CatalogError`.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, retry_after, &body))
    }

    /// Fetch one page and the URL of the next one.
    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<(T, Option<String>)> {
        let response = self.send(self.request(Method::GET, url)).await?;
        let link = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let next = next_page_url(link.as_deref())?;
        let page = response.json::<T>().await.map_err(transport_error)?;
        Ok((page, next))
    }

    /// Follow `Link` pagination from `first_url`, one page per stream item.
    fn pages<T>(&self, first_url: Result<String>) -> stream::BoxStream<'_, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        stream::try_unfold(Some(first_url), move |next| self.next_page::<T>(next)).boxed()
    }

    async fn next_page<T: DeserializeOwned>(
        &self,
        next: Option<Result<String>>,
    ) -> Result<Option<(T, Option<Result<String>>)>> {
        let url = match next {
            None => return Ok(None),
            Some(url) => url?,
        };
        let (page, next) = self.get_page::<T>(&url).await?;
        Ok(Some((page, next.map(Ok))))
    }

    async fn find_collects(&self, collection_id: u64, product_id: u64) -> Result<Vec<u64>> {
        let collection_id = collection_id.to_string();
        let product_id = product_id.to_string();
        let url = self.endpoint(
            "collects.json",
            &[
                ("collection_id", collection_id.as_str()),
                ("product_id", product_id.as_str()),
                ("fields", "id"),
            ],
        )?;
        let (page, _) = self.get_page::<CollectsPage>(&url).await?;
        Ok(page.collects.into_iter().map(|c| c.id).collect())
    }
}

#[async_trait]
impl CatalogClient for ShopifyClient {
    async fn collection_info(&self, collection_id: &CollectionId) -> Result<CollectionInfo> {
        let id = numeric_id("collection", collection_id)?;
        let url = self.endpoint(&format!("collections/{id}.json"), &[])?;
        let (envelope, _) = self.get_page::<CollectionEnvelope>(&url).await?;
        Ok(envelope.collection.into())
    }

    fn list_recent_products(&self, since: DateTime<Utc>) -> ProductStream<'_> {
        let created_at_min = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let first = self.endpoint(
            "products.json",
            &[
                ("created_at_min", created_at_min.as_str()),
                ("status", "active"),
                ("limit", PAGE_LIMIT),
                ("fields", "id,created_at"),
            ],
        );

        self.pages::<ProductsPage>(first)
            .map_ok(|page| stream::iter(page.products.into_iter().map(|p| Ok(Product::from(p)))))
            .try_flatten()
            .boxed()
    }

    async fn list_members(&self, collection_id: &CollectionId) -> Result<BTreeSet<ProductId>> {
        let id = numeric_id("collection", collection_id)?;
        let first = self.endpoint(
            "collects.json",
            &[
                ("collection_id", id.to_string().as_str()),
                ("limit", PAGE_LIMIT),
                ("fields", "id,product_id"),
            ],
        );

        let mut members = BTreeSet::new();
        let mut pages = self.pages::<CollectsPage>(first);
        while let Some(page) = pages.try_next().await? {
            for collect in page.collects {
                let product_id = collect.product_id.ok_or_else(|| {
                    CatalogError::transient(format!("collect {} without product_id", collect.id))
                })?;
                members.insert(product_id.to_string());
            }
        }
        Ok(members)
    }

    async fn add_member(&self, collection_id: &CollectionId, product_id: &ProductId) -> Result<()> {
        let body = NewCollect {
            collect: NewCollectBody {
                product_id: numeric_id("product", product_id)?,
                collection_id: numeric_id("collection", collection_id)?,
            },
        };
        let url = self.endpoint("collects.json", &[])?;
        let builder = self.request(Method::POST, &url).json(&body);

        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(CatalogError::Fatal(message)) if is_already_member(&message) => {
                tracing::debug!(product = %product_id, "Product already in collection");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn remove_member(
        &self,
        collection_id: &CollectionId,
        product_id: &ProductId,
    ) -> Result<()> {
        let collection = numeric_id("collection", collection_id)?;
        let product = numeric_id("product", product_id)?;

        let collects = self.find_collects(collection, product).await?;
        if collects.is_empty() {
            return Err(CatalogError::not_found(format!(
                "product {product} in collection {collection}"
            )));
        }

        for collect_id in collects {
            let url = self.endpoint(&format!("collects/{collect_id}.json"), &[])?;
            self.send(self.request(Method::DELETE, &url)).await?;
        }
        Ok(())
    }
}

/// Map a transport-level failure. Only request construction problems are
/// fatal; everything on the wire is worth another attempt.
fn transport_error(err: reqwest::Error) -> CatalogError {
    if err.is_builder() {
        CatalogError::fatal(format!("cannot build request: {err}"))
    } else {
        CatalogError::transient(err.to_string())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Map an HTTP status onto the catalog error taxonomy.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> CatalogError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CatalogError::fatal(message),
        StatusCode::NOT_FOUND => CatalogError::not_found(message),
        StatusCode::TOO_MANY_REQUESTS => CatalogError::rate_limited(
            message,
            retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DELAY),
        ),
        StatusCode::REQUEST_TIMEOUT => CatalogError::transient(message),
        s if s.is_server_error() => CatalogError::Transient {
            message,
            retry_after,
        },
        _ => CatalogError::fatal(message),
    }
}

fn is_already_member(message: &str) -> bool {
    message.starts_with("422") && message.contains("already")
}
