use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, info, instrument, warn};

use super::{Inventory, InventoryAccumulator, InventorySource, ListingDetailSource};
use crate::config::SearchConfig;
use crate::errors::UpstreamError;
use crate::http;
use crate::models::{Listing, SearchPage};
use crate::retry::{retry, RetryPolicy};

/// HTTP client for the upstream search and detail endpoints.
#[derive(Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    filters: Vec<(String, String)>,
    page_size: u32,
    item_cap: Option<usize>,
    retry: RetryPolicy,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let filters = config
            .customer_number
            .iter()
            .map(|n| ("customerNumber".to_string(), n.clone()))
            .collect();

        Ok(Self {
            client: http::build_client(http::REQUEST_TIMEOUT)?,
            base_url: http::parse_base_url(&config.base_url)?,
            username: config.username.clone(),
            password: config.password.clone(),
            filters,
            page_size: config.page_size.max(1),
            item_cap: config.item_cap,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_item_cap(mut self, item_cap: Option<usize>) -> Self {
        self.item_cap = item_cap;
        self
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    /// One attempt at one search page.
    pub async fn fetch_page(&self, page: u32) -> Result<SearchPage, UpstreamError> {
        let resp = self
            .get(http::join(&self.base_url, &["search"]))
            .query(&[
                ("page.number", page.to_string()),
                ("page.size", self.page_size.to_string()),
            ])
            .query(&self.filters)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: http::error_body(resp).await,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn fetch_detail_once(&self, listing_id: &str) -> Result<Option<Listing>, UpstreamError> {
        let resp = self
            .get(http::join(&self.base_url, &["ads", listing_id]))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: http::error_body(resp).await,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InventorySource for SearchClient {
    #[instrument(skip(self))]
    async fn fetch_all(&self, max_pages: u32) -> Inventory {
        let mut acc = InventoryAccumulator::new(self.item_cap);

        for page in 1..=max_pages {
            let result = retry(&self.retry, "search_page", UpstreamError::is_retryable, |attempt| {
                debug!(page, attempt, "fetching search page");
                self.fetch_page(page)
            })
            .await;

            match result {
                Ok(p) => {
                    let count = p.ads.len();
                    if !acc.push_page(page, p) {
                        debug!(page, count, "pagination finished");
                        break;
                    }
                }
                Err(e) => {
                    warn!(page, error = %e, "skipping search page");
                    acc.skip_page(page);
                }
            }
        }

        let inventory = acc.finish();
        info!(
            listings = inventory.listings.len(),
            total = inventory.total_count,
            failed_pages = inventory.failed_pages.len(),
            "inventory fetched"
        );
        inventory
    }
}

#[async_trait]
impl ListingDetailSource for SearchClient {
    #[instrument(skip(self), level = "debug")]
    async fn fetch_detail(&self, listing_id: &str) -> Result<Option<Listing>, UpstreamError> {
        retry(&self.retry, "listing_detail", UpstreamError::is_retryable, |attempt| {
            debug!(listing_id, attempt, "fetching listing detail");
            self.fetch_detail_once(listing_id)
        })
        .await
    }
}
