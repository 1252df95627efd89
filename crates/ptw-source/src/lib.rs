//! Remote procurement source client + paginated fetcher for PTW.
//!
//! The client knows how to fetch one page of tender results for a query;
//! the fetcher drives it across all pages with inter-request pacing and
//! salvages partial results when a later page fails.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ptw_core::{DateRange, DateRangeError, QueryConfig, TenderRecord};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "ptw-source";

pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    InvalidRange(#[from] DateRangeError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("source rejected query: {message}")]
    Api { message: String },
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Query parameters for a single page request, as the remote expects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub date_from: String,
    pub date_to: String,
    pub order_by: String,
    pub page_number: u32,
    pub status: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub keywords: Option<String>,
}

impl PageQuery {
    pub fn from_config(config: &QueryConfig, range: &DateRange, page_number: u32) -> Self {
        Self {
            date_from: range.from.format("%Y-%m-%d").to_string(),
            date_to: range.to.format("%Y-%m-%d").to_string(),
            order_by: "publication".to_string(),
            page_number,
            status: config.status.clone(),
            category: config.category.clone(),
            region: config.region.clone(),
            keywords: config.keywords.clone(),
        }
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("date_from", self.date_from.clone()),
            ("date_to", self.date_to.clone()),
            ("order_by", self.order_by.clone()),
            ("page_number", self.page_number.to_string()),
        ];
        if let Some(status) = &self.status {
            pairs.push(("status", status.clone()));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(region) = &self.region {
            pairs.push(("region", region.clone()));
        }
        if let Some(keywords) = &self.keywords {
            pairs.push(("keywords", keywords.clone()));
        }
        pairs
    }
}

/// One decoded page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct TenderPage {
    pub result_count: u32,
    pub page_count: u32,
    pub page: u32,
    pub page_size: u32,
    pub records: Vec<TenderRecord>,
}

/// Source seam: one page in, one page out. Knows nothing about business
/// lines or pagination policy.
#[async_trait]
pub trait TenderSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<TenderPage, SourceError>;
}

#[derive(Debug, Clone, Deserialize)]
struct PageEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Option<PagePayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct PagePayload {
    #[serde(rename = "resultCount")]
    result_count: u32,
    #[serde(rename = "pageCount")]
    page_count: u32,
    page: u32,
    #[serde(rename = "pageSize")]
    page_size: u32,
    records: Vec<WireTender>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireTender {
    id: i64,
    code: String,
    title: String,
    #[serde(default, rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "closesAt")]
    closes_at: Option<DateTime<Utc>>,
    organization: String,
    #[serde(default, rename = "organizationUnit")]
    organization_unit: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: i32,
    #[serde(rename = "statusLabel")]
    status_label: String,
    #[serde(default, rename = "availableAmount")]
    available_amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, rename = "supplierCount")]
    supplier_count: Option<u32>,
}

impl From<WireTender> for TenderRecord {
    fn from(wire: WireTender) -> Self {
        Self {
            tender_id: wire.id,
            code: wire.code,
            title: wire.title,
            published_at: wire.published_at,
            closes_at: wire.closes_at,
            organization: wire.organization,
            organization_unit: wire.organization_unit,
            status_code: wire.status_code,
            status_label: wire.status_label,
            available_amount: wire.available_amount,
            currency: wire.currency,
            supplier_count: wire.supplier_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tenders.example.gov/v1/tenders".to_string(),
            api_key: String::new(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }
}

/// Reqwest-backed source client. The per-page timeout lives on the client;
/// a timeout surfaces as `SourceError::Request` like any other failure.
#[derive(Debug)]
pub struct HttpTenderSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTenderSource {
    pub fn new(config: HttpSourceConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl TenderSource for HttpTenderSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<TenderPage, SourceError> {
        let response = self
            .client
            .get(&self.base_url)
            .header("X-Api-Key", &self.api_key)
            .query(&query.query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let envelope: PageEnvelope = response.json().await?;
        if !envelope.success {
            return Err(SourceError::Api {
                message: envelope
                    .message
                    .unwrap_or_else(|| "unspecified source error".to_string()),
            });
        }
        let payload = envelope
            .payload
            .ok_or_else(|| SourceError::Payload("missing payload in envelope".to_string()))?;

        Ok(TenderPage {
            result_count: payload.result_count,
            page_count: payload.page_count,
            page: payload.page,
            page_size: payload.page_size,
            records: payload.records.into_iter().map(Into::into).collect(),
        })
    }
}

/// Drives a `TenderSource` across all pages of a query, strictly
/// sequentially, pausing `page_delay` before each page after the first.
#[derive(Clone)]
pub struct PagedFetcher {
    source: Arc<dyn TenderSource>,
    page_delay: Duration,
}

impl PagedFetcher {
    pub fn new(source: Arc<dyn TenderSource>) -> Self {
        Self {
            source,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Fetch every page for the query. A failure at any page stops further
    /// pagination; records accumulated so far are returned instead of the
    /// error, unless nothing was accumulated yet.
    pub async fn fetch_all(
        &self,
        config: &QueryConfig,
        range: &DateRange,
    ) -> Result<Vec<TenderRecord>, SourceError> {
        range.validate()?;

        let first = self
            .source
            .fetch_page(&PageQuery::from_config(config, range, 1))
            .await?;
        let page_count = first.page_count;
        let mut records = first.records;

        for page_number in 2..=page_count {
            tokio::time::sleep(self.page_delay).await;
            match self
                .source
                .fetch_page(&PageQuery::from_config(config, range, page_number))
                .await
            {
                Ok(page) => records.extend(page.records),
                Err(err) => {
                    warn!(
                        query = %config.name,
                        page_number,
                        page_count,
                        salvaged = records.len(),
                        error = %err,
                        "page fetch failed, returning salvaged records"
                    );
                    break;
                }
            }
        }

        Ok(records)
    }
}
