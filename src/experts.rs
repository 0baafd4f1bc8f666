//! Experts directory API client
//!
//! Offset-and-size pagination over the `organisational-units`, `persons`
//! and `research-outputs` endpoints.
//!
//! API Details:
//! - Unfiltered: `GET /{endpoint}?size=N&offset=M`
//! - Filtered by organisational unit: `POST /{endpoint}/search` with
//!   `{"size", "offset", "forOrganisationalUnits": {"uuids": [..]}}`
//! - Every page is `{"count": .., "items": [..]}`
//! - A page with fewer than `size` items is the last one
//! - Authentication via the `api-key` header

use crate::error::{ExpertsError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// A paginated source stream, fetched in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    OrganisationalUnits,
    Persons,
    ResearchOutputs,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [
        StreamKind::OrganisationalUnits,
        StreamKind::Persons,
        StreamKind::ResearchOutputs,
    ];

    /// Stable name used for ledger files and logs
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::OrganisationalUnits => "organisational_units",
            StreamKind::Persons => "persons",
            StreamKind::ResearchOutputs => "research_outputs",
        }
    }

    /// API path segment
    pub fn endpoint(&self) -> &'static str {
        match self {
            StreamKind::OrganisationalUnits => "organisational-units",
            StreamKind::Persons => "persons",
            StreamKind::ResearchOutputs => "research-outputs",
        }
    }
}

/// What one fetch cycle of a stream produced
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Pagination reached a terminal page; `next_offset` may be persisted.
    HasNewData {
        items: Vec<serde_json::Value>,
        next_offset: u64,
    },
    /// The first page was empty.
    NoNewData,
    /// A request failed. `items` holds what earlier pages returned; the
    /// offset must not be advanced.
    FetchFailed {
        items: Vec<serde_json::Value>,
        reason: String,
    },
}

impl FetchOutcome {
    /// Items to hand to the normalizer, whatever the outcome.
    pub fn items(&self) -> &[serde_json::Value] {
        match self {
            FetchOutcome::HasNewData { items, .. } | FetchOutcome::FetchFailed { items, .. } => {
                items
            }
            FetchOutcome::NoNewData => &[],
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Experts API client
pub struct ExpertsClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl ExpertsClient {
    /// Create a client for an API root such as `https://experts.example.edu/ws/api/`
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let mut root = base_url.trim().to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let base_url = Url::parse(&root)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("rustexperts/0.1")
            .build()
            .map_err(|e| ExpertsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Fetch one page. A non-success status is an [`ExpertsError::Api`]
    /// carrying the response body.
    pub async fn fetch_page(
        &self,
        stream: StreamKind,
        offset: u64,
        size: u64,
        org_units: &[String],
    ) -> Result<Vec<serde_json::Value>> {
        let request = if org_units.is_empty() {
            let url = self.base_url.join(stream.endpoint())?;
            self.client
                .get(url)
                .query(&[("size", size), ("offset", offset)])
        } else {
            let url = self.base_url.join(&format!("{}/search", stream.endpoint()))?;
            let body = serde_json::json!({
                "size": size,
                "offset": offset,
                "forOrganisationalUnits": { "uuids": org_units },
            });
            self.client.post(url).json(&body)
        };

        debug!(stream = stream.name(), offset = offset, size = size, "Fetching page");

        let response = request
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExpertsError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        let page: PageResponse = response.json().await.map_err(|e| {
            ExpertsError::Parse(format!("Failed to parse {} page: {}", stream.endpoint(), e))
        })?;
        Ok(page.items)
    }

    /// Page through a stream starting at `start_offset` until a short page.
    ///
    /// Requests are issued one at a time. Any failure stops pagination for
    /// this stream only.
    pub async fn fetch_stream(
        &self,
        stream: StreamKind,
        start_offset: u64,
        size: u64,
        org_units: &[String],
    ) -> FetchOutcome {
        let size = size.max(1);
        let mut offset = start_offset;
        let mut items: Vec<serde_json::Value> = Vec::new();

        info!(
            stream = stream.name(),
            start_offset = start_offset,
            size = size,
            filtered_units = org_units.len(),
            "Starting stream fetch"
        );

        loop {
            match self.fetch_page(stream, offset, size, org_units).await {
                Ok(page) => {
                    let count = page.len() as u64;
                    items.extend(page);
                    offset += count;
                    debug!(stream = stream.name(), count = count, offset = offset, "Page fetched");
                    if count < size {
                        break;
                    }
                }
                Err(ExpertsError::Api { code, message }) => {
                    error!(
                        stream = stream.name(),
                        offset = offset,
                        status = code,
                        body = %message,
                        "Experts API returned an error, stopping pagination"
                    );
                    return FetchOutcome::FetchFailed {
                        items,
                        reason: format!("HTTP {}: {}", code, message),
                    };
                }
                Err(e) => {
                    error!(
                        stream = stream.name(),
                        offset = offset,
                        error = %e,
                        "Page request failed, stopping pagination"
                    );
                    return FetchOutcome::FetchFailed {
                        items,
                        reason: e.to_string(),
                    };
                }
            }
        }

        if items.is_empty() {
            info!(stream = stream.name(), offset = start_offset, "No new items");
            return FetchOutcome::NoNewData;
        }

        info!(stream = stream.name(), fetched = items.len(), next_offset = offset, "Stream fetch complete");
        FetchOutcome::HasNewData {
            items,
            next_offset: offset,
        }
    }
}
