//! Dashboard HTTP client for the paginated read API
//!
//! Only the list endpoints the live feed needs to rebuild its state are
//! covered here; authentication is handled upstream (reverse proxy / session
//! handshake), so requests carry no credentials of their own.

use livefeed_core::{Error, Page, QueueItem, Result, Transaction, TransactionKind};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, Response,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument};

const USER_AGENT_VALUE: &str = concat!("livefeed/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout; a poll cycle must not hang on one slow endpoint
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the dashboard's list endpoints
#[derive(Clone)]
pub struct DashboardClient {
    http: Client,
    api_base: String,
}

impl DashboardClient {
    /// Create a client rooted at `api_base` (e.g. `https://ops.example.com/api`)
    pub fn new(api_base: &str) -> Result<Self> {
        let parsed = url::Url::parse(api_base)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "API base must be http(s), got {}",
                api_base
            )));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Check if response indicates an authentication failure
    fn check_auth_error(response: &Response) -> Option<Error> {
        match response.status().as_u16() {
            401 => Some(Error::ApiError("Session rejected (401)".to_string())),
            403 => Some(Error::ApiError("Access forbidden (403)".to_string())),
            _ => None,
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>> {
        let url = format!("{}{}", self.api_base, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .headers(Self::default_headers())
            .query(query)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let response = response.error_for_status().map_err(|e| {
            error!("List request to {} failed: {}", path, e);
            Error::ApiError(e.to_string())
        })?;

        let body_text = response.text().await.map_err(|e| {
            error!("Failed to read {} response body: {}", path, e);
            Error::InvalidData(e.to_string())
        })?;

        serde_json::from_str::<Page<T>>(&body_text).map_err(|e| {
            error!(
                "Failed to parse {} page: {}. Body preview: {}",
                path,
                e,
                preview(&body_text)
            );
            Error::InvalidData(e.to_string())
        })
    }

    /// List transactions of one kind in the given status
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        kind: TransactionKind,
        status: &str,
        page_size: u32,
    ) -> Result<Page<Transaction>> {
        let page: Page<Transaction> = self
            .get_page(
                "/transactions/",
                &[
                    ("type", kind.as_query().to_string()),
                    ("status", status.to_string()),
                    ("page_size", page_size.to_string()),
                ],
            )
            .await?;

        debug!(
            "Fetched {} {} transactions (total: {})",
            page.len(),
            kind.as_query(),
            page.count
        );
        Ok(page)
    }

    /// List game-activity queue entries in the given status
    #[instrument(skip(self))]
    pub async fn list_game_activities(
        &self,
        status: &str,
        page_size: u32,
    ) -> Result<Page<QueueItem>> {
        let page: Page<QueueItem> = self
            .get_page(
                "/game-activities/",
                &[
                    ("status", status.to_string()),
                    ("page_size", page_size.to_string()),
                ],
            )
            .await?;

        debug!("Fetched {} queue items (total: {})", page.len(), page.count);
        Ok(page)
    }
}

/// First 500 bytes of a body, cut on a char boundary
fn preview(body: &str) -> &str {
    let mut end = body.len().min(500);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
