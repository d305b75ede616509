use std::fmt;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};

use hubsync_common::error::{HubsyncError, HubsyncResult};
use hubsync_db::contacts::models::parse_numeric_id;

use super::models::{ContactsPage, RawContact};
use super::normalize::CONTACT_PROPERTIES;

pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
const CONTACTS_PATH: &str = "/crm/v3/objects/contacts";
const MAX_PAGE_SIZE: u32 = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Clone)]
pub struct HubspotClientConfig {
    api_key: String,
    pub base_url: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub backoff_base: Duration,
}

impl fmt::Debug for HubspotClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubspotClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HubspotClientConfig {
    /// Build a config with defaults. An empty or blank key is rejected here,
    /// before any client exists to make a request with it.
    pub fn new(api_key: impl Into<String>) -> HubsyncResult<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(HubsyncError::Config("HUBSPOT_API_KEY is empty".to_string()));
        }

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
            max_retries: 3,
            timeout_secs: 30,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Load HubSpot config from environment. `HUBSPOT_API_KEY` is mandatory.
    pub fn from_env() -> HubsyncResult<Self> {
        let api_key = std::env::var("HUBSPOT_API_KEY").map_err(|_| {
            HubsyncError::Config("HUBSPOT_API_KEY is required but not set".to_string())
        })?;
        let mut config = Self::new(api_key)?;

        if let Some(base_url) = std::env::var("HUBSPOT_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.base_url = base_url.trim().to_string();
        }
        config.page_size = std::env::var("HUBSPOT_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .map(|n| n.clamp(1, MAX_PAGE_SIZE))
            .unwrap_or(MAX_PAGE_SIZE);
        config.max_retries = std::env::var("HUBSPOT_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        config.timeout_secs = std::env::var("HUBSPOT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(config)
    }
}

/// Per-call knobs for [`HubspotClient::fetch_all_contacts`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Drop records whose numeric id is at or below this value. Records
    /// without a numeric id are kept for the normalizer and writer to judge.
    pub id_above: Option<i64>,
    /// Abort between pages once this instant has passed.
    pub deadline: Option<Instant>,
}

impl FetchOptions {
    fn keeps(&self, contact: &RawContact) -> bool {
        match (self.id_above, contact.id.as_deref().and_then(parse_numeric_id)) {
            (Some(watermark), Some(id)) => id > watermark,
            _ => true,
        }
    }
}

/// Contacts kept by a full fetch, plus how many `id_above` dropped.
#[derive(Debug, Default)]
pub struct ContactFetch {
    pub contacts: Vec<RawContact>,
    pub filtered: usize,
}

#[derive(Clone)]
pub struct HubspotClient {
    client: Client,
    config: HubspotClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum HubspotClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("pagination cursor '{cursor}' returned twice in a row")]
    CursorStalled { cursor: String },

    #[error("deadline exceeded after {pages} pages")]
    DeadlineExceeded { pages: usize },
}

impl HubspotClient {
    pub fn new(config: HubspotClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &HubspotClientConfig {
        &self.config
    }

    /// Fetch every contact by following the `after` cursor until a page
    /// comes back without `paging.next`. Any failure discards the pages
    /// fetched so far.
    pub async fn fetch_all_contacts(
        &self,
        options: &FetchOptions,
    ) -> Result<ContactFetch, HubspotClientError> {
        let mut after: Option<String> = None;
        let mut all_contacts = Vec::new();
        let mut pages = 0;
        let mut filtered = 0;

        loop {
            if options.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(HubspotClientError::DeadlineExceeded { pages });
            }

            let page = self.fetch_page(after.as_deref()).await?;
            pages += 1;
            let next = page.next_cursor().map(str::to_owned);
            let page_len = page.results.len();

            for contact in page.results {
                if options.keeps(&contact) {
                    all_contacts.push(contact);
                } else {
                    filtered += 1;
                }
            }

            tracing::debug!(
                page = pages,
                records = page_len,
                has_more = next.is_some(),
                "fetched contacts page"
            );

            match next {
                Some(cursor) if after.as_deref() == Some(cursor.as_str()) => {
                    return Err(HubspotClientError::CursorStalled { cursor });
                }
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        tracing::info!(pages, count = all_contacts.len(), filtered, "fetched all contacts");
        Ok(ContactFetch {
            contacts: all_contacts,
            filtered,
        })
    }

    async fn fetch_page(&self, after: Option<&str>) -> Result<ContactsPage, HubspotClientError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            CONTACTS_PATH
        );

        let mut query: Vec<(&str, String)> = Vec::with_capacity(CONTACT_PROPERTIES.len() + 2);
        query.push(("limit", self.config.page_size.to_string()));
        query.extend(
            CONTACT_PROPERTIES
                .iter()
                .map(|p| ("properties", (*p).to_string())),
        );
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        self.request_with_retry(&url, &query).await
    }

    async fn request_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<ContactsPage, HubspotClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = std::cmp::min(
                    self.config.backoff_base * (1u32 << attempt.min(16)),
                    MAX_BACKOFF,
                );
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&self.config.api_key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(HubspotClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<ContactsPage>()
                    .await
                    .map_err(HubspotClientError::RequestError);
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, MAX_RETRY_AFTER_SECS);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            // Retry on 5xx
            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            // Fail fast on 4xx (except 429 handled above)
            let body = response.text().await.unwrap_or_default();
            return Err(HubspotClientError::HttpError { status, body });
        }

        Err(HubspotClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}
