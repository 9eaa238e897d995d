//! Cursor pagination with retry and backoff
//!
//! A [`Pager`] walks one remote object type from the first page until the API
//! stops returning a cursor. Every remote call, retries included, first takes
//! a token from the shared [`RateLimiter`].

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::api::{ApiPage, CrmApi, Cursor, PageRequest};
use crate::config::RetrySettings;
use crate::error::{ApiError, ConnectorError, Result};
use crate::rate_limit::RateLimiter;

/// Fetches the pages of a single object type
pub struct Pager {
    api: Arc<dyn CrmApi>,
    limiter: Arc<RateLimiter>,
    retry: RetrySettings,
    request: PageRequest,
    finished: bool,
    pages_fetched: u32,
}

impl Pager {
    pub fn new(
        api: Arc<dyn CrmApi>,
        limiter: Arc<RateLimiter>,
        retry: RetrySettings,
        object_type: impl Into<String>,
        limit: u32,
        properties: Vec<String>,
        archived: bool,
    ) -> Self {
        Self {
            api,
            limiter,
            retry,
            request: PageRequest {
                object_type: object_type.into(),
                after: None,
                limit,
                properties,
                archived,
            },
            finished: false,
            pages_fetched: 0,
        }
    }

    pub fn object_type(&self) -> &str {
        &self.request.object_type
    }

    /// Whether the last page has been returned
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Fetch the next page, or `None` once the cursor chain has ended.
    ///
    /// Engagement records come back tagged with the object type they were
    /// listed from.
    pub async fn next_page(&mut self) -> Result<Option<ApiPage>> {
        if self.finished {
            return Ok(None);
        }

        let cursor = self.request.after.clone();
        let mut page = self.fetch_page(cursor).await?;

        for record in &mut page.records {
            if record.object_type.is_none() && is_engagement_type(&self.request.object_type) {
                record.object_type = Some(self.request.object_type.clone());
            }
        }

        self.pages_fetched += 1;
        self.request.after = page.next_cursor.clone();
        if page.next_cursor.is_none() {
            self.finished = true;
        }

        Ok(Some(page))
    }

    /// Fetch the page starting at `cursor`, retrying transient failures
    #[instrument(skip(self), fields(object_type = %self.request.object_type))]
    pub async fn fetch_page(&self, cursor: Option<Cursor>) -> Result<ApiPage> {
        let mut request = self.request.clone();
        request.after = cursor;

        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            attempt += 1;

            match self.api.list_page(&request).await {
                Ok(page) => {
                    debug!(
                        attempt = attempt,
                        records = page.records.len(),
                        has_more = page.next_cursor.is_some(),
                        "Fetched page"
                    );
                    return Ok(page);
                },
                Err(e) if e.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(attempt = attempt, error = %e, "Giving up on page after retries");
                        return Err(ConnectorError::RemoteUnavailable {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let backoff = backoff_delay(&self.retry, attempt, &e);
                    warn!(
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Page fetch failed, retrying..."
                    );
                    tokio::time::sleep(backoff).await;
                },
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Page fetch failed with non-retryable error");
                    return Err(ConnectorError::from_fatal(e));
                },
            }
        }
    }
}

fn backoff_delay(retry: &RetrySettings, attempt: u32, error: &ApiError) -> std::time::Duration {
    let backoff = retry.backoff_for(attempt);
    match error.retry_after() {
        Some(server_delay) => backoff.max(server_delay),
        None => backoff,
    }
}

fn is_engagement_type(object_type: &str) -> bool {
    hubsync_common::types::ENGAGEMENT_OBJECT_TYPES.contains(&object_type)
}
