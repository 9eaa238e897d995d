//! HubSpot CRM v3 transport
//!
//! Lists objects through `GET /crm/v3/objects/{objectType}` with cursor
//! paging (`after` / `paging.next.after`) and bearer authentication.

use async_trait::async_trait;
use hubsync_common::RawRecord;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{ApiPage, CrmApi, Cursor, PageRequest};
use crate::config::ConnectorConfig;
use crate::error::{ApiError, ConnectorError};

/// Longest error body kept in an [`ApiError`] message.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<RawRecord>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

/// HTTP client for the HubSpot CRM API.
///
/// Owns a connection pool; dropping the last handle releases it.
#[derive(Clone)]
pub struct HubSpotApi {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HubSpotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSpotApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HubSpotApi {
    /// Build the client; performs no I/O
    pub fn new(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("hubsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token().to_string(),
        })
    }

    fn objects_url(&self, object_type: &str) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, object_type)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        Err(classify_status(status, retry_after, body))
    }
}

/// Map a non-success HTTP status onto the retry taxonomy
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> ApiError {
    let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let code = status.as_u16();

    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            status: code,
            message,
        },
        StatusCode::REQUEST_TIMEOUT => ApiError::Transport(format!("HTTP 408: {}", message)),
        s if s.is_server_error() => ApiError::Server {
            status: code,
            message,
        },
        _ => ApiError::Client {
            status: code,
            message,
        },
    }
}

#[async_trait]
impl CrmApi for HubSpotApi {
    #[instrument(level = "debug", skip(self))]
    async fn ping(&self) -> Result<(), ApiError> {
        let url = self.objects_url("contacts");
        let _: serde_json::Value = self.get_json(&url, &[("limit", "1".to_string())]).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, request), fields(object_type = %request.object_type, after = ?request.after))]
    async fn list_page(&self, request: &PageRequest) -> Result<ApiPage, ApiError> {
        let url = self.objects_url(&request.object_type);

        let mut query = vec![
            ("limit", request.limit.to_string()),
            ("archived", request.archived.to_string()),
        ];
        if !request.properties.is_empty() {
            query.push(("properties", request.properties.join(",")));
        }
        if let Some(after) = &request.after {
            query.push(("after", after.as_str().to_string()));
        }

        let body: ListResponse = self.get_json(&url, &query).await?;
        let next_cursor = body
            .paging
            .and_then(|p| p.next)
            .map(|n| n.after)
            .filter(|after| !after.is_empty())
            .map(Cursor::new);

        debug!(records = body.results.len(), has_more = next_cursor.is_some(), "Received page");

        let undated = body.results.iter().filter(|r| r.missing_timestamps()).count();
        if undated > 0 {
            warn!(
                records = undated,
                "Records without createdAt/updatedAt; using the Unix epoch"
            );
        }

        Ok(ApiPage {
            records: body.results,
            next_cursor,
        })
    }
}
