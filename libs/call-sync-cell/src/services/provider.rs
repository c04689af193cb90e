use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::error::CallSyncError;
use crate::models::{CallFilterCriteria, ListCallsRequest, ProviderCall, TimestampThreshold};

/// Source of truth for call data.
#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Calls started at or after `since` (all calls when `None`), newest
    /// first, at most `limit`. With a `pagination_key` the page continues
    /// after that call id.
    async fn list_calls(
        &self,
        since: Option<DateTime<Utc>>,
        pagination_key: Option<String>,
        limit: usize,
    ) -> Result<Vec<ProviderCall>, CallSyncError>;

    async fn get_call(&self, call_id: &str) -> Result<ProviderCall, CallSyncError>;
}

/// Retell voice-agent API client.
pub struct RetellClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl RetellClient {
    pub fn new(config: &AppConfig) -> Result<Self, CallSyncError> {
        if !config.is_telephony_configured() {
            return Err(CallSyncError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            api_key: config.telephony_api_key.clone(),
            base_url: config.telephony_api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, CallSyncError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("Telephony {} failed: {} - {}", what, status, body);
            return Err(CallSyncError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl CallProvider for RetellClient {
    /// POST /v2/list-calls
    async fn list_calls(
        &self,
        since: Option<DateTime<Utc>>,
        pagination_key: Option<String>,
        limit: usize,
    ) -> Result<Vec<ProviderCall>, CallSyncError> {
        let url = format!("{}/v2/list-calls", self.base_url);
        let request = ListCallsRequest {
            filter_criteria: since.map(|at| CallFilterCriteria {
                start_timestamp: TimestampThreshold {
                    lower_threshold: at.timestamp_millis(),
                },
            }),
            pagination_key,
            limit,
            sort_order: "descending".to_string(),
        };

        debug!(
            "Listing calls from {} (since {:?}, after {:?})",
            url, since, request.pagination_key
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let calls: Vec<ProviderCall> = Self::parse(response, "list calls").await?;
        debug!("Provider listed {} calls", calls.len());
        Ok(calls)
    }

    /// GET /v2/get-call/{call_id}
    async fn get_call(&self, call_id: &str) -> Result<ProviderCall, CallSyncError> {
        let url = format!("{}/v2/get-call/{}", self.base_url, call_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        Self::parse(response, "get call").await
    }
}
