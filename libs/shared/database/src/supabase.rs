use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::error::AppError;

/// Thin PostgREST client for the Supabase REST surface.
///
/// Filters are passed as `(column, "op.value")` pairs and URL-encoded by
/// reqwest, so values such as phone numbers or provider call ids never need
/// manual escaping.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_service_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, AppError> {
        let mut headers = HeaderMap::new();

        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| AppError::Internal(format!("Invalid API key header: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| AppError::Internal(format!("Invalid authorization header: {}", e)))?;

        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    /// `Prefer: return=representation`, so writes echo the stored rows.
    pub fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, query, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers)
            .query(query);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(AppError::from_status(status.as_u16(), error_text));
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// Formats an instant the way PostgREST filters expect it (`Z` suffix, no `+`).
pub fn postgrest_timestamp(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_use_zulu_suffix() {
        let at = chrono::Utc.with_ymd_and_hms(2025, 1, 11, 6, 0, 0).unwrap();
        assert_eq!(postgrest_timestamp(&at), "2025-01-11T06:00:00.000000Z");
    }

    #[test]
    fn base_url_is_trimmed() {
        let config = AppConfig {
            supabase_url: "http://localhost:54321/".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(SupabaseClient::new(&config).get_base_url(), "http://localhost:54321");
    }
}
