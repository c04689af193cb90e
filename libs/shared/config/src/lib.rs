use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_TELEPHONY_API_BASE_URL: &str = "https://api.retellai.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub default_practice_timezone: String,
    pub require_practice_timezone: bool,
    pub telephony_api_base_url: String,
    pub telephony_api_key: String,
    pub call_sync_interval_seconds: u64,
    pub call_sync_stale_after_seconds: u64,
    pub call_sync_batch_size: usize,
    pub call_sync_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            default_practice_timezone: "UTC".to_string(),
            require_practice_timezone: false,
            telephony_api_base_url: DEFAULT_TELEPHONY_API_BASE_URL.to_string(),
            telephony_api_key: String::new(),
            call_sync_interval_seconds: 300,
            call_sync_stale_after_seconds: 3600,
            call_sync_batch_size: 100,
            call_sync_concurrency: 4,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            default_practice_timezone: env::var("DEFAULT_PRACTICE_TIMEZONE")
                .unwrap_or_else(|_| defaults.default_practice_timezone.clone()),
            require_practice_timezone: parse_or("REQUIRE_PRACTICE_TIMEZONE", defaults.require_practice_timezone),
            telephony_api_base_url: env::var("TELEPHONY_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("TELEPHONY_API_BASE_URL not set, using default");
                    defaults.telephony_api_base_url.clone()
                }),
            telephony_api_key: env::var("TELEPHONY_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("TELEPHONY_API_KEY not set, using empty value");
                    String::new()
                }),
            call_sync_interval_seconds: parse_or("CALL_SYNC_INTERVAL_SECONDS", defaults.call_sync_interval_seconds),
            call_sync_stale_after_seconds: parse_or("CALL_SYNC_STALE_AFTER_SECONDS", defaults.call_sync_stale_after_seconds),
            call_sync_batch_size: parse_or("CALL_SYNC_BATCH_SIZE", defaults.call_sync_batch_size),
            call_sync_concurrency: parse_or("CALL_SYNC_CONCURRENCY", defaults.call_sync_concurrency),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_service_key.is_empty()
    }

    pub fn is_telephony_configured(&self) -> bool {
        !self.telephony_api_base_url.is_empty()
            && !self.telephony_api_key.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
