//! Environment variable loading.

use std::env;
use std::str::FromStr;

/// Raw values read from the environment. Unset or empty variables are `None`.
#[derive(Debug, Default)]
pub struct EnvValues {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub app_env: Option<String>,
    pub upload_dir: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub upstream_timeout_seconds: Option<u64>,
    pub vision_model: Option<String>,
    pub vision_max_tokens: Option<u32>,
    pub realtime_model: Option<String>,
    pub realtime_voice: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
}

impl EnvValues {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: var("HOST"),
            port: parse_var("PORT")?,
            tls_cert_path: var("TLS_CERT_PATH"),
            tls_key_path: var("TLS_KEY_PATH"),
            app_env: var("APP_ENV"),
            upload_dir: var("UPLOAD_DIR"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            upstream_timeout_seconds: parse_var("UPSTREAM_TIMEOUT_SECONDS")?,
            vision_model: var("VISION_MODEL"),
            vision_max_tokens: parse_var("VISION_MAX_TOKENS")?,
            realtime_model: var("REALTIME_MODEL"),
            realtime_voice: var("REALTIME_VOICE"),
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: parse_var("RATE_LIMIT_BURST_SIZE")?,
        })
    }
}

/// Read a variable, treating empty values as unset.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable.
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {e}")),
        None => Ok(None),
    }
}
