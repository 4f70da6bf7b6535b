//! Configuration validation logic.

use super::ServerConfig;

/// Validate a merged configuration.
pub fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_api_key(&config.openai_api_key)?;
    validate_base_url(&config.openai_base_url)?;
    validate_rate_limit(
        config.rate_limit_requests_per_second,
        config.rate_limit_burst_size,
    )?;
    if config.upstream_timeout_seconds == 0 {
        return Err("UPSTREAM_TIMEOUT_SECONDS must be greater than 0".into());
    }
    if config.vision.max_tokens == 0 {
        return Err("Vision max_tokens must be greater than 0".into());
    }
    Ok(())
}

pub fn validate_api_key(api_key: &str) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err("OPENAI_API_KEY is required but not set".to_string());
    }
    Ok(())
}

pub fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed =
        url::Url::parse(base_url).map_err(|e| format!("Invalid OPENAI_BASE_URL '{base_url}': {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!(
            "Invalid OPENAI_BASE_URL scheme '{other}': expected http or https"
        )),
    }
}

pub fn validate_rate_limit(requests_per_second: u32, burst_size: u32) -> Result<(), String> {
    if requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0".to_string());
    }
    if burst_size == 0 {
        return Err("RATE_LIMIT_BURST_SIZE must be greater than 0".to_string());
    }
    Ok(())
}
