//! Merging environment values with YAML overrides.

use std::path::PathBuf;

use super::env::EnvValues;
use super::yaml::YamlConfig;
use super::{Environment, ServerConfig, TlsConfig};
use crate::core::openai::{OPENAI_API_BASE_URL, RealtimeSettings, VisionSettings};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
const DEFAULT_RATE_LIMIT_BURST: u32 = 10;

/// Build a [`ServerConfig`] from the environment, with YAML values taking
/// precedence when present.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvValues::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let openai = yaml.openai.unwrap_or_default();
    let vision = yaml.vision.unwrap_or_default();
    let realtime = yaml.realtime.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let environment_name = server.environment.or(env.app_env);
    let environment = match environment_name {
        Some(name) => Environment::parse(&name)
            .ok_or_else(|| format!("Invalid environment '{name}': expected development or production"))?,
        None => Environment::default(),
    };

    // YAML TLS block replaces env TLS entirely; `enabled: false` turns it off.
    let (cert_path, key_path) = match server.tls {
        Some(tls) if tls.enabled == Some(false) => (None, None),
        Some(tls) => (tls.cert_path, tls.key_path),
        None => (env.tls_cert_path, env.tls_key_path),
    };
    let tls = match (cert_path, key_path) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => return Err("TLS requires both a certificate and a key path".into()),
    };

    let vision_defaults = VisionSettings::default();
    let realtime_defaults = RealtimeSettings::default();

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,
        environment,
        openai_api_key: openai.api_key.or(env.openai_api_key).unwrap_or_default(),
        openai_base_url: openai
            .base_url
            .or(env.openai_base_url)
            .unwrap_or_else(|| OPENAI_API_BASE_URL.to_string()),
        upstream_timeout_seconds: openai
            .timeout_seconds
            .or(env.upstream_timeout_seconds)
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
        vision: VisionSettings {
            model: vision
                .model
                .or(env.vision_model)
                .unwrap_or(vision_defaults.model),
            prompt: vision.prompt.unwrap_or(vision_defaults.prompt),
            max_tokens: vision
                .max_tokens
                .or(env.vision_max_tokens)
                .unwrap_or(vision_defaults.max_tokens),
        },
        realtime: RealtimeSettings {
            model: realtime
                .model
                .or(env.realtime_model)
                .unwrap_or(realtime_defaults.model),
            voice: realtime
                .voice
                .or(env.realtime_voice)
                .unwrap_or(realtime_defaults.voice),
            instructions: realtime
                .instructions
                .unwrap_or(realtime_defaults.instructions),
        },
        upload_dir: PathBuf::from(
            server
                .upload_dir
                .or(env.upload_dir)
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
        ),
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
    })
}
