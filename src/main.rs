use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use vision_gateway::{
    ServerConfig,
    core::session::runner::{AssistantConfig, run_assistant},
    routes,
    state::AppState,
};

/// Vision Gateway - realtime voice assistant with an on-demand camera tool
#[derive(Parser, Debug)]
#[command(name = "vision-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP gateway
    Serve,

    /// Run a voice session against a running gateway
    Assist {
        /// Gateway base URL
        #[arg(long = "server-url", default_value = "http://localhost:3000")]
        server_url: String,

        /// Image file used as the camera feed
        #[arg(long = "camera", value_name = "FILE")]
        camera: PathBuf,

        /// Realtime WebSocket endpoint
        #[arg(long = "realtime-url")]
        realtime_url: Option<String>,

        /// Seconds to wait for an image description
        #[arg(long = "analysis-timeout", default_value_t = 10)]
        analysis_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must happen before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Assist {
            server_url,
            camera,
            realtime_url,
            analysis_timeout,
        }) => {
            let mut config = AssistantConfig::new(server_url, camera);
            if let Some(realtime_url) = realtime_url {
                config.realtime_url = realtime_url;
            }
            config.analysis_timeout = Duration::from_secs(analysis_timeout);
            run_assistant(config).await
        }
        Some(Commands::Serve) | None => serve(cli.config).await,
    }
}

async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = if let Some(config_path) = config_path {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    let tls_config = config.tls.clone();
    let rate_limit_rps = config.rate_limit_requests_per_second;
    let rate_limit_burst = config.rate_limit_burst_size;
    let cors_origins = config.cors_allowed_origins.clone();
    info!("Starting server on {address} ({})", config.environment);

    let app_state = AppState::new(config).await?;

    let governor_config = GovernorConfigBuilder::default()
        .per_second(u64::from(rate_limit_rps))
        .burst_size(rate_limit_burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("Invalid rate limiter configuration"))?;
    let governor_layer = GovernorLayer::new(governor_config);

    let cors_layer = build_cors_layer(cors_origins.as_deref());

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::create_router(app_state)
        .layer(cors_layer)
        .layer(governor_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    if let Some(tls) = tls_config {
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        info!("Server listening on https://{} (TLS enabled)", socket_addr);

        axum_server::bind_rustls(socket_addr, rustls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        info!("Server listening on http://{}", socket_addr);

        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}

fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    match origins {
        Some("*") => base.allow_origin(Any).allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins)
        }
        None => {
            // No allow_origin: browsers block cross-origin requests
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            base
        }
    }
}
