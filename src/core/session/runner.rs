//! Headless assistant.
//!
//! Connects to a realtime session through the gateway and answers `take_photo`
//! calls using a still image as the camera. The loop runs until the session
//! closes or Ctrl+C is pressed, then ends the session so server-side artifacts
//! are cleaned up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{AnalysisOutcome, AnalysisReport, HttpArtifactStore, SessionController, SessionDeps};
use crate::core::capture::{FileFrameSource, capture_once};
use crate::core::realtime::{OPENAI_REALTIME_URL, WsDataChannel};
use crate::core::vision::{DEFAULT_ANALYSIS_TIMEOUT, HttpVisionClient};

/// Extra time allowed at shutdown for an analysis to persist and report.
const REPORT_DRAIN_MARGIN: Duration = Duration::from_secs(5);

/// Settings for [`run_assistant`].
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Gateway base URL, e.g. `http://localhost:3000`
    pub server_url: String,
    /// Realtime WebSocket endpoint
    pub realtime_url: String,
    /// Image used as the camera feed
    pub camera_path: PathBuf,
    pub analysis_timeout: Duration,
}

impl AssistantConfig {
    pub fn new(server_url: impl Into<String>, camera_path: impl Into<PathBuf>) -> Self {
        Self {
            server_url: server_url.into(),
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            camera_path: camera_path.into(),
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionToken {
    model: Option<String>,
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Fetch an ephemeral realtime token from the gateway's `/token` endpoint.
/// Returns the model and the client secret.
async fn fetch_token(http: &reqwest::Client, server_url: &str) -> anyhow::Result<(Option<String>, String)> {
    let url = format!("{}/token", server_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Token request failed with {status}: {body}"));
    }

    let token: SessionToken = response
        .json()
        .await
        .context("Token response is missing client_secret.value")?;
    Ok((token.model, token.client_secret.value))
}

/// Run the assistant until the session ends.
pub async fn run_assistant(config: AssistantConfig) -> anyhow::Result<()> {
    let http = reqwest::Client::new();

    let (model, secret) = fetch_token(&http, &config.server_url).await?;
    let url = match model {
        Some(model) => WsDataChannel::build_ws_url(&config.realtime_url, &model),
        None => config.realtime_url.clone(),
    };
    let (channel, mut events) = WsDataChannel::connect(&url, &secret).await?;
    let channel = Arc::new(channel);

    let mut deps = SessionDeps::new(
        Arc::new(HttpVisionClient::new(http.clone(), &config.server_url)),
        Arc::new(HttpArtifactStore::new(http.clone(), &config.server_url)),
    );
    deps.analysis_timeout = config.analysis_timeout;

    let mut controller = SessionController::new(deps);
    controller.start(channel.clone());

    let (report_tx, mut report_rx) = mpsc::channel::<AnalysisReport>(4);
    let mut camera = FileFrameSource::new(&config.camera_path);

    tracing::info!("Assistant running; press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Realtime session closed");
                    break;
                };
                if !controller.handle_event(&event) {
                    continue;
                }
                match capture_once(&mut camera) {
                    Ok(image) => {
                        if let Some(pending) = controller.photo_captured(image) {
                            let tx = report_tx.clone();
                            tokio::spawn(async move {
                                let _ = tx.send(pending.run().await).await;
                            });
                        }
                    }
                    Err(e) => {
                        controller.camera_failed(&e);
                        controller.dismiss_camera();
                    }
                }
            }

            Some(report) = report_rx.recv() => {
                match controller.complete_analysis(report) {
                    AnalysisOutcome::Completed(text) => tracing::info!("Saw: {}", text),
                    AnalysisOutcome::Failed(e) => tracing::warn!("Analysis failed: {}", e),
                    AnalysisOutcome::Stale => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    // In-flight analyses report as stale and their uploads are removed
    controller.stop();
    drop(report_tx);
    controller
        .drain_reports(&mut report_rx, config.analysis_timeout + REPORT_DRAIN_MARGIN)
        .await;
    controller.settle().await;
    channel.close();
    Ok(())
}
