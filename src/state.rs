use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::openai::OpenAIClient;
use crate::core::storage::UploadStore;

/// Shared state handed to every HTTP handler.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub openai: OpenAIClient,
    pub uploads: UploadStore,
}

impl AppState {
    /// Build the upstream client and open the upload directory.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let openai = OpenAIClient::new(
            &config.openai_api_key,
            &config.openai_base_url,
            config.upstream_timeout(),
        )
        .context("Failed to create OpenAI client")?;

        let uploads = UploadStore::new(&config.upload_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to open upload directory {}",
                    config.upload_dir.display()
                )
            })?;

        info!(
            "Application state ready (environment={}, uploads={})",
            config.environment,
            uploads.root().display()
        );

        Ok(Arc::new(Self {
            config,
            openai,
            uploads,
        }))
    }
}
