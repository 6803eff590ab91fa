//! Application state.

use std::sync::Arc;
use std::time::Duration;

use fittrack_store::Store;

use crate::config::ServiceConfig;
use crate::openai::OpenAiClient;
use crate::wearables::WearableClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// OpenAI client for the metered AI endpoints (optional).
    pub openai: Option<Arc<OpenAiClient>>,

    /// Wearable provider client for pull sync (optional).
    pub wearables: Option<Arc<WearableClient>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let timeout = Duration::from_secs(config.external_timeout_seconds);

        let openai = config.openai_api_key.as_ref().and_then(|key| {
            match OpenAiClient::new(
                &config.openai_base_url,
                key,
                &config.openai_transcription_model,
                &config.openai_chat_model,
                timeout,
            ) {
                Ok(client) => {
                    tracing::info!(base_url = %config.openai_base_url, "OpenAI integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create OpenAI client");
                    None
                }
            }
        });

        if openai.is_none() {
            tracing::warn!("OpenAI not configured - AI endpoints will return 502");
        }

        let wearables = config.wearable_api_url.as_ref().and_then(|url| {
            match WearableClient::new(url, timeout) {
                Ok(client) => {
                    tracing::info!(api_url = %url, "Wearable sync enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create wearable client");
                    None
                }
            }
        });

        if wearables.is_none() {
            tracing::warn!("Wearable API not configured - pull sync will not be available");
        }

        Self {
            store,
            config,
            openai,
            wearables,
        }
    }

    /// Check if OpenAI is configured.
    #[must_use]
    pub fn has_openai(&self) -> bool {
        self.openai.is_some()
    }

    /// Check if wearable pull sync is configured.
    #[must_use]
    pub fn has_wearables(&self) -> bool {
        self.wearables.is_some()
    }
}
