use std::sync::Arc;

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::model::VisionModel;
use crate::preprocess::ImagePreprocessor;

/// Shared, read-only state built once at startup.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the model could not be configured; `/analyze` then
    /// fails for every request.
    pub model: Option<Arc<dyn VisionModel>>,
    pub preprocessor: ImagePreprocessor,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        model: Option<Arc<dyn VisionModel>>,
        preprocessor: ImagePreprocessor,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            model,
            preprocessor,
            max_upload_bytes,
        }
    }

    /// Build state from configuration, configuring Gemini if a key is present.
    ///
    /// A missing key or a client that fails to build is logged and leaves
    /// the model unset rather than aborting startup.
    pub fn from_config(config: &Config) -> Self {
        let model: Option<Arc<dyn VisionModel>> = match config.api_key() {
            None => {
                tracing::error!("GEMINI_API_KEY not set; /analyze will be unavailable");
                None
            }
            Some(key) => match GeminiClient::new(
                &config.api_base,
                key,
                &config.model,
                config.model_timeout(),
            ) {
                Ok(client) => {
                    tracing::info!(model = %config.model, "Gemini API configured");
                    Some(Arc::new(client) as Arc<dyn VisionModel>)
                }
                Err(e) => {
                    tracing::error!("Error configuring Gemini API: {}", e);
                    None
                }
            },
        };

        Self::new(
            model,
            ImagePreprocessor::new(config.preprocess_limits()),
            config.max_upload_bytes,
        )
    }

    pub fn is_configured(&self) -> bool {
        self.model.is_some()
    }
}
