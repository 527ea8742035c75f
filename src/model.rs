//! The seam between the HTTP handler and the external vision model.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::preprocess::PreparedImage;

/// Instruction sent alongside every image.
pub const DESCRIBE_PROMPT: &str =
    "Identify the main items or objects visible in this image. Provide a list or a short description.";

/// Base64-encoded image ready to embed in a JSON request.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub data: String,
    pub mime_type: String,
}

impl ImageInput {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            data: BASE64.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }
}

impl From<&PreparedImage> for ImageInput {
    fn from(image: &PreparedImage) -> Self {
        Self::from_bytes(&image.bytes, image.mime_type)
    }
}

/// Errors from a model call.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The prompt was blocked before generation started
    #[error("prompt blocked by the model: {reason}")]
    Blocked { reason: String },

    /// Generation stopped for a reason other than completing normally
    #[error("generation stopped early: {reason}")]
    Stopped { reason: String },

    /// The response carried no candidate text
    #[error("model returned no text")]
    Empty,

    /// The API answered with a non-success status
    #[error("model API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request to model API failed: {0}")]
    Request(String),

    #[error("failed to parse model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// The model refused or produced nothing, as opposed to a transport failure.
    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Blocked { .. } | Self::Stopped { .. } | Self::Empty)
    }
}

/// A hosted model that can describe an image.
///
/// `async_trait` keeps the trait object-safe so state can hold
/// `Arc<dyn VisionModel>`.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier for logging.
    fn name(&self) -> &str;

    /// Generate text for `prompt` about `image`.
    async fn describe(&self, image: &ImageInput, prompt: &str) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_input_encodes_base64() {
        let input = ImageInput::from_bytes(&[0xFF, 0xD8, 0xFF], "image/jpeg");
        assert_eq!(input.data, "/9j/");
        assert_eq!(input.mime_type, "image/jpeg");
    }

    #[test]
    fn test_flagged_classification() {
        assert!(ModelError::Empty.is_flagged());
        assert!(ModelError::Blocked {
            reason: "SAFETY".to_string()
        }
        .is_flagged());
        assert!(!ModelError::Http {
            status: 429,
            body: String::new()
        }
        .is_flagged());
        assert!(!ModelError::Request("timeout".to_string()).is_flagged());
    }
}
