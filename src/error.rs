//! Errors surfaced by the `/analyze` endpoint.
//!
//! Every failure is converted to a status code and a JSON body of the form
//! `{"error": "..."}`. Server-side failures are logged in full but only a
//! generic message reaches the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModelError;
use crate::preprocess::PreprocessError;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    /// No model client was configured at startup
    #[error("model client not configured")]
    NotConfigured,

    /// The request has no `image` field, or is not multipart at all
    #[error("no image field in request: {detail}")]
    NoImageProvided { detail: String },

    /// The `image` field has an empty filename
    #[error("image field has an empty filename")]
    NoImageSelected,

    /// More than one `image` field was sent
    #[error("multiple image fields in request")]
    MultipleImages,

    /// The upload could not be decoded or is too large
    #[error("invalid image upload: {0}")]
    InvalidImage(String),

    /// Preprocessing failed for a reason not attributable to the upload
    #[error("image preprocessing failed: {0}")]
    Preprocess(PreprocessError),

    /// The model call failed
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<PreprocessError> for AnalyzeError {
    fn from(err: PreprocessError) -> Self {
        if err.is_client_error() {
            AnalyzeError::InvalidImage(err.to_string())
        } else {
            AnalyzeError::Preprocess(err)
        }
    }
}

impl AnalyzeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalyzeError::NoImageProvided { .. }
            | AnalyzeError::NoImageSelected
            | AnalyzeError::MultipleImages
            | AnalyzeError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::NotConfigured
            | AnalyzeError::Preprocess(_)
            | AnalyzeError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe message, without leaking internal details
    pub fn user_message(&self) -> &'static str {
        match self {
            AnalyzeError::NotConfigured => "Gemini API not configured. Check API key.",
            AnalyzeError::NoImageProvided { .. } => "No image file provided",
            AnalyzeError::NoImageSelected => "No image selected",
            AnalyzeError::MultipleImages => "Only one image may be uploaded per request",
            AnalyzeError::InvalidImage(_) => "Invalid image: file is too large or corrupt",
            AnalyzeError::Model(err) if err.is_flagged() => {
                "Analysis failed or content flagged by API."
            }
            AnalyzeError::Model(_) | AnalyzeError::Preprocess(_) => {
                "An internal error occurred while analyzing the image."
            }
        }
    }
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        match &self {
            AnalyzeError::NotConfigured | AnalyzeError::Preprocess(_) => {
                tracing::error!("Analyze failed: {:#}", self);
            }
            AnalyzeError::Model(err) if err.is_flagged() => {
                tracing::warn!("Model refused to describe image: {}", err);
            }
            AnalyzeError::Model(err) => {
                tracing::error!("Model call failed: {:#}", err);
            }
            _ => {
                tracing::info!("Rejected upload: {}", self);
            }
        }

        let body = ErrorBody {
            error: self.user_message().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
