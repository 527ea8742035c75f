//! HTTP surface: the upload page, the analyze endpoint and a health probe.

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::AnalyzeError;
use crate::model::{ImageInput, DESCRIBE_PROMPT};
use crate::state::AppState;

/// Name of the multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_configured: bool,
}

/// An `image` field read in full.
struct Upload {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/analyze", post(analyze).layer(upload_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_configured: state.is_configured(),
    })
}

async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, AnalyzeError> {
    let model = state.model.clone().ok_or(AnalyzeError::NotConfigured)?;

    let mut multipart = multipart.map_err(|e| AnalyzeError::NoImageProvided {
        detail: e.body_text(),
    })?;
    let upload = read_image_field(&mut multipart).await?;

    tracing::info!(
        filename = %upload.filename,
        content_type = upload.content_type.as_deref().unwrap_or("unknown"),
        bytes = upload.bytes.len(),
        "Received image"
    );

    let prepared = state.preprocessor.prepare(upload.bytes).await?;

    tracing::info!(
        format = ?prepared.source_format,
        original_width = prepared.original_width,
        original_height = prepared.original_height,
        width = prepared.width,
        height = prepared.height,
        orientation = ?prepared.orientation,
        "Image normalized"
    );

    let description = model
        .describe(&ImageInput::from(&prepared), DESCRIBE_PROMPT)
        .await?;

    tracing::debug!(model = model.name(), chars = description.len(), "Analysis complete");

    Ok(Json(AnalyzeResponse { description }))
}

/// Find the single `image` field, ignoring any other fields in the form.
async fn read_image_field(multipart: &mut Multipart) -> Result<Upload, AnalyzeError> {
    let mut upload: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e.status(), e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        if upload.is_some() {
            return Err(AnalyzeError::MultipleImages);
        }

        let filename = match field.file_name() {
            None => {
                return Err(AnalyzeError::NoImageProvided {
                    detail: "image field is not a file".to_string(),
                })
            }
            Some("") => return Err(AnalyzeError::NoImageSelected),
            Some(name) => name.to_string(),
        };
        let content_type = field.content_type().map(str::to_string);

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AnalyzeError::InvalidImage(e.body_text()))?;

        upload = Some(Upload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    upload.ok_or_else(|| AnalyzeError::NoImageProvided {
        detail: "no image field in form".to_string(),
    })
}

/// Oversized bodies are an image problem; anything else is a malformed form.
fn multipart_error(status: StatusCode, detail: String) -> AnalyzeError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AnalyzeError::InvalidImage(detail)
    } else {
        AnalyzeError::NoImageProvided { detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_body_is_invalid_image() {
        let err = multipart_error(StatusCode::PAYLOAD_TOO_LARGE, "too big".to_string());
        assert!(matches!(err, AnalyzeError::InvalidImage(_)));
    }

    #[test]
    fn test_malformed_body_is_missing_image() {
        let err = multipart_error(StatusCode::BAD_REQUEST, "bad boundary".to_string());
        assert!(matches!(err, AnalyzeError::NoImageProvided { .. }));
    }

    #[test]
    fn test_index_page_posts_to_analyze() {
        assert!(INDEX_HTML.contains("/analyze"));
        assert!(INDEX_HTML.contains("'image'"));
    }
}
