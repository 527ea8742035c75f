//! End-to-end tests of the HTTP surface against a stub model and a mocked
//! Gemini API.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_image_analyzer::error::ErrorBody;
use ai_image_analyzer::preprocess::{ImagePreprocessor, PreprocessLimits};
use ai_image_analyzer::routes::{AnalyzeResponse, HealthResponse};
use ai_image_analyzer::{router, AppState, Config, ImageInput, ModelError, VisionModel};
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::Parser;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

enum Reply {
    Text(&'static str),
    Fail(fn() -> ModelError),
}

struct StubModel {
    reply: Reply,
    calls: AtomicUsize,
    last_image: Mutex<Option<ImageInput>>,
}

impl StubModel {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            last_image: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_image_dimensions(&self) -> (u32, u32) {
        let guard = self.last_image.lock().unwrap();
        let input = guard.as_ref().expect("model was not called");
        let bytes = BASE64.decode(&input.data).unwrap();
        image::load_from_memory(&bytes).unwrap().dimensions()
    }
}

#[async_trait]
impl VisionModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn describe(&self, image: &ImageInput, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_image.lock().unwrap() = Some(image.clone());
        match &self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Fail(make) => Err(make()),
        }
    }
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 64])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

fn server_with(model: Option<Arc<dyn VisionModel>>, max_upload_bytes: usize) -> TestServer {
    let state = AppState::new(
        model,
        ImagePreprocessor::new(PreprocessLimits::default()),
        max_upload_bytes,
    );
    TestServer::new(router(state)).unwrap()
}

fn server_for(stub: &Arc<StubModel>) -> TestServer {
    server_with(Some(stub.clone() as Arc<dyn VisionModel>), 20 * 1024 * 1024)
}

fn image_form(bytes: Vec<u8>, filename: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "image",
        Part::bytes(bytes).file_name(filename).mime_type("image/jpeg"),
    )
}

#[tokio::test]
async fn test_large_jpeg_is_described_and_downscaled() {
    let stub = StubModel::new(Reply::Text("- a gradient\n- nothing else"));
    let server = server_for(&stub);

    let response = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(2000, 1500), "photo.jpg"))
        .await;

    response.assert_status_ok();
    let body: AnalyzeResponse = response.json();
    assert!(!body.description.is_empty());
    assert_eq!(stub.calls(), 1);

    let (width, height) = stub.last_image_dimensions();
    assert!(width.max(height) <= 800);
    assert_eq!((width, height), (800, 600));
}

#[tokio::test]
async fn test_other_form_fields_are_ignored() {
    let stub = StubModel::new(Reply::Text("a square"));
    let server = server_for(&stub);

    let form = MultipartForm::new()
        .add_text("note", "hello")
        .add_part(
            "image",
            Part::bytes(jpeg_bytes(64, 64)).file_name("small.jpg"),
        );
    let response = server.post("/analyze").multipart(form).await;

    response.assert_status_ok();
    assert_eq!(response.json::<AnalyzeResponse>().description, "a square");
}

#[tokio::test]
async fn test_missing_image_field_is_400() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);

    let form = MultipartForm::new().add_text("something_else", "value");
    let response = server.post("/analyze").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert!(body.error.contains("No image file provided"));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_non_multipart_body_is_400() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);

    let response = server.post("/analyze").json(&json!({"image": "x"})).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert!(body.error.contains("No image"));
}

#[tokio::test]
async fn test_empty_filename_is_400() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);

    let response = server
        .post("/analyze")
        .multipart(image_form(Vec::new(), ""))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert_eq!(body.error, "No image selected");
}

#[tokio::test]
async fn test_ten_byte_file_is_400_corrupt() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);

    let response = server
        .post("/analyze")
        .multipart(image_form(b"0123456789".to_vec(), "image"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json();
    assert!(body.error.contains("corrupt"));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_invalid_buffers_never_500() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);
    let jpeg = jpeg_bytes(32, 32);

    for bytes in [
        Vec::new(),
        vec![0xFF, 0xD8, 0xFF],
        jpeg[..20].to_vec(),
        b"\x89PNG\r\n\x1a\n".to_vec(),
    ] {
        let response = server
            .post("/analyze")
            .multipart(image_form(bytes, "broken.jpg"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(!response.json::<ErrorBody>().error.is_empty());
    }
}

#[tokio::test]
async fn test_two_image_fields_are_rejected() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_for(&stub);

    let form = MultipartForm::new()
        .add_part("image", Part::bytes(jpeg_bytes(16, 16)).file_name("a.jpg"))
        .add_part("image", Part::bytes(jpeg_bytes(16, 16)).file_name("b.jpg"));
    let response = server.post("/analyze").multipart(form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_upload_over_body_limit_is_400() {
    let stub = StubModel::new(Reply::Text("unused"));
    let server = server_with(Some(stub.clone() as Arc<dyn VisionModel>), 1024);

    let response = server
        .post("/analyze")
        .multipart(image_form(vec![0u8; 8 * 1024], "big.jpg"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<ErrorBody>().error.contains("too large"));
}

#[tokio::test]
async fn test_unconfigured_model_fails_every_request() {
    let server = server_with(None, 20 * 1024 * 1024);

    let valid = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(100, 100), "ok.jpg"))
        .await;
    let missing = server
        .post("/analyze")
        .multipart(MultipartForm::new().add_text("x", "y"))
        .await;
    let garbage = server
        .post("/analyze")
        .multipart(image_form(b"0123456789".to_vec(), "image"))
        .await;

    for response in [valid, missing, garbage] {
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json::<ErrorBody>().error.contains("not configured"));
    }
}

#[tokio::test]
async fn test_flagged_model_response_is_500() {
    let stub = StubModel::new(Reply::Fail(|| ModelError::Blocked {
        reason: "SAFETY".to_string(),
    }));
    let server = server_for(&stub);

    let response = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(100, 100), "ok.jpg"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<ErrorBody>().error,
        "Analysis failed or content flagged by API."
    );
}

#[tokio::test]
async fn test_transport_failure_hides_detail() {
    let stub = StubModel::new(Reply::Fail(|| ModelError::Http {
        status: 403,
        body: "API_KEY_INVALID for key abc123".to_string(),
    }));
    let server = server_for(&stub);

    let response = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(100, 100), "ok.jpg"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = response.json();
    assert!(!body.error.contains("abc123"));
    assert!(!body.error.contains("403"));
}

#[tokio::test]
async fn test_index_and_health() {
    let server = server_with(None, 1024);

    let index = server.get("/").await;
    index.assert_status_ok();
    assert!(index.text().contains("/analyze"));

    let health = server.get("/health").await;
    health.assert_status_ok();
    let body: HealthResponse = health.json();
    assert_eq!(body.status, "ok");
    assert!(!body.model_configured);
}

#[tokio::test]
async fn test_gemini_round_trip_through_router() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "1. A striped test pattern"}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&gemini)
        .await;

    let config = Config::try_parse_from([
        "ai-image-analyzer",
        "--api-key",
        "test-key",
        "--model",
        "gemini-1.5-flash",
        "--api-base",
        &gemini.uri(),
    ])
    .unwrap();
    let state = AppState::from_config(&config);
    assert!(state.is_configured());
    let server = TestServer::new(router(state)).unwrap();

    let response = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(1200, 900), "photo.jpg"))
        .await;

    response.assert_status_ok();
    let body: AnalyzeResponse = response.json();
    assert_eq!(body.description, "1. A striped test pattern");

    let requests = gemini.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let data = sent["contents"][0]["parts"][1]["inline_data"]["data"]
        .as_str()
        .unwrap();
    let sent_image = image::load_from_memory(&BASE64.decode(data).unwrap()).unwrap();
    assert_eq!(sent_image.dimensions(), (800, 600));
}

#[tokio::test]
async fn test_gemini_safety_block_through_router() {
    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&gemini)
        .await;

    let config = Config::try_parse_from([
        "ai-image-analyzer",
        "--api-key",
        "test-key",
        "--api-base",
        &gemini.uri(),
    ])
    .unwrap();
    let server = TestServer::new(router(AppState::from_config(&config))).unwrap();

    let response = server
        .post("/analyze")
        .multipart(image_form(jpeg_bytes(100, 100), "ok.jpg"))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.json::<ErrorBody>().error.contains("flagged"));
}
