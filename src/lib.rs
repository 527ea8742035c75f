//! Web backend that describes uploaded images with a hosted vision model.
//!
//! `POST /analyze` takes a multipart upload in the `image` field, normalizes
//! it (EXIF orientation, longest edge bounded), asks Gemini what the image
//! contains and returns `{"description": "..."}`.

pub mod config;
pub mod error;
pub mod gemini;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::AnalyzeError;
pub use model::{ImageInput, ModelError, VisionModel};
pub use routes::router;
pub use state::AppState;
