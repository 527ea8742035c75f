//! Process configuration.
//!
//! Every setting can come from a command-line flag or the matching
//! environment variable (a `.env` file is loaded into the environment first
//! by `main`). Only the Gemini API key is needed for analysis to work; when
//! it is missing the server still starts, but `/analyze` answers with a
//! configuration error.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::preprocess::PreprocessLimits;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Web service that describes uploaded images with Google Gemini.
#[derive(Parser, Debug, Clone)]
#[command(name = "ai-image-analyzer", version, about, long_about = None)]
pub struct Config {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Gemini model id
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Root URL of the Gemini REST API
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enable verbose (debug) logging
    #[arg(
        short,
        long,
        env = "DEBUG",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub verbose: bool,

    /// Log format: "pretty" or "json"
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Longest edge, in pixels, of the image sent to the model
    #[arg(long, env = "MAX_IMAGE_DIMENSION", default_value_t = 800)]
    pub max_dimension: u32,

    /// Images declaring more pixels than this are rejected before decoding
    #[arg(long, env = "MAX_IMAGE_PIXELS", default_value_t = 89_478_485)]
    pub max_pixels: u64,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Decode timeout in milliseconds
    #[arg(long, env = "DECODE_TIMEOUT_MS", default_value_t = 10_000)]
    pub decode_timeout_ms: u64,

    /// Timeout for one model call, in seconds
    #[arg(long, env = "MODEL_TIMEOUT_SECS", default_value_t = 60)]
    pub model_timeout_secs: u64,
}

impl Config {
    /// Reject values that would make the service unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "MAX_IMAGE_DIMENSION must be greater than 0".to_string(),
            ));
        }
        if self.max_pixels == 0 {
            return Err(ConfigError::Validation(
                "MAX_IMAGE_PIXELS must be greater than 0".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "MAX_UPLOAD_BYTES must be greater than 0".to_string(),
            ));
        }
        if self.decode_timeout_ms == 0 || self.model_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Validation(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            )));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "GEMINI_API_BASE must be an http(s) URL, got '{}'",
                self.api_base
            )));
        }
        Ok(())
    }

    /// The API key, if one was given and is not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn preprocess_limits(&self) -> PreprocessLimits {
        PreprocessLimits {
            max_dimension: self.max_dimension,
            max_pixels: self.max_pixels,
            decode_timeout_ms: self.decode_timeout_ms,
        }
    }
}
