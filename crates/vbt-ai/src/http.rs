//! HTTP adapter for the detection services.
//!
//! One client implements all three service traits against a single base
//! URL. Frames travel as base64 PNG data URLs.

use crate::error::{AiError, AiResult};
use crate::services::{
    ImplementDetector, ObjectDetection, PoseDetection, PoseEstimator, ScaleEstimate,
    ScaleEstimator,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use vbt_core::RasterFrame;

/// Connection settings for the detection services.
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameRequest {
    image: String,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_size_mm: Option<f64>,
}

/// Blocking client for `/api/detect-*`.
pub struct HttpServices {
    http: Client,
    config: HttpServiceConfig,
    available: OnceLock<bool>,
}

impl HttpServices {
    pub fn new(config: HttpServiceConfig) -> AiResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            available: OnceLock::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Queries `/api/ai-status` once and remembers the answer.
    pub fn status(&self) -> bool {
        *self.available.get_or_init(|| {
            match self.http.get(self.url("/api/ai-status")).send() {
                Ok(response) if response.status().is_success() => true,
                Ok(response) => {
                    warn!(status = response.status().as_u16(), "AI services report unavailable");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "AI status check failed");
                    false
                }
            }
        })
    }

    fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        frame: &RasterFrame,
        reference_size_mm: Option<f64>,
    ) -> AiResult<T> {
        let request = FrameRequest {
            image: encode_png_data_url(frame)?,
            width: frame.width(),
            height: frame.height(),
            reference_size_mm,
        };
        let url = self.url(path);
        debug!(%url, width = request.width, height = request.height, "AI request");

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 503 {
            return Err(AiError::Unavailable(format!("{url} returned 503")));
        }
        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// PNG-encode a frame as a `data:` URL.
pub fn encode_png_data_url(frame: &RasterFrame) -> AiResult<String> {
    let buffer = image::RgbaImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| AiError::Encoding("frame buffer does not match its size".to_string()))?;
    let mut png = Cursor::new(Vec::new());
    buffer
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| AiError::Encoding(e.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())))
}

impl ScaleEstimator for HttpServices {
    fn is_available(&self) -> bool {
        self.status()
    }

    fn estimate_scale(&self, frame: &RasterFrame, reference_size_mm: f64) -> AiResult<ScaleEstimate> {
        self.post("/api/detect-calibration", frame, Some(reference_size_mm))
    }
}

impl ImplementDetector for HttpServices {
    fn is_available(&self) -> bool {
        self.status()
    }

    fn detect(&self, frame: &RasterFrame) -> AiResult<ObjectDetection> {
        self.post("/api/detect-barbell", frame, None)
    }
}

impl PoseEstimator for HttpServices {
    fn is_available(&self) -> bool {
        self.status()
    }

    fn estimate_pose(&self, frame: &RasterFrame) -> AiResult<PoseDetection> {
        self.post("/api/detect-pose", frame, None)
    }
}
