//! Detector - Vehicle detection service client
//!
//! ## Responsibilities
//!
//! - `Detector` seam: frame in, boxes out
//! - HTTP client for the external detection service
//!
//! The engine treats any detector failure as an empty frame.

use crate::error::{Error, Result};
use crate::frame_classifier::Detection;
use crate::zone_geometry::BBox;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect vehicles in one JPEG frame
    async fn detect(&self, frame: Vec<u8>) -> Result<Vec<Detection>>;
}

/// Box as returned by the detection service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub conf: Option<f32>,
}

impl From<DetectorBox> for Detection {
    fn from(b: DetectorBox) -> Self {
        Detection {
            bbox: BBox::new(b.x1, b.y1, b.x2, b.y2),
            label: b.label,
            confidence: b.conf,
        }
    }
}

/// Detection service response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub boxes: Vec<DetectorBox>,
}

impl DetectResponse {
    pub fn into_detections(self) -> Vec<Detection> {
        self.boxes.into_iter().map(Detection::from).collect()
    }
}

/// HTTP detector client
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: String) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(30))
    }

    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: Vec<u8>) -> Result<Vec<Detection>> {
        let form = Form::new().part(
            "image",
            Part::bytes(frame)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self.client.post(&self.url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detector(format!(
                "Detection request failed: {} - {}",
                status, body
            )));
        }

        let result: DetectResponse = resp.json().await?;
        Ok(result.into_detections())
    }
}
