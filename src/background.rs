use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tracing::{info, error};

use crate::models::Canvas;

pub const DEFAULT_BASE_URL: &str = "https://picsum.photos";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("background request timed out after {0}s")]
    Timeout(u64),
    #[error("background source returned {0}")]
    Status(u16),
    #[error("background encode error: {0}")]
    Encode(String),
}

/// Supplies raster bytes in any standard image format.
#[async_trait]
pub trait BackgroundSource: Send + Sync + std::fmt::Debug {
    async fn fetch(&self) -> Result<Bytes, FetchError>;
}

/// Random photos from a Lorem Picsum compatible service, sized to the canvas.
#[derive(Debug)]
pub struct PicsumBackground {
    client: Client,
    base_url: String,
    canvas: Canvas,
    timeout_secs: u64,
}

impl PicsumBackground {
    pub fn new(base_url: String, canvas: Canvas, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client, base_url, canvas, timeout_secs })
    }

    fn url(&self, seed: u32) -> String {
        format!("{}/{}/{}.jpg?random={}", self.base_url.trim_end_matches('/'), self.canvas.width, self.canvas.height, seed)
    }
}

#[async_trait]
impl BackgroundSource for PicsumBackground {
    async fn fetch(&self) -> Result<Bytes, FetchError> {
        let url = self.url(rand::thread_rng().gen());
        info!("🖼️ Fetching background from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() { FetchError::Timeout(self.timeout_secs) } else { FetchError::Http(e.to_string()) }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("❌ Background fetch failed with status {}", status);
            return Err(FetchError::Status(status.as_u16()));
        }

        response.bytes().await.map_err(|e| FetchError::Http(e.to_string()))
    }
}

/// Offline source: a single-colour PNG of the canvas size.
#[derive(Debug, Clone)]
pub struct SolidBackground {
    canvas: Canvas,
    color: [u8; 3],
}

impl SolidBackground {
    pub fn new(canvas: Canvas, color: [u8; 3]) -> Self {
        Self { canvas, color }
    }
}

#[async_trait]
impl BackgroundSource for SolidBackground {
    async fn fetch(&self) -> Result<Bytes, FetchError> {
        let img = RgbImage::from_pixel(self.canvas.width, self.canvas.height, Rgb(self.color));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| FetchError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }
}
