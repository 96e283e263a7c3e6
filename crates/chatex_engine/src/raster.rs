use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use thiserror::Error;

use crate::render::RenderJob;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("rasterizer unavailable: {0}")]
    Unavailable(String),
    #[error("rendered canvas is empty")]
    EmptyCanvas,
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

/// Turns a prepared snapshot into pixels.
#[async_trait::async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;
    async fn rasterize(&self, job: &RenderJob) -> Result<RgbaImage, RasterError>;
}

/// Serves a PNG capture the host already rendered, scaled to the job's
/// output width.
pub struct CapturedRasterizer {
    png: Vec<u8>,
}

impl CapturedRasterizer {
    pub fn new(png: Vec<u8>) -> Self {
        Self { png }
    }
}

#[async_trait::async_trait]
impl Rasterizer for CapturedRasterizer {
    fn name(&self) -> &str {
        "captured"
    }

    async fn rasterize(&self, job: &RenderJob) -> Result<RgbaImage, RasterError> {
        let decoded = image::load_from_memory_with_format(&self.png, ImageFormat::Png)?.to_rgba8();
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(RasterError::EmptyCanvas);
        }
        let (target_w, _) = job.output_size();
        if target_w == decoded.width() {
            return Ok(decoded);
        }
        let ratio = f64::from(target_w) / f64::from(decoded.width());
        let target_h = ((f64::from(decoded.height()) * ratio).round() as u32).max(1);
        Ok(imageops::resize(&decoded, target_w, target_h, FilterType::Triangle))
    }
}

/// Stand-in when no renderer is wired up.
pub struct UnavailableRasterizer {
    name: String,
}

impl UnavailableRasterizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Rasterizer for UnavailableRasterizer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn rasterize(&self, _job: &RenderJob) -> Result<RgbaImage, RasterError> {
        Err(RasterError::Unavailable(self.name.clone()))
    }
}

pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>, RasterError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas.clone()).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
