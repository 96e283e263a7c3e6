//! Render planning for screenshot and PDF exports, and the rasterizer
//! fallback chain.

use std::sync::Arc;

use chatex_logging::chatex_warn;
use image::{Rgba, RgbaImage};
use scraper::ElementRef;

use crate::color::{color_to_rgb, has_modern_color, sanitize_style_string};
use crate::dom::LiveDocument;
use crate::fragment::FragmentElement;
use crate::raster::Rasterizer;
use crate::{ExportEvent, ProgressSink};

pub const MIN_RENDER_WIDTH: u32 = 360;
pub const MAX_RENDER_WIDTH: u32 = 1400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Screenshot,
    Pdf,
}

/// A hyperlink region in CSS pixels relative to the snapshot root.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRect {
    pub href: String,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Everything a rasterizer needs. Owned, so it can cross await points.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub html: String,
    /// Layout width in CSS pixels.
    pub width: u32,
    /// Layout height in CSS pixels.
    pub height: u32,
    pub scale: f64,
    pub background: String,
    pub target: RenderTarget,
}

impl RenderJob {
    /// Canvas size in device pixels.
    pub fn output_size(&self) -> (u32, u32) {
        let w = (f64::from(self.width) * self.scale).floor().max(1.0) as u32;
        let h = (f64::from(self.height) * self.scale).floor().max(1.0) as u32;
        (w, h)
    }
}

pub fn clamp_render_width(measured: f64) -> u32 {
    let measured = if measured.is_finite() { measured.ceil() } else { 0.0 };
    (measured.max(0.0) as u32).clamp(MIN_RENDER_WIDTH, MAX_RENDER_WIDTH)
}

/// Content height, or an estimate from the turn count when layout reports
/// less than 40px.
pub fn render_height(content_height: f64, turn_count: usize) -> u32 {
    let height = if content_height.is_finite() { content_height.ceil().max(0.0) } else { 0.0 };
    if height < 40.0 {
        let estimate = (turn_count as f64 * 140.0).max(360.0);
        return height.max(estimate) as u32;
    }
    height as u32
}

/// Upper bound on the device scale for a target and layout size.
pub fn scale_cap(target: RenderTarget, estimated_pixels: f64) -> f64 {
    match target {
        RenderTarget::Screenshot => 2.0,
        RenderTarget::Pdf if estimated_pixels > 55_000_000.0 => 1.0,
        RenderTarget::Pdf if estimated_pixels > 30_000_000.0 => 1.2,
        RenderTarget::Pdf => 1.35,
    }
}

/// `max(1, min(dpr, cap))`.
pub fn render_scale(target: RenderTarget, device_pixel_ratio: f64, width: u32, height: u32) -> f64 {
    let estimated = f64::from(width) * f64::from(height.max(1));
    let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };
    dpr.min(scale_cap(target, estimated)).max(1.0)
}

/// Link regions of every sized `a[href]` under `root`, relative to `root`.
pub fn collect_link_rects(doc: &LiveDocument, root: ElementRef<'_>) -> Vec<LinkRect> {
    let probe = doc.probe();
    let origin = probe.rect(root);
    let (root_left, root_top) = origin.map(|r| (r.left, r.top)).unwrap_or((0.0, 0.0));
    root.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "a")
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let rect = probe.rect(anchor)?;
            if rect.width == 0.0 || rect.height == 0.0 {
                return None;
            }
            Some(LinkRect {
                href: doc.normalize_url(href),
                left: rect.left - root_left,
                top: rect.top - root_top,
                width: rect.width,
                height: rect.height,
            })
        })
        .collect()
}

/// Readies a snapshot for a rasterizer: lazy and contained content made
/// visible, sticky elements made static, motion disabled, images loaded
/// eagerly and modern color syntax converted to sRGB.
pub fn prepare_snapshot_for_render(root: &mut FragmentElement) {
    root.for_each_mut(&mut |el| {
        el.append_style("content-visibility: visible !important");
        el.append_style("contain: none !important");
        let sticky = el
            .attr("style")
            .is_some_and(|s| s.replace(' ', "").to_ascii_lowercase().contains("position:sticky"));
        if sticky {
            el.append_style("position: static");
        }
        el.append_style("transition: none");
        el.append_style("animation: none");
        if el.name == "img" {
            el.set_attr("loading", "eager");
        }
        for attr in ["style", "fill", "stroke"] {
            if let Some(value) = el.attr(attr).filter(|v| has_modern_color(v)) {
                let sanitized = sanitize_style_string(value);
                el.set_attr(attr, sanitized);
            }
        }
    });
}

const WARNING_RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const WARNING_MARK: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn fill_rect(canvas: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
    let (x1, y1) = (x1.min(canvas.width()), y1.min(canvas.height()));
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

/// Last-resort canvas: the page background with a red warning band and a
/// white exclamation mark centred on it.
pub fn error_canvas(job: &RenderJob) -> RgbaImage {
    let (w, h) = job.output_size();
    let [r, g, b] = color_to_rgb(&job.background, [255, 255, 255]);
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([r, g, b, 255]));
    let scale = job.scale.max(1.0);
    let top = (36.0 * scale) as u32;
    let bottom = ((88.0 * scale) as u32).min(h);
    let left = (20.0 * scale) as u32;
    let right = w.saturating_sub(left);
    if bottom <= top || right <= left {
        return canvas;
    }
    fill_rect(&mut canvas, left, top, right, bottom, WARNING_RED);

    let band = bottom - top;
    let stroke = (band / 8).max(2);
    let x0 = (w / 2).saturating_sub(stroke / 2);
    let at = |fraction: f64| top + (f64::from(band) * fraction) as u32;
    fill_rect(&mut canvas, x0, at(0.15), x0 + stroke, at(0.62), WARNING_MARK);
    fill_rect(&mut canvas, x0, at(0.72), x0 + stroke, at(0.85), WARNING_MARK);
    canvas
}

/// Primary rasterizer, then secondary, then [`error_canvas`]. Never fails.
pub struct RenderPipeline {
    primary: Arc<dyn Rasterizer>,
    secondary: Arc<dyn Rasterizer>,
}

impl RenderPipeline {
    pub fn new(primary: Arc<dyn Rasterizer>, secondary: Arc<dyn Rasterizer>) -> Self {
        Self { primary, secondary }
    }

    pub async fn render(&self, job: &RenderJob, run: u64, sink: &dyn ProgressSink) -> RgbaImage {
        for rasterizer in [&self.primary, &self.secondary] {
            match rasterizer.rasterize(job).await {
                Ok(canvas) => return canvas,
                Err(err) => {
                    chatex_warn!("Rasterizer {} failed: {}", rasterizer.name(), err);
                    sink.emit(ExportEvent::RenderFallback {
                        run,
                        rasterizer: rasterizer.name().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        error_canvas(job)
    }
}
