//! A4 pagination of a rendered conversation canvas.
//!
//! The canvas is cut into page-height bands, each band is JPEG encoded and
//! placed at the top of its page over a background fill, and link regions
//! are remapped into page space, split where they cross a page boundary.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use thiserror::Error;

use crate::color::Rgb;
use crate::render::LinkRect;

pub const A4_WIDTH_PT: f64 = 595.28;
pub const A4_HEIGHT_PT: f64 = 841.89;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("canvas is empty")]
    EmptyCanvas,
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("pdf assembly failed: {0}")]
    Assemble(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Medium,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingTier {
    pub quality: f64,
    pub compression: Compression,
}

/// JPEG quality and compression for a document of the given size. Dark
/// backgrounds band visibly at low quality, so they get +0.05 (max 0.89).
pub fn encoding_tier(page_count: usize, total_pixels: u64, dark_background: bool) -> EncodingTier {
    let (quality, compression) = if total_pixels > 120_000_000 || page_count > 80 {
        (0.62, Compression::Fast)
    } else if total_pixels > 65_000_000 || page_count > 40 {
        (0.70, Compression::Fast)
    } else if total_pixels > 35_000_000 || page_count > 22 {
        (0.76, Compression::Medium)
    } else {
        (0.84, Compression::Medium)
    };
    let quality = if dark_background { (quality + 0.05_f64).min(0.89) } else { quality };
    EncodingTier { quality, compression }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub page_width_pt: f64,
    pub page_height_pt: f64,
    pub pt_per_canvas_px: f64,
    /// Canvas rows per page.
    pub page_height_px: u32,
    pub page_count: usize,
}

pub fn page_layout(canvas_width: u32, canvas_height: u32) -> PageLayout {
    let pt_per_canvas_px = A4_WIDTH_PT / f64::from(canvas_width.max(1));
    let page_height_px = ((A4_HEIGHT_PT / pt_per_canvas_px).floor() as u32).max(1);
    let page_count = (canvas_height.div_ceil(page_height_px) as usize).max(1);
    PageLayout {
        page_width_pt: A4_WIDTH_PT,
        page_height_pt: A4_HEIGHT_PT,
        pt_per_canvas_px,
        page_height_px,
        page_count,
    }
}

/// A link annotation in page space, points from the page's top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub page: usize,
    pub url: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scales CSS-pixel link rectangles by `pt_per_css_px` and splits each at
/// page boundaries: one clipped region per page it touches.
pub fn split_links(links: &[LinkRect], pt_per_css_px: f64, page_height_pt: f64, page_count: usize) -> Vec<PageLink> {
    let mut out = Vec::new();
    for link in links {
        let left = link.left * pt_per_css_px;
        let top = link.top * pt_per_css_px;
        let width = link.width * pt_per_css_px;
        let height = link.height * pt_per_css_px;
        let bottom = top + height;
        let start = (top / page_height_pt).floor() as i64;
        let end = ((bottom - 1e-3) / page_height_pt).floor() as i64;
        for page in start..=end {
            if page < 0 || page as usize >= page_count {
                continue;
            }
            let page_top = page as f64 * page_height_pt;
            let clipped_top = top.max(page_top);
            let clipped_bottom = bottom.min(page_top + page_height_pt);
            let clipped_height = clipped_bottom - clipped_top;
            if clipped_height <= 0.0 {
                continue;
            }
            out.push(PageLink {
                page: page as usize,
                url: link.href.clone(),
                x: left,
                y: clipped_top - page_top,
                width,
                height: clipped_height,
            });
        }
    }
    out
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn encode_band(canvas: &RgbaImage, top: u32, height: u32, quality: f64) -> Result<Vec<u8>, PdfError> {
    let band = imageops::crop_imm(canvas, 0, top, canvas.width(), height).to_image();
    let rgb = DynamicImage::ImageRgba8(band).to_rgb8();
    let mut jpeg = Vec::new();
    let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    JpegEncoder::new_with_quality(&mut jpeg, q).encode_image(&rgb)?;
    Ok(jpeg)
}

/// Builds the paginated document.
///
/// `content_width_px` is the layout width the link rectangles were
/// measured against.
pub fn build_pdf(
    canvas: &RgbaImage,
    links: &[LinkRect],
    content_width_px: f64,
    background: Rgb,
    dark_background: bool,
) -> Result<Vec<u8>, PdfError> {
    if canvas.width() == 0 || canvas.height() == 0 {
        return Err(PdfError::EmptyCanvas);
    }
    let layout = page_layout(canvas.width(), canvas.height());
    let total_pixels = u64::from(canvas.width()) * u64::from(canvas.height());
    let tier = encoding_tier(layout.page_count, total_pixels, dark_background);
    let pt_per_css_px = layout.page_width_pt / content_width_px.max(1.0);
    let page_links = split_links(links, pt_per_css_px, layout.page_height_pt, layout.page_count);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let (pw, ph) = (layout.page_width_pt, layout.page_height_pt);
    let [r, g, b] = background.map(|c| f64::from(c) / 255.0);
    let mut kids: Vec<Object> = Vec::with_capacity(layout.page_count);

    for page in 0..layout.page_count {
        let top = page as u32 * layout.page_height_px;
        let band_height = layout.page_height_px.min(canvas.height() - top);
        let jpeg = encode_band(canvas, top, band_height, tier.quality)?;
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(canvas.width()),
                "Height" => i64::from(band_height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let render_height_pt = f64::from(band_height) * layout.pt_per_canvas_px;
        let content = Content {
            operations: vec![
                Operation::new("rg", vec![real(r), real(g), real(b)]),
                Operation::new("re", vec![real(0.0), real(0.0), real(pw), real(ph)]),
                Operation::new("f", vec![]),
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![real(pw), real(0.0), real(0.0), real(render_height_pt), real(0.0), real(ph - render_height_pt)],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content.encode().map_err(|e| PdfError::Assemble(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let annots: Vec<Object> = page_links
            .iter()
            .filter(|link| link.page == page)
            .map(|link| {
                let rect = vec![
                    real(link.x),
                    real(ph - link.y - link.height),
                    real(link.x + link.width),
                    real(ph - link.y),
                ];
                let annot = doc.add_object(dictionary! {
                    "Type" => "Annot",
                    "Subtype" => "Link",
                    "Rect" => rect,
                    "Border" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
                    "A" => dictionary! {
                        "S" => "URI",
                        "URI" => Object::string_literal(link.url.as_str()),
                    },
                });
                Object::Reference(annot)
            })
            .collect();

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![real(0.0), real(0.0), real(pw), real(ph)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        };
        if !annots.is_empty() {
            page_dict.set("Annots", annots);
        }
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    if tier.compression == Compression::Medium {
        doc.compress();
    }

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| PdfError::Assemble(e.to_string()))?;
    Ok(out)
}
