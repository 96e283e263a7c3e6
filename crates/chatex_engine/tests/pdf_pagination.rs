use chatex_engine::pdf::{build_pdf, encoding_tier, page_layout, split_links, Compression, PdfError, A4_HEIGHT_PT};
use chatex_engine::render::LinkRect;
use image::{Rgba, RgbaImage};
use lopdf::{Document, Object};
use pretty_assertions::assert_eq;

fn link(href: &str, top: f64, height: f64) -> LinkRect {
    LinkRect {
        href: href.to_string(),
        left: 10.0,
        top,
        width: 120.0,
        height,
    }
}

fn link_annotations(doc: &Document) -> usize {
    doc.objects
        .values()
        .filter_map(|object| object.as_dict().ok())
        .filter(|dict| matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Link"))
        .count()
}

#[test]
fn canvas_is_cut_into_a4_bands() {
    let layout = page_layout(1240, 4000);

    assert_eq!(layout.page_height_px, 1753);
    assert_eq!(layout.page_count, 3);
    assert!((layout.pt_per_canvas_px * 1240.0 - layout.page_width_pt).abs() < 1e-9);
    assert_eq!(page_layout(1240, 1).page_count, 1);
    assert_eq!(page_layout(1240, 1753).page_count, 1);
    assert_eq!(page_layout(1240, 1754).page_count, 2);
}

#[test]
fn larger_documents_get_cheaper_encoding() {
    let small = encoding_tier(3, 5_000_000, false);
    assert!((small.quality - 0.84).abs() < 1e-9);
    assert_eq!(small.compression, Compression::Medium);

    let long = encoding_tier(23, 5_000_000, false);
    assert!((long.quality - 0.76).abs() < 1e-9);
    assert_eq!(long.compression, Compression::Medium);

    let huge = encoding_tier(41, 5_000_000, false);
    assert!((huge.quality - 0.70).abs() < 1e-9);
    assert_eq!(huge.compression, Compression::Fast);

    let enormous = encoding_tier(10, 130_000_000, false);
    assert!((enormous.quality - 0.62).abs() < 1e-9);
    assert_eq!(enormous.compression, Compression::Fast);
}

#[test]
fn dark_backgrounds_get_a_quality_bump_with_a_ceiling() {
    assert!((encoding_tier(1, 1_000, true).quality - 0.89).abs() < 1e-9);
    assert!((encoding_tier(41, 1_000, true).quality - 0.75).abs() < 1e-9);
    assert!(encoding_tier(1, 1_000, true).quality <= 0.89 + 1e-9);
}

#[test]
fn a_link_crossing_a_page_boundary_is_split_without_losing_height() {
    let crossing = link("https://www.rust-lang.org/", 800.0, 100.0);

    let parts = split_links(&[crossing], 1.0, A4_HEIGHT_PT, 2);

    assert_eq!(parts.len(), 2);
    assert_eq!((parts[0].page, parts[1].page), (0, 1));
    assert!((parts[0].y - 800.0).abs() < 1e-9);
    assert!(parts[1].y.abs() < 1e-9);
    let total: f64 = parts.iter().map(|p| p.height).sum();
    assert!((total - 100.0).abs() < 1e-9);
    assert!(parts.iter().all(|p| p.url == "https://www.rust-lang.org/"));
}

#[test]
fn links_are_scaled_and_clipped_to_existing_pages() {
    let links = [link("https://a.example/", 20.0, 10.0), link("https://b.example/", 4000.0, 10.0)];

    let parts = split_links(&links, 0.5, A4_HEIGHT_PT, 2);

    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].url, "https://a.example/");
    assert!((parts[0].x - 5.0).abs() < 1e-9);
    assert!((parts[0].y - 10.0).abs() < 1e-9);
    assert!((parts[0].width - 60.0).abs() < 1e-9);
    assert!((parts[0].height - 5.0).abs() < 1e-9);
}

#[test]
fn built_document_has_one_page_per_band_and_link_annotations() {
    let canvas = RgbaImage::from_pixel(600, 2000, Rgba([250, 250, 250, 255]));
    let links = [link("https://docs.rs/", 100.0, 20.0), link("https://crates.io/", 840.0, 20.0)];

    let bytes = build_pdf(&canvas, &links, 600.0, [250, 250, 250], false).unwrap();

    assert!(bytes.starts_with(b"%PDF-1.5"));
    let doc = Document::load_mem(&bytes).unwrap();
    assert_eq!(doc.get_pages().len(), page_layout(600, 2000).page_count);
    assert_eq!(doc.get_pages().len(), 3);
    assert_eq!(link_annotations(&doc), 3);
}

#[test]
fn dark_canvas_builds_a_valid_document() {
    let canvas = RgbaImage::from_pixel(800, 300, Rgba([33, 33, 33, 255]));

    let bytes = build_pdf(&canvas, &[], 800.0, [33, 33, 33], true).unwrap();

    let doc = Document::load_mem(&bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
    assert_eq!(link_annotations(&doc), 0);
}

#[test]
fn empty_canvas_is_rejected() {
    let err = build_pdf(&RgbaImage::new(0, 0), &[], 600.0, [255, 255, 255], false).unwrap_err();
    assert!(matches!(err, PdfError::EmptyCanvas));
}
