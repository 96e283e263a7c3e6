//! Geometry and visibility questions the extraction engine asks the page.

use scraper::{ElementRef, Html};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        (self.width * self.height).max(0.0)
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Answers layout questions about elements of a [`crate::LiveDocument`].
///
/// `rect` returns `None` when the geometry is unknown; callers treat such
/// elements as visible with zero area.
pub trait PageProbe {
    fn rect(&self, element: ElementRef<'_>) -> Option<Rect>;
    fn is_hidden(&self, element: ElementRef<'_>) -> bool;
    /// PNG data URL for the current pixels of a `<canvas>`.
    fn canvas_data_url(&self, element: ElementRef<'_>) -> Option<String>;
    fn background_color(&self, html: &Html) -> Option<String>;
    fn device_pixel_ratio(&self) -> f64;
    fn viewport_width(&self) -> f64;
}

pub const RECT_ATTR: &str = "data-ced-rect";
pub const CANVAS_ATTR: &str = "data-ced-canvas";
pub const BACKGROUND_ATTR: &str = "data-ced-bg";
pub const DPR_ATTR: &str = "data-ced-dpr";
pub const VIEWPORT_ATTR: &str = "data-ced-viewport";

/// Probe for captured markup: geometry is read from `data-ced-*` attributes
/// written by the capturing browser, visibility from `hidden` and inline styles.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupProbe {
    device_pixel_ratio: f64,
    viewport_width: f64,
}

impl Default for MarkupProbe {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            viewport_width: 1280.0,
        }
    }
}

impl MarkupProbe {
    pub fn from_html(html: &Html) -> Self {
        let root = html.root_element();
        let mut probe = Self::default();
        if let Some(dpr) = root
            .value()
            .attr(DPR_ATTR)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
        {
            probe.device_pixel_ratio = dpr;
        }
        if let Some(width) = root
            .value()
            .attr(VIEWPORT_ATTR)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
        {
            probe.viewport_width = width;
        }
        probe
    }
}

impl PageProbe for MarkupProbe {
    fn rect(&self, element: ElementRef<'_>) -> Option<Rect> {
        parse_rect(element.value().attr(RECT_ATTR)?)
    }

    fn is_hidden(&self, element: ElementRef<'_>) -> bool {
        if inline_style_has(element, "visibility", "hidden") {
            return true;
        }
        std::iter::once(element)
            .chain(element.ancestors().filter_map(ElementRef::wrap))
            .any(|el| el.value().attr("hidden").is_some() || inline_style_has(el, "display", "none"))
    }

    fn canvas_data_url(&self, element: ElementRef<'_>) -> Option<String> {
        element
            .value()
            .attr(CANVAS_ATTR)
            .map(str::trim)
            .filter(|v| v.starts_with("data:image/"))
            .map(str::to_string)
    }

    fn background_color(&self, html: &Html) -> Option<String> {
        let root = html.root_element();
        let body = root
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "body");
        let stamped = body
            .and_then(|b| b.value().attr(BACKGROUND_ATTR))
            .or_else(|| root.value().attr(BACKGROUND_ATTR));
        if let Some(value) = stamped.map(str::trim).filter(|v| !v.is_empty()) {
            return Some(value.to_string());
        }
        let body = body?;
        inline_style_value(body, "background-color").or_else(|| inline_style_value(body, "background"))
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    fn viewport_width(&self) -> f64 {
        self.viewport_width
    }
}

fn parse_rect(raw: &str) -> Option<Rect> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [left, top, width, height] if parts.iter().all(|v| v.is_finite()) => {
            Some(Rect::new(*left, *top, width.max(0.0), height.max(0.0)))
        }
        _ => None,
    }
}

pub(crate) fn inline_style_value(element: ElementRef<'_>, property: &str) -> Option<String> {
    let style = element.value().attr("style")?;
    style.split(';').find_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(property) {
            let value = value.trim().trim_end_matches("!important").trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

fn inline_style_has(element: ElementRef<'_>, property: &str, expected: &str) -> bool {
    inline_style_value(element, property).is_some_and(|v| v.eq_ignore_ascii_case(expected))
}
