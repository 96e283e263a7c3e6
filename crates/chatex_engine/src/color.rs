//! CSS color normalization for the rasterizer, which only understands
//! `rgb()`/`rgba()` and hex colors.

use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};

pub type Rgb = [u8; 3];

static MODERN_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\b(?:oklch|oklab|lch|lab|color)\s*\([^)]+\)")
        .case_insensitive(true)
        .build()
        .expect("static regex")
});
static MODERN_COLOR_WORD: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\b(oklch|oklab|lch|lab)\b")
        .case_insensitive(true)
        .build()
        .expect("static regex")
});
static RGB_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"rgba?\(([^)]+)\)")
        .case_insensitive(true)
        .build()
        .expect("static regex")
});

/// True when `value` mentions a color function the rasterizer cannot parse.
pub fn has_modern_color(value: &str) -> bool {
    MODERN_COLOR_WORD.is_match(value)
}

/// Replaces every convertible modern color function in a style value with
/// its sRGB equivalent. Unconvertible functions are left as they are.
pub fn sanitize_style_string(value: &str) -> String {
    if !MODERN_COLOR.is_match(value) {
        return value.to_string();
    }
    MODERN_COLOR
        .replace_all(value, |caps: &Captures<'_>| {
            let matched = &caps[0];
            convert_modern_color(matched).unwrap_or_else(|| matched.to_string())
        })
        .into_owned()
}

/// `rgb(r, g, b)` (or `rgba(r, g, b, a)`) for one `oklab()`, `oklch()`,
/// `lab()`, `lch()` or `color(srgb|srgb-linear ...)` value.
pub fn convert_modern_color(value: &str) -> Option<String> {
    let value = value.trim();
    let open = value.find('(')?;
    let close = value.rfind(')')?;
    let function = value[..open].trim().to_ascii_lowercase();
    let body = &value[open + 1..close];
    let (channels, alpha) = split_alpha(body);
    let mut parts: Vec<&str> = channels.split_whitespace().collect();

    let linear = match function.as_str() {
        "oklab" => {
            let [l, a, b] = three(&parts)?;
            oklab_to_linear_srgb(
                component(l, 1.0)?,
                component(a, 0.4)?,
                component(b, 0.4)?,
            )
        }
        "oklch" => {
            let [l, c, h] = three(&parts)?;
            let (a, b) = polar(component(c, 0.4)?, hue(h)?);
            oklab_to_linear_srgb(component(l, 1.0)?, a, b)
        }
        "lab" => {
            let [l, a, b] = three(&parts)?;
            lab_to_linear_srgb(component(l, 100.0)?, component(a, 125.0)?, component(b, 125.0)?)
        }
        "lch" => {
            let [l, c, h] = three(&parts)?;
            let (a, b) = polar(component(c, 150.0)?, hue(h)?);
            lab_to_linear_srgb(component(l, 100.0)?, a, b)
        }
        "color" => {
            if parts.is_empty() {
                return None;
            }
            let space = parts.remove(0).to_ascii_lowercase();
            let [r, g, b] = three(&parts)?;
            let rgb = [component(r, 1.0)?, component(g, 1.0)?, component(b, 1.0)?];
            match space.as_str() {
                "srgb" => rgb.map(srgb_to_linear),
                "srgb-linear" => rgb,
                _ => return None,
            }
        }
        _ => return None,
    };

    let [r, g, b] = linear.map(|c| (linear_to_srgb(c).clamp(0.0, 1.0) * 255.0).round() as u8);
    let alpha = match alpha {
        Some(raw) => component(raw, 1.0)?.clamp(0.0, 1.0),
        None => 1.0,
    };
    Some(if alpha < 1.0 {
        format!("rgba({r}, {g}, {b}, {})", trim_float(alpha))
    } else {
        format!("rgb({r}, {g}, {b})")
    })
}

fn split_alpha(body: &str) -> (&str, Option<&str>) {
    match body.split_once('/') {
        Some((channels, alpha)) => (channels, Some(alpha.trim())),
        None => (body, None),
    }
}

fn three<'a>(parts: &[&'a str]) -> Option<[&'a str; 3]> {
    match parts {
        [a, b, c] => Some([*a, *b, *c]),
        _ => None,
    }
}

/// A number, a percentage of `percent_scale`, or `none`.
fn component(raw: &str, percent_scale: f64) -> Option<f64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Some(0.0);
    }
    let value = match raw.strip_suffix('%') {
        Some(pct) => pct.parse::<f64>().ok()? / 100.0 * percent_scale,
        None => raw.parse::<f64>().ok()?,
    };
    value.is_finite().then_some(value)
}

fn hue(raw: &str) -> Option<f64> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw == "none" {
        return Some(0.0);
    }
    let (number, factor) = if let Some(v) = raw.strip_suffix("deg") {
        (v, 1.0)
    } else if let Some(v) = raw.strip_suffix("grad") {
        (v, 0.9)
    } else if let Some(v) = raw.strip_suffix("rad") {
        (v, 180.0 / std::f64::consts::PI)
    } else if let Some(v) = raw.strip_suffix("turn") {
        (v, 360.0)
    } else {
        (raw.as_str(), 1.0)
    };
    let degrees = number.parse::<f64>().ok()? * factor;
    degrees.is_finite().then_some(degrees)
}

fn polar(chroma: f64, hue_degrees: f64) -> (f64, f64) {
    let radians = hue_degrees.to_radians();
    (chroma * radians.cos(), chroma * radians.sin())
}

fn oklab_to_linear_srgb(l: f64, a: f64, b: f64) -> [f64; 3] {
    let l_ = l + 0.396_337_777_4 * a + 0.215_803_757_3 * b;
    let m_ = l - 0.105_561_345_8 * a - 0.063_854_172_8 * b;
    let s_ = l - 0.089_484_177_5 * a - 1.291_485_548_0 * b;
    let (l3, m3, s3) = (l_.powi(3), m_.powi(3), s_.powi(3));
    [
        4.076_741_662_1 * l3 - 3.307_711_591_3 * m3 + 0.230_969_929_2 * s3,
        -1.268_438_004_6 * l3 + 2.609_757_401_1 * m3 - 0.341_319_396_5 * s3,
        -0.004_196_086_3 * l3 - 0.703_418_614_7 * m3 + 1.707_614_701_0 * s3,
    ]
}

const D50_WHITE: [f64; 3] = [0.3457 / 0.3585, 1.0, (1.0 - 0.3457 - 0.3585) / 0.3585];

const D50_TO_D65: [[f64; 3]; 3] = [
    [0.955_473_421_488_075, -0.023_098_454_948_764_71, 0.063_259_243_200_570_72],
    [-0.028_369_709_333_863_7, 1.009_995_398_081_304_1, 0.021_041_441_191_917_323],
    [0.012_314_014_864_481_998, -0.020_507_649_298_898_964, 1.330_365_926_242_124],
];

const XYZ_D65_TO_LINEAR_SRGB: [[f64; 3]; 3] = [
    [3.240_969_941_904_522_6, -1.537_383_177_570_094, -0.498_610_760_293_003_4],
    [-0.969_243_636_280_879_6, 1.875_967_501_507_720_2, 0.041_555_057_407_175_59],
    [0.055_630_079_696_993_66, -0.203_976_958_888_976_52, 1.056_971_514_242_878_6],
];

fn mul(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [0, 1, 2].map(|row| m[row][0] * v[0] + m[row][1] * v[1] + m[row][2] * v[2])
}

fn lab_to_linear_srgb(l: f64, a: f64, b: f64) -> [f64; 3] {
    const EPSILON: f64 = 216.0 / 24389.0;
    const KAPPA: f64 = 24389.0 / 27.0;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let x = if fx.powi(3) > EPSILON { fx.powi(3) } else { (116.0 * fx - 16.0) / KAPPA };
    let y = if l > KAPPA * EPSILON { fy.powi(3) } else { l / KAPPA };
    let z = if fz.powi(3) > EPSILON { fz.powi(3) } else { (116.0 * fz - 16.0) / KAPPA };
    let xyz_d50 = [x * D50_WHITE[0], y * D50_WHITE[1], z * D50_WHITE[2]];
    mul(&XYZ_D65_TO_LINEAR_SRGB, mul(&D50_TO_D65, xyz_d50))
}

fn srgb_to_linear(c: f64) -> f64 {
    let abs = c.abs();
    if abs <= 0.040_45 {
        c / 12.92
    } else {
        c.signum() * ((abs + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    let abs = c.abs();
    if abs <= 0.003_130_8 {
        c * 12.92
    } else {
        c.signum() * (1.055 * abs.powf(1.0 / 2.4) - 0.055)
    }
}

fn trim_float(value: f64) -> String {
    let text = format!("{value:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// `#rgb` or `#rrggbb`.
pub fn parse_hex_color(input: &str) -> Option<Rgb> {
    let hex = input.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

fn named_color(value: &str) -> Option<Rgb> {
    match value.trim().to_ascii_lowercase().as_str() {
        "white" => Some([255, 255, 255]),
        "black" => Some([0, 0, 0]),
        "gray" | "grey" => Some([128, 128, 128]),
        "red" => Some([255, 0, 0]),
        "green" => Some([0, 128, 0]),
        "blue" => Some([0, 0, 255]),
        _ => None,
    }
}

/// Channels of an `rgb()`/`rgba()` value and its alpha, when present.
fn rgb_channels(value: &str) -> Option<([f64; 3], Option<f64>)> {
    let caps = RGB_FUNCTION.captures(value)?;
    let inner = caps.get(1)?.as_str().replace(['/', ','], " ");
    let parts: Vec<&str> = inner.split_whitespace().collect();
    let [r, g, b] = three(parts.get(..3)?)?;
    let rgb = [component(r, 255.0)?, component(g, 255.0)?, component(b, 255.0)?];
    let alpha = match parts.get(3) {
        Some(raw) => Some(component(raw, 1.0)?),
        None => None,
    };
    Some((rgb, alpha))
}

/// Any supported color string as an RGB triple, `fallback` when unparsable.
pub fn color_to_rgb(value: &str, fallback: Rgb) -> Rgb {
    if let Some(rgb) = parse_hex_color(value).or_else(|| named_color(value)) {
        return rgb;
    }
    let normalized = convert_modern_color(value).unwrap_or_else(|| value.to_string());
    match rgb_channels(&normalized) {
        Some((channels, _)) => channels.map(|c| c.round().clamp(0.0, 255.0) as u8),
        None => fallback,
    }
}

/// `transparent`, empty, or an alpha below 0.02.
pub fn is_transparent_color(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() || normalized == "transparent" {
        return true;
    }
    matches!(rgb_channels(&normalized), Some((_, Some(alpha))) if alpha < 0.02)
}

pub fn relative_luminance(rgb: Rgb) -> f64 {
    let linear = rgb.map(|channel| {
        let value = f64::from(channel) / 255.0;
        if value <= 0.039_28 {
            value / 12.92
        } else {
            ((value + 0.055) / 1.055).powf(2.4)
        }
    });
    0.2126 * linear[0] + 0.7152 * linear[1] + 0.0722 * linear[2]
}

pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let (l1, l2) = (relative_luminance(a), relative_luminance(b));
    (l1.max(l2) + 0.05) / (l1.min(l2) + 0.05)
}

/// Perceived brightness below 140 of 255.
pub fn is_dark_color(rgb: Rgb) -> bool {
    let [r, g, b] = rgb.map(f64::from);
    (r * 299.0 + g * 587.0 + b * 114.0) / 1000.0 < 140.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_expand_short_form() {
        assert_eq!(parse_hex_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_hex_color(" #1a2b3c "), Some([26, 43, 60]));
        assert_eq!(parse_hex_color("#12"), None);
        assert_eq!(parse_hex_color("1a2b3c"), None);
    }

    #[test]
    fn modern_functions_become_srgb() {
        assert_eq!(convert_modern_color("oklch(1 0 0)").as_deref(), Some("rgb(255, 255, 255)"));
        assert_eq!(convert_modern_color("oklab(0 0 0)").as_deref(), Some("rgb(0, 0, 0)"));
        assert_eq!(
            convert_modern_color("color(srgb 1 0 0 / 0.5)").as_deref(),
            Some("rgba(255, 0, 0, 0.5)")
        );
        assert_eq!(convert_modern_color("color(display-p3 1 0 0)"), None);
        assert_eq!(convert_modern_color("hsl(0 0% 0%)"), None);
    }

    #[test]
    fn style_strings_keep_everything_but_the_color_functions() {
        assert_eq!(
            sanitize_style_string("color: oklch(0 0 0); margin: 0"),
            "color: rgb(0, 0, 0); margin: 0"
        );
        assert_eq!(sanitize_style_string("color: red"), "color: red");
        assert!(has_modern_color("background: OKLAB(0.5 0 0)"));
        assert!(!has_modern_color("background: #fff"));
    }

    #[test]
    fn any_color_string_reduces_to_rgb() {
        assert_eq!(color_to_rgb("rgba(10, 20, 30, 0.5)", [0, 0, 0]), [10, 20, 30]);
        assert_eq!(color_to_rgb("rgb(10 20 30 / 50%)", [0, 0, 0]), [10, 20, 30]);
        assert_eq!(color_to_rgb("white", [0, 0, 0]), [255, 255, 255]);
        assert_eq!(color_to_rgb("nonsense", [1, 2, 3]), [1, 2, 3]);
    }

    #[test]
    fn transparency_and_darkness() {
        assert!(is_transparent_color(""));
        assert!(is_transparent_color("rgba(0, 0, 0, 0)"));
        assert!(!is_transparent_color("#000"));
        assert!(is_dark_color([33, 33, 33]));
        assert!(!is_dark_color([255, 255, 255]));
        assert!((contrast_ratio([0, 0, 0], [255, 255, 255]) - 21.0).abs() < 1e-9);
    }
}
