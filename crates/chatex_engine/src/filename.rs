use crate::site::SiteAdapter;

/// Download name for an export: the user-supplied name, else the detected
/// title, else the site's base name; sanitized, then `.{extension}`.
pub fn export_file_name(
    user_name: Option<&str>,
    title: Option<&str>,
    adapter: &SiteAdapter,
    extension: &str,
) -> String {
    let base = [user_name, title]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(adapter.export_base_name);
    let mut stem = sanitize_title(base);
    if stem.is_empty() {
        stem = sanitize_title(adapter.export_base_name);
    }
    format!("{stem}.{extension}")
}

/// File-system safe stem: forbidden characters become `_`, runs of `_`
/// collapse, at most 80 bytes, reserved device names get a trailing `_`.
pub fn sanitize_title(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }

    let mut final_name = truncate_on_char_boundary(compacted, 80);
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

fn truncate_on_char_boundary(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut cut = max;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
