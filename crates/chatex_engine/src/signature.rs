use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::{Attachment, ImageDescriptor, Role};

/// First 4 bytes of the SHA-256 digest as lowercase hex.
pub fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Collapses whitespace and keeps the first 1200 characters.
pub fn normalize_signature_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(1200)
        .collect()
}

pub struct SignatureInput<'a> {
    pub site: &'a str,
    pub role: Role,
    pub text: &'a str,
    pub markdown: &'a str,
    pub html: &'a str,
    pub images: &'a [ImageDescriptor],
    pub attachments: &'a [Attachment],
}

pub fn base_signature(input: &SignatureInput<'_>) -> String {
    let images = input
        .images
        .iter()
        .map(|img| img.src.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let attachments = input
        .attachments
        .iter()
        .map(|a| a.href.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let parts = [
        input.site.to_string(),
        input.role.as_str().to_string(),
        normalize_signature_text(input.text),
        normalize_signature_text(input.markdown),
        normalize_signature_text(input.html),
        images,
        attachments,
    ];
    format!("ced-{}", short_hash(&parts.join("||")))
}

/// Hands out `{base}-{n}` ids, `n` counting earlier turns with the same base.
#[derive(Debug, Default)]
pub struct OccurrenceCounter {
    seen: HashMap<String, usize>,
}

impl OccurrenceCounter {
    pub fn next_id(&mut self, base: &str) -> String {
        let slot = self.seen.entry(base.to_string()).or_insert(0);
        let id = format!("{base}-{slot}");
        *slot += 1;
        id
    }
}
