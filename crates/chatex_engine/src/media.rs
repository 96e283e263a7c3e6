use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::dom::LiveDocument;
use crate::fragment::FragmentElement;
use crate::markdown::IMAGE_INDEX_ATTR;
use crate::{Attachment, ImageDescriptor};

static ATTACHMENT_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(pdf|docx?|xlsx?|csv|zip)$").expect("static regex"));

const TINY_IMAGE_PX: u32 = 50;

fn dimension(doc: &LiveDocument, img: &FragmentElement, attr: &str) -> u32 {
    if let Some(value) = img
        .attr(attr)
        .and_then(|v| v.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
    {
        return value.round() as u32;
    }
    img.origin
        .and_then(|id| doc.element(id))
        .and_then(|live| doc.probe().rect(live))
        .map(|rect| {
            let v = if attr == "width" { rect.width } else { rect.height };
            v.max(0.0).round() as u32
        })
        .unwrap_or(0)
}

/// Image descriptors for every `<img>` under `root`, skipping icons (both
/// dimensions known and below 50px) and citation thumbnails.
pub fn extract_images(doc: &LiveDocument, root: &FragmentElement) -> Vec<ImageDescriptor> {
    let mut out = Vec::new();
    collect_images(doc, root, false, &mut out);
    out
}

fn collect_images(doc: &LiveDocument, el: &FragmentElement, in_citation: bool, out: &mut Vec<ImageDescriptor>) {
    for child in el.child_elements() {
        let citation = in_citation || child.has_class("citation") || child.has_class("source-citation");
        if child.name == "img" && !citation {
            let width = dimension(doc, child, "width");
            let height = dimension(doc, child, "height");
            let tiny = width > 0 && width < TINY_IMAGE_PX && height > 0 && height < TINY_IMAGE_PX;
            if !tiny {
                out.push(ImageDescriptor {
                    src: child.attr("src").map(|s| doc.normalize_url(s)).unwrap_or_default(),
                    alt: child.attr("alt").unwrap_or_default().to_string(),
                    width,
                    height,
                    index: child.attr(IMAGE_INDEX_ATTR).and_then(|v| v.parse().ok()),
                    data_url: None,
                });
            }
        }
        collect_images(doc, child, citation, out);
    }
}

/// Combines the text-clone images (which carry placeholder indices) with the
/// images of the untouched source, preferring source urls and sizes.
/// Source images not seen in the text clone are appended.
pub fn merge_image_sources(
    markdown_images: Vec<ImageDescriptor>,
    source_images: Vec<ImageDescriptor>,
) -> Vec<ImageDescriptor> {
    let mut ordered: Vec<ImageDescriptor> = markdown_images
        .into_iter()
        .enumerate()
        .map(|(i, md)| match source_images.get(i) {
            Some(src) => ImageDescriptor {
                src: if src.src.is_empty() { md.src } else { src.src.clone() },
                alt: if md.alt.is_empty() { src.alt.clone() } else { md.alt },
                width: if src.width > 0 { src.width } else { md.width },
                height: if src.height > 0 { src.height } else { md.height },
                index: md.index,
                data_url: md.data_url,
            },
            None => md,
        })
        .collect();

    let mut known: HashSet<String> = ordered
        .iter()
        .filter(|img| !img.src.is_empty())
        .map(|img| img.src.clone())
        .collect();
    for source in source_images {
        if source.src.is_empty() || known.contains(&source.src) {
            continue;
        }
        known.insert(source.src.clone());
        ordered.push(source);
    }
    ordered
}

/// Links to downloadable files.
pub fn extract_attachments(doc: &LiveDocument, root: &FragmentElement) -> Vec<Attachment> {
    root.descendants_named("a")
        .into_iter()
        .filter_map(|a| {
            let href = a.attr("href").map(|h| doc.normalize_url(h)).unwrap_or_default();
            let is_file = ATTACHMENT_HREF.is_match(&href) || a.has_attr("download");
            is_file.then(|| Attachment {
                href,
                text: a.text_content().trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(src: &str, index: Option<usize>) -> ImageDescriptor {
        ImageDescriptor {
            src: src.to_string(),
            alt: String::new(),
            width: 0,
            height: 0,
            index,
            data_url: None,
        }
    }

    #[test]
    fn merge_prefers_source_urls_and_appends_unseen() {
        let markdown = vec![img("https://a/1.png", Some(0))];
        let mut first = img("https://a/1-full.png", None);
        first.width = 640;
        let source = vec![first, img("https://a/2.png", None)];
        let merged = merge_image_sources(markdown, source);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].src, "https://a/1-full.png");
        assert_eq!(merged[0].index, Some(0));
        assert_eq!(merged[0].width, 640);
        assert_eq!(merged[1].src, "https://a/2.png");
        assert_eq!(merged[1].index, None);
    }
}
