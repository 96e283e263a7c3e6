use scraper::ElementRef;

use crate::dom::LiveDocument;

/// Conversation title: the highlighted sidebar entry when the site has one,
/// else the document title minus the site suffix, else the site default.
pub fn detect_conversation_title(doc: &LiveDocument) -> String {
    let site = doc.site();
    if let Some(sel) = site.active_title.as_ref() {
        let sidebar = doc
            .html()
            .select(sel)
            .next()
            .map(|el: ElementRef<'_>| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if !sidebar.is_empty() {
            return sidebar;
        }
    }
    let raw = doc.document_title();
    let stripped = match site.title_strip.as_ref() {
        Some(re) => re.replace(&raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    };
    if stripped.is_empty() {
        doc.adapter().default_title.to_string()
    } else {
        stripped
    }
}
