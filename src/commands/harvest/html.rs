use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::error::DiscoveryError;

pub fn selector(css: &str) -> Result<Selector, DiscoveryError> {
    Selector::parse(css).map_err(|_| DiscoveryError::Selector {
        selector: css.to_string(),
    })
}

/// Whitespace-collapsed text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn first_text(scope: ElementRef<'_>, css: &Selector) -> Option<String> {
    scope
        .select(css)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

pub fn first_href(scope: ElementRef<'_>, css: &Selector, base_url: &str) -> Option<String> {
    scope
        .select(css)
        .find_map(|element| element.value().attr("href"))
        .and_then(|href| resolve_url(base_url, href))
}

pub fn resolve_url(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(|url| url.to_string())
}

/// Finds the real PDF behind a journal viewer page: the embedded
/// `iframe#pdf`, then an explicit download link.
pub fn find_embedded_pdf_link(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let iframe = Selector::parse("iframe#pdf").ok()?;
    if let Some(src) = document
        .select(&iframe)
        .find_map(|element| element.value().attr("src"))
        .and_then(|src| resolve_url(page_url, src))
    {
        return Some(embedded_viewer_target(&src).unwrap_or(src));
    }

    let download = Selector::parse("a.download").ok()?;
    document
        .select(&download)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_url(page_url, href))
        .find(|href| {
            let lowered = href.to_ascii_lowercase();
            lowered.contains(".pdf") || lowered.contains("/download/")
        })
}

/// Rewrites `/article/view/<id>/<galley>` to `/article/download/<id>/<galley>`.
pub fn view_to_download_url(url: &str) -> Option<String> {
    if url.contains("/article/view/") {
        Some(url.replacen("/article/view/", "/article/download/", 1))
    } else {
        None
    }
}

/// pdf.js viewers carry the document in a `file=` query parameter.
fn embedded_viewer_target(src: &str) -> Option<String> {
    let url = Url::parse(src).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "file")
        .and_then(|(_, value)| resolve_url(src, &value))
}
