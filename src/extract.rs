use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::models::{ContextBundle, ScannedImage};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "alt-audit-api/0.1";

/// Character caps for surrounding text: ancestor (`article`/`main`) fallbacks
/// are clipped early, the final value is clipped with an ellipsis marker.
const ANCESTOR_TEXT_LIMIT: usize = 500;
const SURROUNDING_TEXT_LIMIT: usize = 1000;
const ELLIPSIS: &str = "...";

// ── Lazy static selectors ────────────────────────────────────────────────────

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

static META_DESCRIPTION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());

static FIGCAPTION_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("figcaption").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("URL did not return HTML")]
    NotHtml,
    #[error("Upstream returned an error")]
    Upstream,
    #[error("{0}")]
    Request(String),
    #[error("no image at index {0}")]
    NotFound(usize),
    #[error("image at index {0} has no source URL")]
    NoSource(usize),
}

// ── Public API ───────────────────────────────────────────────────────────────

pub async fn scan_page(url: &str) -> Result<Vec<ScannedImage>, ExtractError> {
    validate_url(url)?;
    let html = fetch_html(url).await?;
    Ok(scan_from_html(&html, url))
}

pub async fn page_context(url: &str, index: usize) -> Result<ContextBundle, ExtractError> {
    validate_url(url)?;
    let html = fetch_html(url).await?;
    context_from_html(&html, index, url)
}

pub async fn locate_image(url: &str, index: usize) -> Result<String, ExtractError> {
    validate_url(url)?;
    let html = fetch_html(url).await?;
    image_src_from_html(&html, index, url)
}

/// One fetch serving a whole describe action: the image's resolved source plus
/// its context bundle when context use is enabled.
pub async fn image_for_description(
    url: &str,
    index: usize,
    use_context: bool,
) -> Result<(String, Option<ContextBundle>), ExtractError> {
    validate_url(url)?;
    let html = fetch_html(url).await?;
    let document = Html::parse_document(&html);
    let base = Url::parse(url).ok();
    let img = nth_image(&document, index)?;
    let src = resolved_src(img, base.as_ref()).ok_or(ExtractError::NoSource(index))?;
    let context = if use_context {
        Some(context_for(&document, img, url))
    } else {
        None
    };
    Ok((src, context))
}

// ── URL validation ───────────────────────────────────────────────────────────

fn validate_url(url: &str) -> Result<Url, ExtractError> {
    let parsed =
        Url::parse(url).map_err(|_| ExtractError::InvalidUrl("Invalid URL".to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ExtractError::InvalidUrl(
            "Only http and https URLs are allowed".to_string(),
        )),
    }
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

async fn fetch_html(url: &str) -> Result<String, ExtractError> {
    let insecure = std::env::var("ALT_AUDIT_INSECURE_SSL").as_deref() == Ok("1");

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
            .parse()
            .unwrap(),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        "en-US,en;q=0.9".parse().unwrap(),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(std::time::Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    let client = builder
        .build()
        .map_err(|e| ExtractError::Request(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::Request(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            ExtractError::Request(format!("ConnectError: {}", e))
        } else {
            ExtractError::Request(format!("RequestError: {}", e))
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::Upstream);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    if !content_type.contains("text/html") {
        return Err(ExtractError::NotHtml);
    }

    response
        .text()
        .await
        .map_err(|e| ExtractError::Request(e.to_string()))
}

// ── Page scan ────────────────────────────────────────────────────────────────

/// List every image in document order. Images without a source URL are left
/// out of the result, but the recorded index still counts them so it remains
/// a valid locator into the document's image list. Empty alt counts as
/// missing.
pub fn scan_from_html(html: &str, base_url: &str) -> Vec<ScannedImage> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    document
        .select(&IMG_SEL)
        .enumerate()
        .filter_map(|(index, img)| {
            let src = resolved_src(img, base.as_ref())?;
            let alt = img.value().attr("alt").unwrap_or("").to_string();
            let has_alt = !alt.is_empty();
            Some(ScannedImage {
                index,
                src,
                alt,
                has_alt,
            })
        })
        .collect()
}

/// Resolved source URL of the Nth image.
pub fn image_src_from_html(
    html: &str,
    index: usize,
    base_url: &str,
) -> Result<String, ExtractError> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let img = nth_image(&document, index)?;
    resolved_src(img, base.as_ref()).ok_or(ExtractError::NoSource(index))
}

fn nth_image(document: &Html, index: usize) -> Result<ElementRef<'_>, ExtractError> {
    document
        .select(&IMG_SEL)
        .nth(index)
        .ok_or(ExtractError::NotFound(index))
}

fn resolved_src(img: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let src = img.value().attr("src")?.trim();
    if src.is_empty() {
        return None;
    }
    match base {
        Some(base) => Some(
            base.join(src)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| src.to_string()),
        ),
        None => Some(src.to_string()),
    }
}

// ── Context extraction ───────────────────────────────────────────────────────

/// Derive the context bundle for the Nth image. Fails with `NotFound` when
/// the document has no image at that index.
pub fn context_from_html(
    html: &str,
    index: usize,
    page_url: &str,
) -> Result<ContextBundle, ExtractError> {
    let document = Html::parse_document(html);
    let img = nth_image(&document, index)?;
    Ok(context_for(&document, img, page_url))
}

fn context_for(document: &Html, img: ElementRef<'_>, page_url: &str) -> ContextBundle {
    let page_title = document
        .select(&TITLE_SEL)
        .next()
        .map(|el| collect_text(el).trim().to_string())
        .unwrap_or_default();

    let meta_description = document
        .select(&META_DESCRIPTION_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let figcaption = enclosing(img, "figure")
        .and_then(|figure| figure.select(&FIGCAPTION_SEL).next())
        .map(|fc| normalize_text(collect_text(fc)))
        .unwrap_or_default();

    ContextBundle {
        page_title,
        meta_description,
        relevant_headings: nearest_heading(img).into_iter().collect(),
        figcaption,
        surrounding_text: surrounding_text(img),
        img_title: attr_or_empty(img, "title"),
        img_aria_label: attr_or_empty(img, "aria-label"),
        existing_alt: attr_or_empty(img, "alt"),
        url: page_url.to_string(),
    }
}

fn attr_or_empty(el: ElementRef<'_>, name: &str) -> String {
    el.value().attr(name).unwrap_or("").to_string()
}

/// Text around the image, from the nearest enclosing context that has any:
/// parent (image removed), then grandparent (image removed), then the nearest
/// enclosing `article`, then `main` (both clipped early). The final value is
/// capped with an ellipsis marker.
fn surrounding_text(img: ElementRef<'_>) -> String {
    let parent = img.parent().and_then(ElementRef::wrap);

    let mut text = parent
        .map(|p| normalize_text(text_excluding(p, img)))
        .unwrap_or_default();

    if text.is_empty() {
        if let Some(grandparent) = img
            .parent()
            .and_then(|p| p.parent())
            .and_then(ElementRef::wrap)
        {
            text = normalize_text(text_excluding(grandparent, img));
        }
    }

    if text.is_empty() {
        if let Some(article) = enclosing(img, "article") {
            text = take_chars(&normalize_text(collect_text(article)), ANCESTOR_TEXT_LIMIT);
        }
    }

    if text.is_empty() {
        if let Some(main_el) = enclosing(img, "main") {
            text = take_chars(&normalize_text(collect_text(main_el)), ANCESTOR_TEXT_LIMIT);
        }
    }

    truncate_with_ellipsis(text, SURROUNDING_TEXT_LIMIT)
}

/// Nearest preceding heading, at most one: the image's own preceding sibling
/// elements are searched first (closest first), then the parent's preceding
/// siblings. The search deliberately stops there.
fn nearest_heading(img: ElementRef<'_>) -> Option<String> {
    let own = img
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| is_heading(el));

    let found = own.or_else(|| {
        img.parent()?
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| is_heading(el))
    })?;

    let text = normalize_text(collect_text(found));
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn is_heading(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Nearest enclosing ancestor element with the given tag name.
fn enclosing<'a>(el: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == tag)
}

// ── Text helpers ─────────────────────────────────────────────────────────────

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => parts.push((&*text.text).to_string()),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    parts.push(collect_text(child_el));
                }
            }
            _ => {}
        }
    }
    parts.join("")
}

/// Like `collect_text`, but with one node's subtree (the image) removed.
fn text_excluding(el: ElementRef<'_>, skip: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in el.children() {
        if child.id() == skip.id() {
            continue;
        }
        match child.value() {
            Node::Text(text) => out.push_str(&text.text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    out.push_str(&text_excluding(child_el, skip));
                }
            }
            _ => {}
        }
    }
    out
}

/// Collapse whitespace and trim.
fn normalize_text(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn take_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn truncate_with_ellipsis(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut out = take_chars(&text, max);
    out.push_str(ELLIPSIS);
    out
}
