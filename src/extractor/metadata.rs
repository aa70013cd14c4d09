use super::{PageDocument, attr, normalize_whitespace};
use crate::error::ExtractionError;
use crate::types::PageMetadata;

pub(super) fn extract(page: &PageDocument) -> Result<PageMetadata, ExtractionError> {
    let title = match page.first("metadata", "title")? {
        Some(el) => normalize_whitespace(&el.text().collect::<String>()),
        None => String::new(),
    };
    let title = if title.is_empty() {
        meta(page, &["meta[property=\"og:title\"]"])?.unwrap_or_default()
    } else {
        title
    };

    let description = meta(
        page,
        &[
            "meta[name=\"description\"]",
            "meta[property=\"og:description\"]",
            "meta[name=\"twitter:description\"]",
        ],
    )?
    .unwrap_or_default();
    let keywords = meta(page, &["meta[name=\"keywords\"]"])?.unwrap_or_default();
    let author = meta(
        page,
        &["meta[name=\"author\"]", "meta[property=\"article:author\"]"],
    )?;

    let publish_date = match meta(
        page,
        &[
            "meta[property=\"article:published_time\"]",
            "meta[name=\"date\"]",
        ],
    )? {
        Some(date) => Some(date),
        None => page
            .first("metadata", "time[datetime]")?
            .and_then(|el| attr(&el, "datetime")),
    };

    let site_name = meta(page, &["meta[property=\"og:site_name\"]"])?.or_else(|| {
        page.host()
            .map(|h| h.strip_prefix("www.").unwrap_or(h).to_string())
    });

    let page_type = match meta(page, &["meta[property=\"og:type\"]"])? {
        Some(kind) => Some(kind),
        None => Some(classify(page, &title)?.to_string()),
    };

    let language = page
        .first("metadata", "html")?
        .and_then(|el| attr(&el, "lang"));

    Ok(PageMetadata {
        title,
        url: page.url.clone(),
        description,
        keywords,
        author,
        publish_date,
        site_name,
        page_type,
        language,
    })
}

/// First non-empty `content` among the selectors, in order.
fn meta(page: &PageDocument, selectors: &[&str]) -> Result<Option<String>, ExtractionError> {
    for css in selectors {
        if let Some(value) = page
            .first("metadata", css)?
            .and_then(|el| attr(&el, "content"))
        {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn classify(page: &PageDocument, title: &str) -> Result<&'static str, ExtractionError> {
    let haystack = format!("{} {}", page.url, title).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| haystack.contains(w));

    if has(&["login", "signin", "sign-in", "log-in"]) {
        return Ok("login");
    }
    if has(&["admin", "dashboard"]) {
        return Ok("admin");
    }
    if has(&["shop", "store", "cart", "product", "checkout"]) {
        return Ok("ecommerce");
    }
    if page.first("metadata", "article")?.is_some() {
        return Ok("article");
    }
    if page.first("metadata", "form")?.is_some() {
        return Ok("form");
    }
    Ok("general")
}
