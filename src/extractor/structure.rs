use scraper::ElementRef;

use super::{PageDocument, attr, attr_or_empty, is_visible, selector, visible_text};
use crate::error::ExtractionError;
use crate::types::{
    Form, FormInput, Heading, Image, Link, MAX_FORM_INPUTS, MAX_FORMS, MAX_HEADINGS, MAX_IMAGES,
    MAX_LINKS, MAX_NAV_LINKS, MAX_NAVIGATION, MAX_TABLES, MAX_VIDEOS, Navigation, PageStructure,
    Table, Video,
};

const SECTION: &str = "structure";

pub(super) fn extract(page: &PageDocument) -> Result<PageStructure, ExtractionError> {
    Ok(PageStructure {
        headings: headings(page)?,
        links: links(page)?,
        images: images(page)?,
        forms: forms(page)?,
        navigation: navigation(page)?,
        tables: tables(page)?,
        videos: videos(page)?,
    })
}

fn headings(page: &PageDocument) -> Result<Vec<Heading>, ExtractionError> {
    Ok(page
        .select(SECTION, "h1, h2, h3, h4, h5, h6")?
        .iter()
        .filter_map(|h| {
            let text = visible_text(h);
            (!text.is_empty()).then(|| Heading {
                level: h.value().name().to_string(),
                text,
            })
        })
        .take(MAX_HEADINGS)
        .collect())
}

fn links(page: &PageDocument) -> Result<Vec<Link>, ExtractionError> {
    let host = page.host();
    Ok(page
        .select(SECTION, "a[href]")?
        .iter()
        .filter_map(|a| {
            let raw = attr(a, "href")?;
            if raw.starts_with("javascript:") {
                return None;
            }
            let href = page.resolve(&raw);
            let external = url::Url::parse(&href)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .is_some_and(|h| Some(h.as_str()) != host);
            Some(Link {
                text: visible_text(a),
                href,
                external,
            })
        })
        .take(MAX_LINKS)
        .collect())
}

fn images(page: &PageDocument) -> Result<Vec<Image>, ExtractionError> {
    Ok(page
        .select(SECTION, "img")?
        .iter()
        .filter_map(|img| {
            let src = attr(img, "src")?;
            Some(Image {
                src: page.resolve(&src),
                alt: attr_or_empty(img, "alt"),
                title: attr(img, "title"),
                width: attr(img, "width"),
                height: attr(img, "height"),
            })
        })
        .take(MAX_IMAGES)
        .collect())
}

fn forms(page: &PageDocument) -> Result<Vec<Form>, ExtractionError> {
    let fields = selector(SECTION, "input, select, textarea")?;
    let mut forms = Vec::new();
    for form in page.select(SECTION, "form")?.into_iter().take(MAX_FORMS) {
        let inputs = form
            .select(&fields)
            .filter(|f| {
                f.value()
                    .attr("type")
                    .is_none_or(|t| !t.eq_ignore_ascii_case("hidden"))
            })
            .take(MAX_FORM_INPUTS)
            .map(|f| -> Result<FormInput, ExtractionError> {
                Ok(FormInput {
                    kind: field_type(&f),
                    name: attr_or_empty(&f, "name"),
                    placeholder: attr_or_empty(&f, "placeholder"),
                    required: f.value().attr("required").is_some(),
                    label: resolve_label(page, &f)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        forms.push(Form {
            action: attr(&form, "action")
                .map(|a| page.resolve(&a))
                .unwrap_or_default(),
            method: attr(&form, "method")
                .map(|m| m.to_lowercase())
                .unwrap_or_else(|| "get".to_string()),
            inputs,
        });
    }
    Ok(forms)
}

/// `input` type (default `text`), or the tag name for `select` / `textarea`.
pub(super) fn field_type(field: &ElementRef<'_>) -> String {
    match field.value().name() {
        "input" => attr(field, "type")
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| "text".to_string()),
        other => other.to_string(),
    }
}

/// Label text for a form control, by priority: `label[for]`, enclosing
/// `<label>`, `aria-labelledby`, `aria-label`, `title`.
pub(super) fn resolve_label(
    page: &PageDocument,
    field: &ElementRef<'_>,
) -> Result<Option<String>, ExtractionError> {
    if let Some(id) = attr(field, "id") {
        let css = format!("label[for=\"{}\"]", css_escape(&id));
        if let Some(label) = page.first(SECTION, &css)? {
            let text = visible_text(&label);
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }

    if let Some(label) = field
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "label")
    {
        let text = visible_text(&label);
        if !text.is_empty() {
            return Ok(Some(text));
        }
    }

    if let Some(ids) = attr(field, "aria-labelledby") {
        let mut parts = Vec::new();
        for id in ids.split_whitespace() {
            let css = format!("[id=\"{}\"]", css_escape(id));
            if let Some(el) = page.first(SECTION, &css)? {
                let text = visible_text(&el);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        if !parts.is_empty() {
            return Ok(Some(parts.join(" ")));
        }
    }

    Ok(attr(field, "aria-label").or_else(|| attr(field, "title")))
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn navigation(page: &PageDocument) -> Result<Vec<Navigation>, ExtractionError> {
    let anchors = selector(SECTION, "a")?;
    Ok(page
        .select(SECTION, "nav, [role=\"navigation\"]")?
        .iter()
        .filter(|nav| is_visible(nav))
        .take(MAX_NAVIGATION)
        .map(|nav| Navigation {
            label: attr(nav, "aria-label"),
            links: nav
                .select(&anchors)
                .map(|a| visible_text(&a))
                .filter(|t| !t.is_empty())
                .take(MAX_NAV_LINKS)
                .collect(),
        })
        .collect())
}

fn tables(page: &PageDocument) -> Result<Vec<Table>, ExtractionError> {
    let caption = selector(SECTION, "caption")?;
    let header = selector(SECTION, "th")?;
    let row = selector(SECTION, "tr")?;
    Ok(page
        .select(SECTION, "table")?
        .iter()
        .take(MAX_TABLES)
        .map(|table| Table {
            caption: table
                .select(&caption)
                .next()
                .map(|c| visible_text(&c))
                .filter(|t| !t.is_empty()),
            headers: table
                .select(&header)
                .map(|th| visible_text(&th))
                .filter(|t| !t.is_empty())
                .collect(),
            row_count: table.select(&row).count(),
        })
        .collect())
}

fn videos(page: &PageDocument) -> Result<Vec<Video>, ExtractionError> {
    let source = selector(SECTION, "source[src]")?;
    let mut videos = Vec::new();
    for video in page.select(SECTION, "video")? {
        let src = attr(&video, "src")
            .or_else(|| video.select(&source).next().and_then(|s| attr(&s, "src")))
            .map(|s| page.resolve(&s))
            .unwrap_or_default();
        videos.push(Video {
            kind: "video".to_string(),
            src,
        });
    }
    for frame in page.select(SECTION, "iframe[src]")? {
        let Some(src) = attr(&frame, "src") else {
            continue;
        };
        let lower = src.to_lowercase();
        if ["youtube.com", "youtube-nocookie.com", "youtu.be", "vimeo.com"]
            .iter()
            .any(|host| lower.contains(host))
        {
            videos.push(Video {
                kind: "iframe".to_string(),
                src: page.resolve(&src),
            });
        }
    }
    videos.truncate(MAX_VIDEOS);
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawPage;

    fn structure_of(html: &str) -> PageStructure {
        PageDocument::parse(&RawPage {
            url: "https://example.com/docs/".into(),
            html: html.into(),
        })
        .structure()
    }

    #[test]
    fn headings_skip_empty() {
        let s = structure_of("<h1> Top </h1><h2></h2><h3>Sub</h3>");
        assert_eq!(
            s.headings,
            vec![
                Heading { level: "h1".into(), text: "Top".into() },
                Heading { level: "h3".into(), text: "Sub".into() },
            ]
        );
    }

    #[test]
    fn links_capped_and_flag_external() {
        let mut html = String::from(r#"<a href="https://other.org/x">Other</a><a href="guide">Guide</a>"#);
        for i in 0..40 {
            html.push_str(&format!(r#"<a href="/p{i}">P{i}</a>"#));
        }
        let s = structure_of(&html);
        assert_eq!(s.links.len(), MAX_LINKS);
        assert!(s.links[0].external);
        assert_eq!(s.links[1].href, "https://example.com/docs/guide");
        assert!(!s.links[1].external);
    }

    #[test]
    fn images_require_src_and_are_capped() {
        let mut html = String::from(r#"<img alt="no source"><img src="" alt="empty">"#);
        for i in 0..20 {
            html.push_str(&format!(r#"<img src="/i{i}.png" alt="image {i}">"#));
        }
        let s = structure_of(&html);
        assert_eq!(s.images.len(), MAX_IMAGES);
        assert_eq!(s.images[0].src, "https://example.com/i0.png");
        assert_eq!(s.images[0].alt, "image 0");
    }

    #[test]
    fn form_labels_follow_priority() {
        let html = r#"
            <form action="/signup" method="POST">
              <label for="email">Email address</label>
              <input id="email" type="email" name="email" aria-label="ignored" required>
              <label>Full name <input name="name"></label>
              <span id="pw-label">Password</span>
              <input type="password" name="pw" aria-labelledby="pw-label">
              <input name="q" aria-label="Search" title="ignored">
              <textarea name="bio" title="About you"></textarea>
              <input type="hidden" name="csrf" value="x">
            </form>"#;
        let s = structure_of(html);
        let form = &s.forms[0];
        assert_eq!(form.action, "https://example.com/signup");
        assert_eq!(form.method, "post");
        let labels: Vec<_> = form.inputs.iter().map(|i| i.label.as_deref()).collect();
        assert_eq!(
            labels,
            vec![
                Some("Email address"),
                Some("Full name"),
                Some("Password"),
                Some("Search"),
                Some("About you"),
            ]
        );
        assert!(form.inputs[0].required);
        assert_eq!(form.inputs[0].kind, "email");
        assert_eq!(form.inputs[4].kind, "textarea");
    }

    #[test]
    fn form_method_defaults_to_get() {
        let s = structure_of("<form><input></form>");
        assert_eq!(s.forms[0].method, "get");
        assert_eq!(s.forms[0].action, "");
        assert_eq!(s.forms[0].inputs[0].kind, "text");
    }

    #[test]
    fn navigation_tables_and_videos() {
        let html = r#"
            <nav aria-label="Primary"><a href="/">Home</a><a href="/about">About</a></nav>
            <table><caption>Prices</caption><tr><th>Plan</th><th>Cost</th></tr>
              <tr><td>Free</td><td>0</td></tr></table>
            <video src="/intro.mp4"></video>
            <iframe src="https://www.youtube.com/embed/abc"></iframe>
            <iframe src="https://ads.example.net/frame"></iframe>"#;
        let s = structure_of(html);
        assert_eq!(s.navigation[0].label.as_deref(), Some("Primary"));
        assert_eq!(s.navigation[0].links, vec!["Home", "About"]);
        assert_eq!(s.tables[0].caption.as_deref(), Some("Prices"));
        assert_eq!(s.tables[0].headers, vec!["Plan", "Cost"]);
        assert_eq!(s.tables[0].row_count, 2);
        assert_eq!(s.videos.len(), 2);
        assert_eq!(s.videos[0].src, "https://example.com/intro.mp4");
        assert_eq!(s.videos[1].kind, "iframe");
    }
}
