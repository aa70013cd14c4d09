use super::structure::{field_type, resolve_label};
use super::{PageDocument, attr, attr_or_empty, is_visible, visible_text};
use crate::error::ExtractionError;
use crate::types::{
    Accessibility, Button, Clickable, Input, Interactive, MAX_BUTTONS, MAX_CLICKABLE, MAX_INPUTS,
    MAX_INTERACTIVE, MAX_VALIDATION, Performance, TestableElements, ValidationRule,
    truncate_chars,
};

const SECTION: &str = "testable elements";
const MAX_ELEMENT_TEXT: usize = 100;

pub(super) fn extract(page: &PageDocument) -> Result<TestableElements, ExtractionError> {
    Ok(TestableElements {
        buttons: buttons(page)?,
        inputs: inputs(page)?,
        clickable_elements: clickable(page)?,
        interactive_elements: interactive(page)?,
        form_validation: validation(page)?,
        accessibility: accessibility(page)?,
        performance: performance(page)?,
    })
}

fn short(text: String) -> String {
    truncate_chars(&text, MAX_ELEMENT_TEXT).to_string()
}

fn buttons(page: &PageDocument) -> Result<Vec<Button>, ExtractionError> {
    let css = "button, input[type=\"button\"], input[type=\"submit\"], input[type=\"reset\"], [role=\"button\"]";
    Ok(page
        .select(SECTION, css)?
        .iter()
        .filter_map(|el| {
            let text = match visible_text(el) {
                t if t.is_empty() && is_visible(el) => attr_or_empty(el, "value"),
                t => t,
            };
            let aria_label = attr(el, "aria-label");
            if text.is_empty() && aria_label.is_none() {
                return None;
            }
            Some(Button {
                text: short(text),
                id: attr_or_empty(el, "id"),
                class_name: attr_or_empty(el, "class"),
                aria_label,
                disabled: el.value().attr("disabled").is_some(),
            })
        })
        .take(MAX_BUTTONS)
        .collect())
}

/// Visible form controls that take user input.
fn controls(page: &PageDocument) -> Result<Vec<scraper::ElementRef<'_>>, ExtractionError> {
    Ok(page
        .select(SECTION, "input, select, textarea")?
        .into_iter()
        .filter(|el| is_visible(el))
        .filter(|el| {
            !matches!(
                field_type(el).as_str(),
                "submit" | "button" | "reset" | "image"
            )
        })
        .collect())
}

fn inputs(page: &PageDocument) -> Result<Vec<Input>, ExtractionError> {
    let mut inputs = Vec::new();
    for el in controls(page)?.into_iter().take(MAX_INPUTS) {
        inputs.push(Input {
            input_type: field_type(&el),
            name: attr_or_empty(&el, "name"),
            id: attr_or_empty(&el, "id"),
            placeholder: attr_or_empty(&el, "placeholder"),
            required: el.value().attr("required").is_some(),
            label: resolve_label(page, &el)?,
            aria_label: attr(&el, "aria-label"),
        });
    }
    Ok(inputs)
}

fn clickable(page: &PageDocument) -> Result<Vec<Clickable>, ExtractionError> {
    let css = "a[href], [onclick], [role=\"button\"], [role=\"link\"]";
    Ok(page
        .select(SECTION, css)?
        .iter()
        .filter_map(|el| {
            let text = match visible_text(el) {
                t if t.is_empty() => attr_or_empty(el, "aria-label"),
                t => t,
            };
            if text.is_empty() {
                return None;
            }
            Some(Clickable {
                tag: el.value().name().to_string(),
                text: short(text),
                href: attr(el, "href")
                    .map(|h| page.resolve(&h))
                    .unwrap_or_default(),
                role: attr_or_empty(el, "role"),
            })
        })
        .take(MAX_CLICKABLE)
        .collect())
}

fn interactive(page: &PageDocument) -> Result<Vec<Interactive>, ExtractionError> {
    let css = "details, summary, [tabindex], [contenteditable], dialog, [role=\"tab\"], [role=\"menuitem\"]";
    Ok(page
        .select(SECTION, css)?
        .iter()
        .filter(|el| is_visible(el))
        .filter_map(|el| {
            let text = match visible_text(el) {
                t if t.is_empty() => attr_or_empty(el, "aria-label"),
                t => t,
            };
            if text.is_empty() {
                return None;
            }
            Some(Interactive {
                tag: el.value().name().to_string(),
                text: short(text),
                role: attr_or_empty(el, "role"),
            })
        })
        .take(MAX_INTERACTIVE)
        .collect())
}

fn validation(page: &PageDocument) -> Result<Vec<ValidationRule>, ExtractionError> {
    Ok(controls(page)?
        .iter()
        .filter_map(|el| {
            let mut rules: Vec<String> = ["required", "pattern", "min", "max", "minlength", "maxlength"]
                .iter()
                .filter(|a| el.value().attr(a).is_some())
                .map(|a| a.to_string())
                .collect();
            let kind = field_type(el);
            if matches!(kind.as_str(), "email" | "url" | "number" | "tel" | "date") {
                rules.push(format!("type={kind}"));
            }
            if rules.is_empty() {
                return None;
            }
            let field = attr(el, "name")
                .or_else(|| attr(el, "id"))
                .unwrap_or_else(|| kind.clone());
            Some(ValidationRule { field, rules })
        })
        .take(MAX_VALIDATION)
        .collect())
}

fn accessibility(page: &PageDocument) -> Result<Accessibility, ExtractionError> {
    let images = page.select(SECTION, "img")?;
    let with_alt = images.iter().filter(|img| attr(img, "alt").is_some()).count();
    let without_alt = images.len() - with_alt;
    let coverage = if images.is_empty() {
        100
    } else {
        (with_alt * 100 / images.len()) as u8
    };

    let levels: Vec<u8> = page
        .select(SECTION, "h1, h2, h3, h4, h5, h6")?
        .iter()
        .filter_map(|h| h.value().name()[1..].parse().ok())
        .collect();

    let mut missing_labels = 0;
    for el in controls(page)? {
        if resolve_label(page, &el)?.is_none() {
            missing_labels += 1;
        }
    }

    let landmarks = "main, nav, header, footer, aside, [role=\"banner\"], [role=\"navigation\"], \
                     [role=\"main\"], [role=\"contentinfo\"], [role=\"complementary\"], [role=\"search\"]";
    let has_skip_link = page
        .select(SECTION, "a[href^=\"#\"]")?
        .iter()
        .any(|a| visible_text(a).to_lowercase().contains("skip"));

    Ok(Accessibility {
        images_without_alt: without_alt,
        images_with_alt: with_alt,
        alt_text_coverage: coverage,
        heading_structure_valid: heading_levels_valid(&levels),
        missing_labels,
        aria_landmarks: page.select(SECTION, landmarks)?.len(),
        has_skip_link,
        has_lang: page
            .first(SECTION, "html")?
            .and_then(|el| attr(&el, "lang"))
            .is_some(),
    })
}

/// No heading may go more than one level deeper than the one before it.
pub fn heading_levels_valid(levels: &[u8]) -> bool {
    levels.windows(2).all(|pair| pair[1] <= pair[0] + 1)
}

fn performance(page: &PageDocument) -> Result<Performance, ExtractionError> {
    Ok(Performance {
        dom_nodes: page.select(SECTION, "*")?.len(),
        scripts: page.select(SECTION, "script")?.len(),
        external_scripts: page.select(SECTION, "script[src]")?.len(),
        stylesheets: page.select(SECTION, "link[rel~=\"stylesheet\"], style")?.len(),
        images: page.select(SECTION, "img")?.len(),
        iframes: page.select(SECTION, "iframe")?.len(),
        inline_styles: page.select(SECTION, "[style]")?.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawPage;

    fn testable_of(html: &str) -> TestableElements {
        PageDocument::parse(&RawPage {
            url: "https://example.com/".into(),
            html: html.into(),
        })
        .testable_elements()
    }

    #[test]
    fn buttons_need_text_or_aria_label() {
        let html = r#"<button>Save</button><button></button>
            <button aria-label="Close"></button><input type="submit" value="Send">
            <div role="button" id="menu" class="toggle">Menu</div>"#;
        let t = testable_of(html);
        let texts: Vec<_> = t.buttons.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["Save", "", "Send", "Menu"]);
        assert_eq!(t.buttons[1].aria_label.as_deref(), Some("Close"));
        assert_eq!(t.buttons[3].id, "menu");
        assert_eq!(t.buttons[3].class_name, "toggle");
    }

    #[test]
    fn lists_respect_caps() {
        let html: String = (0..60)
            .map(|i| {
                format!(
                    r#"<button>B{i}</button><input name="f{i}" required><a href="/l{i}">L{i}</a><details>D{i}</details>"#
                )
            })
            .collect();
        let t = testable_of(&html);
        assert_eq!(t.buttons.len(), MAX_BUTTONS);
        assert_eq!(t.inputs.len(), MAX_INPUTS);
        assert_eq!(t.clickable_elements.len(), MAX_CLICKABLE);
        assert_eq!(t.interactive_elements.len(), MAX_INTERACTIVE);
        assert_eq!(t.form_validation.len(), MAX_VALIDATION);
    }

    #[test]
    fn hidden_inputs_are_not_listed() {
        let html = r#"<input type="hidden" name="token"><input name="email" type="email" required>
            <div hidden><input name="ghost"></div>"#;
        let t = testable_of(html);
        assert_eq!(t.inputs.len(), 1);
        assert_eq!(t.inputs[0].input_type, "email");
        assert_eq!(t.form_validation[0].field, "email");
        assert_eq!(t.form_validation[0].rules, vec!["required", "type=email"]);
    }

    #[test]
    fn accessibility_counters() {
        let html = r##"<html lang="en"><body>
            <a href="#main">Skip to content</a>
            <header></header><main id="main">
            <h1>A</h1><h2>B</h2><h4>C</h4>
            <img src="a.png" alt="A"><img src="b.png"><img src="c.png" alt="">
            <label for="q">Query</label><input id="q"><input name="unlabeled">
            </main></body></html>"##;
        let a = testable_of(html).accessibility;
        assert_eq!(a.images_with_alt, 1);
        assert_eq!(a.images_without_alt, 2);
        assert_eq!(a.alt_text_coverage, 33);
        assert!(!a.heading_structure_valid);
        assert_eq!(a.missing_labels, 1);
        assert_eq!(a.aria_landmarks, 2);
        assert!(a.has_skip_link);
        assert!(a.has_lang);
    }

    #[test]
    fn heading_level_skips() {
        assert!(heading_levels_valid(&[]));
        assert!(heading_levels_valid(&[2, 3, 1, 2]));
        assert!(heading_levels_valid(&[1, 2, 3, 2, 2, 3]));
        assert!(!heading_levels_valid(&[1, 3]));
    }

    #[test]
    fn performance_counters() {
        let html = r#"<html><head><script src="a.js"></script><script>1</script>
            <link rel="stylesheet" href="s.css"><style>p{}</style></head>
            <body><img src="x.png"><iframe src="/f"></iframe><p style="color:red">x</p></body></html>"#;
        let p = testable_of(html).performance;
        assert_eq!(p.scripts, 2);
        assert_eq!(p.external_scripts, 1);
        assert_eq!(p.stylesheets, 2);
        assert_eq!(p.images, 1);
        assert_eq!(p.iframes, 1);
        assert_eq!(p.inline_styles, 1);
        assert!(p.dom_nodes >= 10);
    }
}
