//! Place-page extractors for federation sites that list clubs per region.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::AdapterError;

/// Text found on a source page for one named place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceText {
    pub place_name: String,
    pub text: String,
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

/// Whitespace-normalized text of an element, one line per text run.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn only_one<'a>(
    mut matches: impl Iterator<Item = ElementRef<'a>>,
    what: &str,
) -> Result<ElementRef<'a>, AdapterError> {
    match (matches.next(), matches.next()) {
        (Some(one), None) => Ok(one),
        _ => Err(AdapterError::Message(format!("expected exactly one {what}"))),
    }
}

/// Accordion pages: one panel per region, titled by a span.
pub fn extract_panels(html: &str) -> Result<Vec<PlaceText>, AdapterError> {
    static EMPTY_PANEL: OnceLock<Regex> = OnceLock::new();
    let empty_panel =
        EMPTY_PANEL.get_or_init(|| Regex::new(r"no.*clubs here").expect("empty panel pattern"));

    let document = Html::parse_document(html);
    let panel_sel = selector(r#"div[data-vc-content=".vc_tta-panel-body"]"#)?;
    let title_sel = selector("span.vc_tta-title-text")?;
    let body_sel = selector("div.vc_tta-panel-body")?;
    let p_sel = selector("p")?;

    let mut out = Vec::new();
    for panel in document.select(&panel_sel) {
        let title = only_one(panel.select(&title_sel), "panel title")?;
        let body = only_one(panel.select(&body_sel), "panel body")?;
        let paragraphs: Vec<ElementRef<'_>> = body.select(&p_sel).collect();
        if let [only] = paragraphs.as_slice() {
            if empty_panel.is_match(&inline_text(*only)) {
                continue;
            }
        }
        out.push(PlaceText {
            place_name: inline_text(title),
            text: element_text(body),
        });
    }
    Ok(out)
}

/// Heading/section pages: a heading section per province followed by a
/// section listing its clubs.
pub fn extract_sections(html: &str) -> Result<Vec<PlaceText>, AdapterError> {
    static SKIPPED: OnceLock<Regex> = OnceLock::new();
    static CLUBS_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let skipped = SKIPPED.get_or_init(|| {
        Regex::new(r"(?i)(get our news|membership|tournaments|about|SAUWHF)")
            .expect("skipped heading pattern")
    });
    let clubs_suffix =
        CLUBS_SUFFIX.get_or_init(|| Regex::new(r"(?i)\s+clubs").expect("clubs suffix pattern"));

    let document = Html::parse_document(html);
    let heading_sel = selector(r#"div[data-widget_type="heading.default"]"#)?;

    let mut out = Vec::new();
    for heading in document.select(&heading_sel) {
        let heading_title = inline_text(heading);
        if skipped.is_match(&heading_title) {
            continue;
        }
        let province = clubs_suffix.replace_all(&heading_title, "").trim().to_string();
        let head_section = heading
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "section")
            .ok_or_else(|| {
                AdapterError::Message(format!("heading {heading_title} is not inside a section"))
            })?;
        let clubs_section = head_section
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "section")
            .ok_or_else(|| {
                AdapterError::Message(format!("couldn't find club info for {heading_title}"))
            })?;
        out.push(PlaceText {
            place_name: province,
            text: format!(
                "{}\n\n{}",
                element_text(head_section),
                element_text(clubs_section)
            ),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panels_skip_empty_regions() {
        let html = r#"
            <div data-vc-content=".vc_tta-panel-body">
              <span class="vc_tta-title-text">Ontario</span>
              <div class="vc_tta-panel-body"><p>Toronto UWH</p><p>Tuesdays</p></div>
            </div>
            <div data-vc-content=".vc_tta-panel-body">
              <span class="vc_tta-title-text">Yukon</span>
              <div class="vc_tta-panel-body"><p>There are no registered clubs here yet.</p></div>
            </div>"#;
        let extracts = extract_panels(html).expect("panels");
        assert_eq!(
            extracts,
            vec![PlaceText {
                place_name: "Ontario".to_string(),
                text: "Toronto UWH\nTuesdays".to_string(),
            }]
        );
    }

    #[test]
    fn panel_without_body_is_an_error() {
        let html = r#"<div data-vc-content=".vc_tta-panel-body">
              <span class="vc_tta-title-text">Ontario</span></div>"#;
        assert!(extract_panels(html).is_err());
    }

    #[test]
    fn sections_pair_heading_with_following_section() {
        let html = r#"<body>
            <section><div data-widget_type="heading.default"><h2>About SAUWHF</h2></div></section>
            <section><p>ignored</p></section>
            <section><div data-widget_type="heading.default"><h2>Gauteng Clubs</h2></div></section>
            <div>spacer</div>
            <section><p>Pretoria UWH</p></section>
            </body>"#;
        let extracts = extract_sections(html).expect("sections");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].place_name, "Gauteng");
        assert_eq!(extracts[0].text, "Gauteng Clubs\n\nPretoria UWH");
    }
}
