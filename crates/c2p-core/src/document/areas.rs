//! Area markers, headings and table ids in document HTML.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::DocumentError;
use crate::convert::html::WI_ID_PREFIX;

pub const AREA_START_CLS: &str = "c2pAreaStart";
pub const AREA_END_CLS: &str = "c2pAreaEnd";

const WIKI_BLOCK_OPEN: &str = r#"<div class="polarion-dle-wiki-block">"#;

/// Escaped source text of a wiki block.
static WIKI_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div class="polarion-dle-wiki-block-source">([^<]*)</div>"#).expect("wiki source pattern is valid")
});

static DIV_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(/?)div\b[^>]*>").expect("div pattern is valid"));

/// First element of a wiki source: `<div class="..." id="...">`.
static MARKER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<div\b([^>]*)>").expect("marker pattern is valid"));

static CLASS_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bclass\s*=\s*"([^"]*)""#).expect("class pattern is valid"));

static ID_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\bid\s*=\s*"([^"]*)""#).expect("id pattern is valid"));

static HEADING_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"<h[1-6]\b[^>]*\bid="{}([^"|]+)"#,
        regex::escape(WI_ID_PREFIX)
    ))
    .expect("heading pattern is valid")
});

static TABLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(<table\b[^>]*?)\s+id="[^"]*""#).expect("table id pattern is valid"));

/// A rendered area of a mixed authority document.
///
/// `start` and `end` are the byte ranges of the two marker blocks; the
/// area content lies between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Area {
    pub id: String,
    pub start: Range<usize>,
    pub end: Range<usize>,
}

impl Area {
    #[must_use]
    pub const fn content(&self) -> Range<usize> {
        self.start.end..self.end.start
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Marker {
    Start,
    End,
}

/// Find the areas of `html` in document order.
///
/// # Errors
///
/// Returns [`DocumentError::AreaMismatch`] for a marker without id, a start
/// inside an open area, an end that does not close the open area, or an
/// area left open.
pub fn extract_areas(document: &str, html: &str) -> Result<Vec<Area>, DocumentError> {
    let mismatch = |message: String| DocumentError::AreaMismatch {
        document: document.to_string(),
        message,
    };

    let mut areas = Vec::new();
    let mut open: Option<(String, Range<usize>)> = None;
    let mut resume = 0;
    for source in WIKI_SOURCE.captures_iter(html) {
        let whole = source.get(0).expect("group 0 always matches");
        if whole.start() < resume {
            continue;
        }
        let Some(block_start) = html[..whole.start()].rfind(WIKI_BLOCK_OPEN) else {
            continue;
        };
        let Some((marker, id)) = parse_marker(&unescape(&source[1])) else {
            continue;
        };
        let block = block_start..element_end(html, block_start).unwrap_or(html.len());
        resume = block.end;

        let id = id.ok_or_else(|| mismatch("found an area marker without id".to_string()))?;
        match (marker, open.take()) {
            (Marker::Start, None) => open = Some((id, block)),
            (Marker::Start, Some((outer, _))) => {
                return Err(mismatch(format!("area {id} starts inside area {outer}")));
            }
            (Marker::End, Some((start_id, start))) if start_id == id => {
                areas.push(Area { id, start, end: block });
            }
            (Marker::End, Some((start_id, _))) => {
                return Err(mismatch(format!("area end {id} does not match open area {start_id}")));
            }
            (Marker::End, None) => {
                return Err(mismatch(format!("area end {id} without start")));
            }
        }
    }
    if let Some((id, _)) = open {
        return Err(mismatch(format!("area {id} is never closed")));
    }
    Ok(areas)
}

fn parse_marker(source: &str) -> Option<(Marker, Option<String>)> {
    let tag = MARKER_TAG.captures(source)?;
    let attributes = tag.get(1)?.as_str();
    let class = CLASS_ATTR.captures(attributes)?;
    let marker = match class[1].split_whitespace().find(|c| *c == AREA_START_CLS || *c == AREA_END_CLS)? {
        AREA_START_CLS => Marker::Start,
        _ => Marker::End,
    };
    let id = ID_ATTR
        .captures(attributes)
        .map(|c| c[1].to_string())
        .filter(|id| !id.is_empty());
    Some((marker, id))
}

/// Byte offset after the `</div>` closing the div opened at `start`.
fn element_end(html: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for tag in DIV_TAG.captures_iter(&html[start..]) {
        if tag[1].is_empty() {
            depth += 1;
        } else {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(start + tag.get(0)?.end());
            }
        }
    }
    None
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Wiki block markup of an area marker, as a user inserts it.
#[must_use]
pub fn area_marker(class: &str, id: &str) -> String {
    format!(
        r#"{WIKI_BLOCK_OPEN}<div class="polarion-dle-wiki-block-source">&lt;div class=&quot;{class}&quot; id=&quot;{id}&quot;&gt;&lt;/div&gt;</div><div class="polarion-dle-wiki-block-context"></div></div>"#
    )
}

/// Ids of work items used as headings, in document order.
#[must_use]
pub fn extract_heading_ids(html: &str) -> Vec<String> {
    HEADING_ID.captures_iter(html).map(|c| c[1].to_string()).collect()
}

/// Drop `id` attributes of tables; the tracker assigns them.
#[must_use]
pub fn remove_table_ids(html: &str) -> String {
    TABLE_ID.replace_all(html, "$1").into_owned()
}

/// Replace the content of every area of `html` that `render` produces.
///
/// `render` receives the area id and returns `None` to keep the current
/// content. Text outside areas, markers included, is kept as is.
///
/// # Errors
///
/// Propagates area extraction and rendering errors.
pub fn merge_areas(
    document: &str,
    html: &str,
    mut render: impl FnMut(&str) -> Result<Option<String>, DocumentError>,
) -> Result<String, DocumentError> {
    let areas = extract_areas(document, html)?;
    let mut merged = String::with_capacity(html.len());
    let mut last = 0;
    for area in &areas {
        let Some(content) = render(&area.id)? else {
            continue;
        };
        merged.push_str(&html[last..area.start.end]);
        merged.push_str(&content);
        last = area.end.start;
    }
    merged.push_str(&html[last..]);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(areas: &[(&str, &str)]) -> String {
        let mut html = String::from("<h1>Manual intro</h1>");
        for (id, content) in areas {
            html.push_str(&area_marker(AREA_START_CLS, id));
            html.push_str(content);
            html.push_str(&area_marker(AREA_END_CLS, id));
            html.push_str("<p>between</p>");
        }
        html
    }

    #[test]
    fn finds_areas_in_order() {
        let html = document(&[("one", "<p>1</p>"), ("two", "<p>2</p>")]);
        let areas = extract_areas("doc", &html).expect("valid markers");
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[0].id, "one");
        assert_eq!(&html[areas[0].content()], "<p>1</p>");
        assert_eq!(&html[areas[1].content()], "<p>2</p>");
        assert!(html[areas[0].start.clone()].starts_with(WIKI_BLOCK_OPEN));
        assert!(html[areas[0].end.clone()].ends_with("</div></div>"));
    }

    #[test]
    fn unrelated_wiki_blocks_are_ignored() {
        let html = format!(
            r#"{WIKI_BLOCK_OPEN}<div class="polarion-dle-wiki-block-source">#set($x = 1)</div></div>{}"#,
            document(&[("one", "")])
        );
        assert_eq!(extract_areas("doc", &html).expect("valid markers").len(), 1);
    }

    #[test]
    fn nested_start_is_rejected() {
        let html = format!(
            "{}{}",
            area_marker(AREA_START_CLS, "outer"),
            area_marker(AREA_START_CLS, "inner")
        );
        let err = extract_areas("doc", &html).expect_err("nested");
        assert_eq!(err.code(), crate::error::ErrorCode::DocumentAreaMismatch);
        assert!(err.to_string().contains("inner starts inside area outer"));
    }

    #[test]
    fn mismatched_end_is_rejected() {
        let html = format!("{}{}", area_marker(AREA_START_CLS, "a"), area_marker(AREA_END_CLS, "b"));
        assert!(extract_areas("doc", &html).is_err());
    }

    #[test]
    fn unclosed_area_is_rejected() {
        let html = area_marker(AREA_START_CLS, "a");
        let err = extract_areas("doc", &html).expect_err("unclosed");
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn marker_without_id_is_rejected() {
        let html = area_marker(AREA_START_CLS, "");
        assert!(extract_areas("doc", &html).is_err());
    }

    #[test]
    fn merge_replaces_only_rendered_areas() {
        let html = document(&[("one", "<p>old 1</p>"), ("two", "<p>old 2</p>")]);
        let merged = merge_areas("doc", &html, |id| {
            Ok((id == "one").then(|| "<p>new 1</p>".to_string()))
        })
        .expect("merged");

        assert_eq!(merged, document(&[("one", "<p>new 1</p>"), ("two", "<p>old 2</p>")]));
    }

    #[test]
    fn heading_ids_in_order() {
        let html = format!(
            r#"<h1 id="{WI_ID_PREFIX}H-1"></h1><p>x</p><h2 id="{WI_ID_PREFIX}H-2|layout=0"></h2><h3>plain</h3>"#
        );
        assert_eq!(extract_heading_ids(&html), vec!["H-1", "H-2"]);
    }

    #[test]
    fn table_ids_are_removed() {
        let html = r#"<table id="t1" class="grid"><tr></tr></table><table class="x" id="t2">"#;
        assert_eq!(
            remove_table_ids(html),
            r#"<table class="grid"><tr></tr></table><table class="x">"#
        );
    }
}
