//! Tracker flavoured HTML snippets and text rewriting.
//!
//! Only fragments produced by the model or by our own templates pass
//! through here, so matching is done with regular expressions over the
//! markup rather than a full HTML parser.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Prefix of every attachment file name generated for diagrams.
pub const C2P_IMAGE_PREFIX: &str = "__C2P__";
/// Class of images inserted by templates; they are never turned into attachments.
pub const JINJA_RENDERED_IMG_CLS: &str = "jinja-rendered-image";
/// Prefix of the `id` of work items embedded into documents.
pub const WI_ID_PREFIX: &str = "polarion_wiki macro name=module-workitem;params=id=";

/// `<a href="hlink://<uuid>">text</a>`
pub static DESCRIPTION_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="hlink://([^"]+)">([^<]+)</a>"#).expect("description link pattern is valid")
});

/// `&lt;deleted element <uuid>&gt;` as left behind in linked texts.
pub static DELETED_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&lt;deleted element ([A-Za-z0-9_-]+)&gt;").expect("deleted element pattern is valid")
});

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<img\b[^>]*?/?>").expect("img pattern is valid"));

static HTML_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).expect("attribute pattern is valid")
});

static WORK_ITEM_IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="workitemimg:([^"]+)""#).expect("src pattern is valid"));

/// Inline link to a work item.
#[must_use]
pub fn work_item_url(pid: &str) -> String {
    format!(
        r#"<span class="polarion-rte-link" data-type="workItem" id="fake" data-item-id="{pid}" data-option-id="long"></span>"#
    )
}

/// Inline link to a work item of another project.
#[must_use]
pub fn work_item_url_in_project(pid: &str, project: &str) -> String {
    format!(
        r#"<span class="polarion-rte-link" data-type="workItem" id="fake" data-scope="{project}" data-item-id="{pid}" data-option-id="long"></span>"#
    )
}

/// A work item embedded into a document with layout index `layout`.
///
/// `custom_info` is inserted verbatim and must end with `|` when non-empty.
#[must_use]
pub fn work_item_document(pid: &str, layout: usize, custom_info: &str, project: Option<&str>) -> String {
    let scope = project.map(|p| format!("|project={p}")).unwrap_or_default();
    format!(r#"<div id="{WI_ID_PREFIX}{pid}|layout={layout}|{custom_info}external=true{scope}"></div>"#)
}

#[must_use]
pub fn red_text(text: &str) -> String {
    format!(r#"<p style="color:red">{text}</p>"#)
}

/// Struck-through text. A deleted-element marker is reduced to its id.
#[must_use]
pub fn strike_through(text: &str) -> String {
    let text = DELETED_ELEMENT
        .captures(text)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str());
    format!(r#"<span style="text-decoration: line-through;">{text}</span>"#)
}

/// Numbered caption paragraph, e.g. `Figure # Diagram X`.
#[must_use]
pub fn caption_html(label: &str, caption: &str) -> String {
    format!(
        "<p class=\"polarion-rte-caption-paragraph\">\n  {label} <span data-sequence=\"{label}\" class=\"polarion-rte-caption\">#</span> {caption}\n</p>"
    )
}

/// An attached image, optionally followed by a `(label, caption)` caption.
#[must_use]
pub fn image_html(
    title: &str,
    attachment_id: &str,
    max_width: u32,
    cls: &str,
    caption: Option<(&str, &str)>,
) -> String {
    let mut out = format!(
        r#"<span><img title="{title}" class="{cls}" src="workitemimg:{attachment_id}" style="max-width: {max_width}px;"/></span>"#
    );
    if let Some((label, caption)) = caption {
        out.push_str(&caption_html(label, caption));
    }
    out
}

/// Requirement texts of one type: a single text as is, several as a list.
#[must_use]
pub fn text_list(texts: &[String]) -> String {
    match texts {
        [single] => single.clone(),
        _ => {
            let items: String = texts.iter().map(|t| format!("<li>{t}</li>")).collect();
            format!("<ul>{items}</ul>")
        }
    }
}

/// Sorted list of work item links under an optional `heading`.
#[must_use]
pub fn sorted_link_list<'a>(work_item_ids: impl IntoIterator<Item = &'a str>, heading: &str) -> String {
    let mut urls: Vec<String> = work_item_ids
        .into_iter()
        .map(|pid| format!("<li>{}</li>", work_item_url(pid)))
        .collect();
    urls.sort();
    if !heading.is_empty() && !urls.is_empty() {
        urls.insert(0, format!("<div>{heading}:</div>"));
    }
    format!("<ul>{}</ul>", urls.join("\n"))
}

/// Grouped link field: one entry per linked id with nested include lists.
///
/// `link_map` maps a work item id to `(display name, included ids)` pairs.
#[must_use]
pub fn link_field_list(link_map: &BTreeMap<String, Vec<(String, Vec<String>)>>) -> String {
    let mut urls = Vec::new();
    for (link_id, includes) in link_map {
        urls.push(format!("<li>{}</li>", work_item_url(link_id)));
        for (display_name, ids) in includes {
            urls.push(sorted_link_list(ids.iter().map(String::as_str), display_name));
        }
    }
    format!("<ul>{}</ul>", urls.join("\n"))
}

// ---------------------------------------------------------------------------
// Rewriting
// ---------------------------------------------------------------------------

/// Replace every description link through `replace`.
pub fn replace_description_links(text: &str, mut replace: impl FnMut(&str, &str) -> String) -> String {
    DESCRIPTION_LINK
        .replace_all(text, |caps: &Captures<'_>| replace(&caps[1], &caps[2]))
        .into_owned()
}

/// Replace every deleted-element marker through `replace`, given the id.
pub fn replace_deleted_elements(text: &str, mut replace: impl FnMut(&str, &str) -> String) -> String {
    DELETED_ELEMENT
        .replace_all(text, |caps: &Captures<'_>| replace(&caps[1], &caps[0]))
        .into_owned()
}

/// An `<img>` tag as attribute list in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgTag {
    pub attributes: Vec<(String, String)>,
}

impl ImgTag {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(idx).1)
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        let attrs: String = self
            .attributes
            .iter()
            .map(|(key, value)| format!(" {key}=\"{value}\""))
            .collect();
        format!("<img{attrs}/>")
    }
}

/// Rewrite `<img>` tags. `rewrite` returns the replacement markup, or
/// `None` to keep the tag untouched.
pub fn rewrite_images(text: &str, mut rewrite: impl FnMut(ImgTag) -> Option<String>) -> String {
    IMG_TAG
        .replace_all(text, |caps: &Captures<'_>| {
            let tag = ImgTag {
                attributes: HTML_ATTRIBUTE
                    .captures_iter(&caps[0])
                    .map(|attr| (attr[1].to_string(), attr[2].to_string()))
                    .collect(),
            };
            rewrite(tag).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Point `workitemimg:<file name>` sources at attachment ids.
///
/// Sources whose file name is not in `ids` are left alone.
#[must_use]
pub fn replace_image_sources(text: &str, ids: &BTreeMap<String, String>) -> String {
    WORK_ITEM_IMG_SRC
        .replace_all(text, |caps: &Captures<'_>| match ids.get(&caps[1]) {
            Some(id) => format!(r#"src="workitemimg:{id}""#),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Parse `data:<mime>[;base64],<payload>`.
///
/// # Errors
///
/// Returns a message for malformed URIs or payloads.
pub fn parse_data_uri(uri: &str) -> Result<DataUri, String> {
    use base64::Engine as _;

    let rest = uri.strip_prefix("data:").ok_or("not a data URI")?;
    let (meta, payload) = rest.split_once(',').ok_or("missing ',' in data URI")?;
    let (mime_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    let mime_type = mime_type.split(';').next().unwrap_or_default();
    if mime_type.is_empty() {
        return Err("unknown mime type".to_string());
    }
    let data = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| e.to_string())?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok(DataUri {
        mime_type: mime_type.to_string(),
        data,
    })
}

/// File extension (with dot) for the image mime types we accept.
#[must_use]
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/png" => Some(".png"),
        "image/jpeg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "image/svg+xml" => Some(".svg"),
        "image/bmp" => Some(".bmp"),
        "image/webp" => Some(".webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_through_reduces_deleted_marker() {
        assert_eq!(
            strike_through("&lt;deleted element abc-1&gt;"),
            r#"<span style="text-decoration: line-through;">abc-1</span>"#
        );
        assert_eq!(
            strike_through("Door"),
            r#"<span style="text-decoration: line-through;">Door</span>"#
        );
    }

    #[test]
    fn image_html_with_caption() {
        let html = image_html("Diagram", "__C2P__diagram.svg", 750, "diagram", Some(("Figure", "Diagram X")));
        assert!(html.starts_with(
            r#"<span><img title="Diagram" class="diagram" src="workitemimg:__C2P__diagram.svg" style="max-width: 750px;"/></span>"#
        ));
        assert!(html.ends_with("Figure <span data-sequence=\"Figure\" class=\"polarion-rte-caption\">#</span> Diagram X\n</p>"));
    }

    #[test]
    fn link_lists_are_sorted_with_headings() {
        let list = sorted_link_list(["P-3", "P-1"], "Exchanges");
        let expected = format!(
            "<ul><div>Exchanges:</div>\n<li>{}</li>\n<li>{}</li></ul>",
            work_item_url("P-1"),
            work_item_url("P-3")
        );
        assert_eq!(list, expected);
        assert_eq!(sorted_link_list([], "Exchanges"), "<ul></ul>");
    }

    #[test]
    fn grouped_field_nests_includes() {
        let mut map = BTreeMap::new();
        map.insert("P-2".to_string(), vec![("Items".to_string(), vec!["P-9".to_string()])]);
        map.insert("P-1".to_string(), Vec::new());
        let html = link_field_list(&map);
        let expected = format!(
            "<ul><li>{}</li>\n<li>{}</li>\n<ul><div>Items:</div>\n<li>{}</li></ul></ul>",
            work_item_url("P-1"),
            work_item_url("P-2"),
            work_item_url("P-9")
        );
        assert_eq!(html, expected);
    }

    #[test]
    fn description_links_are_replaced() {
        let text = r#"see <a href="hlink://u-1">Door</a> and <a href="hlink://u-2">Lock</a>"#;
        let out = replace_description_links(text, |uuid, name| format!("[{uuid}:{name}]"));
        assert_eq!(out, "see [u-1:Door] and [u-2:Lock]");
    }

    #[test]
    fn images_rewrite_attributes() {
        let text = r#"<p><img src="data:image/png;base64,AAAA" data-capella-path="imgs/a.png"></p>"#;
        let out = rewrite_images(text, |mut tag| {
            let path = tag.remove("data-capella-path")?;
            tag.set("src", format!("workitemimg:{path}"));
            Some(tag.to_html())
        });
        assert_eq!(out, r#"<p><img src="workitemimg:imgs/a.png"/></p>"#);
    }

    #[test]
    fn image_sources_point_to_ids() {
        let ids = BTreeMap::from([("a.png".to_string(), "7-att".to_string())]);
        let out = replace_image_sources(r#"<img src="workitemimg:a.png"/><img src="workitemimg:b.png"/>"#, &ids);
        assert_eq!(out, r#"<img src="workitemimg:7-att"/><img src="workitemimg:b.png"/>"#);
    }

    #[test]
    fn data_uris_decode() {
        let uri = parse_data_uri("data:image/png;base64,iVBORw==").expect("valid uri");
        assert_eq!(uri.mime_type, "image/png");
        assert_eq!(uri.data, vec![0x89, b'P', b'N', b'G']);
        assert!(parse_data_uri("data:;base64,AAAA").is_err());
        assert!(parse_data_uri("http://x").is_err());
        assert_eq!(extension_for_mime("image/jpeg"), Some(".jpg"));
    }

    #[test]
    fn document_embeds_carry_layout_and_project() {
        assert_eq!(
            work_item_document("P-1", 2, "level=1|", None),
            r#"<div id="polarion_wiki macro name=module-workitem;params=id=P-1|layout=2|level=1|external=true"></div>"#
        );
        assert!(work_item_document("P-1", 0, "", Some("OTHER")).contains("external=true|project=OTHER"));
    }
}
