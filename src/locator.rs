//! Finds externally hosted `<img>` embeds in document markup.
//!
//! Tags are matched lexically, so unclosed tags, stray quotes and other broken markup
//! around an embed never stop the scan; whatever cannot be read as a tag is skipped.
//! The captured fragment is the exact source text of the tag, which is what the
//! rewriter later searches for.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_HOST_MARKER: &str = "googleusercontent.com";
const DEFAULT_STEM: &str = "image";
const DEFAULT_EXTENSION: &str = "jpg";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid tag regex")
});

pub(crate) static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>`]+)))?"#)
        .expect("valid attribute regex")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(amp|quot|apos|lt|gt|#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6});").expect("valid entity regex")
});

/// One discovered embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(default)]
    pub width: String,
    #[serde(default)]
    pub height: String,
    /// Verbatim markup of the tag.
    pub fragment: String,
    pub filename: String,
    pub extension: String,
}

impl ImageReference {
    /// Declared dimensions, when both attributes are positive integers.
    pub fn declared_size(&self) -> Option<(u32, u32)> {
        let w = self.width.trim().parse::<u32>().ok().filter(|v| *v > 0)?;
        let h = self.height.trim().parse::<u32>().ok().filter(|v| *v > 0)?;
        Some((w, h))
    }
}

#[derive(Debug, Clone)]
pub struct Locator {
    marker: String,
}

impl Default for Locator {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_MARKER)
    }
}

impl Locator {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into().to_ascii_lowercase() }
    }

    /// Qualifying embeds in document order. The iterator is lazy; call again to restart.
    pub fn images<'a>(&'a self, doc: &'a str) -> Images<'a> {
        Images { locator: self, doc, pos: 0 }
    }

    pub fn is_external(&self, src: &str) -> bool {
        match parse_src(src) {
            Some(url) => url
                .host_str()
                .is_some_and(|host| host.to_ascii_lowercase().contains(&self.marker)),
            None => src.to_ascii_lowercase().contains(&self.marker),
        }
    }

    fn reference(&self, fragment: &str) -> Option<ImageReference> {
        let attrs = Attributes::parse(fragment);
        let url = attrs.get("src")?;
        if url.is_empty() || !self.is_external(&url) {
            return None;
        }
        let (filename, extension) = file_parts(&url);
        Some(ImageReference {
            alt_text: attrs.get("alt").unwrap_or_default(),
            width: attrs.get("width").unwrap_or_default(),
            height: attrs.get("height").unwrap_or_default(),
            fragment: fragment.to_string(),
            url,
            filename,
            extension,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Images<'a> {
    locator: &'a Locator,
    doc: &'a str,
    pos: usize,
}

impl Iterator for Images<'_> {
    type Item = ImageReference;

    fn next(&mut self) -> Option<ImageReference> {
        while let Some(m) = TAG_RE.find_at(self.doc, self.pos) {
            self.pos = m.end();
            if let Some(found) = self.locator.reference(m.as_str()) {
                return Some(found);
            }
        }
        None
    }
}

/// Attribute view over a single tag. The first occurrence of a name wins.
pub(crate) struct Attributes<'a> {
    tag: &'a str,
}

impl<'a> Attributes<'a> {
    pub(crate) fn parse(tag: &'a str) -> Self {
        Self { tag }
    }

    /// Body of the tag after its name, with the offset where it starts.
    fn body(&self) -> (usize, &'a str) {
        let start = self
            .tag
            .char_indices()
            .skip(1)
            .find(|(_, c)| c.is_whitespace() || *c == '>' || *c == '/')
            .map(|(i, _)| i)
            .unwrap_or(self.tag.len());
        (start, &self.tag[start..])
    }

    /// Byte range of the whole `name=...` attribute.
    pub(crate) fn attr_span(&self, name: &str) -> Option<std::ops::Range<usize>> {
        let (offset, body) = self.body();
        ATTR_RE
            .captures_iter(body)
            .find(|c| c[1].eq_ignore_ascii_case(name))
            .and_then(|c| c.get(0))
            .map(|m| offset + m.start()..offset + m.end())
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        let (_, body) = self.body();
        let caps = ATTR_RE
            .captures_iter(body)
            .find(|c| c[1].eq_ignore_ascii_case(name))?;
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or("");
        Some(unescape(raw.trim()))
    }
}

fn parse_src(src: &str) -> Option<Url> {
    if src.starts_with("//") {
        Url::parse(&format!("https:{src}")).ok()
    } else {
        Url::parse(src).ok()
    }
}

fn file_parts(src: &str) -> (String, String) {
    let path = match parse_src(src) {
        Some(url) => url.path().to_string(),
        None => src.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or("");
    let p = Path::new(last);
    let stem = p
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STEM);
    let ext = p
        .extension()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);
    (stem.to_string(), ext.to_string())
}

fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    ENTITY_RE
        .replace_all(raw, |c: &regex::Captures| {
            let decoded = match &c[1] {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                num => {
                    let code = match num.strip_prefix("#x").or_else(|| num.strip_prefix("#X")) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.strip_prefix('#').and_then(|d| d.parse().ok()),
                    };
                    code.and_then(char::from_u32)
                }
            };
            decoded.map(String::from).unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

/// HTML-escapes a value for a double-quoted attribute.
pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
