use std::ops::Range;

use crate::locator::{escape_attr, Attributes};

/// Points `src` of a captured tag at `new_url`, leaving every other attribute as written.
/// With `size`, `width` and `height` are set as well, replacing existing values or
/// being inserted after `src`.
pub fn rewrite_fragment(fragment: &str, new_url: &str, size: Option<(u32, u32)>) -> String {
    let mut tag = set_attr(fragment, "src", new_url, None);
    if let Some((w, h)) = size {
        tag = set_attr(&tag, "width", &w.to_string(), Some("src"));
        tag = set_attr(&tag, "height", &h.to_string(), Some("width"));
    }
    tag
}

/// Replaces every occurrence of the exact fragment text. Returns the new document and
/// how many occurrences were replaced.
pub fn replace_fragment(doc: &str, fragment: &str, replacement: &str) -> (String, usize) {
    if fragment.is_empty() {
        return (doc.to_string(), 0);
    }
    let hits = doc.matches(fragment).count();
    if hits == 0 {
        return (doc.to_string(), 0);
    }
    (doc.replace(fragment, replacement), hits)
}

fn set_attr(tag: &str, name: &str, value: &str, after: Option<&str>) -> String {
    let attrs = Attributes::parse(tag);
    let rendered = format!(r#"{name}="{}""#, escape_attr(value));
    if let Some(span) = attrs.attr_span(name) {
        return splice(tag, span, &rendered);
    }
    let at = after
        .and_then(|a| attrs.attr_span(a))
        .map(|s| s.end)
        .unwrap_or_else(|| name_end(tag));
    splice(tag, at..at, &format!(" {rendered}"))
}

fn name_end(tag: &str) -> usize {
    tag.char_indices()
        .skip(1)
        .find(|(_, c)| c.is_whitespace() || *c == '>' || *c == '/')
        .map(|(i, _)| i)
        .unwrap_or(tag.len())
}

fn splice(s: &str, range: Range<usize>, with: &str) -> String {
    let mut out = String::with_capacity(s.len() + with.len());
    out.push_str(&s[..range.start]);
    out.push_str(with);
    out.push_str(&s[range.end..]);
    out
}
