//! WordprocessingML text surgery.
//!
//! Word splits typed text into runs freely, so a tag such as
//! `{{ recipientName }}` often arrives as several `<w:t>` fragments. Before
//! parsing, markup inside template tags is removed and paragraph/row scoped
//! block tags (`{%p ... %}`, `{%tr ... %}`) replace their enclosing element.

use auditdoc_shared::{AuditDocError, Result};

/// Remove XML markup inside every `{{ }}` / `{% %}` tag and normalise its text.
pub(crate) fn clean_template_tags(xml: &str) -> String {
    let bytes = xml.as_bytes();
    let mut out = String::with_capacity(xml.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(j) = skip_markup(bytes, i + 1) {
                let kind = bytes[j];
                if kind == b'{' || kind == b'%' {
                    let closer = if kind == b'{' { b'}' } else { b'%' };
                    if let Some((body, end)) = collect_tag_body(xml, j + 1, closer) {
                        out.push_str(&xml[copied..i]);
                        out.push('{');
                        out.push(kind as char);
                        out.push_str(&normalize_tag_text(&body));
                        out.push(closer as char);
                        out.push('}');
                        i = end;
                        copied = end;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }

    out.push_str(&xml[copied..]);
    out
}

/// Index of the next byte at or after `i` that is not inside `<...>` markup.
fn skip_markup(bytes: &[u8], mut i: usize) -> Option<usize> {
    while i < bytes.len() {
        if bytes[i] != b'<' {
            return Some(i);
        }
        i += bytes[i..].iter().position(|&b| b == b'>')? + 1;
    }
    None
}

/// Text of a tag body from `start` up to `closer` + `}`, markup dropped.
/// Returns the body and the index just past the closing brace.
fn collect_tag_body(xml: &str, start: usize, closer: u8) -> Option<(String, usize)> {
    let bytes = xml.as_bytes();
    let mut body = String::new();
    let mut i = start;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => i += bytes[i..].iter().position(|&b| b == b'>')? + 1,
            b if b == closer => {
                match skip_markup(bytes, i + 1) {
                    Some(j) if bytes[j] == b'}' => return Some((body, j + 1)),
                    _ => {
                        body.push(closer as char);
                        i += 1;
                    }
                }
            }
            // A second opener before the close: malformed, left for the parser to report.
            b'{' => return None,
            _ => {
                let ch = xml[i..].chars().next()?;
                body.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    None
}

/// Decode entities and straighten the smart quotes Word inserts while typing.
fn normalize_tag_text(body: &str) -> String {
    unescape_xml(body)
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

// ---------------------------------------------------------------------------
// Scoped block tags
// ---------------------------------------------------------------------------

/// Element-scoped tag prefixes and the element each one replaces.
const SCOPES: [(&str, &str); 2] = [("{%p ", "p"), ("{%tr ", "tr")];

/// Replace each element holding a `{%p ... %}` or `{%tr ... %}` tag with a
/// plain `{% ... %}` tag, so the block includes or drops whole elements.
pub(crate) fn expand_scoped_tags(xml: &str) -> Result<String> {
    let mut doc = xml.to_string();

    for (prefix, element) in SCOPES {
        let open_bare = format!("<w:{element}>");
        let open_attr = format!("<w:{element} ");
        let close = format!("</w:{element}>");

        let mut search_from = 0;
        while let Some(offset) = doc[search_from..].find(prefix) {
            let tag_start = search_from + offset;
            let body_start = tag_start + prefix.len();
            let body_len = doc[body_start..].find("%}").ok_or_else(|| {
                AuditDocError::rendering(format!("unterminated '{}' tag", prefix.trim_end()))
            })?;
            let tag_end = body_start + body_len + 2;
            let body = doc[body_start..body_start + body_len].trim().to_string();

            let elem_start = [doc[..tag_start].rfind(&open_bare), doc[..tag_start].rfind(&open_attr)]
                .into_iter()
                .flatten()
                .max()
                .ok_or_else(|| {
                    AuditDocError::rendering(format!(
                        "'{{%{element} {body} %}}' is not inside a <w:{element}> element"
                    ))
                })?;
            let elem_end = doc[tag_end..]
                .find(&close)
                .map(|pos| tag_end + pos + close.len())
                .ok_or_else(|| {
                    AuditDocError::rendering(format!(
                        "'{{%{element} {body} %}}' has no closing </w:{element}>"
                    ))
                })?;

            let replacement = format!("{{% {body} %}}");
            doc.replace_range(elem_start..elem_end, &replacement);
            search_from = elem_start + replacement.len();
        }
    }

    Ok(doc)
}

// ---------------------------------------------------------------------------
// Field placement
// ---------------------------------------------------------------------------

/// Reject merge fields outside a `<w:t>` text node.
///
/// Substituted values are escaped for text content and may close and
/// reopen `<w:t>` around line breaks, which is only well-formed there.
pub(crate) fn check_field_placement(xml: &str) -> Result<()> {
    let bytes = xml.as_bytes();
    let mut in_text = false;
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"{{") {
            if !in_text {
                let tag = xml[i..].find("}}").map_or(&xml[i..], |end| &xml[i..i + end + 2]);
                return Err(AuditDocError::rendering(format!(
                    "merge field '{tag}' is not inside a <w:t> text run"
                )));
            }
            i += 2;
        } else if rest.starts_with(b"</w:t>") {
            in_text = false;
            i += 6;
        } else if rest.starts_with(b"<w:t>") || rest.starts_with(b"<w:t ") {
            in_text = true;
            i += 4;
        } else {
            i += 1;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape a merge value for a `<w:t>` text node. Line breaks become `<w:br/>`.
pub(crate) fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, line) in value.split('\n').enumerate() {
        if i > 0 {
            out.push_str(r#"</w:t><w:br/><w:t xml:space="preserve">"#);
        }
        for ch in line.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&apos;"),
                '\r' => {}
                c => out.push(c),
            }
        }
    }
    out
}

fn unescape_xml(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
