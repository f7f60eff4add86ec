//! Platform A's in-band tagged text form: `[TAG:key=value,key=value]`.
//!
//! Four characters are reserved (`&`, `[`, `]`, `,`) and escaped as numeric
//! entities. Escape order is significant — `&` must go first on encode or a
//! later-inserted entity's own `&` would be re-escaped; decode reverses that
//! order. Both directions are total: every occurrence is replaced, not just
//! the first.

use std::collections::BTreeMap;

use crate::segment::{kind, Segment};

const ESCAPES: [(char, &str); 4] = [('&', "&amp;"), ('[', "&#91;"), (']', "&#93;"), (',', "&#44;")];

/// Escape reserved characters for embedding in an in-band tag. Total and
/// strictly expanding on `{&, [, ], ,}`.
pub fn cq_escape(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let mut out = s.replace('&', "&amp;");
    out = out.replace('[', "&#91;");
    out = out.replace(']', "&#93;");
    out.replace(',', "&#44;")
}

/// Reverse of [`cq_escape`]. For all `s`, `cq_unescape(cq_escape(s)) == s`.
pub fn cq_unescape(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let mut out = s.replace("&#91;", "[");
    out = out.replace("&#93;", "]");
    out = out.replace("&#44;", ",");
    out.replace("&amp;", "&")
}

/// Encode a [`Message`](crate::segment::Message) into platform A's in-band
/// text form. Text segments are escaped and emitted verbatim; all other
/// kinds become `[KIND,k1=v1,k2=v2]` with keys sorted for determinism.
pub fn encode(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        if seg.kind.is_empty() {
            continue;
        }
        if seg.is(kind::TEXT) {
            out.push_str(&cq_escape(seg.get("text").unwrap_or_default()));
            continue;
        }
        out.push('[');
        out.push_str(&seg.kind.to_ascii_uppercase());
        for (k, v) in &seg.data {
            out.push(',');
            out.push_str(k);
            out.push('=');
            out.push_str(&cq_escape(v));
        }
        out.push(']');
    }
    out
}

/// Parse platform A's in-band text form into segments. Tokenizes the raw,
/// still-escaped string: an unescaped `[`/`]` is a tag delimiter, while a
/// literal bracket a user typed arrives pre-escaped as `&#91;`/`&#93;` and
/// is left alone by the tokenizer. Each extracted text run and tag value is
/// unescaped only once it has been carved out, so an escaped delimiter in
/// plain text is never mistaken for a real tag.
pub fn decode(raw: &str) -> Vec<Segment> {
    let bytes = raw.as_bytes();
    let mut segments = Vec::new();
    let mut text_run = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = raw[i..].find(']') {
                let inner = &raw[i + 1..i + close];
                if let Some(seg) = parse_tag(inner) {
                    if !text_run.is_empty() {
                        segments.push(Segment::text(cq_unescape(&std::mem::take(&mut text_run))));
                    }
                    segments.push(seg);
                    i += close + 1;
                    continue;
                }
            }
        }
        // Not a recognized tag start; consume one char of plain text.
        let ch_len = raw[i..].chars().next().map_or(1, char::len_utf8);
        text_run.push_str(&raw[i..i + ch_len]);
        i += ch_len;
    }
    if !text_run.is_empty() {
        segments.push(Segment::text(cq_unescape(&text_run)));
    }
    segments
}

/// Parse the inside of a `[TAG,k=v,...]` tag (without the brackets). Returns
/// `None` if `inner` doesn't look like `TAG` or `TAG,k=v,...` with a
/// non-empty tag name, in which case the caller treats the bracket as plain
/// text.
fn parse_tag(inner: &str) -> Option<Segment> {
    let (tag, rest) = match inner.split_once(',') {
        Some((t, r)) => (t, Some(r)),
        None => (inner, None),
    };
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return None;
    }
    let mut data = BTreeMap::new();
    if let Some(rest) = rest {
        for pair in rest.split(',') {
            if let Some((k, v)) = pair.split_once('=') {
                if !k.is_empty() {
                    data.insert(k.to_string(), cq_unescape(v));
                }
            }
        }
    }
    Some(Segment { kind: tag.to_ascii_lowercase(), data })
}
