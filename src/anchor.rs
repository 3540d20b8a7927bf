//! A small streaming HTML scanner that looks for a single named anchor
//! (`id="..."` or `name="..."` on any start tag). Operates on chunks fed
//! incrementally so a worker can stop reading the response body as soon
//! as the anchor is found, per spec.md §4.4.

/// Percent-decode a string (the target anchor is decoded once up front,
/// matching the original's `unquote(anchor)`).
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Streaming scanner for a single target anchor, fed HTML chunk by
/// chunk. Bounded internal buffer: only a partial tag spanning a chunk
/// boundary is retained between `feed` calls.
pub struct AnchorMatcher {
    target: String,
    found: bool,
    // Carryover text from the end of the previous chunk that might be
    // part of a tag split across the chunk boundary.
    carry: String,
}

impl AnchorMatcher {
    pub fn new(anchor: &str) -> Self {
        Self { target: percent_decode(anchor), found: false, carry: String::new() }
    }

    pub fn found(&self) -> bool {
        self.found
    }

    /// Feed the next chunk of response body. Returns `true` once the
    /// anchor has been located so the caller can stop reading early.
    pub fn feed(&mut self, chunk: &str) -> bool {
        if self.found {
            return true;
        }

        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(chunk);

        // Scan for complete `<tag ...>` spans; keep any trailing partial
        // tag (an unterminated `<`) as carry for the next chunk.
        let mut search_from = 0usize;
        loop {
            let Some(lt) = buf[search_from..].find('<') else {
                self.carry = buf[search_from..].to_string();
                break;
            };
            let lt = search_from + lt;
            let Some(gt_rel) = buf[lt..].find('>') else {
                // Tag not yet complete; keep from `<` onward for next feed.
                self.carry = buf[lt..].to_string();
                break;
            };
            let gt = lt + gt_rel;
            let tag = &buf[lt + 1..gt];
            if tag_matches(tag, &self.target) {
                self.found = true;
                return true;
            }
            search_from = gt + 1;
        }

        false
    }
}

/// Check whether a single `tagname attr="value" ...` span (without the
/// surrounding `<`/`>`) carries an `id` or `name` attribute equal to
/// `target`. Closing tags (`/foo`) and declarations (`!--`, `!doctype`)
/// never match.
fn tag_matches(tag: &str, target: &str) -> bool {
    let tag = tag.trim();
    if tag.starts_with('/') || tag.starts_with('!') || tag.starts_with('?') {
        return false;
    }
    for attr in split_attrs(tag) {
        if let Some((key, value)) = attr.split_once('=') {
            let key = key.trim();
            if key.eq_ignore_ascii_case("id") || key.eq_ignore_ascii_case("name") {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                if value == target {
                    return true;
                }
            }
        }
    }
    false
}

/// Split a tag's interior into `key=value`-ish tokens, respecting quoted
/// values that may themselves contain spaces.
fn split_attrs(tag: &str) -> Vec<String> {
    let mut attrs = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = tag.chars().peekable();
    // Skip the tag name (up to the first whitespace).
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            break;
        }
        chars.next();
    }
    for c in chars {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                c if c.is_whitespace() => {
                    if !current.trim().is_empty() {
                        attrs.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        attrs.push(current);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_id_attribute() {
        let mut m = AnchorMatcher::new("sect");
        assert!(m.feed("<html><body><h2 id=\"sect\">Title</h2></body></html>"));
        assert!(m.found());
    }

    #[test]
    fn finds_name_attribute_single_quoted() {
        let mut m = AnchorMatcher::new("top");
        assert!(m.feed("<a name='top'></a>"));
    }

    #[test]
    fn missing_anchor_never_matches() {
        let mut m = AnchorMatcher::new("sect");
        assert!(!m.feed("<h2 id=\"other\">Title</h2>"));
        assert!(!m.found());
    }

    #[test]
    fn anchor_split_across_chunks() {
        let mut m = AnchorMatcher::new("sect");
        assert!(!m.feed("<h2 id"));
        assert!(m.feed("=\"sect\">Title</h2>"));
        assert!(m.found());
    }

    #[test]
    fn percent_decodes_target_before_matching() {
        let mut m = AnchorMatcher::new("a%20b");
        assert!(m.feed("<h2 id=\"a b\">Title</h2>"));
        assert!(m.found());
    }

    #[test]
    fn ignores_closing_and_declaration_tags() {
        let mut m = AnchorMatcher::new("id");
        assert!(!m.feed("<!doctype id=\"id\"><html id=\"nope\"></html id=\"id\">"));
        assert!(!m.found());
    }
}
