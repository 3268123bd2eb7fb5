use std::borrow::Cow;

/// Elements whose entire content is dropped from feed-supplied HTML.
const UNSAFE_BLOCKS: &[&str] = &["script", "style", "iframe", "object", "embed"];

/// Reduces feed-supplied markup to a single line of plain text.
///
/// Tags are removed, the common named and numeric entities are decoded,
/// control characters are dropped and runs of whitespace collapse to one space.
///
/// ```
/// use podkeeper::util::plain_text;
///
/// assert_eq!(plain_text("  <p>Episode&nbsp;1 &amp; 2</p>\n"), "Episode 1 & 2");
/// assert_eq!(plain_text("a < b"), "a < b");
/// ```
pub fn plain_text(s: &str) -> String {
    let without_blocks = remove_unsafe_blocks(s);
    let without_tags = strip_tags(&without_blocks);
    let decoded = decode_entities(&without_tags);
    collapse_whitespace(&strip_control_chars(&decoded))
}

/// Keeps feed-supplied HTML but removes active content.
///
/// Script-like elements are removed together with their content and control
/// characters are dropped. Everything else is passed through: rendering is the
/// consumer's concern.
pub fn safe_html(s: &str) -> String {
    let without_blocks = remove_unsafe_blocks(s);
    strip_control_chars(&without_blocks).trim().to_string()
}

/// Returns the first candidate that is non-empty after trimming.
pub fn first_non_empty<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.as_ref().trim().to_string())
        .find(|s| !s.is_empty())
}

fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c.is_control() && !matches!(c, '\t' | '\n' | '\r');
    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_control(c)).collect())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(s: &str) -> Cow<'_, str> {
    if !s.contains('<') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let opens_tag = matches!(
            chars.peek(),
            Some(n) if n.is_ascii_alphabetic() || matches!(n, '/' | '!' | '?')
        );
        if !opens_tag {
            out.push(c);
            continue;
        }
        // Tags separate words: "<p>a</p><p>b</p>" reads as "a b".
        out.push(' ');
        for n in chars.by_ref() {
            if n == '>' {
                break;
            }
        }
    }
    Cow::Owned(out)
}

fn remove_unsafe_blocks(s: &str) -> Cow<'_, str> {
    // ASCII lowercasing keeps byte offsets aligned with `s`.
    let lower = s.to_ascii_lowercase();
    if !UNSAFE_BLOCKS
        .iter()
        .any(|tag| lower.contains(&format!("<{tag}")))
    {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut pos = 0;
    'outer: while pos < s.len() {
        let rest = &lower[pos..];
        let next = UNSAFE_BLOCKS
            .iter()
            .filter_map(|tag| rest.find(&format!("<{tag}")).map(|i| (i, *tag)))
            .min_by_key(|(i, _)| *i);

        let Some((offset, tag)) = next else {
            out.push_str(&s[pos..]);
            break;
        };

        let start = pos + offset;
        out.push_str(&s[pos..start]);

        let close = format!("</{tag}");
        match lower[start..].find(&close) {
            Some(close_offset) => {
                let close_start = start + close_offset;
                match lower[close_start..].find('>') {
                    Some(end) => pos = close_start + end + 1,
                    None => break 'outer,
                }
            }
            // Unclosed or self-closing: drop the opening tag only.
            None => match lower[start..].find('>') {
                Some(end) => pos = start + end + 1,
                None => break 'outer,
            },
        }
    }
    Cow::Owned(out)
}

fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let decoded = candidate
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&candidate[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_strips_tags_and_collapses() {
        assert_eq!(
            plain_text("<p>First</p><p>Second\n\n line</p>"),
            "First Second line"
        );
    }

    #[test]
    fn test_plain_text_decodes_entities() {
        assert_eq!(plain_text("Q&amp;A &#8211; part &#x32;"), "Q&A \u{2013} part 2");
        assert_eq!(plain_text("AT&T"), "AT&T");
    }

    #[test]
    fn test_plain_text_drops_scripts() {
        assert_eq!(
            plain_text("Hi<script>alert('x')</script> there"),
            "Hi there"
        );
    }

    #[test]
    fn test_plain_text_removes_control_chars() {
        assert_eq!(plain_text("bad\x07 title\x1b"), "bad title");
    }

    #[test]
    fn test_safe_html_keeps_markup() {
        assert_eq!(
            safe_html("  <p>Show <a href=\"https://x.test\">notes</a></p><STYLE>p{}</STYLE>"),
            "<p>Show <a href=\"https://x.test\">notes</a></p>"
        );
    }

    #[test]
    fn test_safe_html_unclosed_script() {
        assert_eq!(safe_html("text<script src=x>"), "text");
    }

    #[test]
    fn test_first_non_empty() {
        assert_eq!(
            first_non_empty([None, Some("  "), Some(" value "), Some("later")]),
            Some("value".to_string())
        );
        assert_eq!(first_non_empty::<_, &str>([None, Some("")]), None);
    }
}
