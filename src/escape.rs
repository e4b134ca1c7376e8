use std::borrow::Cow;

/// HTML-encode `&`, `<`, `>`, `"` and `'`.
///
/// Borrows the input when there is nothing to encode.
pub fn encode_html(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }

    let mut encoded = String::with_capacity(input.len().saturating_add(16));
    for c in input.chars() {
        match c {
            '&' => encoded.push_str("&amp;"),
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#39;"),
            other => encoded.push(other),
        }
    }
    Cow::Owned(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_plain_text_is_borrowed() {
        assert!(matches!(encode_html("hello"), Cow::Borrowed("hello")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_special_characters() {
        assert_eq!(
            encode_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }
}
