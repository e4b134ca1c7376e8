use crate::reader::is_name_char;

/// What a template line is, decided by the characters after its indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    Blank,
    /// `!!!`
    DocType,
    /// `%name`, `.class` or `#id`
    Tag,
    /// `-#`, dropped together with everything nested below it.
    SilentComment,
    /// `- code`
    CodeBlock,
    /// `=`, `&=` or `!=`
    Code { escape: Option<bool> },
    /// Plain text, or `& text` / `! text` with explicit escaping.
    Text { escape: Option<bool> },
    /// `/` or `/[condition]`
    Comment,
    /// `:name`
    Filter,
    /// `@name`
    Meta,
    /// `\`, the rest of the line is text even if it looks like markup.
    Escaped,
}

impl LineKind {
    /// The marker the parser consumes before the payload of the line.
    ///
    /// Tags consume their own `%`, `.` and `#` shortcuts so they report no
    /// marker.
    pub(crate) const fn marker(self) -> &'static str {
        match self {
            LineKind::Blank | LineKind::Tag | LineKind::Text { escape: None } => "",
            LineKind::DocType => "!!!",
            LineKind::SilentComment => "-#",
            LineKind::CodeBlock => "-",
            LineKind::Code { escape: None } => "=",
            LineKind::Code { escape: Some(true) } => "&=",
            LineKind::Code { escape: Some(false) } => "!=",
            LineKind::Text { escape: Some(true) } => "&",
            LineKind::Text { escape: Some(false) } => "!",
            LineKind::Comment => "/",
            LineKind::Filter => ":",
            LineKind::Meta => "@",
            LineKind::Escaped => "\\",
        }
    }
}

/// Classify a line from its content, with indentation already removed.
pub(crate) fn classify(content: &str) -> LineKind {
    let mut chars = content.chars();
    let Some(first) = chars.next() else {
        return LineKind::Blank;
    };
    let second = chars.next();
    let starts_name = second.is_some_and(is_name_char);

    match first {
        _ if content.trim().is_empty() => LineKind::Blank,
        '!' if content.starts_with("!!!") => LineKind::DocType,
        '!' if second == Some('=') => LineKind::Code {
            escape: Some(false),
        },
        '!' if second == Some(' ') => LineKind::Text {
            escape: Some(false),
        },
        '&' if second == Some('=') => LineKind::Code { escape: Some(true) },
        '&' if second == Some(' ') => LineKind::Text { escape: Some(true) },
        '%' => LineKind::Tag,
        '.' if starts_name => LineKind::Tag,
        '#' if second != Some('{') && starts_name => LineKind::Tag,
        '-' if second == Some('#') => LineKind::SilentComment,
        '-' => LineKind::CodeBlock,
        '=' => LineKind::Code { escape: None },
        '/' => LineKind::Comment,
        ':' if starts_name => LineKind::Filter,
        '@' if starts_name => LineKind::Meta,
        // `\#` and `\\` are left for the text parser to unescape.
        '\\' if !matches!(second, Some('#' | '\\')) => LineKind::Escaped,
        _ => LineKind::Text { escape: None },
    }
}
