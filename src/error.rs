pub type MinihamlResult<T> = std::result::Result<T, MinihamlError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected end of {expected_what}")]
    UnexpectedEnd {
        /// Describes what ran out, e.g. "line (expected ')')"
        expected_what: String,
    },
    #[error("Invalid identifier starting with '{at_char}'")]
    InvalidIdentifier { at_char: String },
    #[error("Illegal nesting: {reason}")]
    IllegalNesting { reason: String },
    #[error("Unterminated interpolation, expected '}}'")]
    UnterminatedInterpolation,
    #[error("Unterminated attribute list, expected '{closing}'")]
    UnterminatedAttributes { closing: char },
    #[error("Data expected but end of line found")]
    MissingAttributeValue,
    #[error("Code values are not allowed here, quote the value of '{attribute}'")]
    CodeNotAllowed { attribute: String },
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
    #[error("'{keyword}' without a matching 'if'")]
    DanglingElse { keyword: String },
    #[error("Parser error: {0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_end(what: &str, expected: Option<&str>) -> Self {
        Self::UnexpectedEnd {
            expected_what: expected.map_or_else(
                || what.to_owned(),
                |e| format!("{what} (expected '{e}')"),
            ),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum MinihamlError {
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Could not find template '{name}' (searched: {})", .searched.join(", "))]
    TemplateNotFound { name: String, searched: Vec<String> },
    #[error("Unsupported doctype '{doctype}'")]
    UnsupportedDocType { doctype: String },
    #[error("Unsupported filter ':{name}'")]
    UnsupportedFilter { name: String },
    #[error("Content block '{name}' is defined more than once")]
    DuplicateContent { name: String },
    #[error("Child is missing for content placeholder '{placeholder}'")]
    MissingChildTemplate { placeholder: String },
    #[error("Template Entry Point {name} is missing")]
    MissingEntryPoint { name: String },
    #[error("No partial renderer is available for partial '{name}'")]
    MissingPartialRenderer { name: String },
    #[error("Variable not found: {variable_name}")]
    MissingVariable { variable_name: String },
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Rendering error: {message}")]
    Render { message: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<std::fmt::Error> for MinihamlError {
    fn from(_: std::fmt::Error) -> Self {
        Self::Render {
            message: "output sink rejected a write".to_owned(),
        }
    }
}
