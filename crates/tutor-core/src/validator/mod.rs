//! Output validators: parse and validate a completion's raw text against an
//! expected shape, stripping incidental code-fence wrapping first.
//!
//! Pure functions, no side effects. Every failure is a [`ValidationError`]
//! with a human-readable reason and the parser position when one is
//! available.

use serde_json::Value;

/// Shape a completion's output is expected to take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedShape {
    /// A key/value mapping at the top level (JSON object; scalars and lists
    /// are rejected).
    StructuredObject,
    /// A key/value document (TOML); an empty document is invalid.
    KeyValueDocument,
    /// Free-form text of at least `min_len` characters after fence
    /// stripping.
    FormattedText { min_len: usize },
}

impl ExpectedShape {
    /// Minimum length applied by [`ExpectedShape::formatted_text`].
    pub const DEFAULT_MIN_TEXT_LEN: usize = 10;

    /// Formatted text with the default minimum length.
    pub fn formatted_text() -> Self {
        Self::FormattedText {
            min_len: Self::DEFAULT_MIN_TEXT_LEN,
        }
    }
}

/// A completion's output failed validation against its expected shape.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub reason: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ValidationError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            line: None,
            column: None,
        }
    }

    fn at(reason: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            reason: reason.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(
                f,
                "invalid model output at line {line}, column {column}: {}",
                self.reason
            ),
            _ => write!(f, "invalid model output: {}", self.reason),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Strip a leading/trailing fenced-code wrapper, if present.
///
/// Handles an optional language tag on the opening fence. Text without a
/// matching closing fence is returned trimmed but otherwise untouched.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    if !text.starts_with("```") {
        return text;
    }
    let Some(end) = text.rfind("```") else {
        return text;
    };
    if end == 0 {
        // Opening fence only; nothing to strip.
        return text;
    }
    let inner = &text[3..end];
    match inner.find('\n') {
        Some(pos) => inner[pos + 1..].trim(),
        None => inner.trim(),
    }
}

/// Validate raw completion text against an expected shape.
///
/// Returns the parsed payload as a JSON value: the object itself for
/// [`ExpectedShape::StructuredObject`], the document re-expressed as JSON
/// for [`ExpectedShape::KeyValueDocument`], and the stripped text for
/// [`ExpectedShape::FormattedText`].
pub fn validate(raw: &str, shape: &ExpectedShape) -> Result<Value, ValidationError> {
    let stripped = strip_code_fence(raw);

    match shape {
        ExpectedShape::StructuredObject => match serde_json::from_str::<Value>(stripped) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(ValidationError::new(format!(
                "expected a top-level object, got {}",
                json_kind(&other)
            ))),
            Err(e) if e.line() > 0 => Err(ValidationError::at(e.to_string(), e.line(), e.column())),
            Err(e) => Err(ValidationError::new(e.to_string())),
        },

        ExpectedShape::KeyValueDocument => {
            let table = match stripped.parse::<toml::Table>() {
                Ok(table) => table,
                Err(e) => {
                    return Err(match e.span() {
                        Some(span) => {
                            let (line, column) = line_col(stripped, span.start);
                            ValidationError::at(e.message(), line, column)
                        }
                        None => ValidationError::new(e.message()),
                    });
                }
            };

            if table.is_empty() {
                return Err(ValidationError::new("document has no keys"));
            }

            serde_json::to_value(&table)
                .map_err(|e| ValidationError::new(format!("document not representable: {e}")))
        }

        ExpectedShape::FormattedText { min_len } => {
            if stripped.chars().count() < *min_len {
                return Err(ValidationError::new(format!(
                    "text too short: {} chars, expected at least {min_len}",
                    stripped.chars().count()
                )));
            }
            Ok(Value::String(stripped.to_owned()))
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// 1-based line/column for a byte offset.
fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let prefix = &text[..offset.min(text.len())];
    let line = prefix.matches('\n').count() + 1;
    let column = prefix.rfind('\n').map_or(offset + 1, |nl| offset - nl);
    (line, column)
}
