use std::fmt;

use tickshell_commons::normalize_separators;

/// Stream a [`LogLine`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// A line the child wrote to stdout.
    Output,
    /// A line the child wrote to stderr, or a runner failure description.
    Error,
}

/// One line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    kind: LogKind,
    text: String,
}

impl LogLine {
    /// Stdout line; backslash separators are rewritten as forward slashes.
    pub fn output(text: impl AsRef<str>) -> Self {
        Self {
            kind: LogKind::Output,
            text: normalize_separators(text.as_ref()).into_owned(),
        }
    }

    /// Stderr line, kept verbatim.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_error(&self) -> bool {
        self.kind == LogKind::Error
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
