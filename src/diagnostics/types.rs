//! Diagnostic types handed to consumers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    /// Map a rustc level string to a severity.
    ///
    /// Unknown levels (including `error: internal compiler error`) are errors.
    #[must_use]
    pub fn from_level(level: &str) -> Self {
        match level {
            "warning" => Self::Warning,
            "note" => Self::Information,
            "help" => Self::Hint,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        };
        f.write_str(label)
    }
}

/// 0-based line/column position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// 0-based source range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start: Position::new(start_line, start_column),
            end: Position::new(end_line, end_column),
        }
    }

    /// Convert 1-based wire positions to a 0-based range.
    #[must_use]
    pub fn from_one_based(
        line_start: u32,
        column_start: u32,
        line_end: u32,
        column_end: u32,
    ) -> Self {
        Self::new(
            line_start.saturating_sub(1),
            column_start.saturating_sub(1),
            line_end.saturating_sub(1),
            column_end.saturating_sub(1),
        )
    }
}

/// A diagnostic positioned in a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiagnostic {
    /// Path as reported by the tool, usually relative to the working directory.
    pub file_path: String,
    pub range: Range,
    pub message: String,
    pub severity: Severity,
}
