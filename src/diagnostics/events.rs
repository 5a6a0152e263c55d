//! Event types from cargo's `--message-format json` output.
//!
//! Cargo writes one JSON object per line on stdout. Only
//! `compiler-message` events carry diagnostics; every other reason
//! (`compiler-artifact`, `build-script-executed`, `build-finished`, ...)
//! collapses into [`ToolEvent::Other`].

use serde::{Deserialize, Deserializer, Serialize};

/// Highlighted source line attached to a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanText {
    /// The full source line.
    pub text: String,
    /// 1-based column where the highlight starts.
    pub highlight_start: u32,
    /// 1-based column where the highlight ends.
    pub highlight_end: u32,
}

/// Macro expansion that produced a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanExpansion {
    /// Span of the macro invocation.
    pub span: Span,
    /// Name of the expanded macro, e.g. `println!`.
    #[serde(default)]
    pub macro_decl_name: String,
    /// Span of the macro definition, when known.
    #[serde(default)]
    pub def_site_span: Option<Span>,
}

/// A source range attached to a compiler message.
///
/// Positions are 1-based on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub file_name: String,
    pub byte_start: u32,
    pub byte_end: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub column_start: u32,
    pub column_end: u32,
    pub is_primary: bool,
    #[serde(deserialize_with = "non_empty_label")]
    pub label: Option<String>,
    pub expansion: Option<Box<SpanExpansion>>,
    pub text: Vec<SpanText>,
}

/// Nested note/help attached to a compiler message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildMessage {
    pub level: String,
    pub message: String,
    pub children: Vec<ChildMessage>,
}

/// A diagnostic emitted by rustc and forwarded by cargo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerMessage {
    /// Severity string: `error`, `warning`, `note`, `help`, ...
    pub level: String,
    /// Primary message text.
    pub message: String,
    /// Short error code such as `E0384`.
    #[serde(deserialize_with = "flatten_code")]
    pub code: Option<String>,
    pub spans: Vec<Span>,
    pub children: Vec<ChildMessage>,
}

impl CompilerMessage {
    /// Returns true if the message needs one diagnostic per span.
    ///
    /// That is the case for multi-span messages and for single spans that
    /// come out of a macro expansion.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        match self.spans.as_slice() {
            [] => false,
            [only] => only.expansion.is_some(),
            _ => true,
        }
    }
}

/// Events emitted by cargo in JSON message format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum ToolEvent {
    /// Diagnostic from the compiler.
    CompilerMessage {
        /// The diagnostic payload.
        message: CompilerMessage,
    },
    /// Catch-all for every other event reason.
    #[serde(other)]
    Other,
}

impl ToolEvent {
    /// Returns the compiler message if this event carries one.
    #[must_use]
    pub fn compiler_message(&self) -> Option<&CompilerMessage> {
        match self {
            Self::CompilerMessage { message } => Some(message),
            Self::Other => None,
        }
    }
}

/// `code` is either a bare string or rustc's `{ "code": .., "explanation": .. }`.
fn flatten_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCode {
        Plain(String),
        Detailed { code: String },
    }

    let raw: Option<RawCode> = Option::deserialize(deserializer)?;
    Ok(raw.map(|code| match code {
        RawCode::Plain(code) | RawCode::Detailed { code } => code,
    }))
}

fn non_empty_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let label: Option<String> = Option::deserialize(deserializer)?;
    Ok(label.filter(|l| !l.is_empty()))
}
