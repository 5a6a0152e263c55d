//! Turns cargo JSON lines into file-positioned diagnostics.

use crate::diagnostics::{
    ChildMessage, CompilerMessage, FileDiagnostic, Range, Severity, Span, ToolEvent,
};

/// Error type for diagnostic parsing.
#[derive(thiserror::Error, Debug)]
pub enum DiagnosticError {
    /// The line looked like JSON but is not a valid tool event.
    #[error("Malformed tool event: {reason}")]
    Malformed { input: String, reason: String },
}

/// Per-invocation parser for cargo's JSON message stream.
///
/// Complex messages (several spans, or a span produced by a macro
/// expansion) are split into one diagnostic per span. Those diagnostics
/// share a `(N) ` prefix so they can be correlated in a problem list; `N`
/// counts up from 1 for the lifetime of the parser.
#[derive(Debug, Default)]
pub struct DiagnosticParser {
    complex_count: u32,
}

impl DiagnosticParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of complex messages seen so far.
    #[must_use]
    pub fn complex_count(&self) -> u32 {
        self.complex_count
    }

    /// Parse one line of tool output.
    ///
    /// # Errors
    ///
    /// Returns `DiagnosticError::Malformed` if the line is not a valid tool event.
    pub fn parse_line(&mut self, line: &str) -> Result<Vec<FileDiagnostic>, DiagnosticError> {
        let event: ToolEvent =
            serde_json::from_str(line).map_err(|e| DiagnosticError::Malformed {
                input: line.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self.parse_event(&event))
    }

    /// Convert an already decoded event.
    pub fn parse_event(&mut self, event: &ToolEvent) -> Vec<FileDiagnostic> {
        match event.compiler_message() {
            Some(message) => self.parse_message(message),
            None => Vec::new(),
        }
    }

    fn parse_message(&mut self, message: &CompilerMessage) -> Vec<FileDiagnostic> {
        if message.spans.is_empty() {
            return Vec::new();
        }

        let severity = Severity::from_level(&message.level);

        if !message.is_complex() {
            let span = &message.spans[0];
            return vec![diagnostic(span, primary_text(message, span), severity)];
        }

        self.complex_count += 1;
        let prefix = format!("({}) ", self.complex_count);
        tracing::trace!(number = self.complex_count, spans = message.spans.len(), "Complex message");

        message
            .spans
            .iter()
            .filter_map(|span| {
                if span.is_primary {
                    let text = format!("{prefix}{}", primary_text(message, span));
                    Some(diagnostic(span, text, severity))
                } else {
                    // Unlabelled secondary spans mean nothing on their own.
                    span.label
                        .as_ref()
                        .map(|label| diagnostic(span, format!("{prefix}{label}"), severity))
                }
            })
            .collect()
    }
}

fn diagnostic(span: &Span, message: String, severity: Severity) -> FileDiagnostic {
    FileDiagnostic {
        file_path: span.file_name.clone(),
        range: Range::from_one_based(
            span.line_start,
            span.column_start,
            span.line_end,
            span.column_end,
        ),
        message,
        severity,
    }
}

/// `[code: ]message[\nlabel]` followed by the rendered children.
fn primary_text(message: &CompilerMessage, span: &Span) -> String {
    let mut text = String::new();
    if let Some(code) = &message.code {
        text.push_str(code);
        text.push_str(": ");
    }
    text.push_str(&message.message);
    if let Some(label) = &span.label {
        text.push('\n');
        text.push_str(label);
    }
    render_children(&mut text, &message.children, 1);
    text
}

fn render_children(out: &mut String, children: &[ChildMessage], depth: usize) {
    for child in children {
        out.push('\n');
        out.push_str(&"  ".repeat(depth));
        out.push_str(&child.level);
        out.push_str(": ");
        out.push_str(&child.message);
        render_children(out, &child.children, depth + 1);
    }
}
