//! Terminal sinks.

use std::path::Path;

use crate::diagnostics::FileDiagnostic;
use crate::display;
use crate::sink::{DiagnosticSink, Notice, Notifier, TextSink};

/// Prints diagnostics as they arrive.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDiagnostics;

impl DiagnosticSink for ConsoleDiagnostics {
    fn clear(&self) {}

    fn publish(&self, diagnostic: FileDiagnostic, working_dir: &Path) {
        display::print_diagnostic(&working_dir.join(&diagnostic.file_path), &diagnostic);
    }
}

/// Prints raw output lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleText;

impl TextSink for ConsoleText {
    fn append_line(&self, line: &str) {
        display::print_output(line);
    }
}

/// Prints notices to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(%notice, "Notice");
        display::print_notice(&notice.to_string());
    }
}
