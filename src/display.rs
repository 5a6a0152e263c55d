//! Colored CLI display utilities for task output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while cargo tasks run.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::diagnostics::{FileDiagnostic, Severity};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Format an elapsed duration as seconds with millisecond precision.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// Print one raw output line.
pub fn print_output(line: &str) {
    println!("{line}");
    let _ = io::stdout().flush();
}

/// Print a diagnostic in `path:line:col: severity: message` form.
pub fn print_diagnostic(path: &Path, diagnostic: &FileDiagnostic) {
    let tag = match diagnostic.severity {
        Severity::Error => "error".red().bold().to_string(),
        Severity::Warning => "warning".yellow().bold().to_string(),
        Severity::Information => "info".blue().to_string(),
        Severity::Hint => "hint".green().to_string(),
    };
    // Editors expect 1-based positions on the console.
    println!(
        "{}:{}:{}: {}: {}",
        path.display().bold(),
        diagnostic.range.start.line + 1,
        diagnostic.range.start.column + 1,
        tag,
        diagnostic.message
    );
    let _ = io::stdout().flush();
}

/// Print a summary line of diagnostic counts.
pub fn print_summary(errors: usize, warnings: usize, other: usize) {
    println!(
        "{} {} error(s), {} warning(s), {} note(s)",
        "[SUMMARY]".blue().bold(),
        errors.red(),
        warnings.yellow(),
        other
    );
    let _ = io::stdout().flush();
}

/// Print how many diagnostics a task reported.
pub fn print_diagnostic_count(count: usize) {
    println!("{} {} diagnostic(s)", "[SUMMARY]".blue().bold(), count);
    let _ = io::stdout().flush();
}

/// Print a notice for the user.
pub fn print_notice(message: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[NOTICE]".yellow().bold(),
        message
    );
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.red());
}
