//! In-memory sinks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::diagnostics::{FileDiagnostic, Severity};
use crate::sink::{DiagnosticSink, Notice, Notifier, TextSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Aggregates diagnostics per resolved file path.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    files: Mutex<BTreeMap<PathBuf, Vec<FileDiagnostic>>>,
}

impl CollectingDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all diagnostics, keyed by absolute-or-joined path.
    #[must_use]
    pub fn by_file(&self) -> BTreeMap<PathBuf, Vec<FileDiagnostic>> {
        lock(&self.files).clone()
    }

    /// Diagnostics for one resolved path.
    #[must_use]
    pub fn for_file(&self, path: &Path) -> Vec<FileDiagnostic> {
        lock(&self.files).get(path).cloned().unwrap_or_default()
    }

    /// Total number of diagnostics held.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.files).values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count diagnostics with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        lock(&self.files)
            .values()
            .flatten()
            .filter(|d| d.severity == severity)
            .count()
    }
}

impl DiagnosticSink for CollectingDiagnostics {
    fn clear(&self) {
        lock(&self.files).clear();
    }

    fn publish(&self, diagnostic: FileDiagnostic, working_dir: &Path) {
        let path = working_dir.join(&diagnostic.file_path);
        lock(&self.files).entry(path).or_default().push(diagnostic);
    }
}

/// Keeps every text line.
#[derive(Debug, Default)]
pub struct BufferedText {
    lines: Mutex<Vec<String>>,
}

impl BufferedText {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

impl TextSink for BufferedText {
    fn append_line(&self, line: &str) {
        lock(&self.lines).push(line.to_string());
    }
}

/// Keeps every notice.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }
}
