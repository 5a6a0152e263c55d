//! Destinations for task output.
//!
//! The coordinator never renders anything itself. Diagnostics, raw text
//! and user-facing notices go to these traits. Implementations are called
//! while the coordinator holds its state lock, so they must not call back
//! into the coordinator.

mod console;
mod memory;

use std::fmt;
use std::path::Path;

pub use console::*;
pub use memory::*;

use crate::diagnostics::FileDiagnostic;

/// Receives parsed diagnostics.
pub trait DiagnosticSink: Send + Sync {
    /// Drop every diagnostic from earlier tasks.
    fn clear(&self);

    /// Record one diagnostic. `file_path` is relative to `working_dir`
    /// unless it is already absolute.
    fn publish(&self, diagnostic: FileDiagnostic, working_dir: &Path);
}

/// Receives raw output lines for display.
pub trait TextSink: Send + Sync {
    fn append_line(&self, line: &str);
}

/// User-facing notices that are neither diagnostics nor output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The build tool could not be launched.
    ToolNotAvailable { program: String },
    /// The working directory could not be determined.
    WorkingDirectoryUnresolved { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolNotAvailable { program } => {
                write!(f, "{program} is not available. Is it installed and on PATH?")
            }
            Self::WorkingDirectoryUnresolved { reason } => {
                write!(f, "Could not resolve working directory: {reason}")
            }
        }
    }
}

/// Receives notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}
