//! Cargo subcommand arguments.

use serde::{Deserialize, Serialize};

/// Flags that make cargo print line-delimited JSON on stdout.
pub const MESSAGE_FORMAT_FLAGS: [&str; 2] = ["--message-format", "json"];

/// Subcommands that understand `--message-format`.
const DIAGNOSTIC_COMMANDS: [&str; 5] = ["build", "check", "clippy", "run", "test"];

/// Returns true if `command` reports diagnostics as JSON when asked to.
#[must_use]
pub fn produces_diagnostics(command: &str) -> bool {
    DIAGNOSTIC_COMMANDS.contains(&command)
}

/// Arguments to pass after `command`, with the JSON flags prepended when
/// the subcommand supports them.
#[must_use]
pub fn augment_args(command: &str, args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + MESSAGE_FORMAT_FLAGS.len());
    if produces_diagnostics(command) {
        out.extend(MESSAGE_FORMAT_FLAGS.iter().map(|s| (*s).to_string()));
    }
    out.extend(args.iter().cloned());
    out
}

/// What `check` should cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckTarget {
    /// Every target of the package.
    #[default]
    All,
    /// Only the library target.
    Library,
}

/// Whether the installed cargo has a `check` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSupport {
    Supported,
    /// Old cargo: emulate `check` with `rustc -- -Zno-trans`.
    Unsupported,
}

impl CheckSupport {
    /// Subcommand and arguments that check `target`.
    #[must_use]
    pub fn command_for(self, target: CheckTarget) -> (&'static str, Vec<String>) {
        let mut args = Vec::new();
        if target == CheckTarget::Library {
            args.push("--lib".to_string());
        }
        match self {
            Self::Supported => ("check", args),
            Self::Unsupported => {
                args.push("--".to_string());
                args.push("-Zno-trans".to_string());
                ("rustc", args)
            }
        }
    }
}
