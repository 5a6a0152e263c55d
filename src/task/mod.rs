//! Task coordination: single-flight execution of cargo subcommands.

mod command;
mod coordinator;
mod state;

pub use command::*;
pub use coordinator::*;
pub use state::*;
