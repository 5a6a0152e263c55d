//! Cargo JSON events and their conversion into file diagnostics.

mod events;
mod parser;
mod types;

pub use events::*;
pub use parser::*;
pub use types::*;
