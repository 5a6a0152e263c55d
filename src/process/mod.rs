//! Build tool process spawning and output streaming.

mod runner;
mod stream;

pub use runner::*;
pub use stream::*;
