//! Cargo Lens - run cargo tasks and turn their output into diagnostics.

pub mod config;
pub mod diagnostics;
pub mod display;
pub mod process;
pub mod sink;
pub mod task;
