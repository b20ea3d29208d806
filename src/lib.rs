//! SCPI probe - instrument connection diagnostics
//!
//! This library provides resource discovery, instrument sessions and a
//! repeatable command runner for SCPI-style instruments reachable through
//! VISA resource addresses.

pub mod cli;
pub mod commands;
pub mod common;
pub mod resource;
pub mod scanner;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use scanner::{ScanOutcome, ScanResult, Scanner};
pub use session::Session;
pub use testing::{CommandSequence, TestRun, TestRunner};
