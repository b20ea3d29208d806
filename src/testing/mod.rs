//! Test execution
//!
//! Command sequences, the per-target runner and YAML scenario files.

mod config;
mod runner;
mod sequence;

use std::time::Duration;

use serde::Serializer;

pub use config::TestScenario;
pub use runner::{
    NoopObserver, RepeatSummary, RunObserver, RunOptions, RunOutcome, RunState, TestRun,
    TestRunner,
};
pub use sequence::{
    pass_succeeded, run_pass, run_pass_with, Command, CommandKind, CommandResult,
    CommandSequence, PassOptions,
};

/// Serialize a duration as fractional milliseconds
pub fn serialize_duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

pub(crate) fn serialize_opt_duration_ms<S: Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => serialize_duration_ms(d, s),
        None => s.serialize_none(),
    }
}
