//! Command sequences and single-pass execution

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::common::config::{Config, ErrorPolicy};
use crate::common::RecordedError;
use crate::session::Session;

use super::serialize_duration_ms;

/// How a command is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Expects a reply
    Query,
    /// Fire-and-forget
    Write,
}

/// One protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Commands ending in `?` are queries
    pub fn kind(&self) -> CommandKind {
        if self.text.trim_end().ends_with('?') {
            CommandKind::Query
        } else {
            CommandKind::Write
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind() == CommandKind::Query
    }
}

/// Ordered list of commands executed on every pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    commands: Vec<Command>,
}

impl CommandSequence {
    pub fn new<S: AsRef<str>>(commands: &[S]) -> Self {
        Self {
            commands: commands
                .iter()
                .map(|c| c.as_ref().trim())
                .filter(|c| !c.is_empty())
                .map(Command::new)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}

/// Result of executing one command
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub kind: CommandKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,
}

/// Per-pass execution settings
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Pause after each write that is not the last command of the pass
    pub write_delay: Duration,
    pub on_error: ErrorPolicy,
}

impl PassOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            write_delay: Duration::from_millis(config.sequence.write_delay_ms),
            on_error: config.sequence.on_error,
        }
    }
}

/// Execute one pass of `sequence`, in order
///
/// Under [`ErrorPolicy::FailFast`] the pass stops at the first failed
/// command, so the returned list is shorter than the sequence exactly when
/// a command failed before the end.
pub async fn run_pass(
    session: &mut Session,
    sequence: &CommandSequence,
    options: &PassOptions,
) -> Vec<CommandResult> {
    run_pass_with(session, sequence, options, |_| {}).await
}

/// Like [`run_pass`], reporting each result as soon as it is known
pub async fn run_pass_with<F>(
    session: &mut Session,
    sequence: &CommandSequence,
    options: &PassOptions,
    mut on_result: F,
) -> Vec<CommandResult>
where
    F: FnMut(&CommandResult),
{
    let mut results = Vec::with_capacity(sequence.len());
    let last = sequence.len().saturating_sub(1);

    for (i, command) in sequence.iter().enumerate() {
        let result = execute(session, command).await;
        on_result(&result);
        let failed = !result.succeeded;
        results.push(result);

        if failed && options.on_error == ErrorPolicy::FailFast {
            tracing::debug!(command = command.text(), "Pass stopped at failed command");
            break;
        }

        if !command.is_query() && i != last && !options.write_delay.is_zero() {
            tokio::time::sleep(options.write_delay).await;
        }
    }

    results
}

/// A pass succeeded when every command in it succeeded
pub fn pass_succeeded(results: &[CommandResult]) -> bool {
    results.iter().all(|r| r.succeeded)
}

async fn execute(session: &mut Session, command: &Command) -> CommandResult {
    let kind = command.kind();
    let start = Instant::now();

    let outcome = match kind {
        CommandKind::Query => session.query(command.text()).await.map(Some),
        CommandKind::Write => session.write(command.text()).await.map(|_| None),
    };
    let elapsed = start.elapsed();

    match outcome {
        Ok(reply) => CommandResult {
            command: command.text().to_string(),
            kind,
            succeeded: true,
            reply,
            elapsed,
            error: None,
        },
        Err(e) => {
            tracing::debug!(command = command.text(), "Command failed: {}", e);
            CommandResult {
                command: command.text().to_string(),
                kind,
                succeeded: false,
                reply: None,
                elapsed,
                error: Some(RecordedError::from(&e)),
            }
        }
    }
}
