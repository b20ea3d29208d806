//! Test runner implementation
//!
//! Drives one target through connect → configure → passes → close and
//! repeats that lifecycle when asked to. Failures are recorded in the
//! returned [`TestRun`] instead of being propagated.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{Error, RecordedError, Result};
use crate::resource::Endpoint;
use crate::session::Session;

use super::sequence::{pass_succeeded, run_pass_with, CommandResult, CommandSequence, PassOptions};
use super::{serialize_duration_ms, serialize_opt_duration_ms};

/// Lifecycle state of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Opening the session
    Connecting,
    /// Session open, terminations applied
    Connected,
    /// Executing passes
    Running,
    Completed,
    Aborted,
    /// Session released
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every pass succeeded
    Completed,
    /// Connect or a command failed
    AbortedOnError,
    /// A command ran into the I/O timeout
    TimedOut,
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

/// Record of one connect lifecycle against one address
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub address: String,
    /// Most recent command results, oldest first
    pub results: Vec<CommandResult>,
    /// Results discarded to respect the retention limit
    pub dropped_results: u64,
    #[serde(serialize_with = "serialize_opt_duration_ms")]
    pub connect_elapsed: Option<Duration>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_error: Option<RecordedError>,
    pub passes: u64,
    pub commands_run: u64,
    pub commands_failed: u64,
}

impl TestRun {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            results: Vec::new(),
            dropped_results: 0,
            connect_elapsed: None,
            duration: Duration::ZERO,
            outcome: RunOutcome::Completed,
            connect_error: None,
            passes: 0,
            commands_run: 0,
            commands_failed: 0,
        }
    }

    /// Fraction of executed commands that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.commands_run == 0 {
            return 0.0;
        }
        (self.commands_run - self.commands_failed) as f64 / self.commands_run as f64
    }

    fn record_pass(&mut self, results: Vec<CommandResult>, limit: usize) {
        self.passes += 1;
        self.commands_run += results.len() as u64;
        self.commands_failed += results.iter().filter(|r| !r.succeeded).count() as u64;
        self.results.extend(results);

        if self.results.len() > limit {
            let excess = self.results.len() - limit;
            self.results.drain(..excess);
            self.dropped_results += excess as u64;
        }
    }
}

/// Aggregate over a repeat-connect loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepeatSummary {
    pub runs: u64,
    pub completed: u64,
    pub aborted: u64,
    pub passes: u64,
    pub commands_run: u64,
    pub commands_failed: u64,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

impl RepeatSummary {
    fn record(&mut self, run: &TestRun) {
        self.runs += 1;
        if run.outcome.is_aborted() {
            self.aborted += 1;
        } else {
            self.completed += 1;
        }
        self.passes += run.passes;
        self.commands_run += run.commands_run;
        self.commands_failed += run.commands_failed;
    }
}

/// Receives progress while runs execute
pub trait RunObserver {
    fn on_connecting(&mut self, _address: &str) {}
    fn on_connected(&mut self, _address: &str, _elapsed: Duration) {}
    fn on_result(&mut self, _result: &CommandResult) {}
    fn on_pass_finished(&mut self, _pass: u64, _succeeded: bool) {}
    fn on_run_finished(&mut self, _run: &TestRun) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Bound for connect and for each query/write
    pub timeout: Duration,
    /// Keep running passes until this much time has passed since the first
    /// pass started; zero runs exactly one pass
    pub query_repeat: Duration,
    pub pass: PassOptions,
    /// Maximum command results kept per run
    pub max_recorded_results: usize,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeouts.io_ms),
            query_repeat: Duration::ZERO,
            pass: PassOptions::from_config(config),
            max_recorded_results: config.output.max_recorded_results.max(1),
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Executes a command sequence against targets
pub struct TestRunner<'a> {
    endpoint: &'a dyn Endpoint,
    sequence: CommandSequence,
    options: RunOptions,
}

impl<'a> TestRunner<'a> {
    /// Fails when `sequence` has no commands, since a pass would then never
    /// touch the session
    pub fn new(
        endpoint: &'a dyn Endpoint,
        sequence: CommandSequence,
        options: RunOptions,
    ) -> Result<Self> {
        if sequence.is_empty() {
            return Err(Error::Config("command sequence is empty".to_string()));
        }
        Ok(Self {
            endpoint,
            sequence,
            options,
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the full connect lifecycle once against `address`
    pub async fn run_target(&self, address: &str, observer: &mut dyn RunObserver) -> TestRun {
        let start = Instant::now();
        let mut run = TestRun::new(address);
        let mut state = RunState::Idle;

        transition(&mut state, RunState::Connecting, address);
        observer.on_connecting(address);
        let mut session = match Session::open(self.endpoint, address, self.options.timeout).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(address, "Connect failed: {}", e);
                transition(&mut state, RunState::Aborted, address);
                run.outcome = RunOutcome::AbortedOnError;
                run.connect_error = Some(RecordedError::from(&e));
                run.duration = start.elapsed();
                observer.on_run_finished(&run);
                return run;
            }
        };

        let connect_elapsed = start.elapsed();
        run.connect_elapsed = Some(connect_elapsed);
        transition(&mut state, RunState::Connected, address);
        observer.on_connected(address, connect_elapsed);

        transition(&mut state, RunState::Running, address);
        let running_since = Instant::now();
        run.outcome = loop {
            let results = run_pass_with(&mut session, &self.sequence, &self.options.pass, |r| {
                observer.on_result(r)
            })
            .await;
            let succeeded = pass_succeeded(&results);
            let timed_out = results
                .iter()
                .any(|r| r.error.as_ref().is_some_and(|e| e.code == "PROTOCOL_TIMEOUT"));

            run.record_pass(results, self.options.max_recorded_results);
            observer.on_pass_finished(run.passes, succeeded);

            if !succeeded {
                break if timed_out {
                    RunOutcome::TimedOut
                } else {
                    RunOutcome::AbortedOnError
                };
            }
            // Checked between passes only; a pass in progress always finishes
            if running_since.elapsed() >= self.options.query_repeat {
                break RunOutcome::Completed;
            }
        };

        let terminal = if run.outcome.is_aborted() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        transition(&mut state, terminal, address);

        if let Err(e) = session.close().await {
            tracing::warn!(address, "Error closing session: {}", e);
        }
        transition(&mut state, RunState::Closed, address);

        run.duration = start.elapsed();
        observer.on_run_finished(&run);
        run
    }

    /// Repeat the whole connect lifecycle until `repeat` has elapsed
    ///
    /// Each iteration is independent: a failed connect or run does not stop
    /// the next attempt. Zero runs exactly once; `Duration::MAX` never stops.
    pub async fn repeat_connect(
        &self,
        address: &str,
        repeat: Duration,
        observer: &mut dyn RunObserver,
    ) -> RepeatSummary {
        let start = Instant::now();
        let mut summary = RepeatSummary::default();

        loop {
            let run = self.run_target(address, observer).await;
            summary.record(&run);
            if start.elapsed() >= repeat {
                break;
            }
        }

        summary.duration = start.elapsed();
        summary
    }
}

fn transition(state: &mut RunState, next: RunState, address: &str) {
    tracing::debug!(address, "Run state {} -> {}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::ErrorPolicy;
    use crate::resource::mock::{MockEndpoint, MockInstrument};

    const ADDR: &str = "TCPIP::10.0.0.5::INSTR";

    fn options(query_repeat: Duration) -> RunOptions {
        RunOptions {
            timeout: Duration::from_millis(500),
            query_repeat,
            pass: PassOptions::default(),
            max_recorded_results: 10_000,
        }
    }

    #[derive(Default)]
    struct Recorder {
        connected: usize,
        results: usize,
        passes: Vec<bool>,
        runs: usize,
    }

    impl RunObserver for Recorder {
        fn on_connected(&mut self, _address: &str, _elapsed: Duration) {
            self.connected += 1;
        }
        fn on_result(&mut self, _result: &CommandResult) {
            self.results += 1;
        }
        fn on_pass_finished(&mut self, _pass: u64, succeeded: bool) {
            self.passes.push(succeeded);
        }
        fn on_run_finished(&mut self, _run: &TestRun) {
            self.runs += 1;
        }
    }

    #[tokio::test]
    async fn test_single_pass_by_default() {
        let endpoint = MockEndpoint::new().with_instrument(ADDR, MockInstrument::new("RIDEN"));
        let runner = TestRunner::new(&endpoint, CommandSequence::new(&["*IDN?"]), options(Duration::ZERO)).unwrap();

        let mut recorder = Recorder::default();
        let run = runner.run_target(ADDR, &mut recorder).await;

        assert_eq!(run.outcome, RunOutcome::Completed);
        assert_eq!(run.passes, 1);
        assert_eq!(run.results.len(), 1);
        assert!(run.connect_elapsed.is_some());
        assert_eq!(endpoint.connects(ADDR), 1);
        assert_eq!(endpoint.closes(ADDR), 1);
        assert_eq!(recorder.connected, 1);
        assert_eq!(recorder.results, 1);
        assert_eq!(recorder.passes, vec![true]);
        assert_eq!(recorder.runs, 1);
    }

    #[tokio::test]
    async fn test_failed_command_aborts_and_closes() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").fail_on("VOLT 1", "write failed"),
        );
        let runner = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["*IDN?", "VOLT 1"]),
            options(Duration::from_secs(60)),
        )
        .unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;

        assert_eq!(run.outcome, RunOutcome::AbortedOnError);
        assert_eq!(run.passes, 1, "no further passes after a failure");
        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].succeeded);
        assert!(!run.results[1].succeeded);
        assert_eq!(endpoint.closes(ADDR), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_records_error_without_close() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").refuse_connect("connection refused"),
        );
        let runner = TestRunner::new(&endpoint, CommandSequence::new(&["*IDN?"]), options(Duration::ZERO)).unwrap();

        let mut recorder = Recorder::default();
        let run = runner.run_target(ADDR, &mut recorder).await;

        assert_eq!(run.outcome, RunOutcome::AbortedOnError);
        assert!(run.results.is_empty());
        assert_eq!(run.passes, 0);
        assert!(run.connect_elapsed.is_none());
        let error = run.connect_error.unwrap();
        assert_eq!(error.code, "CONNECT_ERROR");
        assert!(error.message.contains("connection refused"));
        assert_eq!(endpoint.closes(ADDR), 0);
        assert_eq!(recorder.connected, 0);
        assert_eq!(recorder.runs, 1);
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let endpoint = MockEndpoint::new()
            .with_instrument(ADDR, MockInstrument::new("RIDEN").timeout_on("MEAS:VOLT?"));
        let mut opts = options(Duration::ZERO);
        opts.timeout = Duration::from_millis(20);
        let runner = TestRunner::new(&endpoint, CommandSequence::new(&["MEAS:VOLT?"]), opts).unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;
        assert_eq!(run.outcome, RunOutcome::TimedOut);
        assert!(run.outcome.is_aborted());
        assert_eq!(endpoint.closes(ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_repeat_runs_until_bound() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").latency(Duration::from_millis(100)),
        );
        let runner = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["*IDN?"]),
            options(Duration::from_secs(1)),
        )
        .unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;

        // Each pass takes 200 ms (write + read); passes start at 0, 200, ... 800
        assert_eq!(run.outcome, RunOutcome::Completed);
        assert_eq!(run.passes, 5);
        let running = run.duration - run.connect_elapsed.unwrap();
        assert!(running >= Duration::from_secs(1));
        assert!(running < Duration::from_millis(1200));
        assert_eq!(endpoint.connects(ADDR), 1);
        assert_eq!(endpoint.closes(ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_in_progress_finishes_past_bound() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").latency(Duration::from_millis(300)),
        );
        let runner = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["*IDN?"]),
            options(Duration::from_secs(1)),
        )
        .unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;
        // Passes of 600 ms: the second starts at 600 ms and ends at 1200 ms
        assert_eq!(run.passes, 2);
        assert_eq!(
            run.duration - run.connect_elapsed.unwrap(),
            Duration::from_millis(1200)
        );
    }

    #[tokio::test]
    async fn test_continue_policy_still_aborts_run_after_failed_pass() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").fail_on("VOLT 1", "nope"),
        );
        let mut opts = options(Duration::from_secs(60));
        opts.pass.on_error = ErrorPolicy::Continue;
        let runner = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["VOLT 1", "*IDN?", "*IDN?"]),
            opts,
        )
        .unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;
        assert_eq!(run.outcome, RunOutcome::AbortedOnError);
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.commands_failed, 1);
        assert!((run.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_retention_limit() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").latency(Duration::from_millis(10)),
        );
        let mut opts = options(Duration::from_millis(500));
        opts.max_recorded_results = 3;
        let runner = TestRunner::new(&endpoint, CommandSequence::new(&["*IDN?", "*IDN?"]), opts).unwrap();

        let run = runner.run_target(ADDR, &mut NoopObserver).await;
        assert!(run.passes > 2);
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.dropped_results, run.commands_run - 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_connect_survives_failures() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN")
                .latency(Duration::from_millis(50))
                .fail_on("VOLT 1", "dropped"),
        );
        let runner = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["*IDN?", "VOLT 1"]),
            options(Duration::ZERO),
        )
        .unwrap();

        let mut recorder = Recorder::default();
        let summary = runner
            .repeat_connect(ADDR, Duration::from_millis(900), &mut recorder)
            .await;

        // connect 50 + query 100 + write 50 = 200 ms per run
        assert_eq!(summary.runs, 5);
        assert_eq!(summary.aborted, 5);
        assert_eq!(summary.completed, 0);
        assert_eq!(recorder.runs, 5);
        assert_eq!(endpoint.connects(ADDR), 5);
        assert_eq!(endpoint.closes(ADDR), 5);
        assert!(summary.duration >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_repeat_connect_zero_runs_once() {
        let endpoint = MockEndpoint::new().with_instrument(
            ADDR,
            MockInstrument::new("RIDEN").refuse_connect("refused"),
        );
        let runner = TestRunner::new(&endpoint, CommandSequence::new(&["*IDN?"]), options(Duration::ZERO)).unwrap();

        let summary = runner
            .repeat_connect(ADDR, Duration::ZERO, &mut NoopObserver)
            .await;
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.aborted, 1);
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        let endpoint = MockEndpoint::new();
        let err = TestRunner::new(
            &endpoint,
            CommandSequence::new(&["", "  "]),
            options(Duration::MAX),
        )
        .err()
        .unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(endpoint.attempted(), Vec::<String>::new());
    }
}
