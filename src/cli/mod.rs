//! CLI driver
//!
//! Resolves settings from the command line, an optional scenario file and
//! the configuration file, then runs the scan and the target run.

mod report;

pub use report::Reporter;

use std::time::Duration;

use crate::commands::Cli;
use crate::common::config::{Config, ErrorPolicy};
use crate::common::{Error, Result};
use crate::resource::{Endpoint, ResourceAddress, ResourceEnumerator, SystemEnumerator, VisaEndpoint};
use crate::scanner::{ScanOptions, Scanner};
use crate::testing::{CommandSequence, RunOptions, TestRunner, TestScenario};

/// Overall result of a CLI invocation that did not hit a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// At least one run ended aborted or timed out
    RunAborted,
}

impl ExitStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::RunAborted => 2,
        }
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: Option<String>,
    pub scan: bool,
    pub filter: String,
    pub scan_options: ScanOptions,
    pub sequence: CommandSequence,
    pub run_options: RunOptions,
    /// `None` makes a single run
    pub connect_repeat: Option<Duration>,
    pub json: bool,
}

impl Settings {
    /// Command-line values win over the scenario, which wins over the config
    pub fn resolve(cli: &Cli, config: &Config, scenario: Option<&TestScenario>) -> Result<Self> {
        let target = cli
            .resource
            .clone()
            .or_else(|| scenario.and_then(|s| s.target.clone()));
        if let Some(target) = &target {
            ResourceAddress::parse(target)?;
        }

        let commands = if !cli.commands.is_empty() {
            cli.commands.clone()
        } else if let Some(scenario) = scenario {
            scenario.commands.clone()
        } else {
            config.sequence.commands.clone()
        };
        let sequence = CommandSequence::new(&commands);
        if target.is_some() && sequence.is_empty() {
            return Err(Error::Config("no commands to run".to_string()));
        }

        let mut run_options = RunOptions::from_config(config);
        if let Some(ms) = cli.timeout.or(scenario.and_then(|s| s.timeout_ms)) {
            run_options.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.write_delay.or(scenario.and_then(|s| s.write_delay_ms)) {
            run_options.pass.write_delay = Duration::from_millis(ms);
        }
        if cli.continue_on_error {
            run_options.pass.on_error = ErrorPolicy::Continue;
        } else if let Some(policy) = scenario.and_then(|s| s.on_error) {
            run_options.pass.on_error = policy;
        }
        run_options.query_repeat = match cli.query_repeat {
            Some(repeat) => repeat,
            None => scenario_secs(scenario.and_then(|s| s.query_repeat_secs))?
                .unwrap_or(Duration::ZERO),
        };
        let connect_repeat = match cli.connect_repeat {
            Some(repeat) => Some(repeat),
            None => scenario_secs(scenario.and_then(|s| s.connect_repeat_secs))?,
        };

        let mut scan_options = ScanOptions::from_config(config);
        if let Some(ms) = cli.probe_timeout {
            scan_options.probe_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            scan: !(cli.no_scan && target.is_some()),
            target,
            filter: cli.filter.clone().unwrap_or_else(|| config.scan.filter.clone()),
            scan_options,
            sequence,
            run_options,
            connect_repeat,
            json: cli.json,
        })
    }
}

fn scenario_secs(secs: Option<f64>) -> Result<Option<Duration>> {
    secs.map(|s| {
        Duration::try_from_secs_f64(s)
            .map_err(|e| Error::Config(format!("invalid repeat duration {}: {}", s, e)))
    })
    .transpose()
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<ExitStatus> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let scenario = cli
        .sequence
        .as_deref()
        .map(TestScenario::load)
        .transpose()?;
    if let Some(scenario) = &scenario {
        tracing::info!(name = %scenario.name, "Loaded scenario");
    }

    let settings = Settings::resolve(&cli, &config, scenario.as_ref())?;
    let enumerator = SystemEnumerator::new(&config);
    let endpoint = VisaEndpoint::new(&config);
    let mut reporter = Reporter::new(settings.json);

    execute(&settings, &enumerator, &endpoint, &mut reporter).await
}

/// Scan (unless disabled) and run the target (if any)
pub async fn execute(
    settings: &Settings,
    enumerator: &dyn ResourceEnumerator,
    endpoint: &dyn Endpoint,
    reporter: &mut Reporter,
) -> Result<ExitStatus> {
    if settings.scan {
        reporter.scan_started(&settings.filter);
        let scanner = Scanner::new(enumerator, endpoint, settings.scan_options.clone());
        let results = scanner
            .scan_with(&settings.filter, |r| reporter.scan_result(r))
            .await?;
        reporter.scan_finished(&results);
    } else {
        reporter.scan_skipped();
    }

    let Some(target) = &settings.target else {
        return Ok(ExitStatus::Success);
    };

    let runner = TestRunner::new(
        endpoint,
        settings.sequence.clone(),
        settings.run_options.clone(),
    )?;
    let aborted = match settings.connect_repeat {
        Some(repeat) => {
            let summary = runner.repeat_connect(target, repeat, &mut *reporter).await;
            reporter.repeat_finished(&summary);
            summary.aborted > 0
        }
        None => runner
            .run_target(target, &mut *reporter)
            .await
            .outcome
            .is_aborted(),
    };

    Ok(if aborted {
        ExitStatus::RunAborted
    } else {
        ExitStatus::Success
    })
}
