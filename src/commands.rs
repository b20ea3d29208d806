//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "scpi-probe",
    about = "Scan for SCPI instruments and exercise their connections",
    version,
    long_about = None
)]
pub struct Cli {
    /// Resource address to test, e.g. TCPIP::192.168.1.50::5025::SOCKET
    pub resource: Option<String>,

    /// Skip the resource scan (ignored when no resource is given)
    #[arg(short = 'n', long)]
    pub no_scan: bool,

    /// VISA-style filter for the scan
    #[arg(long)]
    pub filter: Option<String>,

    /// Repeat connect → run → close for this many seconds, or "forever"
    #[arg(long, value_parser = parse_repeat)]
    pub connect_repeat: Option<Duration>,

    /// Keep running the command sequence for this many seconds after
    /// connecting, or "forever"
    #[arg(long, value_parser = parse_repeat)]
    pub query_repeat: Option<Duration>,

    /// I/O timeout in milliseconds
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Timeout for scan probes in milliseconds
    #[arg(long)]
    pub probe_timeout: Option<u64>,

    /// Command to send on every pass (repeatable, in order)
    #[arg(long = "command", short = 'c')]
    pub commands: Vec<String>,

    /// YAML scenario file with commands and run settings
    #[arg(long)]
    pub sequence: Option<PathBuf>,

    /// Pause after each write in milliseconds
    #[arg(long)]
    pub write_delay: Option<u64>,

    /// Attempt every command of a pass even after one fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also write a detailed log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parse a repeat duration: seconds (fractional allowed) or "forever"
pub fn parse_repeat(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("forever") {
        return Ok(Duration::MAX);
    }
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("expected seconds or 'forever', got '{}'", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repeat() {
        assert_eq!(parse_repeat("0"), Ok(Duration::ZERO));
        assert_eq!(parse_repeat("5"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_repeat("0.5"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_repeat("forever"), Ok(Duration::MAX));
        assert_eq!(parse_repeat("FOREVER"), Ok(Duration::MAX));
        assert!(parse_repeat("-1").is_err());
        assert!(parse_repeat("soon").is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "scpi-probe",
            "TCPIP::10.0.0.5::5025::SOCKET",
            "-n",
            "--query-repeat",
            "10",
            "-c",
            "*IDN?",
            "-c",
            "VOLT 1",
            "--continue-on-error",
        ])
        .unwrap();

        assert_eq!(cli.resource.as_deref(), Some("TCPIP::10.0.0.5::5025::SOCKET"));
        assert!(cli.no_scan);
        assert_eq!(cli.query_repeat, Some(Duration::from_secs(10)));
        assert_eq!(cli.connect_repeat, None);
        assert_eq!(cli.commands, vec!["*IDN?", "VOLT 1"]);
        assert!(cli.continue_on_error);
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_rejects_bad_repeat() {
        assert!(Cli::try_parse_from(["scpi-probe", "--connect-repeat", "later"]).is_err());
    }
}
