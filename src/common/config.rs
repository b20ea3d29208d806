//! Configuration file handling

use serde::Deserialize;
use std::path::Path;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Discovery settings
    #[serde(default)]
    pub scan: ScanConfig,

    /// Serial transport settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// VXI-11 transport settings
    #[serde(default)]
    pub vxi11: Vxi11Config,

    /// Default command sequence
    #[serde(default)]
    pub sequence: SequenceConfig,

    /// Result retention settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout for connect and each query/write of a test run
    #[serde(default = "default_io_ms")]
    pub io_ms: u64,

    /// Timeout for the identify probe during a scan
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            io_ms: default_io_ms(),
            probe_ms: default_probe_ms(),
        }
    }
}

fn default_io_ms() -> u64 {
    10_000
}
fn default_probe_ms() -> u64 {
    1_000
}

/// Resource discovery settings
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// VISA-style filter pattern passed to the enumerator
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Address prefixes that are listed but never probed
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Extra resources that are always offered for scanning
    #[serde(default)]
    pub resources: Vec<String>,

    /// List the OS serial ports
    #[serde(default = "default_true")]
    pub serial_ports: bool,

    /// Broadcast a VXI-11 portmapper request to find network instruments
    #[serde(default)]
    pub vxi11_broadcast: bool,

    /// How long to collect broadcast replies
    #[serde(default = "default_broadcast_ms")]
    pub broadcast_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            skip_prefixes: default_skip_prefixes(),
            resources: Vec::new(),
            serial_ports: true,
            vxi11_broadcast: false,
            broadcast_ms: default_broadcast_ms(),
        }
    }
}

fn default_filter() -> String {
    "?*".to_string()
}

// macOS exposes Bluetooth and similar virtual ports as /dev/cu.*; probing
// them ties up the whole probe timeout.
fn default_skip_prefixes() -> Vec<String> {
    vec!["ASRL/dev/cu.".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_broadcast_ms() -> u64 {
    1_000
}

/// Serial port settings
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_baud_rate() -> u32 {
    9600
}

/// VXI-11 settings
#[derive(Debug, Deserialize, Clone)]
pub struct Vxi11Config {
    /// Port of the ONC-RPC portmapper on the instrument
    #[serde(default = "default_portmapper_port")]
    pub portmapper_port: u16,
}

impl Default for Vxi11Config {
    fn default() -> Self {
        Self {
            portmapper_port: default_portmapper_port(),
        }
    }
}

fn default_portmapper_port() -> u16 {
    111
}

/// What to do when a command in a pass fails
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the pass at the first failed command
    #[default]
    FailFast,
    /// Attempt every command and report the success rate
    #[serde(alias = "continue_on_error")]
    Continue,
}

/// Default command sequence settings
#[derive(Debug, Deserialize, Clone)]
pub struct SequenceConfig {
    /// Commands executed on every pass
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,

    /// Pause after each non-query command
    #[serde(default)]
    pub write_delay_ms: u64,

    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            write_delay_ms: 0,
            on_error: ErrorPolicy::default(),
        }
    }
}

fn default_commands() -> Vec<String> {
    vec!["*IDN?".to_string()]
}

/// Result retention configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Maximum number of command results kept per run
    #[serde(default = "default_max_recorded_results")]
    pub max_recorded_results: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_recorded_results: default_max_recorded_results(),
        }
    }
}

fn default_max_recorded_results() -> usize {
    10_000
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
