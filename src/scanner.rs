//! Resource scanner
//!
//! Enumerates candidate resources and sends each one an identify probe.
//! One bad device never stops the scan: every probe failure is recorded
//! against its address and the scan moves on. Only a failing enumerator
//! aborts the scan.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{RecordedError, Result};
use crate::resource::{Endpoint, ResourceEnumerator};
use crate::session::Session;

/// Query used to identify an instrument
pub const IDENTIFY_QUERY: &str = "*IDN?";

/// Outcome of probing one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The instrument answered the identify query
    Identified { name: String },
    /// Connect or identify failed
    Unreachable { error: RecordedError },
    /// Not probed because the address is known to host non-SCPI devices
    Skipped,
}

/// Result of probing one discovered resource
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub address: String,
    #[serde(flatten)]
    pub outcome: ScanOutcome,
    #[serde(serialize_with = "crate::testing::serialize_duration_ms")]
    pub elapsed: Duration,
}

/// Scanner settings
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Timeout for connect and for the identify query
    pub probe_timeout: Duration,
    /// Addresses starting with any of these prefixes are never probed
    pub skip_prefixes: Vec<String>,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            probe_timeout: Duration::from_millis(config.timeouts.probe_ms),
            skip_prefixes: config.scan.skip_prefixes.clone(),
        }
    }

    /// Whether `address` is excluded from probing
    pub fn is_skipped(&self, address: &str) -> bool {
        self.skip_prefixes.iter().any(|p| address.starts_with(p.as_str()))
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Discovers resources and identifies the instruments behind them
pub struct Scanner<'a> {
    enumerator: &'a dyn ResourceEnumerator,
    endpoint: &'a dyn Endpoint,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(
        enumerator: &'a dyn ResourceEnumerator,
        endpoint: &'a dyn Endpoint,
        options: ScanOptions,
    ) -> Self {
        Self {
            enumerator,
            endpoint,
            options,
        }
    }

    /// Enumerate resources matching `pattern` and probe each in order
    ///
    /// `on_result` is called as soon as each resource has been handled.
    pub async fn scan_with<F>(&self, pattern: &str, mut on_result: F) -> Result<Vec<ScanResult>>
    where
        F: FnMut(&ScanResult),
    {
        let addresses = self.enumerator.enumerate(pattern).await?;
        tracing::info!(count = addresses.len(), pattern, "Resources enumerated");

        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self.probe(&address).await;
            on_result(&result);
            results.push(result);
        }
        Ok(results)
    }

    /// Enumerate resources matching `pattern` and probe each in order
    pub async fn scan(&self, pattern: &str) -> Result<Vec<ScanResult>> {
        self.scan_with(pattern, |_| {}).await
    }

    /// Probe a single resource
    pub async fn probe(&self, address: &str) -> ScanResult {
        let start = Instant::now();

        if self.options.is_skipped(address) {
            tracing::debug!(address, "Skipping resource");
            return ScanResult {
                address: address.to_string(),
                outcome: ScanOutcome::Skipped,
                elapsed: start.elapsed(),
            };
        }

        let outcome = match self.identify(address).await {
            Ok(name) => {
                tracing::info!(address, name = %name, "Instrument identified");
                ScanOutcome::Identified { name }
            }
            Err(error) => {
                tracing::info!(address, "Probe failed: {}", error);
                ScanOutcome::Unreachable {
                    error: RecordedError::from(&error),
                }
            }
        };

        ScanResult {
            address: address.to_string(),
            outcome,
            elapsed: start.elapsed(),
        }
    }

    async fn identify(&self, address: &str) -> Result<String> {
        let mut session = Session::open(self.endpoint, address, self.options.probe_timeout).await?;
        let reply = session.query(IDENTIFY_QUERY).await;
        // The probe never keeps the session, whatever the query did
        if let Err(e) = session.close().await {
            tracing::debug!(address, "Error closing probe session: {}", e);
        }
        reply
    }
}
