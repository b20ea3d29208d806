//! Resource discovery

use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::Config;
use crate::common::Result;

use super::pattern::ResourcePattern;
use super::{serial, vxi11};

/// Lists the resource addresses that can currently be reached
#[async_trait]
pub trait ResourceEnumerator: Send + Sync {
    /// Return the addresses matching a VISA-style `pattern`, in discovery order
    async fn enumerate(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Enumerates OS serial ports, configured resources and, optionally,
/// VXI-11 instruments that answer a portmapper broadcast
#[derive(Debug, Clone)]
pub struct SystemEnumerator {
    serial_ports: bool,
    resources: Vec<String>,
    broadcast: Option<Duration>,
    portmapper_port: u16,
}

impl SystemEnumerator {
    pub fn new(config: &Config) -> Self {
        Self {
            serial_ports: config.scan.serial_ports,
            resources: config.scan.resources.clone(),
            broadcast: config
                .scan
                .vxi11_broadcast
                .then(|| Duration::from_millis(config.scan.broadcast_ms)),
            portmapper_port: config.vxi11.portmapper_port,
        }
    }
}

#[async_trait]
impl ResourceEnumerator for SystemEnumerator {
    async fn enumerate(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = ResourcePattern::new(pattern)?;

        let mut candidates = if self.serial_ports {
            serial::available_resources()?
        } else {
            Vec::new()
        };
        candidates.extend(self.resources.iter().cloned());
        if let Some(wait) = self.broadcast {
            candidates.extend(vxi11::discover(self.portmapper_port, wait).await?);
        }

        Ok(filter_unique(candidates, &pattern))
    }
}

/// Keep the first occurrence of each matching address, preserving order
pub fn filter_unique(candidates: Vec<String>, pattern: &ResourcePattern) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if pattern.matches(&candidate) && !out.iter().any(|c| c.eq_ignore_ascii_case(&candidate)) {
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_unique_preserves_order() {
        let pattern = ResourcePattern::new("?*").unwrap();
        let out = filter_unique(
            vec![
                "ASRL/dev/ttyUSB0::INSTR".to_string(),
                "TCPIP::10.0.0.5::INSTR".to_string(),
                "tcpip::10.0.0.5::instr".to_string(),
                "ASRL/dev/ttyUSB1::INSTR".to_string(),
            ],
            &pattern,
        );
        assert_eq!(
            out,
            vec![
                "ASRL/dev/ttyUSB0::INSTR",
                "TCPIP::10.0.0.5::INSTR",
                "ASRL/dev/ttyUSB1::INSTR"
            ]
        );
    }

    #[test]
    fn test_filter_unique_applies_pattern() {
        let pattern = ResourcePattern::new("TCPIP?*").unwrap();
        let out = filter_unique(
            vec![
                "ASRL/dev/ttyUSB0::INSTR".to_string(),
                "TCPIP::10.0.0.5::5025::SOCKET".to_string(),
            ],
            &pattern,
        );
        assert_eq!(out, vec!["TCPIP::10.0.0.5::5025::SOCKET"]);
    }

    #[tokio::test]
    async fn test_configured_resources_only() {
        let mut config = Config::default();
        config.scan.serial_ports = false;
        config.scan.resources = vec![
            "TCPIP::10.0.0.5::INSTR".to_string(),
            "TCPIP::10.0.0.6::5025::SOCKET".to_string(),
        ];
        let enumerator = SystemEnumerator::new(&config);

        let all = enumerator.enumerate("?*").await.unwrap();
        assert_eq!(all.len(), 2);
        let sockets = enumerator.enumerate("?*SOCKET").await.unwrap();
        assert_eq!(sockets, vec!["TCPIP::10.0.0.6::5025::SOCKET"]);
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_enumeration() {
        let enumerator = SystemEnumerator::new(&Config::default());
        let err = enumerator.enumerate("ASRL[").await.unwrap_err();
        assert_eq!(err.code(), "ENUMERATION_ERROR");
    }
}
