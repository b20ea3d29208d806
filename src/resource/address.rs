//! VISA-style resource addresses
//!
//! Supported forms:
//! ```text
//! TCPIP[board]::<host>::<port>::SOCKET     raw TCP socket
//! TCPIP[board]::<host>[::<device>]::INSTR  VXI-11
//! ASRL<path or number>[::INSTR]            serial port
//! ```

use std::fmt;

use crate::common::{Error, Result};

/// Default VXI-11 device name
pub const DEFAULT_VXI11_DEVICE: &str = "inst0";

/// The transport a resource address resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Raw TCP socket carrying newline-terminated SCPI
    Socket { host: String, port: u16 },
    /// VXI-11 core channel reached through the portmapper
    Vxi11 { host: String, device: String },
    /// Local serial port
    Serial { port: String },
}

/// A parsed resource address that keeps its original spelling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    text: String,
    transport: Transport,
}

impl ResourceAddress {
    /// Parse a resource address
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || Error::InvalidAddress(text.to_string());

        let parts: Vec<&str> = text.split("::").collect();
        let head = parts[0].to_ascii_uppercase();

        let transport = if let Some(board) = head.strip_prefix("TCPIP") {
            if !board.chars().all(|c| c.is_ascii_digit()) || parts.len() < 2 {
                return Err(invalid());
            }
            let host = parts[1];
            if host.is_empty() {
                return Err(invalid());
            }
            let class = parts.last().map(|s| s.to_ascii_uppercase());

            match (parts.len(), class.as_deref()) {
                (4, Some("SOCKET")) => {
                    let port = parts[2].parse::<u16>().map_err(|_| invalid())?;
                    Transport::Socket {
                        host: host.to_string(),
                        port,
                    }
                }
                (2, _) | (3, Some("INSTR")) => Transport::Vxi11 {
                    host: host.to_string(),
                    device: DEFAULT_VXI11_DEVICE.to_string(),
                },
                (4, Some("INSTR")) if !parts[2].is_empty() => Transport::Vxi11 {
                    host: host.to_string(),
                    device: parts[2].to_string(),
                },
                _ => return Err(invalid()),
            }
        } else if head.starts_with("ASRL") {
            let port = &parts[0]["ASRL".len()..];
            let suffix_ok = match parts.len() {
                1 => true,
                2 => parts[1].eq_ignore_ascii_case("INSTR"),
                _ => false,
            };
            if port.is_empty() || !suffix_ok {
                return Err(invalid());
            }
            let port = if port.chars().all(|c| c.is_ascii_digit()) {
                format!("COM{}", port)
            } else {
                port.to_string()
            };
            Transport::Serial { port }
        } else {
            return Err(invalid());
        };

        Ok(Self {
            text: text.to_string(),
            transport,
        })
    }

    /// Resource address for a local serial port name
    pub fn serial(port_name: &str) -> String {
        format!("ASRL{}::INSTR", port_name)
    }

    /// The address as originally written
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The resolved transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Whether this is a socket-style resource (`...::SOCKET`)
    pub fn is_socket(&self) -> bool {
        is_socket_address(&self.text)
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.transport, Transport::Serial { .. })
    }
}

/// Socket-style resources are recognised by their `::SOCKET` suffix
pub fn is_socket_address(text: &str) -> bool {
    text.trim().to_ascii_uppercase().ends_with("::SOCKET")
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for ResourceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
