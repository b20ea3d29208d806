//! Common utilities shared by the scanner, the runner and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, RecordedError, Result};

/// Parse a "listening at:" address from a helper process's output.
/// Handles the IPv6 wildcard `[::]:PORT` by converting it to 127.0.0.1:PORT
pub fn parse_listen_address(line: &str) -> Option<String> {
    let addr_start = line.find("listening at:")?;
    let addr = line[addr_start + "listening at:".len()..].trim();
    if let Some(port) = addr.strip_prefix("[::]:") {
        return Some(format!("127.0.0.1:{}", port));
    }
    if let Some(port) = addr.strip_prefix("0.0.0.0:") {
        return Some(format!("127.0.0.1:{}", port));
    }
    Some(addr.to_string())
}
