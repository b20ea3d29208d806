//! Endpoint and connection abstractions
//!
//! An [`Endpoint`] turns a resource address into a live [`Connection`].
//! Connections move raw bytes only; termination handling lives in
//! [`crate::session::Session`].

use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::Config;
use crate::common::Result;

use super::address::{ResourceAddress, Transport};
use super::serial::SerialConnection;
use super::socket::SocketConnection;
use super::vxi11::Vxi11Connection;

/// A connected instrument link
///
/// Every call is bounded by the timeout the connection was opened with.
#[async_trait]
pub trait Connection: Send {
    /// Send one complete message
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read one message
    ///
    /// With a termination byte the read continues until that byte arrives
    /// (it is included in the returned data). Without one the transport's own
    /// end-of-message rule applies.
    async fn read(&mut self, termination: Option<u8>) -> Result<Vec<u8>>;

    /// Release the link
    async fn close(&mut self) -> Result<()>;
}

/// Factory for connections
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn connect(
        &self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>>;
}

/// Endpoint that opens real sockets, VXI-11 links and serial ports
#[derive(Debug, Clone)]
pub struct VisaEndpoint {
    baud_rate: u32,
    portmapper_port: u16,
}

impl VisaEndpoint {
    pub fn new(config: &Config) -> Self {
        Self {
            baud_rate: config.serial.baud_rate,
            portmapper_port: config.vxi11.portmapper_port,
        }
    }
}

impl Default for VisaEndpoint {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

#[async_trait]
impl Endpoint for VisaEndpoint {
    async fn connect(
        &self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        tracing::debug!(address = %address, ?timeout, "Connecting");

        let connection: Box<dyn Connection> = match address.transport() {
            Transport::Socket { host, port } => {
                Box::new(SocketConnection::connect(host, *port, timeout).await?)
            }
            Transport::Vxi11 { host, device } => Box::new(
                Vxi11Connection::connect(host, self.portmapper_port, device, timeout).await?,
            ),
            Transport::Serial { port } => {
                Box::new(SerialConnection::open(port, self.baud_rate, timeout)?)
            }
        };

        Ok(connection)
    }
}
