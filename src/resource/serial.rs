//! Serial port transport (`ASRL<port>::INSTR`)

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortInfo, SerialStream, StopBits,
};

use crate::common::{Error, Result};

use super::address::ResourceAddress;
use super::endpoint::Connection;
use super::with_timeout;

/// End-of-message character when the caller sets none
pub const DEFAULT_TERMCHAR: u8 = b'\n';

/// Upper bound on a single reply
const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// An open serial port
///
/// Bytes received after a termination stay buffered for the next read.
pub struct SerialConnection {
    port: BufReader<SerialStream>,
    timeout: Duration,
}

impl SerialConnection {
    /// Open `port` at `baud_rate`, 8N1 without flow control
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| Error::Transport(format!("{}: {}", port, e)))?;

        tracing::debug!(port, baud_rate, "Serial port opened");

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: SerialStream, timeout: Duration) -> Self {
        Self {
            port: BufReader::new(stream),
            timeout,
        }
    }

    async fn read_until(&mut self, termination: u8) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let n = self.port.read_until(termination, &mut data).await?;
            if n == 0 {
                return Err(Error::Transport("serial port closed".to_string()));
            }
            if data.last() == Some(&termination) {
                return Ok(data);
            }
            if data.len() > MAX_REPLY_SIZE {
                return Err(Error::Transport(format!(
                    "reply exceeds {} bytes without termination",
                    MAX_REPLY_SIZE
                )));
            }
        }
    }
}

/// List the OS serial ports as resource addresses
pub fn available_resources() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Enumeration(format!("cannot list serial ports: {}", e)))?;
    Ok(resource_names(ports))
}

fn resource_names(ports: Vec<SerialPortInfo>) -> Vec<String> {
    ports
        .into_iter()
        .map(|p| ResourceAddress::serial(&p.port_name))
        .collect()
}

#[async_trait]
impl Connection for SerialConnection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let port = self.port.get_mut();
        with_timeout(timeout, async {
            port.write_all(data).await?;
            port.flush().await?;
            Ok(())
        })
        .await
    }

    async fn read(&mut self, termination: Option<u8>) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let termination = termination.unwrap_or(DEFAULT_TERMCHAR);
        with_timeout(timeout, self.read_until(termination)).await
    }

    async fn close(&mut self) -> Result<()> {
        self.port.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio_serial::SerialPortType;

    fn pty_pair(timeout: Duration) -> (SerialStream, SerialConnection) {
        let (instrument, host) = SerialStream::pair().expect("Failed to open pty pair");
        (instrument, SerialConnection::from_stream(host, timeout))
    }

    #[tokio::test]
    async fn test_reply_split_across_chunks() {
        let (mut instrument, mut conn) = pty_pair(Duration::from_secs(2));

        let device = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = instrument.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\r\n");
            instrument.write_all(b"RIDEN,RD60").await.unwrap();
            instrument.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            instrument
                .write_all(b"06,00012345,1.41\n0.000\n")
                .await
                .unwrap();
            instrument.flush().await.unwrap();
            instrument
        });

        conn.write(b"*IDN?\r\n").await.unwrap();
        let reply = conn.read(None).await.unwrap();
        assert_eq!(reply, b"RIDEN,RD6006,00012345,1.41\n");

        // The second line arrived with the first and is kept for the next read
        let _instrument = device.await.unwrap();
        let reply = conn.read(Some(b'\n')).await.unwrap();
        assert_eq!(reply, b"0.000\n");
    }

    #[tokio::test]
    async fn test_custom_termination() {
        let (mut instrument, mut conn) = pty_pair(Duration::from_secs(2));

        instrument.write_all(b"5.000\r").await.unwrap();
        instrument.flush().await.unwrap();

        let reply = conn.read(Some(b'\r')).await.unwrap();
        assert_eq!(reply, b"5.000\r");
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (_instrument, mut conn) = pty_pair(Duration::from_millis(50));

        let err = conn.read(None).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.code(), "PROTOCOL_TIMEOUT");
    }

    #[tokio::test]
    async fn test_unterminated_reply_times_out() {
        let (mut instrument, mut conn) = pty_pair(Duration::from_millis(100));

        instrument.write_all(b"RIDEN,RD60").await.unwrap();
        instrument.flush().await.unwrap();

        let err = conn.read(None).await.unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_TIMEOUT");
    }

    #[test]
    fn test_available_ports_become_resources() {
        let ports = vec![
            SerialPortInfo {
                port_name: "/dev/ttyUSB0".to_string(),
                port_type: SerialPortType::Unknown,
            },
            SerialPortInfo {
                port_name: "COM3".to_string(),
                port_type: SerialPortType::PciPort,
            },
        ];

        assert_eq!(
            resource_names(ports),
            vec!["ASRL/dev/ttyUSB0::INSTR", "ASRLCOM3::INSTR"]
        );
    }
}
