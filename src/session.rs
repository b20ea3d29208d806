//! Instrument session
//!
//! A [`Session`] owns one live connection and adds the message layer on top
//! of it: write/read terminations, text decoding and reply trimming.
//! `close` consumes the session, so it cannot be used afterwards.

use std::time::Duration;

use crate::common::{Error, Result};
use crate::resource::{Connection, Endpoint, ResourceAddress};

/// Write termination used unless the transport needs another
pub const DEFAULT_WRITE_TERMINATION: &str = "\r\n";

/// Termination used by socket-style resources in both directions
pub const SOCKET_TERMINATION: &str = "\n";

/// Read termination for serial resources, which have no message framing
pub const SERIAL_READ_TERMINATION: &str = "\n";

/// One open connection to an instrument
pub struct Session {
    address: ResourceAddress,
    connection: Box<dyn Connection>,
    read_termination: Option<String>,
    write_termination: String,
    timeout: Duration,
}

impl Session {
    /// Connect to `address` and apply transport-specific terminations
    ///
    /// Any failure, including a malformed address, is reported as a connect
    /// error for that address.
    pub async fn open(endpoint: &dyn Endpoint, address: &str, timeout: Duration) -> Result<Self> {
        let parsed = ResourceAddress::parse(address)
            .map_err(|e| Error::connect_failed(address, e))?;

        let connection = endpoint
            .connect(&parsed, timeout)
            .await
            .map_err(|e| match e {
                Error::ConnectFailed { .. } => e,
                other => Error::connect_failed(address, other),
            })?;

        let mut session = Self {
            address: parsed,
            connection,
            read_termination: None,
            write_termination: DEFAULT_WRITE_TERMINATION.to_string(),
            timeout,
        };

        if session.address.is_socket() {
            session.set_read_termination(Some(SOCKET_TERMINATION));
            session.set_write_termination(SOCKET_TERMINATION);
        } else if session.address.is_serial() {
            session.set_read_termination(Some(SERIAL_READ_TERMINATION));
        }

        tracing::debug!(
            address = %session.address,
            read_termination = ?session.read_termination,
            write_termination = ?session.write_termination,
            "Session opened"
        );

        Ok(session)
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn read_termination(&self) -> Option<&str> {
        self.read_termination.as_deref()
    }

    pub fn write_termination(&self) -> &str {
        &self.write_termination
    }

    /// Set the read termination; only its last character is used as the
    /// end-of-message marker
    pub fn set_read_termination(&mut self, termination: Option<&str>) {
        self.read_termination = termination.filter(|t| !t.is_empty()).map(str::to_string);
    }

    pub fn set_write_termination(&mut self, termination: &str) {
        self.write_termination = termination.to_string();
    }

    /// Send a command that expects no reply
    pub async fn write(&mut self, text: &str) -> Result<()> {
        let mut message = Vec::with_capacity(text.len() + self.write_termination.len());
        message.extend_from_slice(text.as_bytes());
        message.extend_from_slice(self.write_termination.as_bytes());

        tracing::trace!(address = %self.address, command = text, "write");
        self.connection.write(&message).await
    }

    /// Send a query and return its reply without termination or trailing
    /// whitespace
    pub async fn query(&mut self, text: &str) -> Result<String> {
        self.write(text).await?;

        let term_byte = self
            .read_termination
            .as_ref()
            .and_then(|t| t.as_bytes().last().copied());
        let raw = self.connection.read(term_byte).await?;

        let mut reply = String::from_utf8_lossy(&raw).into_owned();
        if let Some(term) = &self.read_termination {
            if let Some(stripped) = reply.strip_suffix(term.as_str()) {
                reply.truncate(stripped.len());
            }
        }
        let reply = reply.trim_end().to_string();

        tracing::trace!(address = %self.address, command = text, reply = %reply, "query");
        Ok(reply)
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        tracing::debug!(address = %self.address, "Closing session");
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::mock::{MockEndpoint, MockInstrument};

    const SOCKET: &str = "TCPIP::10.0.0.5::5025::SOCKET";
    const INSTR: &str = "TCPIP::10.0.0.6::INSTR";
    const SERIAL: &str = "ASRL/dev/ttyUSB0::INSTR";

    fn endpoint() -> MockEndpoint {
        MockEndpoint::new()
            .with_instrument(SOCKET, MockInstrument::new("RIDEN,RD6006,1,1.0  "))
            .with_instrument(INSTR, MockInstrument::new("KEYSIGHT,E36312A"))
            .with_instrument(SERIAL, MockInstrument::new("RIDEN,RD6006,00012345,1.41"))
    }

    #[tokio::test]
    async fn test_socket_address_uses_newline_termination() {
        let endpoint = endpoint();
        let mut session = Session::open(&endpoint, SOCKET, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(session.read_termination(), Some("\n"));
        assert_eq!(session.write_termination(), "\n");

        session.write("OUTP ON").await.unwrap();
        session.close().await.unwrap();
        assert_eq!(endpoint.writes(SOCKET), vec![b"OUTP ON\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_other_addresses_keep_defaults() {
        let endpoint = endpoint();
        let mut session = Session::open(&endpoint, INSTR, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(session.read_termination(), None);
        assert_eq!(session.write_termination(), "\r\n");

        let reply = session.query("*IDN?").await.unwrap();
        assert_eq!(reply, "KEYSIGHT,E36312A");
        session.close().await.unwrap();
        assert_eq!(endpoint.writes(INSTR), vec![b"*IDN?\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_serial_address_reads_until_newline() {
        let endpoint = endpoint();
        let mut session = Session::open(&endpoint, SERIAL, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(session.read_termination(), Some("\n"));
        assert_eq!(session.write_termination(), "\r\n");

        let reply = session.query("*IDN?").await.unwrap();
        assert_eq!(reply, "RIDEN,RD6006,00012345,1.41");
        session.close().await.unwrap();
        assert_eq!(endpoint.writes(SERIAL), vec![b"*IDN?\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_query_trims_trailing_whitespace() {
        let endpoint = endpoint();
        let mut session = Session::open(&endpoint, SOCKET, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.query("*IDN?").await.unwrap(), "RIDEN,RD6006,1,1.0");
        session.close().await.unwrap();
        assert_eq!(endpoint.closes(SOCKET), 1);
    }

    #[tokio::test]
    async fn test_open_failures_are_connect_errors() {
        let endpoint = endpoint();

        let err = Session::open(&endpoint, "TCPIP::10.9.9.9::INSTR", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONNECT_ERROR");
        assert!(err.to_string().contains("no instrument"));

        let err = Session::open(&endpoint, "GPIB::1::INSTR", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONNECT_ERROR");
    }

    #[tokio::test]
    async fn test_io_failure_surfaces_cause() {
        let endpoint = MockEndpoint::new().with_instrument(
            INSTR,
            MockInstrument::new("X").fail_on("VOLT 1", "link dropped"),
        );
        let mut session = Session::open(&endpoint, INSTR, Duration::from_secs(1))
            .await
            .unwrap();
        let err = session.write("VOLT 1").await.unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().contains("link dropped"));
        session.close().await.unwrap();
    }
}
