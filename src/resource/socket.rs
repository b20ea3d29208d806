//! Raw TCP socket transport (`TCPIP::<host>::<port>::SOCKET`)

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::common::{Error, Result};

use super::endpoint::Connection;
use super::with_timeout;

/// Upper bound on a single reply; SCPI replies are short text lines
const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// A connected raw socket
pub struct SocketConnection {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl SocketConnection {
    /// Connect to `host:port`, bounded by `timeout`
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = with_timeout(timeout, async {
            TcpStream::connect((host, port)).await.map_err(Error::Io)
        })
        .await?;
        stream.set_nodelay(true)?;

        tracing::debug!(host, port, "Socket connected");

        Ok(Self {
            stream: BufReader::new(stream),
            timeout,
        })
    }

    async fn read_until(&mut self, termination: u8) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let n = self.stream.read_until(termination, &mut data).await?;
            if n == 0 {
                return Err(Error::Transport("connection closed by instrument".to_string()));
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

    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let chunk = self.stream.fill_buf().await?;
        if chunk.is_empty() {
            return Err(Error::Transport("connection closed by instrument".to_string()));
        }
        let data = chunk.to_vec();
        self.stream.consume(data.len());
        Ok(data)
    }
}

#[async_trait]
impl Connection for SocketConnection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.stream.get_mut();
        with_timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    async fn read(&mut self, termination: Option<u8>) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        match termination {
            Some(term) => with_timeout(timeout, self.read_until(term)).await,
            None => with_timeout(timeout, self.read_chunk()).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}
