//! ONC-RPC framing and XDR encoding used by VXI-11
//!
//! Over TCP every message is sent as one or more record fragments:
//! ```text
//! <u32 big-endian: last-fragment bit | fragment length><fragment bytes>
//! ```
//! Message bodies are XDR: big-endian 32-bit words, opaque data padded to a
//! multiple of four bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest reply we are willing to buffer
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

pub const RPC_VERSION: u32 = 2;
pub const MSG_CALL: u32 = 0;
pub const MSG_REPLY: u32 = 1;
pub const REPLY_ACCEPTED: u32 = 0;
pub const ACCEPT_SUCCESS: u32 = 0;
pub const AUTH_NULL: u32 = 0;

pub const PORTMAP_PROGRAM: u32 = 100_000;
pub const PORTMAP_VERSION: u32 = 2;
pub const PORTMAP_GETPORT: u32 = 3;
pub const IPPROTO_TCP: u32 = 6;

/// Read one complete record (all fragments)
pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let mut record = BytesMut::new();
    loop {
        let header = reader.read_u32().await.map_err(map_eof)?;
        let len = (header & !LAST_FRAGMENT) as usize;

        if record.len() + len > MAX_RECORD_SIZE {
            return Err(Error::Rpc(format!(
                "record too large: {} bytes",
                record.len() + len
            )));
        }

        let start = record.len();
        record.resize(start + len, 0);
        reader
            .read_exact(&mut record[start..])
            .await
            .map_err(map_eof)?;

        if header & LAST_FRAGMENT != 0 {
            return Ok(record.freeze());
        }
    }
}

/// Write a message as a single last fragment
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, message: &[u8]) -> Result<()> {
    let header = LAST_FRAGMENT | message.len() as u32;
    writer.write_all(&header.to_be_bytes()).await?;
    writer.write_all(message).await?;
    writer.flush().await?;
    Ok(())
}

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Transport("connection closed by instrument".to_string())
    } else {
        Error::Io(e)
    }
}

/// XDR encoder
#[derive(Default)]
pub struct XdrWriter {
    buf: BytesMut,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u32(value as u32)
    }

    /// Variable-length opaque data (also used for strings)
    pub fn opaque(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        let pad = (4 - data.len() % 4) % 4;
        self.buf.put_bytes(0, pad);
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// XDR decoder over a received message
pub struct XdrReader {
    buf: Bytes,
}

impl XdrReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn u32(&mut self) -> Result<u32> {
        if self.buf.remaining() < 4 {
            return Err(Error::Rpc("truncated message".to_string()));
        }
        Ok(self.buf.get_u32())
    }

    pub fn opaque(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        let padded = len + (4 - len % 4) % 4;
        if self.buf.remaining() < padded {
            return Err(Error::Rpc(format!(
                "opaque field of {} bytes exceeds message",
                len
            )));
        }
        let data = self.buf.split_to(len);
        self.buf.advance(padded - len);
        Ok(data)
    }
}

/// Encode a call header with null credentials followed by `args`
pub fn encode_call(xid: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(xid)
        .u32(MSG_CALL)
        .u32(RPC_VERSION)
        .u32(program)
        .u32(version)
        .u32(procedure)
        .u32(AUTH_NULL)
        .u32(0)
        .u32(AUTH_NULL)
        .u32(0);
    w.buf.put_slice(args);
    w.finish()
}

/// Validate a reply header and return a reader positioned at the results
pub fn decode_reply(xid: u32, message: Bytes) -> Result<XdrReader> {
    let mut r = XdrReader::new(message);

    let reply_xid = r.u32()?;
    if reply_xid != xid {
        return Err(Error::Rpc(format!(
            "reply xid {} does not match call xid {}",
            reply_xid, xid
        )));
    }
    if r.u32()? != MSG_REPLY {
        return Err(Error::Rpc("expected a reply message".to_string()));
    }
    let reply_state = r.u32()?;
    if reply_state != REPLY_ACCEPTED {
        return Err(Error::Rpc(format!("call denied (reject status {})", r.u32()?)));
    }

    // verifier
    r.u32()?;
    r.opaque()?;

    match r.u32()? {
        ACCEPT_SUCCESS => Ok(r),
        1 => Err(Error::Rpc("program unavailable".to_string())),
        2 => Err(Error::Rpc("program version mismatch".to_string())),
        3 => Err(Error::Rpc("procedure unavailable".to_string())),
        4 => Err(Error::Rpc("garbage arguments".to_string())),
        other => Err(Error::Rpc(format!("call failed with accept status {}", other))),
    }
}

/// Arguments of a portmapper GETPORT call for a TCP program
pub fn getport_args(program: u32, version: u32) -> Bytes {
    let mut w = XdrWriter::new();
    w.u32(program).u32(version).u32(IPPROTO_TCP).u32(0);
    w.finish()
}
