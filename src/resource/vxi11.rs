//! VXI-11 transport (`TCPIP::<host>[::<device>]::INSTR`)
//!
//! Connect asks the instrument's portmapper for the VXI-11 core port, then
//! opens a link. Messages are exchanged with DEVICE_WRITE / DEVICE_READ and
//! the link is released with DESTROY_LINK.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use crate::common::{Error, Result};

use super::endpoint::Connection;
use super::rpc::{self, XdrReader, XdrWriter};
use super::with_timeout;

pub const CORE_PROGRAM: u32 = 0x0607AF;
pub const CORE_VERSION: u32 = 1;

const CREATE_LINK: u32 = 10;
const DEVICE_WRITE: u32 = 11;
const DEVICE_READ: u32 = 12;
const DESTROY_LINK: u32 = 23;

const FLAG_END: u32 = 0x08;
const FLAG_TERMCHRSET: u32 = 0x80;

const REASON_CHR: u32 = 0x02;
const REASON_END: u32 = 0x04;

const ERR_IO_TIMEOUT: u32 = 15;

/// Read request size; instruments may return less
const READ_CHUNK: u32 = 64 * 1024;

/// Client id sent with CREATE_LINK
const CLIENT_ID: u32 = 0x5343_5049;

/// Minimal ONC-RPC client over one TCP stream
struct RpcClient {
    stream: TcpStream,
    program: u32,
    version: u32,
    xid: u32,
}

impl RpcClient {
    async fn connect(addr: SocketAddr, program: u32, version: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            program,
            version,
            xid: 1,
        })
    }

    async fn call(&mut self, procedure: u32, args: &[u8]) -> Result<XdrReader> {
        let xid = self.xid;
        self.xid = self.xid.wrapping_add(1);

        let message = rpc::encode_call(xid, self.program, self.version, procedure, args);
        tracing::trace!(xid, procedure, len = message.len(), "RPC call");
        rpc::write_record(&mut self.stream, &message).await?;

        let reply = rpc::read_record(&mut self.stream).await?;
        tracing::trace!(xid, len = reply.len(), "RPC reply");
        rpc::decode_reply(xid, reply)
    }
}

/// Ask a portmapper for the TCP port of a program
async fn getport(addr: SocketAddr, program: u32, version: u32) -> Result<u16> {
    let mut client = RpcClient::connect(addr, rpc::PORTMAP_PROGRAM, rpc::PORTMAP_VERSION).await?;
    let mut reply = client
        .call(rpc::PORTMAP_GETPORT, &rpc::getport_args(program, version))
        .await?;
    let port = reply.u32()?;
    let _ = client.stream.shutdown().await;

    if port == 0 || port > u16::MAX as u32 {
        return Err(Error::Rpc(format!(
            "portmapper at {} has no VXI-11 service registered",
            addr
        )));
    }
    Ok(port as u16)
}

fn device_error(operation: &str, code: u32, timeout: Duration) -> Error {
    if code == ERR_IO_TIMEOUT {
        Error::Timeout(timeout.as_millis() as u64)
    } else {
        Error::Rpc(format!("{} failed with device error {}", operation, code))
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::Transport(format!("cannot resolve host '{}'", host)))
}

/// An open VXI-11 link
pub struct Vxi11Connection {
    client: RpcClient,
    link_id: u32,
    max_recv_size: usize,
    timeout: Duration,
}

impl Vxi11Connection {
    /// Resolve the core port through the portmapper and create a link
    pub async fn connect(
        host: &str,
        portmapper_port: u16,
        device: &str,
        timeout: Duration,
    ) -> Result<Self> {
        with_timeout(timeout, async {
            let portmapper = resolve(host, portmapper_port).await?;
            let core_port = getport(portmapper, CORE_PROGRAM, CORE_VERSION).await?;
            tracing::debug!(host, core_port, "VXI-11 core port resolved");
            Self::connect_core(SocketAddr::new(portmapper.ip(), core_port), device, timeout).await
        })
        .await
    }

    /// Create a link on a known core channel address
    pub async fn connect_core(addr: SocketAddr, device: &str, timeout: Duration) -> Result<Self> {
        let mut client = RpcClient::connect(addr, CORE_PROGRAM, CORE_VERSION).await?;

        let mut args = XdrWriter::new();
        args.u32(CLIENT_ID)
            .bool(false)
            .u32(timeout_ms(timeout))
            .opaque(device.as_bytes());
        let mut reply = client.call(CREATE_LINK, &args.finish()).await?;

        let error = reply.u32()?;
        if error != 0 {
            return Err(device_error("create_link", error, timeout));
        }
        let link_id = reply.u32()?;
        let _abort_port = reply.u32()?;
        let max_recv_size = (reply.u32()? as usize).max(1);

        tracing::debug!(%addr, device, link_id, max_recv_size, "VXI-11 link created");

        Ok(Self {
            client,
            link_id,
            max_recv_size,
            timeout,
        })
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(self.max_recv_size).collect()
        };
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.into_iter().enumerate() {
            let flags = if i == last { FLAG_END } else { 0 };
            let mut args = XdrWriter::new();
            args.u32(self.link_id)
                .u32(timeout_ms(self.timeout))
                .u32(timeout_ms(self.timeout))
                .u32(flags)
                .opaque(chunk);

            let mut reply = self.client.call(DEVICE_WRITE, &args.finish()).await?;
            let error = reply.u32()?;
            if error != 0 {
                return Err(device_error("device_write", error, self.timeout));
            }
            let written = reply.u32()? as usize;
            if written != chunk.len() {
                return Err(Error::Rpc(format!(
                    "device_write accepted {} of {} bytes",
                    written,
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    async fn read_all(&mut self, termination: Option<u8>) -> Result<Vec<u8>> {
        let (flags, term_char) = match termination {
            Some(t) => (FLAG_TERMCHRSET, t as u32),
            None => (0, 0),
        };

        let mut data = Vec::new();
        loop {
            let mut args = XdrWriter::new();
            args.u32(self.link_id)
                .u32(READ_CHUNK)
                .u32(timeout_ms(self.timeout))
                .u32(timeout_ms(self.timeout))
                .u32(flags)
                .u32(term_char);

            let mut reply = self.client.call(DEVICE_READ, &args.finish()).await?;
            let error = reply.u32()?;
            if error != 0 {
                return Err(device_error("device_read", error, self.timeout));
            }
            let reason = reply.u32()?;
            let chunk: Bytes = reply.opaque()?;
            data.extend_from_slice(&chunk);

            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(data);
            }
        }
    }
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

#[async_trait]
impl Connection for Vxi11Connection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        with_timeout(timeout, self.write_all(data)).await
    }

    async fn read(&mut self, termination: Option<u8>) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        with_timeout(timeout, self.read_all(termination)).await
    }

    async fn close(&mut self) -> Result<()> {
        let timeout = self.timeout;
        let link_id = self.link_id;
        let client = &mut self.client;
        with_timeout(timeout, async {
            let mut args = XdrWriter::new();
            args.u32(link_id);
            let mut reply = client.call(DESTROY_LINK, &args.finish()).await?;
            let error = reply.u32()?;
            let _ = client.stream.shutdown().await;
            if error != 0 {
                return Err(device_error("destroy_link", error, timeout));
            }
            Ok(())
        })
        .await
    }
}

/// Find VXI-11 instruments by broadcasting a portmapper GETPORT on UDP
///
/// Returns `TCPIP::<ip>::INSTR` for every host that reports a core port
/// within `wait`.
pub async fn discover(portmapper_port: u16, wait: Duration) -> Result<Vec<String>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::Enumeration(format!("cannot open broadcast socket: {}", e)))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::Enumeration(format!("cannot enable broadcast: {}", e)))?;

    let xid = std::process::id();
    let call = rpc::encode_call(
        xid,
        rpc::PORTMAP_PROGRAM,
        rpc::PORTMAP_VERSION,
        rpc::PORTMAP_GETPORT,
        &rpc::getport_args(CORE_PROGRAM, CORE_VERSION),
    );
    socket
        .send_to(&call, (Ipv4Addr::BROADCAST, portmapper_port))
        .await
        .map_err(|e| Error::Enumeration(format!("broadcast failed: {}", e)))?;

    let mut found: Vec<String> = Vec::new();
    let deadline = tokio::time::Instant::now() + wait;
    let mut buf = [0u8; 512];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (n, from) = match received {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::debug!("Broadcast receive error: {}", e);
                continue;
            }
            Ok(Ok(r)) => r,
        };

        let port = rpc::decode_reply(xid, Bytes::copy_from_slice(&buf[..n]))
            .and_then(|mut r| r.u32());
        match port {
            Ok(port) if port != 0 => {
                let address = instr_address(from.ip());
                if !found.contains(&address) {
                    tracing::debug!(%from, port, "VXI-11 instrument answered broadcast");
                    found.push(address);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(%from, "Ignoring broadcast reply: {}", e),
        }
    }

    Ok(found)
}

fn instr_address(ip: IpAddr) -> String {
    format!("TCPIP::{}::INSTR", ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection of a scripted VXI-11 core channel
    async fn serve_core(listener: TcpListener, reply_data: &'static [u8], chunk: usize) -> Vec<Vec<u8>> {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut writes = Vec::new();
        let mut pending: Vec<u8> = reply_data.to_vec();

        loop {
            let call = match rpc::read_record(&mut sock).await {
                Ok(c) => c,
                Err(_) => return writes,
            };
            let mut r = XdrReader::new(call);
            let xid = r.u32().unwrap();
            for _ in 0..4 {
                r.u32().unwrap();
            }
            let procedure = r.u32().unwrap();
            for _ in 0..4 {
                r.u32().unwrap();
            }

            let mut w = XdrWriter::new();
            w.u32(xid).u32(rpc::MSG_REPLY).u32(rpc::REPLY_ACCEPTED).u32(0).u32(0).u32(0);
            match procedure {
                CREATE_LINK => {
                    w.u32(0).u32(42).u32(0).u32(4);
                }
                DEVICE_WRITE => {
                    assert_eq!(r.u32().unwrap(), 42);
                    r.u32().unwrap();
                    r.u32().unwrap();
                    r.u32().unwrap();
                    let data = r.opaque().unwrap();
                    writes.push(data.to_vec());
                    w.u32(0).u32(data.len() as u32);
                }
                DEVICE_READ => {
                    let take = pending.len().min(chunk);
                    let part: Vec<u8> = pending.drain(..take).collect();
                    let reason = if pending.is_empty() { REASON_END } else { 0 };
                    w.u32(0).u32(reason).opaque(&part);
                }
                DESTROY_LINK => {
                    w.u32(0);
                }
                _ => panic!("unexpected procedure {}", procedure),
            }
            rpc::write_record(&mut sock, &w.finish()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_link_write_read_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_core(listener, b"RIDEN,RD6006,00012345,1.41\n", 10));

        let mut conn = Vxi11Connection::connect_core(addr, "inst0", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(conn.link_id, 42);

        // max_recv_size of 4 forces the write to be split
        conn.write(b"*IDN?\n").await.unwrap();
        let reply = conn.read(Some(b'\n')).await.unwrap();
        assert_eq!(reply, b"RIDEN,RD6006,00012345,1.41\n");
        conn.close().await.unwrap();

        let writes = server.await.unwrap();
        assert_eq!(writes, vec![b"*IDN".to_vec(), b"?\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_connect_through_portmapper() {
        let core = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let core_port = core.local_addr().unwrap().port();
        let core_server = tokio::spawn(serve_core(core, b"OK\n", 64));

        let portmapper = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pm_port = portmapper.local_addr().unwrap().port();
        let pm_server = tokio::spawn(async move {
            let (mut sock, _) = portmapper.accept().await.unwrap();
            let call = rpc::read_record(&mut sock).await.unwrap();
            let mut r = XdrReader::new(call);
            let xid = r.u32().unwrap();
            for _ in 0..9 {
                r.u32().unwrap();
            }
            assert_eq!(r.u32().unwrap(), CORE_PROGRAM);
            let mut w = XdrWriter::new();
            w.u32(xid).u32(rpc::MSG_REPLY).u32(0).u32(0).u32(0).u32(0).u32(core_port as u32);
            rpc::write_record(&mut sock, &w.finish()).await.unwrap();
        });

        let mut conn = Vxi11Connection::connect("127.0.0.1", pm_port, "inst0", Duration::from_secs(2))
            .await
            .unwrap();
        conn.write(b"*OPC?\n").await.unwrap();
        assert_eq!(conn.read(None).await.unwrap(), b"OK\n");
        conn.close().await.unwrap();

        pm_server.await.unwrap();
        core_server.await.unwrap();
    }

    #[test]
    fn test_device_timeout_maps_to_protocol_timeout() {
        let err = device_error("device_read", ERR_IO_TIMEOUT, Duration::from_millis(1500));
        assert!(err.is_timeout());
        assert_eq!(err.code(), "PROTOCOL_TIMEOUT");

        let err = device_error("device_read", 4, Duration::from_millis(1500));
        assert_eq!(err.code(), "IO_ERROR");
    }
}
