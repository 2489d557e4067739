//! TCP transport
//!
//! Producers connect out as clients; consumers listen and accept a single
//! connection. Both ends come in two flavours:
//!
//! - ephemeral: any failure ends the stream
//! - persistent: the client reconnects and retries a failed write, the
//!   listener re-accepts after the peer goes away
//!
//! Blocks are framed exactly as in a file, so a consumer that joins a
//! byte stream part way through resynchronises on the next block magic.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::Write;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::AsFd;
use std::time::Duration;

use super::{poll_fd, BlockSink, BlockSource, Framer};
use crate::codec::{Block, StreamParams};
use crate::config::TransportConfig;
use crate::error::{Error, NetworkError, Result, StreamError};

/// Producer side of a TCP connection
#[derive(Debug)]
pub struct NetSink {
    name: String,
    addrs: Vec<SocketAddr>,
    persistent: bool,
    reconnect_interval: Duration,
    stream: Option<TcpStream>,
}

impl NetSink {
    /// Resolve `host` and connect
    ///
    /// A persistent client keeps retrying until the peer accepts; an
    /// ephemeral one makes a single attempt.
    pub fn connect(
        name: &str,
        host: &str,
        port: u16,
        persistent: bool,
        config: &TransportConfig,
    ) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::Resolve(format!("{}: {}", host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(NetworkError::Resolve(host.to_string()).into());
        }

        let mut sink = Self {
            name: name.to_string(),
            addrs,
            persistent,
            reconnect_interval: config.reconnect_interval(),
            stream: None,
        };
        sink.stream = Some(sink.establish()?);
        Ok(sink)
    }

    fn establish(&self) -> Result<TcpStream> {
        loop {
            match TcpStream::connect(&self.addrs[..]) {
                Ok(stream) => {
                    tracing::info!("{}: connected to {}", self.name, self.addrs[0]);
                    return Ok(stream);
                }
                Err(e) if self.persistent => {
                    tracing::debug!("{}: connect failed: {}, retrying", self.name, e);
                    std::thread::sleep(self.reconnect_interval);
                }
                Err(e) => {
                    return Err(NetworkError::ConnectionFailed(format!("{}: {}", self.name, e)).into())
                }
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl BlockSink for NetSink {
    fn write_block(&mut self, block: &Block) -> Result<()> {
        loop {
            let result = match self.stream.as_mut() {
                Some(stream) => stream.write_all(block.as_bytes()),
                None => Err(std::io::ErrorKind::NotConnected.into()),
            };

            let source = match result {
                Ok(()) => return Ok(()),
                Err(source) => source,
            };
            if !self.persistent {
                return Err(StreamError::WriteFailed {
                    name: self.name.clone(),
                    source,
                }
                .into());
            }

            tracing::warn!("{}: write failed: {}, reconnecting", self.name, source);
            self.stream = None;
            std::thread::sleep(self.reconnect_interval);
            self.stream = Some(self.establish()?);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }
        Ok(())
    }
}

/// Bind, listen and accept exactly one connection
///
/// The listening socket is closed once the connection is accepted.
pub fn listen_accept(port: u16) -> Result<(TcpStream, SocketAddr)> {
    let bind = |e: std::io::Error| NetworkError::BindFailed(format!("port {}: {}", port, e));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind)?;
    socket.set_reuse_address(true).map_err(bind)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(bind)?;
    socket.listen(1).map_err(bind)?;

    tracing::debug!("listening on port {}", port);
    let (conn, peer) = socket
        .accept()
        .map_err(|e| NetworkError::AcceptFailed(format!("port {}: {}", port, e)))?;

    let peer = peer
        .as_socket()
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    Ok((conn.into(), peer))
}

/// Consumer side: a listener holding one accepted connection
#[derive(Debug)]
pub struct NetSource {
    name: String,
    port: u16,
    persistent: bool,
    relisten_interval: Duration,
    stream: TcpStream,
    framer: Framer,
}

impl NetSource {
    /// Listen on `port` and block until a producer connects
    pub fn listen(name: &str, port: u16, persistent: bool, config: &TransportConfig) -> Result<Self> {
        let (stream, peer) = listen_accept(port)?;
        tracing::info!("{}: connection from {}", name, peer);
        Ok(Self {
            name: name.to_string(),
            port,
            persistent,
            relisten_interval: config.relisten_interval(),
            stream,
            framer: Framer::new(name),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Drop the current peer and accept the next one
    fn relisten(&mut self) -> Result<()> {
        self.framer.discard_buffered();
        let _ = self.stream.shutdown(Shutdown::Both);
        std::thread::sleep(self.relisten_interval);
        let (stream, peer) = listen_accept(self.port)?;
        tracing::info!("{}: reconnected from {}", self.name, peer);
        self.stream = stream;
        Ok(())
    }
}

impl BlockSource for NetSource {
    fn read_block(&mut self) -> Result<Option<&Block>> {
        loop {
            match self.framer.read_block(&mut self.stream) {
                Ok(true) => return Ok(self.framer.current()),
                Ok(false) if !self.persistent => return Ok(None),
                Ok(false) => {
                    tracing::warn!("{}: connection closed, waiting for producer", self.name);
                }
                Err(Error::Io(e)) if self.persistent => {
                    tracing::warn!("{}: read failed: {}, waiting for producer", self.name, e);
                }
                Err(e) => return Err(e),
            }
            self.relisten()?;
        }
    }

    fn current(&self) -> Option<&Block> {
        self.framer.current()
    }

    fn params(&self) -> Option<StreamParams> {
        self.framer.params()
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if self.framer.has_buffered() {
            return Ok(true);
        }
        Ok(poll_fd(self.stream.as_fd(), timeout)?)
    }
}
