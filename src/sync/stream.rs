//! Blocking transport: TCP, TLS-over-TCP or Unix socket plus frame reassembly.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::{HandshakeError, TlsConnector, TlsStream};
use socket2::{SockRef, TcpKeepalive};

use crate::buffer_set::BufferSet;
use crate::config::Config;
#[cfg(feature = "sync-tls")]
use crate::config::SslMode;
use crate::error::{Error, Result};
use crate::protocol::framing::FrameDecoder;

const READ_CHUNK: usize = 8192;

enum Inner {
    Tcp(TcpStream),
    #[cfg(feature = "sync-tls")]
    Tls(Box<TlsStream<TcpStream>>),
    Unix(UnixStream),
}

pub struct Stream {
    inner: Inner,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
    read_deadline: &'static str,
    closed: bool,
}

impl Stream {
    fn new(inner: Inner) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            read_deadline: "read timeout",
            closed: false,
        }
    }

    /// Open the socket described by `config`.
    pub fn connect(config: &Config) -> Result<Self> {
        if let Some(path) = config.socket_path() {
            tracing::debug!("connecting to unix socket {}", path);
            return UnixStream::connect(&path)
                .map(|s| Self::new(Inner::Unix(s)))
                .map_err(Error::Connect);
        }

        if config.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(Error::Connect)?;

        let mut last_error = None;
        for addr in addrs {
            tracing::debug!("connecting to {}", addr);
            let attempt = match config.connection_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(tcp) => {
                    tcp.set_nodelay(true).map_err(Error::Connect)?;
                    if let Some(delay) = config.keep_alive_initial_delay {
                        configure_keepalive(SockRef::from(&tcp), delay);
                    }
                    return Ok(Self::new(Inner::Tcp(tcp)));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Connect(last_error.unwrap_or_else(|| {
            std::io::Error::new(
                ErrorKind::NotFound,
                format!("no addresses found for {}", config.host),
            )
        })))
    }

    /// Wrap the TCP stream in TLS after the server accepted SSLRequest.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let Inner::Tcp(tcp) = self.inner else {
            return Err(Error::InvalidUsage(
                "TLS is only supported over TCP".into(),
            ));
        };

        let mut builder = TlsConnector::builder();
        if ssl_mode != SslMode::VerifyFull {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let connector = builder.build()?;

        let tls = connector.connect(host, tcp).map_err(|e| match e {
            HandshakeError::Failure(e) => Error::Tls(e),
            HandshakeError::WouldBlock(_) => {
                Error::Connect(std::io::Error::from(ErrorKind::WouldBlock))
            }
        })?;
        tracing::debug!("TLS established with {}", host);

        Ok(Self {
            inner: Inner::Tls(Box::new(tls)),
            ..self
        })
    }

    /// Bound every subsequent read; `None` blocks indefinitely.
    ///
    /// `name` is the setting reported when a read times out.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>, name: &'static str) -> Result<()> {
        self.read_deadline = name;
        match &self.inner {
            Inner::Tcp(s) => s.set_read_timeout(timeout)?,
            #[cfg(feature = "sync-tls")]
            Inner::Tls(s) => s.get_ref().set_read_timeout(timeout)?,
            Inner::Unix(s) => s.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(s) => s.write_all(buf)?,
            #[cfg(feature = "sync-tls")]
            Inner::Tls(s) => s.write_all(buf)?,
            Inner::Unix(s) => s.write_all(buf)?,
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(s) => s.flush()?,
            #[cfg(feature = "sync-tls")]
            Inner::Tls(s) => s.flush()?,
            Inner::Unix(s) => s.flush()?,
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        let read = match &mut self.inner {
            Inner::Tcp(s) => s.read(&mut self.chunk),
            #[cfg(feature = "sync-tls")]
            Inner::Tls(s) => s.read(&mut self.chunk),
            Inner::Unix(s) => s.read(&mut self.chunk),
        };
        match read {
            Ok(0) => Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))),
            Ok(n) => {
                self.decoder.extend(&self.chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(Error::Timeout(format!(
                    "no response from server within {}",
                    self.read_deadline
                )))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Read the next complete backend message into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        while !self.decoder.decode_into(buffer_set)? {
            self.fill()?;
        }
        tracing::trace!(
            "received '{}' ({} bytes)",
            buffer_set.type_byte as char,
            buffer_set.read_buffer.len()
        );
        Ok(())
    }

    /// Read the single-byte reply to SSLRequest.
    pub fn read_byte(&mut self) -> Result<u8> {
        if self.decoder.buffered() == 0 {
            self.fill()?;
        }
        let byte = self
            .decoder
            .take_byte()
            .ok_or_else(|| Error::Protocol("missing SSLRequest response".into()))?;
        if self.decoder.buffered() > 0 {
            return Err(Error::Protocol(
                "server sent unexpected data after SSLRequest response".into(),
            ));
        }
        Ok(byte)
    }

    /// Shut the socket down. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let result = match &mut self.inner {
            Inner::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(feature = "sync-tls")]
            Inner::Tls(s) => s.shutdown(),
            Inner::Unix(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            tracing::debug!("socket shutdown failed: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn configure_keepalive(socket: SockRef<'_>, delay: Duration) {
    let keepalive = TcpKeepalive::new().with_time(delay);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        tracing::warn!("failed to configure TCP keep-alive: {}", e);
    }
}
