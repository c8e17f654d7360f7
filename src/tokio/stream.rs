//! Async stream abstraction for tokio.

use std::io::ErrorKind;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::config::Config;
#[cfg(feature = "tokio-tls")]
use crate::config::SslMode;
use crate::error::{Error, Result};
use crate::protocol::framing::FrameDecoder;

const READ_CHUNK: usize = 8192;

enum Inner {
    Tcp(TcpStream),
    #[cfg(feature = "tokio-tls")]
    Tls(Box<TlsStream<TcpStream>>),
    Unix(UnixStream),
}

pub struct Stream {
    inner: Inner,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
    closed: bool,
}

impl Stream {
    fn new(inner: Inner) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            closed: false,
        }
    }

    /// Open the socket described by `config`.
    ///
    /// `connection_timeout` is applied by the caller around the whole
    /// connect-and-handshake sequence.
    pub async fn connect(config: &Config) -> Result<Self> {
        if let Some(path) = config.socket_path() {
            tracing::debug!("connecting to unix socket {}", path);
            return UnixStream::connect(&path)
                .await
                .map(|s| Self::new(Inner::Unix(s)))
                .map_err(Error::Connect);
        }

        if config.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(Error::Connect)?;
        tcp.set_nodelay(true).map_err(Error::Connect)?;
        if let Some(delay) = config.keep_alive_initial_delay {
            configure_keepalive(SockRef::from(&tcp), delay);
        }
        Ok(Self::new(Inner::Tcp(tcp)))
    }

    /// Wrap the TCP stream in TLS after the server accepted SSLRequest.
    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let Inner::Tcp(tcp) = self.inner else {
            return Err(Error::InvalidUsage(
                "TLS is only supported over TCP".into(),
            ));
        };

        let mut builder = native_tls::TlsConnector::builder();
        if ssl_mode != SslMode::VerifyFull {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
        let tls = connector.connect(host, tcp).await?;
        tracing::debug!("TLS established with {}", host);

        Ok(Self {
            inner: Inner::Tls(Box::new(tls)),
            ..self
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(s) => s.write_all(buf).await?,
            #[cfg(feature = "tokio-tls")]
            Inner::Tls(s) => s.write_all(buf).await?,
            Inner::Unix(s) => s.write_all(buf).await?,
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            Inner::Tcp(s) => s.flush().await?,
            #[cfg(feature = "tokio-tls")]
            Inner::Tls(s) => s.flush().await?,
            Inner::Unix(s) => s.flush().await?,
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<()> {
        let n = match &mut self.inner {
            Inner::Tcp(s) => s.read(&mut self.chunk).await?,
            #[cfg(feature = "tokio-tls")]
            Inner::Tls(s) => s.read(&mut self.chunk).await?,
            Inner::Unix(s) => s.read(&mut self.chunk).await?,
        };
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        self.decoder.extend(&self.chunk[..n]);
        Ok(())
    }

    /// Read the next complete backend message into `buffer_set`.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        while !self.decoder.decode_into(buffer_set)? {
            self.fill().await?;
        }
        tracing::trace!(
            "received '{}' ({} bytes)",
            buffer_set.type_byte as char,
            buffer_set.read_buffer.len()
        );
        Ok(())
    }

    /// Read the single-byte reply to SSLRequest.
    pub async fn read_byte(&mut self) -> Result<u8> {
        if self.decoder.buffered() == 0 {
            self.fill().await?;
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
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let result = match &mut self.inner {
            Inner::Tcp(s) => s.shutdown().await,
            #[cfg(feature = "tokio-tls")]
            Inner::Tls(s) => s.shutdown().await,
            Inner::Unix(s) => s.shutdown().await,
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
