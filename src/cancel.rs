//! Out-of-band query cancellation.

use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_cancel_request;

/// Everything needed to ask the server to cancel a running query.
///
/// Obtained from `Conn::cancel_token()`. The request travels over a fresh
/// unencrypted connection; the server closes it without replying, and
/// whether the query is actually interrupted is best-effort.
#[derive(Debug, Clone)]
pub struct CancelToken {
    host: String,
    port: u16,
    connection_timeout: Option<Duration>,
    process_id: u32,
    secret_key: u32,
}

impl CancelToken {
    pub(crate) fn new(config: &Config, key: &BackendKeyData) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connection_timeout: config.connection_timeout,
            process_id: key.process_id(),
            secret_key: key.secret(),
        }
    }

    /// Backend process ID the token targets.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    fn config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            connection_timeout: self.connection_timeout,
            ..Config::default()
        }
    }

    fn request(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, self.process_id, self.secret_key);
        buf
    }

    /// Send a CancelRequest, blocking the current thread.
    #[cfg(feature = "sync")]
    pub fn cancel(&self) -> Result<()> {
        let mut stream = crate::sync::stream::Stream::connect(&self.config())?;
        stream.write_all(&self.request())?;
        stream.flush()?;
        stream.close();
        tracing::debug!("sent CancelRequest for backend {}", self.process_id);
        Ok(())
    }

    /// Send a CancelRequest from an async task.
    #[cfg(feature = "tokio")]
    pub async fn cancel_async(&self) -> Result<()> {
        let mut stream = crate::tokio::stream::Stream::connect(&self.config()).await?;
        stream.write_all(&self.request()).await?;
        stream.flush().await?;
        stream.close().await;
        tracing::debug!("sent CancelRequest for backend {}", self.process_id);
        Ok(())
    }
}
