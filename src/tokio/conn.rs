//! Asynchronous PostgreSQL connection.

use std::future::Future;

use crate::buffer_set::BufferSet;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::{AsyncMessageHandler, QueryResultHandler, ResultHandler};
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::result::QueryResult;
use crate::state::action::{Action, AsyncMessage};
use crate::state::connection::ConnectionStateMachine;
use crate::state::extended::ExtendedQueryStateMachine;
use crate::state::simple_query::SimpleQueryStateMachine;
use crate::state::{SessionState, StateMachine};
use crate::value::ToParams;

use super::stream::Stream;

/// Asynchronous PostgreSQL connection.
///
/// Dropping a query future before it completes leaves the session mid
/// response; the next call then fails with [`Error::ConnectionBroken`].
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    config: Config,
    state: SessionState,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    async_message_handler: Option<Box<dyn AsyncMessageHandler>>,
}

async fn with_deadline<T>(
    deadline: Option<std::time::Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_elapsed| Error::Timeout(format!("{} exceeded {:?}", what, limit)))?,
        None => fut.await,
    }
}

impl Conn {
    /// Connect to a PostgreSQL server and complete the startup handshake.
    ///
    /// `connection_timeout` bounds the TCP connect and the handshake together.
    pub async fn connect<C: TryInto<Config>>(config: C) -> Result<Self>
    where
        Error: From<C::Error>,
    {
        let config = config.try_into()?.resolve()?;
        let mut buffer_set = BufferSet::new();
        let mut state_machine =
            ConnectionStateMachine::new(config.clone(), cfg!(feature = "tokio-tls"));

        let stream = with_deadline(
            config.connection_timeout,
            "connection_timeout",
            async {
                let stream = Stream::connect(&config).await?;
                Self::handshake(stream, &mut buffer_set, &mut state_machine, &config).await
            },
        )
        .await
        .inspect_err(|e| {
            tracing::warn!("connection to {}:{} failed: {}", config.host, config.port, e)
        })?;

        tracing::debug!(
            "connected to {}:{} as {}",
            config.host,
            config.port,
            state_machine.user()
        );

        Ok(Self {
            stream,
            buffer_set,
            backend_key: state_machine.backend_key().copied(),
            server_params: state_machine.take_server_params(),
            transaction_status: state_machine.transaction_status(),
            config,
            state: SessionState::Ready,
            async_message_handler: None,
        })
    }

    /// Run the startup state machine; the stream is dropped on failure.
    async fn handshake(
        mut stream: Stream,
        buffer_set: &mut BufferSet,
        state_machine: &mut ConnectionStateMachine,
        config: &Config,
    ) -> Result<Stream> {
        loop {
            match state_machine.step(buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    buffer_set.type_byte = stream.read_byte().await?;
                }
                Action::ReadMessage => {
                    stream.read_message(buffer_set).await?;
                }
                Action::Write => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    stream.read_message(buffer_set).await?;
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "tokio-tls")]
                    {
                        stream = stream.upgrade_to_tls(&config.host, config.ssl_mode).await?;
                    }
                    #[cfg(not(feature = "tokio-tls"))]
                    {
                        return Err(Error::Protocol(
                            "TLS requested but tokio-tls feature not enabled".into(),
                        ));
                    }
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    tracing::debug!("async message during startup: {:?}", msg);
                    stream.read_message(buffer_set).await?;
                }
                Action::Finished => {
                    tracing::trace!("startup with {} complete", config.host);
                    return Ok(stream);
                }
            }
        }
    }

    /// Lifecycle state of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Look up a single server parameter.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `server_version` reported at startup.
    pub fn server_version(&self) -> Option<&str> {
        self.server_param("server_version")
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Token for cancelling a running query from another task.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key
            .as_ref()
            .map(|key| CancelToken::new(&self.config, key))
    }

    /// Set the async message handler.
    pub fn set_async_message_handler<H: AsyncMessageHandler + 'static>(&mut self, handler: H) {
        self.async_message_handler = Some(Box::new(handler));
    }

    /// Remove the async message handler.
    pub fn clear_async_message_handler(&mut self) {
        self.async_message_handler = None;
    }

    fn dispatch_async(&mut self, msg: &AsyncMessage) {
        match msg {
            AsyncMessage::ParameterChanged { name, value } => {
                match self.server_params.iter_mut().find(|(n, _)| n == name) {
                    Some(entry) => entry.1.clone_from(value),
                    None => self.server_params.push((name.clone(), value.clone())),
                }
            }
            AsyncMessage::Notice(notice) => tracing::debug!("server notice: {}", notice),
            AsyncMessage::Notification { channel, .. } => {
                tracing::debug!("notification on channel {}", channel)
            }
        }
        if let Some(handler) = &mut self.async_message_handler {
            handler.handle(msg);
        }
    }

    /// Drive a state machine to completion.
    async fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "Unexpected startup action in query state machine".into(),
                    ));
                }
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.dispatch_async(&msg);
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Finished => {
                    self.transaction_status = state_machine.transaction_status();
                    return Ok(());
                }
            }
        }
    }

    /// Run one request, keeping the session state in step with the outcome.
    async fn run<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Busy => {
                // A previous query future was dropped mid-flight.
                self.state = SessionState::Failed;
                self.stream.close().await;
                return Err(Error::ConnectionBroken);
            }
            SessionState::Disconnected | SessionState::Authenticating | SessionState::Failed => {
                return Err(Error::ConnectionBroken);
            }
        }

        self.state = SessionState::Busy;
        let timeout = self.config.query_timeout;
        let result = with_deadline(timeout, "query_timeout", self.drive(state_machine)).await;
        match &result {
            Ok(()) => self.state = SessionState::Ready,
            Err(_) if state_machine.reached_ready() => {
                self.transaction_status = state_machine.transaction_status();
                self.state = SessionState::Ready;
            }
            Err(e) => {
                tracing::warn!("connection failed: {}", e);
                self.state = SessionState::Failed;
                self.stream.close().await;
            }
        }
        result
    }

    /// Run a simple query, streaming result sets into `handler`.
    pub async fn query_with<H: ResultHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let mut state_machine = SimpleQueryStateMachine::new(handler, sql);
        self.run(&mut state_machine).await
    }

    /// Run a simple query and collect the result.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut handler = QueryResultHandler::new();
        self.query_with(sql, &mut handler).await?;
        Ok(handler.into_result())
    }

    /// Execute a statement with parameters, streaming results into `handler`.
    ///
    /// Without parameters this is a simple query.
    pub async fn execute_with<P: ToParams, H: ResultHandler>(
        &mut self,
        sql: &str,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        if params.param_count() == 0 {
            return self.query_with(sql, handler).await;
        }
        let mut state_machine = ExtendedQueryStateMachine::new(handler, sql, &params)?;
        self.run(&mut state_machine).await
    }

    /// Execute a statement with `$1`, `$2`, ... placeholders.
    pub async fn execute<P: ToParams>(&mut self, sql: &str, params: P) -> Result<QueryResult> {
        let mut handler = QueryResultHandler::new();
        self.execute_with(sql, params, &mut handler).await?;
        Ok(handler.into_result())
    }

    /// Send Terminate and close the socket.
    pub async fn close(mut self) -> Result<()> {
        if self.stream.is_closed() {
            return Ok(());
        }
        let result = if self.state == SessionState::Failed {
            Ok(())
        } else {
            self.buffer_set.write_buffer.clear();
            write_terminate(&mut self.buffer_set.write_buffer);
            match self.stream.write_all(&self.buffer_set.write_buffer).await {
                Ok(()) => self.stream.flush().await,
                Err(e) => Err(e),
            }
        };
        self.stream.close().await;
        self.state = SessionState::Disconnected;
        result
    }
}
