//! Synchronous PostgreSQL connection.

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

/// Synchronous PostgreSQL connection.
///
/// One request is in flight at a time; every query method takes `&mut self`.
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

impl Conn {
    /// Connect to a PostgreSQL server and complete the startup handshake.
    ///
    /// Accepts a [`Config`] or anything convertible into one, such as a
    /// `postgres://` URL.
    pub fn connect<C: TryInto<Config>>(config: C) -> Result<Self>
    where
        Error: From<C::Error>,
    {
        let config = config.try_into()?.resolve()?;

        let mut stream = Stream::connect(&config)?;
        stream.set_read_timeout(config.connection_timeout, "connection_timeout")?;
        let mut buffer_set = BufferSet::new();
        let mut state_machine =
            ConnectionStateMachine::new(config.clone(), cfg!(feature = "sync-tls"));

        let mut stream = Self::handshake(stream, &mut buffer_set, &mut state_machine, &config)
            .inspect_err(|e| {
                tracing::warn!("connection to {}:{} failed: {}", config.host, config.port, e)
            })?;
        stream.set_read_timeout(config.query_timeout, "query_timeout")?;

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
    fn handshake(
        mut stream: Stream,
        buffer_set: &mut BufferSet,
        state_machine: &mut ConnectionStateMachine,
        config: &Config,
    ) -> Result<Stream> {
        loop {
            match state_machine.step(buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                    buffer_set.type_byte = stream.read_byte()?;
                }
                Action::ReadMessage => {
                    stream.read_message(buffer_set)?;
                }
                Action::Write => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                    stream.read_message(buffer_set)?;
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "sync-tls")]
                    {
                        stream = stream.upgrade_to_tls(&config.host, config.ssl_mode)?;
                    }
                    #[cfg(not(feature = "sync-tls"))]
                    {
                        return Err(Error::Protocol(
                            "TLS requested but sync-tls feature not enabled".into(),
                        ));
                    }
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    tracing::debug!("async message during startup: {:?}", msg);
                    stream.read_message(buffer_set)?;
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

    /// Get server parameters (`server_version`, `TimeZone`, ...).
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

    /// Get the transaction status from the last ReadyForQuery.
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

    /// Token for cancelling a running query from another thread.
    ///
    /// `None` if the server sent no BackendKeyData.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key
            .as_ref()
            .map(|key| CancelToken::new(&self.config, key))
    }

    /// Set the async message handler.
    ///
    /// The handler is called for notices, LISTEN/NOTIFY notifications and
    /// parameter changes that arrive while a query runs.
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
    fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "Unexpected startup action in query state machine".into(),
                    ));
                }
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer)?;
                    self.stream.flush()?;
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.dispatch_async(&msg);
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Finished => {
                    self.transaction_status = state_machine.transaction_status();
                    return Ok(());
                }
            }
        }
    }

    /// Run one request, keeping the session state in step with the outcome.
    fn run<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Busy => {
                // A previous request was abandoned mid-flight.
                self.state = SessionState::Failed;
                self.stream.close();
                return Err(Error::ConnectionBroken);
            }
            SessionState::Disconnected | SessionState::Authenticating | SessionState::Failed => {
                return Err(Error::ConnectionBroken);
            }
        }

        self.state = SessionState::Busy;
        let result = self.drive(state_machine);
        match &result {
            Ok(()) => self.state = SessionState::Ready,
            Err(_) if state_machine.reached_ready() => {
                self.transaction_status = state_machine.transaction_status();
                self.state = SessionState::Ready;
            }
            Err(e) => {
                tracing::warn!("connection failed: {}", e);
                self.state = SessionState::Failed;
                self.stream.close();
            }
        }
        result
    }

    /// Run a simple query, streaming result sets into `handler`.
    pub fn query_with<H: ResultHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let mut state_machine = SimpleQueryStateMachine::new(handler, sql);
        self.run(&mut state_machine)
    }

    /// Run a simple query and collect the result.
    ///
    /// `sql` may contain several statements; rows from all of them are
    /// returned in arrival order, with command and row count taken from the
    /// last one.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut handler = QueryResultHandler::new();
        self.query_with(sql, &mut handler)?;
        Ok(handler.into_result())
    }

    /// Execute a statement with parameters, streaming results into `handler`.
    ///
    /// Without parameters this is a simple query.
    pub fn execute_with<P: ToParams, H: ResultHandler>(
        &mut self,
        sql: &str,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        if params.param_count() == 0 {
            return self.query_with(sql, handler);
        }
        let mut state_machine = ExtendedQueryStateMachine::new(handler, sql, &params)?;
        self.run(&mut state_machine)
    }

    /// Execute a statement with `$1`, `$2`, ... placeholders.
    ///
    /// ```ignore
    /// let result = conn.execute("SELECT name FROM users WHERE id = $1", (42,))?;
    /// let name: String = result.rows[0].try_get("name")?;
    /// ```
    pub fn execute<P: ToParams>(&mut self, sql: &str, params: P) -> Result<QueryResult> {
        let mut handler = QueryResultHandler::new();
        self.execute_with(sql, params, &mut handler)?;
        Ok(handler.into_result())
    }

    /// Send Terminate and close the socket.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.stream.is_closed() {
            return Ok(());
        }
        let result = if self.state == SessionState::Failed {
            Ok(())
        } else {
            self.buffer_set.write_buffer.clear();
            write_terminate(&mut self.buffer_set.write_buffer);
            self.stream
                .write_all(&self.buffer_set.write_buffer)
                .and_then(|()| self.stream.flush())
        };
        self.stream.close();
        self.state = SessionState::Disconnected;
        result
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::debug!("failed to send Terminate: {}", e);
        }
    }
}
