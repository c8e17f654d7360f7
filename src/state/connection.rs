//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::config::{Config, SslMode};
use crate::error::{Error, Result};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion,
    ParameterStatus, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::SCRAM_SHA_256;
use crate::protocol::frontend::{
    ScramClient, md5_password, write_password, write_sasl_initial_response, write_sasl_response,
    write_ssl_request, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
///
/// Drives SSL negotiation, the StartupMessage, authentication and the
/// ParameterStatus/BackendKeyData burst up to the first ReadyForQuery.
///
/// For [`Action::WriteAndReadByte`] the driver stores the byte it read in
/// `buffer_set.type_byte`. After [`Action::TlsHandshake`] the driver calls
/// `step` again once the stream is encrypted.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    config: Config,
    user: String,
    tls_available: bool,
    scram_nonce: Option<String>,
    scram_client: Option<ScramClient>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
}

impl ConnectionStateMachine {
    /// Create a state machine for a resolved config.
    ///
    /// `tls_available` tells whether the driver can perform a TLS handshake.
    pub fn new(config: Config, tls_available: bool) -> Self {
        let user = config.effective_user();
        Self {
            state: ConnectionState::Initial,
            config,
            user,
            tls_available,
            scram_nonce: None,
            scram_client: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Use a fixed SCRAM client nonce (and the startup user as SCRAM
    /// username) instead of a random nonce.
    #[cfg(test)]
    pub(crate) fn with_scram_nonce(mut self, nonce: &str) -> Self {
        self.scram_nonce = Some(nonce.to_string());
        self
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The user name sent in the StartupMessage.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get server parameters reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Move the collected server parameters out.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    fn password(&self) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn write_startup_message(&mut self, buffer_set: &mut BufferSet) {
        let params = self.config.startup_params();
        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        buffer_set.write_buffer.clear();
        write_startup(&mut buffer_set.write_buffer, &params);
        self.state = ConnectionState::WaitingAuth;
    }

    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if !self.config.client_encoding.eq_ignore_ascii_case("UTF8") {
            tracing::warn!(
                "client_encoding {} requested; values are still decoded as UTF-8",
                self.config.client_encoding
            );
        }

        let ssl_mode = self.config.ssl_mode;
        if ssl_mode == SslMode::Disable || (ssl_mode == SslMode::Prefer && !self.tls_available) {
            self.write_startup_message(buffer_set);
            return Ok(Action::WriteAndReadMessage);
        }

        if !self.tls_available {
            return Err(Error::InvalidUsage(format!(
                "sslmode {:?} requires a TLS feature (sync-tls or tokio-tls)",
                ssl_mode
            )));
        }

        buffer_set.write_buffer.clear();
        write_ssl_request(&mut buffer_set.write_buffer);
        self.state = ConnectionState::WaitingSslResponse;
        Ok(Action::WriteAndReadByte)
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            b'S' => {
                tracing::debug!("server accepted SSLRequest");
                self.state = ConnectionState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.config.ssl_mode.is_required() {
                    return Err(Error::Connect(std::io::Error::other(
                        "server does not support TLS",
                    )));
                }
                tracing::debug!("server declined SSLRequest, continuing without TLS");
                self.write_startup_message(buffer_set);
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SSL response: {}",
                other
            ))),
        }
    }

    fn handle_auth_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        expect_authentication(buffer_set.type_byte)?;
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                tracing::debug!("cleartext password requested");
                let password = self.password()?;
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Md5Password { salt } => {
                tracing::debug!("md5 password requested");
                let hashed = md5_password(&self.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }
                tracing::debug!("starting {} exchange", SCRAM_SHA_256);

                let password = self.password()?;
                let scram = match &self.scram_nonce {
                    Some(nonce) => ScramClient::with_nonce(&self.user, password, nonce),
                    None => ScramClient::new(password),
                };
                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(Error::Auth(format!(
                "Unsupported authentication method: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        expect_authentication(buffer_set.type_byte)?;
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first)?;

                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final)?;

                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        expect_authentication(buffer_set.type_byte)?;
        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                tracing::debug!("authenticated as {}", self.user);
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some(*key);
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                match self.server_params.iter_mut().find(|(n, _)| n == param.name) {
                    Some(entry) => entry.1 = param.value.to_string(),
                    None => self
                        .server_params
                        .push((param.name.to_string(), param.value.to_string())),
                }
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status()?;
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }

    fn dispatch(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == ConnectionState::Initial {
            return self.start(buffer_set);
        }
        if self.state == ConnectionState::WaitingSslResponse {
            return self.handle_ssl_response(buffer_set);
        }
        if self.state == ConnectionState::SslHandshake {
            self.write_startup_message(buffer_set);
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;
        match type_byte {
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
                tracing::warn!("server rejected startup: {}", error.0);
                return Err(error.into_error());
            }
            msg_type::NOTICE_RESPONSE | msg_type::NOTIFICATION_RESPONSE => {
                let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
                return Ok(Action::HandleAsyncMessageAndReadMessage(msg));
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
                tracing::warn!(
                    "server supports protocol 3.{} only; unrecognized options: {:?}",
                    negotiate.newest_minor_version,
                    negotiate.unrecognized_options
                );
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(buffer_set),
            ConnectionState::SaslInProgress => self.handle_sasl_message(buffer_set),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(buffer_set),
            ConnectionState::WaitingReady => self.handle_ready_message(buffer_set),
            state => Err(Error::Protocol(format!(
                "Unexpected message '{}' in state {:?}",
                type_byte as char, state
            ))),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let result = self.dispatch(buffer_set);
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn reached_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}

fn expect_authentication(type_byte: u8) -> Result<()> {
    if type_byte == msg_type::AUTHENTICATION {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "Expected Authentication message, got '{}'",
            type_byte as char
        )))
    }
}
