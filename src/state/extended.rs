//! Extended query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    BindComplete, NoData, ParseComplete, PortalSuspended, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::value::ToParams;

use super::StateMachine;
use super::action::Action;
use super::response::ResponseReader;

/// Extended query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingBind,
    WaitingDescribe,
    ProcessingRows,
    Finished,
}

/// Extended query protocol state machine.
///
/// Runs one statement through the unnamed statement and portal:
/// Parse → Bind → Describe (portal) → Execute → Sync, pipelined in a
/// single write. Parameter types are left for the server to infer and
/// results come back in text format.
pub struct ExtendedQueryStateMachine<'a, H> {
    state: State,
    request: Vec<u8>,
    reader: ResponseReader<'a, H>,
}

impl<'a, H: ResultHandler> ExtendedQueryStateMachine<'a, H> {
    /// Create a new extended query state machine.
    ///
    /// The request is encoded up front, so oversized parameters and more
    /// parameters than a Bind message can carry fail here, before any I/O.
    pub fn new<P: ToParams + ?Sized>(handler: &'a mut H, sql: &str, params: &P) -> Result<Self> {
        let count = params.param_count();
        if count > usize::from(u16::MAX) {
            return Err(Error::InvalidUsage(format!(
                "too many parameters: {} (maximum is {})",
                count,
                u16::MAX
            )));
        }

        let mut request = Vec::new();
        write_parse(&mut request, "", sql, &[]);
        write_bind(&mut request, "", "", params, FormatCode::Text)?;
        write_describe_portal(&mut request, "");
        write_execute(&mut request, "", 0);
        write_sync(&mut request);

        Ok(Self {
            state: State::Initial,
            request,
            reader: ResponseReader::new(handler),
        })
    }

    fn expect_phase(&self, expected: State, type_byte: u8) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "Unexpected '{}' in state {:?}",
                type_byte as char, self.state
            )))
        }
    }

    fn handle_extended(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::PARSE_COMPLETE => {
                self.expect_phase(State::WaitingParse, type_byte)?;
                ParseComplete::parse(payload)?;
                self.state = State::WaitingBind;
            }
            msg_type::BIND_COMPLETE => {
                self.expect_phase(State::WaitingBind, type_byte)?;
                BindComplete::parse(payload)?;
                self.state = State::WaitingDescribe;
            }
            msg_type::NO_DATA => {
                self.expect_phase(State::WaitingDescribe, type_byte)?;
                NoData::parse(payload)?;
                self.state = State::ProcessingRows;
            }
            msg_type::PORTAL_SUSPENDED => {
                self.expect_phase(State::ProcessingRows, type_byte)?;
                PortalSuspended::parse(payload)?;
                tracing::warn!("portal suspended despite unlimited Execute");
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "Unexpected message in extended query response: '{}'",
                    type_byte as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: ResultHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            buffer_set.write_buffer.extend_from_slice(&self.request);
            buffer_set.column_buffer.clear();
            self.state = State::WaitingParse;
            return Ok(Action::WriteAndReadMessage);
        }

        if self.state == State::Finished {
            return Err(Error::Protocol(
                "Extended query state machine already finished".into(),
            ));
        }

        let type_byte = buffer_set.type_byte;
        if type_byte == msg_type::ROW_DESCRIPTION {
            self.expect_phase(State::WaitingDescribe, type_byte)?;
            self.state = State::ProcessingRows;
        }

        match self.reader.handle(buffer_set) {
            Ok(Some(Action::Finished)) => {
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            Ok(Some(action)) => Ok(action),
            Ok(None) => self.handle_extended(buffer_set),
            Err(err) => {
                if self.reader.reached_ready() {
                    self.state = State::Finished;
                }
                Err(err)
            }
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.reader.transaction_status()
    }

    fn reached_ready(&self) -> bool {
        self.reader.reached_ready()
    }
}
