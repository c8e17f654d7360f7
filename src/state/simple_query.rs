//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::Action;
use super::response::ResponseReader;

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Reading,
    Finished,
}

/// Simple query protocol state machine.
///
/// Sends one `Query` message and feeds every result set to the handler.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    sql: &'a str,
    reader: ResponseReader<'a, H>,
}

impl<'a, H: ResultHandler> SimpleQueryStateMachine<'a, H> {
    /// Create a new simple query state machine.
    pub fn new(handler: &'a mut H, sql: &'a str) -> Self {
        Self {
            state: State::Initial,
            sql,
            reader: ResponseReader::new(handler),
        }
    }
}

impl<H: ResultHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                buffer_set.write_buffer.clear();
                buffer_set.column_buffer.clear();
                write_query(&mut buffer_set.write_buffer, self.sql);
                self.state = State::Reading;
                Ok(Action::WriteAndReadMessage)
            }
            State::Reading => match self.reader.handle(buffer_set) {
                Ok(Some(Action::Finished)) => {
                    self.state = State::Finished;
                    Ok(Action::Finished)
                }
                Ok(Some(action)) => Ok(action),
                Ok(None) => Err(Error::Protocol(format!(
                    "Unexpected message in query response: '{}'",
                    buffer_set.type_byte as char
                ))),
                Err(err) => {
                    if self.reader.reached_ready() {
                        self.state = State::Finished;
                    }
                    Err(err)
                }
            },
            State::Finished => Err(Error::Protocol(
                "Simple query state machine already finished".into(),
            )),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.reader.transaction_status()
    }

    fn reached_ready(&self) -> bool {
        self.reader.reached_ready()
    }
}
