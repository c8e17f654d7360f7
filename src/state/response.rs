//! Response handling shared by the simple and extended query machines.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::write_copy_fail;
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};

const COPY_UNSUPPORTED: &str = "COPY protocol is not supported";

/// Consumes query responses up to ReadyForQuery.
///
/// The first error (server `ErrorResponse`, handler failure, refused COPY)
/// is held back while the remaining messages are drained, and returned
/// once ReadyForQuery arrives so the session stays in sync.
pub(super) struct ResponseReader<'a, H> {
    handler: &'a mut H,
    pending_error: Option<Error>,
    transaction_status: TransactionStatus,
    ready: bool,
}

impl<'a, H: ResultHandler> ResponseReader<'a, H> {
    pub(super) fn new(handler: &'a mut H) -> Self {
        Self {
            handler,
            pending_error: None,
            transaction_status: TransactionStatus::Idle,
            ready: false,
        }
    }

    pub(super) fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub(super) fn reached_ready(&self) -> bool {
        self.ready
    }

    fn fail(&mut self, err: Error) {
        if self.pending_error.is_none() {
            tracing::debug!("query failed, draining until ReadyForQuery: {}", err);
            self.pending_error = Some(err);
        }
    }

    fn record(&mut self, outcome: Result<()>) {
        if let Err(err) = outcome {
            self.fail(err);
        }
    }

    /// Handle the message in `buffer_set`.
    ///
    /// Returns `Ok(None)` for message types left to the caller.
    pub(super) fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Option<Action>> {
        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = AsyncMessage::parse(type_byte, &buffer_set.read_buffer)?;
            return Ok(Some(Action::HandleAsyncMessageAndReadMessage(msg)));
        }

        match type_byte {
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = ready.transaction_status()?;
                self.ready = true;
                match self.pending_error.take() {
                    Some(err) => Err(err),
                    None => Ok(Some(Action::Finished)),
                }
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
                // The server closes the session after FATAL; no ReadyForQuery follows.
                if error.0.is_fatal() {
                    return Err(error.into_error());
                }
                self.fail(error.into_error());
                Ok(Some(Action::ReadMessage))
            }
            _ if self.pending_error.is_some() => Ok(Some(Action::ReadMessage)),
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_BOTH_RESPONSE => {
                buffer_set.write_buffer.clear();
                write_copy_fail(&mut buffer_set.write_buffer, COPY_UNSUPPORTED);
                self.fail(Error::InvalidUsage(COPY_UNSUPPORTED.into()));
                Ok(Some(Action::WriteAndReadMessage))
            }
            msg_type::COPY_OUT_RESPONSE => {
                self.fail(Error::InvalidUsage(COPY_UNSUPPORTED.into()));
                Ok(Some(Action::ReadMessage))
            }
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set
                    .column_buffer
                    .extend_from_slice(&buffer_set.read_buffer);
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let outcome = self.handler.result_start(cols);
                self.record(outcome);
                Ok(Some(Action::ReadMessage))
            }
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let row = DataRow::parse(&buffer_set.read_buffer)?;
                let outcome = self.handler.row(cols, row);
                self.record(outcome);
                Ok(Some(Action::ReadMessage))
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                buffer_set.column_buffer.clear();
                let outcome = self.handler.result_end(complete);
                self.record(outcome);
                Ok(Some(Action::ReadMessage))
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(&buffer_set.read_buffer)?;
                let outcome = self.handler.empty_query();
                self.record(outcome);
                Ok(Some(Action::ReadMessage))
            }
            _ => Ok(None),
        }
    }
}
