//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod connection;
pub mod extended;
mod response;
pub mod simple_query;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

pub use action::{Action, AsyncMessage};
pub use connection::ConnectionStateMachine;
pub use extended::ExtendedQueryStateMachine;
pub use simple_query::SimpleQueryStateMachine;

/// A protocol exchange that can be driven to completion by a connection.
pub trait StateMachine {
    /// Advance using the message in `buffer_set` (ignored on the first call).
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status from the last ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;

    /// True once ReadyForQuery has been consumed.
    ///
    /// An error returned after this point left the session in sync; any
    /// earlier error leaves the stream at an unknown position.
    fn reached_ready(&self) -> bool;
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport yet, or closed by the caller
    Disconnected,
    /// TLS negotiation and authentication in progress
    Authenticating,
    /// Idle and able to accept a query
    Ready,
    /// A query is in flight
    Busy,
    /// Transport or protocol failure; every operation fails fast
    Failed,
}

impl SessionState {
    /// Returns true if the connection can accept a query.
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }
}
