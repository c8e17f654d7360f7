//! Synchronous PostgreSQL client.

mod conn;
pub(crate) mod stream;

pub use conn::Conn;
