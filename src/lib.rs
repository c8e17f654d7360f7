//! A small native PostgreSQL client.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: handshake and query logic never touch a socket
//! - **Sync and async APIs**: blocking [`sync::Conn`] and tokio-based [`tokio::Conn`]
//! - **Simple and extended queries**: text SQL, or `$n` placeholders with typed parameters
//! - **Structured results and errors**: every row materialized, every `ErrorResponse`
//!   field preserved
//!
//! # Example
//!
//! ```no_run
//! use lean_postgres::sync::Conn;
//! use lean_postgres::Config;
//!
//! fn main() -> lean_postgres::Result<()> {
//!     let config = Config {
//!         host: "localhost".into(),
//!         user: Some("postgres".into()),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::connect(config)?;
//!
//!     let result = conn.execute("SELECT $1::int + 1 AS num", (41,))?;
//!     let num: i64 = result.rows[0].try_get("num")?;
//!     assert_eq!(num, 42);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

mod buffer_set;
mod cancel;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod result;
pub mod state;
pub mod value;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_set::BufferSet;
pub use cancel::CancelToken;
pub use config::{Config, SslMode};
pub use error::{DatabaseError, Error, Result};
pub use handler::{AsyncMessageHandler, QueryResultHandler, ResultHandler};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use result::{FieldInfo, QueryResult, Row};
pub use state::{AsyncMessage, SessionState};
pub use value::{FromValue, ToParams, ToWireValue, Value};
