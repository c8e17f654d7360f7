//! Extended query protocol messages.

use crate::error::Result;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};
use crate::value::ToParams;

/// Write a Parse message.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 or omitted = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_u16(param_oids.len() as u16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
}

/// Write a Bind message.
///
/// Each parameter carries its own format code (text for scalars, binary for
/// byte strings). Every result column is requested in `result_format`.
///
/// The caller checks that `params.param_count()` fits in a u16. Fails when a
/// parameter value is too large for its length field.
pub fn write_bind<P: ToParams + ?Sized>(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &P,
    result_format: FormatCode,
) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    let param_count = params.param_count() as u16;
    msg.write_u16(param_count);
    params.write_formats(msg.buf());

    msg.write_u16(param_count);
    params.write_values(msg.buf())?;

    msg.write_u16(1);
    msg.write_u16(result_format as u16);

    msg.finish();
    Ok(())
}

/// Write an Execute message.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Write a Describe message for a portal.
///
/// The server answers with RowDescription, or NoData for statements that
/// return no rows.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Close message for a statement (`b'S'`) or portal (`b'P'`).
pub fn write_close(buf: &mut Vec<u8>, close_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(close_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Flush message.
///
/// Asks the server to deliver pending responses without ending the
/// extended query sequence.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}

/// Write a Sync message.
///
/// Ends an extended query sequence. The server answers with ReadyForQuery,
/// committing or rolling back the implicit transaction first.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}
