//! Error and notice response messages.

use crate::error::{DatabaseError, Error, Result};
use crate::protocol::codec::read_cstr;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
}

/// Map the fields of an ErrorResponse/NoticeResponse payload.
///
/// Each field is a code byte followed by a C string; a zero byte ends the
/// list. Unknown codes are skipped. The non-localized severity wins over
/// the localized one when both are present.
fn parse_fields(payload: &[u8]) -> Result<DatabaseError> {
    let mut fields = DatabaseError::default();
    let mut localized_severity = None;
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }

        let (value, rest) = read_cstr(rest)?;
        data = rest;

        match code {
            field_type::SEVERITY => localized_severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity = Some(value.to_string()),
            field_type::CODE => fields.code = Some(value.to_string()),
            field_type::MESSAGE => fields.message = value.to_string(),
            field_type::DETAIL => fields.detail = Some(value.to_string()),
            field_type::HINT => fields.hint = Some(value.to_string()),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::WHERE => fields.where_ = Some(value.to_string()),
            field_type::SCHEMA => fields.schema = Some(value.to_string()),
            field_type::TABLE => fields.table = Some(value.to_string()),
            field_type::COLUMN => fields.column = Some(value.to_string()),
            field_type::CONSTRAINT => fields.constraint = Some(value.to_string()),
            _ => {
                tracing::debug!("Unknown error field type: {}", code as char);
            }
        }
    }

    if fields.severity.is_none() {
        fields.severity = localized_severity;
    }

    Ok(fields)
}

/// ErrorResponse message - error reported by the server.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub DatabaseError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }

    /// Convert to an Error.
    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.0.code.as_deref()
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub DatabaseError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(fields: &[(u8, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (code, value) in fields {
            out.push(*code);
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
        out.push(0);
        out
    }

    #[test]
    fn message_only_leaves_optionals_absent() {
        let err = ErrorResponse::parse(&payload(&[(b'M', "boom")])).unwrap().0;
        assert_eq!(err.message, "boom");
        assert_eq!(err.code, None);
        assert_eq!(err.detail, None);
        assert_eq!(err.hint, None);
    }

    #[test]
    fn empty_detail_is_present() {
        let err = ErrorResponse::parse(&payload(&[(b'M', "boom"), (b'D', "")]))
            .unwrap()
            .0;
        assert_eq!(err.detail, Some(String::new()));
    }

    #[test]
    fn maps_all_known_fields() {
        let err = ErrorResponse::parse(&payload(&[
            (b'S', "ERREUR"),
            (b'V', "ERROR"),
            (b'C', "23505"),
            (b'M', "duplicate key value violates unique constraint \"users_email_key\""),
            (b'D', "Key (email)=(a@b.c) already exists."),
            (b'H', "Use another email"),
            (b's', "public"),
            (b't', "users"),
            (b'n', "users_email_key"),
            (b'P', "15"),
            (b'F', "nbtinsert.c"),
            (b'L', "664"),
            (b'R', "_bt_check_unique"),
        ]))
        .unwrap();

        assert_eq!(err.code(), Some("23505"));
        let err = err.0;
        assert_eq!(err.severity.as_deref(), Some("ERROR"));
        assert_eq!(err.detail.as_deref(), Some("Key (email)=(a@b.c) already exists."));
        assert_eq!(err.hint.as_deref(), Some("Use another email"));
        assert_eq!(err.schema.as_deref(), Some("public"));
        assert_eq!(err.table.as_deref(), Some("users"));
        assert_eq!(err.constraint.as_deref(), Some("users_email_key"));
        assert_eq!(err.position, Some(15));
    }

    #[test]
    fn localized_severity_is_fallback() {
        let err = ErrorResponse::parse(&payload(&[(b'S', "FATAL"), (b'M', "bye")]))
            .unwrap()
            .0;
        assert_eq!(err.severity.as_deref(), Some("FATAL"));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_message_is_empty_not_failure() {
        let err = ErrorResponse::parse(&payload(&[(b'C', "XX000")])).unwrap().0;
        assert_eq!(err.message, "");
        assert_eq!(err.code.as_deref(), Some("XX000"));
    }

    #[test]
    fn truncated_field_is_protocol_error() {
        assert!(matches!(
            ErrorResponse::parse(b"Mno terminator"),
            Err(Error::Protocol(_))
        ));
    }
}
