//! Action types for state machine I/O requests.

use crate::error::{DatabaseError, Error, Result};
use crate::protocol::backend::{
    NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
};

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and then calls `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer` to the server, then read a single byte.
    ///
    /// Used for SSL negotiation: write SSLRequest, then read 'S' or 'N'.
    WriteAndReadByte,

    /// Read the next message into `buffer_set`.
    ReadMessage,

    /// Write `buffer_set.write_buffer` to the server and flush.
    Write,

    /// Write `buffer_set.write_buffer`, then read the next message.
    WriteAndReadMessage,

    /// Perform the TLS handshake on the underlying stream.
    TlsHandshake,

    /// An asynchronous message was received.
    ///
    /// The caller dispatches the message, reads the next one, and steps again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The state machine has finished successfully.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time during query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(DatabaseError),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Parse an async message (`N`, `A` or `S`).
    pub fn parse(type_byte: u8, payload: &[u8]) -> Result<Self> {
        match type_byte {
            msg_type::NOTICE_RESPONSE => Ok(AsyncMessage::Notice(NoticeResponse::parse(payload)?.0)),
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                Ok(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                })
            }
            _ => Err(Error::Protocol(format!(
                "Unknown async message type: '{}'",
                type_byte as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_notification() {
        let mut payload = 42_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0ready\0");
        assert_eq!(
            AsyncMessage::parse(b'A', &payload).unwrap(),
            AsyncMessage::Notification {
                pid: 42,
                channel: "jobs".into(),
                payload: "ready".into(),
            }
        );
    }

    #[test]
    fn parse_notice_and_parameter() {
        let notice = AsyncMessage::parse(b'N', b"SNOTICE\0Mhello\0\0").unwrap();
        match notice {
            AsyncMessage::Notice(err) => {
                assert_eq!(err.message, "hello");
                assert_eq!(err.severity.as_deref(), Some("NOTICE"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            AsyncMessage::parse(b'S', b"TimeZone\0UTC\0").unwrap(),
            AsyncMessage::ParameterChanged {
                name: "TimeZone".into(),
                value: "UTC".into(),
            }
        );
        assert!(AsyncMessage::parse(b'Z', b"I").is_err());
    }
}
