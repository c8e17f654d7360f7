//! Blocking client against a scripted backend.
//!
//! ## Test Matrix
//!
//! - `test_select_by_id` - extended query with one parameter, typed row access
//! - `test_insert_reports_row_count` - DML through the extended protocol
//! - `test_md5_auth` - MD5 password challenge
//! - `test_bad_password` - handshake `ErrorResponse` 28P01 surfaces as a server error
//! - `test_unique_violation_then_reuse` - 23505 leaves the session Ready
//! - `test_multi_statement_simple_query` - rows from every statement, tag from the last
//! - `test_empty_query` - `EmptyQueryResponse`
//! - `test_zero_column_select` - rows of a zero-column RowDescription are counted
//! - `test_zero_timeouts_disable_deadlines` - `Duration::ZERO` means no timeout
//! - `test_notice_and_parameter_status` - async messages during a query
//! - `test_failed_connection_fails_fast` - EOF mid-response breaks the session
//! - `test_query_timeout` - read deadline marks the session Failed
//! - `test_handshake_timeout` - a silent server trips `connection_timeout`
//! - `test_cancel_request` - `CancelToken` sends pid/secret on a new socket

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{INT4, INT8, TEXT, spawn};
use lean_postgres::sync::Conn;
use lean_postgres::{AsyncMessage, Error, SessionState, TransactionStatus, Value};

#[test]
fn test_select_by_id() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_until_sync(), b"PBDES");
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.row_description(&[("id", INT4), ("name", TEXT)]);
        backend.data_row(&[Some("1"), Some("Alice")]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');

        assert!(backend.read_to_end().starts_with(b"X"));
    });

    let mut conn = Conn::connect(config).unwrap();
    assert_eq!(conn.state(), SessionState::Ready);
    assert_eq!(conn.server_version(), Some("16.2"));
    assert_eq!(conn.backend_key().map(|k| k.process_id()), Some(12345));

    let result = conn
        .execute("SELECT id, name FROM users WHERE id = $1", (1,))
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("id"), Some(&Value::Int(1)));
    let name: String = result.rows[0].try_get("name").unwrap();
    assert_eq!(name, "Alice");
    assert_eq!(result.command, "SELECT");
    assert_eq!(result.row_count, Some(1));
    let fields = result.fields.unwrap();
    assert_eq!(fields[1].name, "name");
    assert_eq!(fields[1].data_type_id, TEXT);

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_insert_reports_row_count() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_until_sync(), b"PBDES");
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.send(b'n', &[]);
        backend.command_complete("INSERT 0 1");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).unwrap();
    let result = conn
        .execute(
            "INSERT INTO users (email, name) VALUES ($1, $2)",
            ("bob@example.com", "Bob"),
        )
        .unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.command, "INSERT");
    assert_eq!(result.row_count, Some(1));
    assert_eq!(result.fields, None);

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_md5_auth() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.read_startup();
        backend.auth(5, &[1, 2, 3, 4]);
        let (type_byte, payload) = backend.read_message();
        assert_eq!(type_byte, b'p');
        assert!(payload.starts_with(b"md5"));
        assert_eq!(payload.len(), 3 + 32 + 1);
        backend.finish_startup();
        backend.read_to_end();
    });

    let conn = Conn::connect(config).unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_bad_password() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.read_startup();
        backend.auth(3, &[]);
        backend.read_message();
        backend.error(
            "FATAL",
            "28P01",
            "password authentication failed for user \"alice\"",
        );
        backend.read_to_end();
    });

    let err = Conn::connect(config.password("wrong")).err().unwrap();
    assert_eq!(err.sqlstate(), Some("28P01"));
    assert!(matches!(err, Error::Server(_)));
    server.join().unwrap();
}

#[test]
fn test_unique_violation_then_reuse() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        backend.read_until_sync();
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.send(b'n', &[]);
        backend.error(
            "ERROR",
            "23505",
            "duplicate key value violates unique constraint \"users_email_key\"",
        );
        backend.ready(b'I');

        assert_eq!(backend.read_query(), "SELECT 1");
        backend.row_description(&[("?column?", INT4)]);
        backend.data_row(&[Some("1")]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).unwrap();
    let err = conn
        .execute("INSERT INTO users (email) VALUES ($1)", ("a@b.c",))
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(
        err.database_error().message,
        "duplicate key value violates unique constraint \"users_email_key\""
    );
    assert!(!conn.is_broken());
    assert_eq!(conn.state(), SessionState::Ready);

    let result = conn.query("SELECT 1").unwrap();
    assert_eq!(result.rows[0].get_index(0), Some(&Value::Int(1)));

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_multi_statement_simple_query() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_query(), "SELECT 1 AS a; SELECT 2 AS b; UPDATE t SET x = 1");
        backend.row_description(&[("a", INT8)]);
        backend.data_row(&[Some("1")]);
        backend.command_complete("SELECT 1");
        backend.row_description(&[("b", INT8)]);
        backend.data_row(&[Some("2")]);
        backend.command_complete("SELECT 1");
        backend.command_complete("UPDATE 3");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).unwrap();
    let result = conn
        .query("SELECT 1 AS a; SELECT 2 AS b; UPDATE t SET x = 1")
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].get("a"), Some(&Value::Int(1)));
    assert_eq!(result.rows[1].get("b"), Some(&Value::Int(2)));
    assert_eq!(result.command, "UPDATE");
    assert_eq!(result.row_count, Some(3));
    assert_eq!(result.fields, None);

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_empty_query() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_query(), "");
        backend.send(b'I', &[]);
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).unwrap();
    let result = conn.execute("", ()).unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.command, "");
    assert_eq!(result.row_count, None);

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_zero_column_select() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_query(), "SELECT FROM generate_series(1, 2)");
        backend.row_description(&[]);
        backend.data_row(&[]);
        backend.data_row(&[]);
        backend.command_complete("SELECT 2");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).unwrap();
    let result = conn.query("SELECT FROM generate_series(1, 2)").unwrap();
    assert_eq!(result.rows.len(), 2);
    assert!(result.rows[0].is_empty());
    assert_eq!(result.command, "SELECT");
    assert_eq!(result.row_count, Some(2));
    assert_eq!(result.fields, None);
    assert_eq!(conn.state(), SessionState::Ready);

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_zero_timeouts_disable_deadlines() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_query(), "SELECT 1");
        backend.row_description(&[("?column?", INT4)]);
        backend.data_row(&[Some("1")]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let config = config
        .connection_timeout(Duration::ZERO)
        .query_timeout(Duration::ZERO)
        .keep_alive_initial_delay(Duration::ZERO);
    let mut conn = Conn::connect(config).unwrap();
    let result = conn.query("SELECT 1").unwrap();
    assert_eq!(result.rows[0].get_index(0), Some(&Value::Int(1)));

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_notice_and_parameter_status() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        backend.read_query();
        backend.notice("relation \"t\" already exists, skipping");
        backend.parameter_status("TimeZone", "Europe/Berlin");
        backend.command_complete("CREATE TABLE");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut conn = Conn::connect(config).unwrap();
    let sink = Arc::clone(&seen);
    conn.set_async_message_handler(move |msg: &AsyncMessage| {
        sink.lock().unwrap().push(msg.clone());
    });

    let result = conn.query("CREATE TABLE IF NOT EXISTS t (x int)").unwrap();
    assert_eq!(result.command, "CREATE");
    assert_eq!(result.row_count, None);
    assert_eq!(conn.server_param("TimeZone"), Some("Europe/Berlin"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    match &seen[0] {
        AsyncMessage::Notice(notice) => {
            assert_eq!(notice.message, "relation \"t\" already exists, skipping")
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        seen[1],
        AsyncMessage::ParameterChanged {
            name: "TimeZone".into(),
            value: "Europe/Berlin".into(),
        }
    );

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_failed_connection_fails_fast() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        backend.read_query();
        backend.row_description(&[("n", INT4)]);
        drop(backend);
    });

    let mut conn = Conn::connect(config).unwrap();
    let err = conn.query("SELECT n FROM t").unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(conn.is_broken());
    assert_eq!(conn.state(), SessionState::Failed);

    assert!(matches!(conn.query("SELECT 1"), Err(Error::ConnectionBroken)));
    assert!(matches!(
        conn.execute("SELECT $1", (1,)),
        Err(Error::ConnectionBroken)
    ));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_query_timeout() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();
        backend.read_query();
        backend.read_to_end();
    });

    let mut conn = Conn::connect(config.query_timeout(Duration::from_millis(200))).unwrap();
    let err = conn.query("SELECT pg_sleep(10)").unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(conn.is_broken());

    drop(conn);
    server.join().unwrap();
}

#[test]
fn test_handshake_timeout() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.read_startup();
        backend.read_to_end();
    });

    let err = Conn::connect(config.connection_timeout(Duration::from_millis(200)))
        .err()
        .unwrap();
    match err {
        Error::Timeout(message) => assert!(message.contains("connection_timeout"), "{}", message),
        other => panic!("unexpected {:?}", other),
    }
    server.join().unwrap();
}

#[test]
fn test_cancel_request() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        let mut cancel = server.accept();
        let body = cancel.read_startup_packet();
        assert_eq!(&body[0..4], &80877102_i32.to_be_bytes());
        assert_eq!(&body[4..8], &12345_u32.to_be_bytes());
        assert_eq!(&body[8..12], &0xdeadbeef_u32.to_be_bytes());

        backend.read_to_end();
    });

    let conn = Conn::connect(config).unwrap();
    let token = conn.cancel_token().unwrap();
    assert_eq!(token.process_id(), 12345);
    token.cancel().unwrap();

    drop(conn);
    server.join().unwrap();
}
