//! Tokio client against a scripted backend.

mod common;

use std::time::Duration;

use common::{INT4, TEXT, spawn};
use lean_postgres::tokio::Conn;
use lean_postgres::{Error, SessionState, Value};

#[tokio::test]
async fn test_select_by_id() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        assert_eq!(backend.read_until_sync(), b"PBDES");
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.row_description(&[("id", INT4), ("name", TEXT)]);
        backend.data_row(&[Some("7"), None]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');

        assert!(backend.read_to_end().starts_with(b"X"));
    });

    let mut conn = Conn::connect(config).await.unwrap();
    let result = conn
        .execute("SELECT id, name FROM users WHERE id = $1", [7_i64])
        .await
        .unwrap();
    assert_eq!(result.rows[0].get("id"), Some(&Value::Int(7)));
    assert_eq!(result.rows[0].get("name"), Some(&Value::Null));
    let name: Option<String> = result.rows[0].try_get("name").unwrap();
    assert_eq!(name, None);

    conn.close().await.unwrap();
    server.join().unwrap();
}

#[tokio::test]
async fn test_unique_violation_then_reuse() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        backend.read_until_sync();
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.send(b'n', &[]);
        backend.error("ERROR", "23505", "duplicate key value violates unique constraint");
        backend.ready(b'I');

        backend.read_until_sync();
        backend.send(b'1', &[]);
        backend.send(b'2', &[]);
        backend.send(b'n', &[]);
        backend.command_complete("DELETE 0");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).await.unwrap();
    let err = conn
        .execute("INSERT INTO users (id) VALUES ($1)", (1,))
        .await
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(conn.state(), SessionState::Ready);

    let result = conn
        .execute("DELETE FROM users WHERE id = $1", (99,))
        .await
        .unwrap();
    assert_eq!(result.row_count, Some(0));
    assert!(result.rows.is_empty());

    drop(conn);
    server.join().unwrap();
}

#[tokio::test]
async fn test_bad_password() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.read_startup();
        backend.auth(3, &[]);
        backend.read_message();
        backend.error("FATAL", "28P01", "password authentication failed");
        backend.read_to_end();
    });

    let err = Conn::connect(config).await.err().unwrap();
    assert_eq!(err.sqlstate(), Some("28P01"));
    server.join().unwrap();
}

#[tokio::test]
async fn test_query_timeout_breaks_connection() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();
        backend.read_query();
        backend.read_to_end();
    });

    let mut conn = Conn::connect(config.query_timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    let err = conn.query("SELECT pg_sleep(10)").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(conn.is_broken());
    assert!(matches!(
        conn.query("SELECT 1").await,
        Err(Error::ConnectionBroken)
    ));

    drop(conn);
    server.join().unwrap();
}

#[tokio::test]
async fn test_abandoned_query_breaks_connection() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();
        backend.read_query();
        backend.read_to_end();
    });

    let mut conn = Conn::connect(config).await.unwrap();
    let abandoned = tokio::time::timeout(Duration::from_millis(100), conn.query("SELECT 1")).await;
    assert!(abandoned.is_err());
    assert_eq!(conn.state(), SessionState::Busy);

    assert!(matches!(
        conn.query("SELECT 1").await,
        Err(Error::ConnectionBroken)
    ));
    assert_eq!(conn.state(), SessionState::Failed);

    drop(conn);
    server.join().unwrap();
}

#[tokio::test]
async fn test_zero_timeouts_disable_deadlines() {
    let (config, server) = spawn(|server| {
        let mut backend = server.accept();
        backend.accept_cleartext();

        backend.read_query();
        backend.command_complete("SELECT 0");
        backend.ready(b'I');

        backend.read_to_end();
    });

    let config = config
        .connection_timeout(Duration::ZERO)
        .query_timeout(Duration::ZERO);
    let mut conn = Conn::connect(config).await.unwrap();
    let result = conn.query("SELECT 1 WHERE false").await.unwrap();
    assert_eq!(result.row_count, Some(0));

    drop(conn);
    server.join().unwrap();
}
