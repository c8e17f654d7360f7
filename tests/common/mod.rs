//! Scripted PostgreSQL backend for integration tests.
//!
//! Each test spawns a [`MockServer`] on a loopback port and hands it a
//! script that plays the server side of the conversation message by
//! message. Assertions inside the script run on the server thread; the
//! test joins the thread so a failed assertion fails the test.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use lean_postgres::{Config, SslMode};

pub const INT4: u32 = 23;
pub const INT8: u32 = 20;
pub const TEXT: u32 = 25;

pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    /// Accept the next client connection.
    pub fn accept(&self) -> MockBackend {
        let (stream, _) = self.listener.accept().expect("accept");
        MockBackend { stream }
    }
}

/// Bind a loopback listener and run `script` against it on a new thread.
///
/// Returns a client config pointing at the listener.
pub fn spawn<F>(script: F) -> (Config, JoinHandle<()>)
where
    F: FnOnce(MockServer) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    let handle = std::thread::spawn(move || script(MockServer { listener }));

    let config = Config::new()
        .host("127.0.0.1")
        .port(port)
        .user("alice")
        .password("secret")
        .database("shop")
        .ssl_mode(SslMode::Disable);
    (config, handle)
}

pub struct MockBackend {
    stream: TcpStream,
}

impl MockBackend {
    /// Read an untyped startup-phase packet (StartupMessage, CancelRequest).
    pub fn read_startup_packet(&mut self) -> Vec<u8> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).expect("startup length");
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        self.stream.read_exact(&mut body).expect("startup body");
        body
    }

    /// Read a StartupMessage and return its parameters.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        let body = self.read_startup_packet();
        assert_eq!(&body[..4], &196608_i32.to_be_bytes(), "protocol version");
        let strings: Vec<String> = body[4..]
            .split(|&b| b == 0)
            .map(|s| String::from_utf8(s.to_vec()).expect("utf8"))
            .collect();
        strings
            .chunks(2)
            .filter(|pair| pair.len() == 2 && !pair[0].is_empty())
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Read one typed frontend message.
    pub fn read_message(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).expect("message header");
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).expect("message payload");
        (header[0], payload)
    }

    /// Read messages and return their type bytes, up to and including Sync.
    pub fn read_until_sync(&mut self) -> Vec<u8> {
        let mut types = Vec::new();
        loop {
            let (type_byte, _) = self.read_message();
            types.push(type_byte);
            if type_byte == b'S' {
                return types;
            }
        }
    }

    /// Read a simple Query message and return its SQL.
    pub fn read_query(&mut self) -> String {
        let (type_byte, payload) = self.read_message();
        assert_eq!(type_byte, b'Q');
        String::from_utf8(payload[..payload.len() - 1].to_vec()).expect("utf8")
    }

    /// Block until the client closes the socket; returns the bytes it sent.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        let _ = self.stream.read_to_end(&mut rest);
        rest
    }

    pub fn send(&mut self, type_byte: u8, payload: &[u8]) {
        let mut out = vec![type_byte];
        out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(payload);
        self.stream.write_all(&out).expect("send");
    }

    pub fn auth(&mut self, code: i32, extra: &[u8]) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        self.send(b'R', &payload);
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) {
        self.send(b'S', &cstrings(&[name, value]));
    }

    pub fn ready(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    pub fn command_complete(&mut self, tag: &str) {
        self.send(b'C', &cstrings(&[tag]));
    }

    pub fn row_description(&mut self, columns: &[(&str, u32)]) {
        let mut payload = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, type_oid) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0_u32.to_be_bytes());
            payload.extend_from_slice(&0_i16.to_be_bytes());
            payload.extend_from_slice(&type_oid.to_be_bytes());
            payload.extend_from_slice(&(-1_i16).to_be_bytes());
            payload.extend_from_slice(&(-1_i32).to_be_bytes());
            payload.extend_from_slice(&0_i16.to_be_bytes());
        }
        self.send(b'T', &payload);
    }

    pub fn data_row(&mut self, values: &[Option<&str>]) {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(v) => {
                    payload.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    payload.extend_from_slice(v.as_bytes());
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        self.send(b'D', &payload);
    }

    pub fn error(&mut self, severity: &str, code: &str, message: &str) {
        self.send(b'E', &fields(&[(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)]));
    }

    pub fn notice(&mut self, message: &str) {
        self.send(b'N', &fields(&[(b'S', "NOTICE"), (b'C', "00000"), (b'M', message)]));
    }

    /// Read the StartupMessage, ask for a cleartext password, accept it and
    /// finish the startup burst.
    pub fn accept_cleartext(&mut self) {
        let params = self.read_startup();
        assert!(params.contains(&("user".to_string(), "alice".to_string())));
        self.auth(3, &[]);
        let (type_byte, payload) = self.read_message();
        assert_eq!(type_byte, b'p');
        assert_eq!(payload, b"secret\0");
        self.finish_startup();
    }

    pub fn finish_startup(&mut self) {
        self.auth(0, &[]);
        self.parameter_status("server_version", "16.2");
        self.parameter_status("client_encoding", "UTF8");
        self.send(b'K', &[0, 0, 0x30, 0x39, 0xde, 0xad, 0xbe, 0xef]);
        self.ready(b'I');
    }
}

fn cstrings(strings: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    out
}

fn fields(pairs: &[(u8, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (code, value) in pairs {
        out.push(*code);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out.push(0);
    out
}
