//! End-to-end tests: spawn the real `ttlcached` binary as a subprocess
//! (acceptor + forked workers + janitor, exactly as a deployment would
//! run it) and drive it over a real TCP socket, the way a hand client
//! would, automated against the testable properties in the design notes.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

struct Server {
    child: Child,
    port: u16,
}

impl Server {
    fn spawn(name: &str) -> Self {
        let unique = format!("{}_{}", name, std::process::id());
        let port = 20_000 + (djb2(&unique) % 10_000) as u16;

        let child = Command::new(env!("CARGO_BIN_EXE_ttlcached"))
            .arg("--listen-port")
            .arg(port.to_string())
            .arg("--shm-name")
            .arg(format!("/ttlcached_it_shm_{unique}"))
            .arg("--sem-name")
            .arg(format!("/ttlcached_it_sem_{unique}"))
            .arg("--workers")
            .arg("2")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn ttlcached");

        let server = Server { child, port };
        server.wait_until_accepting();
        server
    }

    fn wait_until_accepting(&self) {
        for _ in 0..50 {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("ttlcached never started accepting connections on port {}", self.port);
    }

    fn connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).expect("connect")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn djb2(s: &str) -> u32 {
    let mut hash: u32 = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as u32);
    }
    hash
}

/// Send one request line and read back one NUL-terminated response,
/// stripping the trailing NUL that the wire protocol appends to every
/// send.
fn roundtrip(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    assert!(n > 0, "connection closed unexpectedly");
    assert_eq!(buf[n - 1], 0, "response must end with a trailing NUL byte");
    String::from_utf8_lossy(&buf[..n - 1]).into_owned()
}

#[test]
fn set_then_get_round_trips() {
    let server = Server::spawn("set_then_get");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "set 10 foo bar\n"), "ok foo bar\n");
    assert_eq!(roundtrip(&mut stream, "get foo\n"), "ok foo bar\n");
}

#[test]
fn get_on_missing_key_is_an_error() {
    let server = Server::spawn("missing_key");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "get nope\n"), "error (key doesn't exist)\n");
}

#[test]
fn set_rejects_non_positive_ttl() {
    let server = Server::spawn("bad_ttl");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "set 0 foo bar\n"), "error (TTL is less than 1)\n");
}

#[test]
fn set_rejects_oversize_key() {
    let server = Server::spawn("oversize_key");
    let mut stream = server.connect();

    let big_key = "x".repeat(64);
    assert_eq!(roundtrip(&mut stream, &format!("set 10 {big_key} v\n")), "error (too big key)\n");
}

#[test]
fn malformed_request_is_a_bad_query() {
    let server = Server::spawn("bad_query");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "frobnicate everything\n"), "error (bad query)\n");
}

#[test]
fn empty_line_is_reported_without_closing_the_connection() {
    let server = Server::spawn("empty_line");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "\n"), "error (empty query)\n");
    // the connection must still be usable afterward
    assert_eq!(roundtrip(&mut stream, "set 5 k v\n"), "ok k v\n");
}

#[test]
fn entry_expires_after_the_janitor_ticks_past_its_ttl() {
    let server = Server::spawn("ttl_expiry");
    let mut stream = server.connect();

    assert_eq!(roundtrip(&mut stream, "set 1 foo bar\n"), "ok foo bar\n");
    // Two janitor ticks (1s cadence) are needed: one to bring ttl to
    // zero, one more to tombstone it.
    std::thread::sleep(Duration::from_millis(3000));
    assert_eq!(roundtrip(&mut stream, "get foo\n"), "error (key doesn't exist)\n");
}

#[test]
fn two_clients_on_different_workers_see_the_same_table() {
    let server = Server::spawn("cross_worker");
    let mut writer = server.connect();
    let mut reader = server.connect();

    assert_eq!(roundtrip(&mut writer, "set 10 shared value\n"), "ok shared value\n");
    assert_eq!(roundtrip(&mut reader, "get shared\n"), "ok shared value\n");
}
