//! Literal end-to-end scenarios driven over real loopback sockets.

mod common;

use common::{connect, roundtrip, spawn_server};
use embedway::ServerState;
use std::time::Duration;

const IDLE: Duration = Duration::from_millis(200);

#[tokio::test]
async fn simple_get_keep_alive() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let first = roundtrip(
        &mut stream,
        b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n",
        IDLE,
    )
    .await;
    let first = String::from_utf8(first).unwrap();
    assert!(first.starts_with("HTTP/1.1 200 OK"));
    assert!(first.ends_with('1'), "expected body to echo x=1, got {first:?}");

    let second = roundtrip(&mut stream, b"GET /b HTTP/1.1\r\nHost: h\r\n\r\n", IDLE).await;
    let second = String::from_utf8(second).unwrap();
    assert!(second.starts_with("HTTP/1.1 200 OK"));
    assert!(second.ends_with('b'));
    assert!(second.contains("Connection: close"));

    // no `Connection: keep-alive` on the second request -> socket closes.
    let mut probe = [0u8; 1];
    use tokio::io::AsyncReadExt;
    let eof = stream.read(&mut probe).await.unwrap();
    assert_eq!(eof, 0);

    server.stop().await;
}

#[tokio::test]
async fn url_encoded_post() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let body = b"a=1&b=hi%20u";
    let request = format!(
        "POST /f HTTP/1.1\r\nHost: h\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut full = request.into_bytes();
    full.extend_from_slice(body);

    let response = roundtrip(&mut stream, &full, IDLE).await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.ends_with('1'), "expected post param a=1, got {response:?}");

    server.stop().await;
}

#[tokio::test]
async fn multipart_upload() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let part = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.txt\"\r\nContent-Type: text/plain\r\n\r\nHELLO\r\n--XYZ--\r\n";
    let request = format!(
        "POST /u HTTP/1.1\r\nHost: h\r\nContent-Type: multipart/form-data; boundary=XYZ\r\nContent-Length: {}\r\n\r\n",
        part.len()
    );
    let mut full = request.into_bytes();
    full.extend_from_slice(part);

    let response = roundtrip(&mut stream, &full, IDLE).await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.ends_with("HELLO"), "expected streamed part content, got {response:?}");

    server.stop().await;
}

#[tokio::test]
async fn expect_100_continue() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let preamble = b"POST /e HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n";
    let first = roundtrip(&mut stream, preamble, IDLE).await;
    let first = String::from_utf8(first).unwrap();
    assert!(first.starts_with("HTTP/1.1 100 Continue\r\n"));
    assert!(first.contains("Server:"));
    assert!(first.contains("Date:"));

    let second = roundtrip(&mut stream, b"DATA", IDLE).await;
    let second = String::from_utf8(second).unwrap();
    assert!(second.ends_with("DATA"));

    server.stop().await;
}

#[tokio::test]
async fn bad_prolog_closes_without_a_response() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let response = roundtrip(&mut stream, b"NOT A REQUEST\r\n\r\n", IDLE).await;
    assert!(response.is_empty(), "expected no bytes written, got {response:?}");

    server.stop().await;
}

#[tokio::test]
async fn redirect_resolves_against_request_authority() {
    let server = spawn_server().await;
    let mut stream = connect(&server).await;

    let response = roundtrip(&mut stream, b"GET /a/b HTTP/1.1\r\nHost: h:81\r\n\r\n", IDLE).await;
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 302 Moved"));
    assert!(response.contains("Location: http://h:81/a/c\r\n"), "{response}");

    server.stop().await;
}

#[tokio::test]
async fn shutdown_reaches_stopped_promptly() {
    let server = spawn_server().await;
    let _stream = connect(&server).await; // leave one connection idle/open

    let started = std::time::Instant::now();
    server.stop().await;

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(11), "stop() should honor the shutdown timeout");
}
