use embedway::{Handled, Handler, Request, Response, Server, StatusCode};
use std::io::Read;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub struct EndToEndHandler;

impl Handler<()> for EndToEndHandler {
    async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
        match req.url().path() {
            "/a" => {
                let x = req.query("x").unwrap_or("").to_string();
                resp.status(StatusCode::Ok).body(x)
            }
            "/b" => resp.status(StatusCode::Ok).body("b"),
            "/f" => {
                let a = req.post("a").unwrap_or("").to_string();
                resp.status(StatusCode::Ok).body(a)
            }
            "/u" => {
                let mut content = String::new();
                if let Some(item) = req.multipart_mut().first_mut() {
                    if let Some(stream) = item.as_stream() {
                        let _ = stream.read_to_string(&mut content);
                    }
                }
                resp.status(StatusCode::Ok).body(content)
            }
            "/e" => {
                let mut body = String::new();
                if let Some(stream) = req.body() {
                    let _ = stream.read_to_string(&mut body);
                }
                resp.status(StatusCode::Ok).body(body)
            }
            "/a/b" => {
                let url = req.url().clone();
                resp.redirect("c", false, &url).body("")
            }
            _ => resp.status(StatusCode::NotFound).body(""),
        }
    }
}

/// Starts an [`EndToEndHandler`] server on an ephemeral loopback port and
/// returns it already in `Started` state.
pub async fn spawn_server() -> Server<EndToEndHandler> {
    let server = Server::builder()
        .bind("127.0.0.1:0".parse().unwrap())
        .handler(EndToEndHandler)
        .build();
    server.start().await.unwrap();
    server
}

pub async fn connect(server: &Server<EndToEndHandler>) -> TcpStream {
    TcpStream::connect(server.endpoint().unwrap()).await.unwrap()
}

/// Writes `request` then reads a response off `stream`, stopping once the
/// socket goes quiet for `idle_for` (no `Content-Length`-aware framing here —
/// tests assert on substrings of the raw response instead of parsing it).
pub async fn roundtrip(stream: &mut TcpStream, request: &[u8], idle_for: Duration) -> Vec<u8> {
    stream.write_all(request).await.unwrap();

    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(idle_for, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) => break,
            Err(_) => break, // idle timeout: assume the response is complete
        }
    }
    out
}
