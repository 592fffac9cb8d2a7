use embedway::{Handled, Handler, Request, Response, Server, StatusCode};
use std::io::Read;

struct MyHandler;

impl Handler<()> for MyHandler {
    async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
        let mut body = String::new();
        if let Some(stream) = req.body() {
            let _ = stream.read_to_string(&mut body);
        }

        let result = format!(r#"{{"url": {:?}, "body": {:?}}}"#, req.url().path(), body);

        resp.status(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(result)
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .handler(MyHandler)
        .build();

    server.start().await.unwrap();
    tokio::signal::ctrl_c().await.unwrap();
    server.stop().await;
}
