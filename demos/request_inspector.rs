use embedway::{Handled, Handler, Request, Response, Server, StatusCode};
use std::io::Read;

struct MyHandler;

impl Handler<()> for MyHandler {
    async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
        let user_agent = if let Some(value) = req.header("user-agent") {
            format!(r#", "user_agent": {value:?}"#)
        } else {
            String::new()
        };

        let content_type = if let Some(value) = req.header("content-type") {
            format!(r#", "content_type": {value:?}"#)
        } else {
            String::new()
        };

        let method = req.method();
        let path = req.url().path().to_string();

        let mut body = String::new();
        if let Some(stream) = req.body() {
            let _ = stream.read_to_string(&mut body);
        }

        let result = format!(
            r#"{{"method": "{method:?}", "path": {path:?}{user_agent}{content_type}, "body": {body:?}}}"#,
        );

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
