use embedway::{Handled, Handler, Request, Response, Server, StatusCode};

struct HelloWorld;

impl Handler<()> for HelloWorld {
    async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!")
    }
}

#[tokio::main]
async fn main() {
    let server = Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .handler(HelloWorld)
        .build();

    server.start().await.unwrap();
    tokio::signal::ctrl_c().await.unwrap();
    server.stop().await;
}
