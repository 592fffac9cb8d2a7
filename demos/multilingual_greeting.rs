use embedway::{Handled, Handler, Request, Response, Server, StatusCode};

struct MyHandler;

impl Handler<()> for MyHandler {
    async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
        let segments: Vec<&str> = req.url().path_segments().collect();
        let text = match segments.as_slice() {
            ["api", "en"] => r#"{"lang": "en", "text": "Hello, world!"}"#,
            ["api", "zh"] => r#"{"lang": "zh", "text": "你好世界！"}"#,
            ["api", "es"] => r#"{"lang": "es", "text": "¡Hola Mundo!"}"#,
            ["api", "ar"] => r#"{"lang": "ar", "text": "مرحبا بالعالم!"}"#,
            ["api", "pt"] => r#"{"lang": "pt", "text": "Olá, mundo!"}"#,
            ["api", "hi"] => r#"{"lang": "hi", "text": "हैलो वर्ल्ड!"}"#,
            ["api", "ru"] => r#"{"lang": "ru", "text": "Привет, мир!"}"#,

            ["api", _] => {
                return resp
                    .status(StatusCode::NotFound)
                    .header("Content-Type", "application/json")
                    .body(r#"{"error": "Language not supported", "status": "Not Found"}"#)
            }
            _ => r#"{"supported_lang": ["en", "zh", "es", "ar", "pt", "hi", "ru"]}"#,
        };

        resp.status(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(text)
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
