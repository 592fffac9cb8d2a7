//! embedway - embeddable HTTP/1.x server library for in-process microservices
//!
//! A security-first HTTP server with comprehensive configuration for memory
//! management, connection handling, and protocol support. Designed for
//! embedding directly into a host process rather than running as a
//! standalone binary.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: full protocol with persistent connections, `Expect:
//!   100-continue`, and graceful keep-alive reset
//! - **HTTP/1.0**: basic protocol support for legacy clients
//! - **TLS**: optional, via the [`tls`] module (feature `tls`)
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections before the HTTP layer runs.
//!
//! ## 🌐 Protocol & Management
//! - **Growable read buffer** - doubles on demand up to a configured cap, rather
//!   than a fixed pre-allocation.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//! - **Graceful shutdown** - `stop()` signals every live connection and waits
//!   for the registry to drain before returning.
//!
//! ## 🏭 Production Ready
//! - **Panic isolation** - a panicking handler is caught and turned into a
//!   500 for that one request; the connection task is unaffected.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `embedway` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```bash
//! cargo add embedway tokio --features tokio/full
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use embedway::{Server, Handler, Request, Response, Handled, StatusCode};
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .handler(MyHandler)
//!         .build();
//!     server.start().await.unwrap();
//! }
//! ```
//!
//! For more examples including connection filtering and advanced
//! configuration, see the crate documentation and the `demos/` directory.
//!
//! # Use Cases
//!
//! - **In-process microservices** - admin/health/metrics surfaces embedded in a larger binary
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
pub(crate) mod http {
    pub mod query;
    pub(crate) mod body;
    pub(crate) mod cookie;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod io {
    pub(crate) mod readbuf;
    pub(crate) mod timeout;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod registry;
    pub(crate) mod server_impl;
    pub(crate) mod transport;
}
pub(crate) mod errors;
pub mod limits;
#[cfg(feature = "tls")]
pub mod tls;

pub use crate::{
    errors::ServerError,
    http::{
        cookie::Cookie,
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{Handler, Server, ServerBuilder, ServerObserver, ServerState},
    },
};

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use embedway::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}
