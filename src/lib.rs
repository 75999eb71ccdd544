//! nova_http - minimal async HTTP/1.1 and WebSocket server core
//!
//! A small server that reads requests off any byte stream, routes them by
//! method and path, and writes responses with a fixed, predictable header
//! layout. WebSocket upgrades are handled in place: the handshake is sent
//! by the router and the handler then exchanges frames on the same
//! connection.
//!
//! # What is supported
//!
//! - `GET` and `POST` with `Content-Length` bodies (up to 3 MiB by default).
//!   A request without `Content-Length` is dropped unless
//!   [`ReqLimits::bodyless_get`](limits::ReqLimits::bodyless_get) admits it
//!   for `GET`
//! - Keep-alive and pipelined requests on one connection
//! - Static files, a default document for `/`, and query strings routed to
//!   the handler of the bare path
//! - WebSocket upgrade (RFC 6455 handshake, single-frame messages)
//! - Brotli-compressed replies and `301` redirects
//!
//! Chunked transfer encoding, TLS and HTTP/2 are out of scope.
//!
//! # Examples
//!
//! ```no_run
//! use nova_http::{
//!     handler_fn, limits::ReqLimits, HandlerResult, Request, ResponseHeader, Router, Server,
//! };
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut router = Router::new();
//!     router
//!         .register_static_file("/index.html", "<h1>Hello</h1>", "text/html")
//!         .register_get(
//!             "/greet",
//!             handler_fn(|req: &Request, header: &mut ResponseHeader| -> HandlerResult {
//!                 // "/greet?bob" reaches here with content "bob"
//!                 let name = req.content_str().unwrap_or("stranger");
//!                 header.content_type("text/plain").body(format!("Hello, {name}!"));
//!                 Ok(())
//!             }),
//!         );
//!
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())?
//!         .router(router)
//!         // admit GET without Content-Length, as browsers send it
//!         .request_limits(ReqLimits {
//!             bodyless_get: true,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! Serving a custom transport:
//! ```no_run
//! use nova_http::{Connection, Router, Transport};
//!
//! async fn serve<T: Transport>(transport: T, router: &Router<T>) {
//!     Connection::new(transport).run(router).await;
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
    pub(crate) mod websocket;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod router;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{ErrorKind, HandlerError, HandlerResult},
    http::{
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            ResponseHeader,
        },
        types::{Method, StatusCode},
        websocket::{accept_key, apply_mask, decode_frame, encode_frame, Decoded, Frame, Opcode},
    },
    server::{
        connection::{Connection, State, TcpTransport, Transport},
        router::{handler_fn, FnHandler, Handler, Router},
        server_impl::{Server, ServerBuilder},
    },
};
