use crate::{
    http::{response::ResponseHeader, types::StatusCode},
    limits::{AllLimits, ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    server::{
        connection::{Connection, TcpTransport, Transport},
        router::Router,
    },
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};
use tracing::{debug, debug_span, info, trace, warn, Instrument};

/// Accepts TCP connections and serves them with a fixed pool of workers.
///
/// Accepted streams are queued; each of the
/// [`max_connections`](ServerLimits::max_connections) workers takes one,
/// runs a [`Connection`] session on it against the shared [`Router`] and
/// goes back to the queue. Once
/// [`max_pending_connections`](ServerLimits::max_pending_connections)
/// streams are waiting, new ones get `503 Service Unavailable` and are
/// closed.
///
/// # Examples
///
/// ```no_run
/// use nova_http::{handler_fn, HandlerResult, Request, ResponseHeader, Router, Server};
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let mut router = Router::new();
///     router.register_get(
///         "/hello",
///         handler_fn(|_: &Request, header: &mut ResponseHeader| -> HandlerResult {
///             header.content_type("text/plain").body("Hello world!");
///             Ok(())
///         }),
///     );
///
///     Server::builder()
///         .bind("127.0.0.1:8080".parse().unwrap())?
///         .router(router)
///         .build()
///         .launch()
///         .await;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: None,
            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
        }
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    ///
    /// Accept errors are logged and skipped.
    pub async fn launch(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, workers = self.server_limits.max_connections, "listening"),
            Err(err) => warn!(error = %err, "listening on unknown address"),
        }

        loop {
            let value = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => {
                    warn!(peer = %value.1, "too many pending connections, answering 503");
                    self.error_queue.push(value);
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

/// Builder for [`Server`].
///
/// A listener (through [`listener`](Self::listener) or
/// [`bind`](Self::bind)) and a [`router`](Self::router) are required; all
/// limits fall back to their defaults.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Router<TcpTransport>>,
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
}

impl ServerBuilder {
    /// Uses an already bound listener.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Binds a listener on `addr` with `SO_REUSEADDR` and the
    /// [`backlog`](ServerLimits::backlog) from the server limits set so far.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn bind(mut self, addr: SocketAddr) -> io::Result<Self> {
        let backlog = self
            .server_limits
            .as_ref()
            .map_or(ServerLimits::default().backlog, |limits| limits.backlog);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        self.listener = Some(TcpListener::from_std(socket.into())?);
        Ok(self)
    }

    #[inline(always)]
    pub fn router(mut self, router: Router<TcpTransport>) -> Self {
        self.router = Some(router);
        self
    }

    /// Worker count, queue bound and listener backlog.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nova_http::{limits::ServerLimits, Router, Server};
    /// use tokio::net::TcpListener;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(Router::new())
    ///     .server_limits(ServerLimits {
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Spawns the workers and returns the server, ready to
    /// [`launch`](Server::launch).
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` or `bind` method must be called to create``
    /// - ``The `router` method must be called to create``
    ///
    /// Also panics when called outside a tokio runtime.
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` or `bind` method must be called to create");
        let router = Arc::new(
            self.router
                .expect("The `router` method must be called to create"),
        );

        let server_limits = self.server_limits.unwrap_or_default();
        let limits = Arc::new(AllLimits {
            conn: self.connection_limits.unwrap_or_default(),
            req: self.request_limits.unwrap_or_default(),
            resp: self.response_limits.unwrap_or_default(),
        });

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        for _ in 0..server_limits.max_connections {
            spawn_worker(&stream_queue, server_limits.wait_strategy, &limits, &router);
        }
        spawn_alarmist(&error_queue, server_limits.wait_strategy, &limits);

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits,
        }
    }
}

fn spawn_worker(
    queue: &TcpQueue,
    wait: WaitStrategy,
    limits: &Arc<AllLimits>,
    router: &Arc<Router<TcpTransport>>,
) {
    let queue = queue.clone();
    let limits = limits.clone();
    let router = router.clone();

    tokio::spawn(async move {
        loop {
            let (stream, addr) = Server::get_stream(&queue, &wait).await;

            let transport = TcpTransport::new(stream, &limits.conn);
            let mut conn = Connection::with_limits(transport, limits.clone());

            conn.run(&router)
                .instrument(debug_span!("connection", %addr))
                .await;
        }
    });
}

/// Answers overflow connections with `503` and closes them.
fn spawn_alarmist(queue: &TcpQueue, wait: WaitStrategy, limits: &Arc<AllLimits>) {
    let queue = queue.clone();
    let limits = limits.clone();

    tokio::spawn(async move {
        let mut header = ResponseHeader::just_code(&limits.resp, StatusCode::ServiceUnavailable);
        header.connection("close");
        let reply = header.to_bytes(&limits.resp);

        loop {
            let (stream, addr) = Server::get_stream(&queue, &wait).await;
            let mut transport = TcpTransport::new(stream, &limits.conn);

            if let Err(err) = transport.send(&reply).await {
                trace!(%addr, error = %err, "503 not delivered");
            }
            let _ = transport.close().await;
        }
    });
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

#[cfg(test)]
mod server_tests {
    use super::*;
    use crate::{handler_fn, HandlerResult, Request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn read_response(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let mut router = Router::new();
        router.register_get(
            "/hello",
            handler_fn(|_: &Request, header: &mut ResponseHeader| -> HandlerResult {
                header.content_type("text/plain").connection("close").body("hi");
                Ok(())
            }),
        );

        let server = Server::builder()
            .server_limits(ServerLimits {
                max_connections: 2,
                ..ServerLimits::default()
            })
            .bind("127.0.0.1:0".parse().unwrap())
            .unwrap()
            .router(router)
            .build();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.launch());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();

        let response = read_response(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\nServer: Nova\r\n"));
        assert!(response.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn overflow_gets_503() {
        let server = Server::builder()
            .server_limits(ServerLimits {
                max_connections: 0,
                max_pending_connections: 0,
                ..ServerLimits::default()
            })
            .bind("127.0.0.1:0".parse().unwrap())
            .unwrap()
            .router(Router::new())
            .build();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.launch());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let response = read_response(&mut stream).await;

        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.contains("Connection: close\r\n"));
    }
}
