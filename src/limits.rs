//! Server configuration: limits, timeouts and response defaults
//!
//! Every struct here has a `Default` impl with conservative values and a
//! hidden `_priv` field, so configuration is always written with
//! struct-update syntax and keeps compiling when new fields appear.
//!
//! # Examples
//!
//! ```no_run
//! use nova_http::{
//!     limits::{ConnLimits, ReqLimits, ServerLimits},
//!     Router, Server,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())?
//!         .router(Router::new())
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             request_timeout: Duration::from_secs(10),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 64 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

/// Server-level concurrency and admission control.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   No    /----------------\   Yes  [-------------]
/// [ Add to queue ] <====== | Queue is full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /-------------------------\   No    [------]
/// [ Session ] <====== | Is there a free worker? | =====>  [ Wait ]
/// [---------]         \-------------------------/         [------]
/// ```
///
/// Workers are spawned once at startup and each runs one
/// [`Connection`](crate::Connection) session at a time.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, which is the number of sessions served
    /// concurrently (default: `100`).
    pub max_connections: usize,

    /// Accepted sockets allowed to wait for a worker (default: `250`).
    ///
    /// Sockets beyond this receive a canned `503 Service Unavailable` and
    /// are closed.
    pub max_pending_connections: usize,

    /// How idle workers wait for the next socket (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Listen backlog handed to the OS by [`ServerBuilder::bind`](crate::ServerBuilder::bind)
    /// (default: `1024`).
    pub backlog: i32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            backlog: 1024,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// Lowest latency, but keeps a core busy while the server is idle.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Per-connection timeouts and buffer sizing.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum wait for a single socket read (default: `30 seconds`).
    ///
    /// Matches the `timeout=30` advertised in `Keep-Alive`, so an idle
    /// keep-alive connection is dropped about when the client expects.
    ///
    /// This is also the idle limit of a WebSocket session:
    /// [`Connection::recv_frame`](crate::Connection::recv_frame) fails with
    /// a timed-out I/O error when no byte arrives within it. Raise it for
    /// long-lived sockets, or have clients ping.
    pub socket_read_timeout: Duration,

    /// Maximum wait for a single socket write (default: `10 seconds`).
    pub socket_write_timeout: Duration,

    /// Deadline for receiving one complete request, headers and body
    /// included (default: `30 seconds`).
    ///
    /// Stops slow clients that trickle bytes fast enough to dodge
    /// `socket_read_timeout`.
    pub request_timeout: Duration,

    /// Bytes requested from the transport per read (default: `8 KiB`).
    pub read_chunk_size: usize,

    /// Largest WebSocket payload accepted by
    /// [`Connection::recv_frame`](crate::Connection::recv_frame)
    /// (default: `16 MiB`).
    pub max_frame_size: u64,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(30),
            socket_write_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_chunk_size: 8 * 1024,
            max_frame_size: 16 * 1024 * 1024,

            _priv: (),
        }
    }
}

/// Request parsing limits
///
/// # Body framing
///
/// A request must either ask for a WebSocket upgrade or declare
/// `Content-Length`. Anything else closes the connection, GET included,
/// unless [`bodyless_get`](Self::bodyless_get) is enabled.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Bytes accepted before the blank line ending the header section
    /// (default: `16 KiB`).
    pub header_size: usize,

    /// Largest `Content-Length` accepted (default: `3 MiB`).
    ///
    /// A larger declaration closes the connection before any body byte is
    /// read.
    pub body_size: usize,

    /// Treat a GET without `Content-Length` as having an empty body
    /// (default: `false`).
    pub bodyless_get: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            header_size: 16 * 1024,
            body_size: 3 * 1024 * 1024,
            bodyless_get: false,

            _priv: (),
        }
    }
}

/// Defaults written into every [`ResponseHeader`](crate::ResponseHeader)
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Value of the `Server:` line (default: `Nova`).
    pub server_name: String,
    /// Initial `Content-Type` (default: `text/html`).
    pub default_content_type: String,
    /// Initial `Keep-Alive` parameters (default: `timeout=30, max=100`).
    pub keep_alive_params: String,
    /// Capacity reserved for each serialized response (default: `1024`).
    pub default_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            server_name: String::from("Nova"),
            default_content_type: String::from("text/html"),
            keep_alive_params: String::from("timeout=30, max=100"),
            default_capacity: 1024,

            _priv: (),
        }
    }
}

/// Everything a session needs, shared by all workers.
#[derive(Debug, Clone, Default)]
pub(crate) struct AllLimits {
    pub(crate) conn: ConnLimits,
    pub(crate) req: ReqLimits,
    pub(crate) resp: RespLimits,
}
