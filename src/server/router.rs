use crate::{
    errors::{ErrorKind, HandlerResult},
    http::{
        request::Request,
        response::ResponseHeader,
        types::{Method, StatusCode},
        websocket,
    },
    server::connection::{Connection, Transport},
};
use futures::future::BoxFuture;
use std::{borrow::Cow, collections::HashMap};
use tracing::{debug, warn};

/// Request handler registered on a [`Router`].
///
/// The handler fills in `header`; the router sends it when the returned
/// future resolves to `Ok`. Returning `Err` answers `500 Internal Server
/// Error` for GET and POST, and closes the connection for WebSocket routes.
///
/// A handler may also answer on its own through `conn` (for example
/// [`Connection::redirect`]), in which case `header` is ignored.
///
/// For handlers that never touch the connection, [`handler_fn`] is
/// shorter.
///
/// # Examples
/// ```
/// use futures::future::BoxFuture;
/// use nova_http::{Connection, Handler, HandlerResult, Opcode, Request, ResponseHeader, Transport};
///
/// struct Echo;
///
/// impl<T: Transport> Handler<T> for Echo {
///     fn handle<'a>(
///         &'a self,
///         conn: &'a mut Connection<T>,
///         _req: &'a Request,
///         _header: &'a mut ResponseHeader,
///     ) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             while let Some(frame) = conn.recv_frame().await? {
///                 conn.send_frame(Opcode::Text, &frame.payload).await?;
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler<T: Transport>: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        conn: &'a mut Connection<T>,
        req: &'a Request,
        header: &'a mut ResponseHeader,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Handler built from a synchronous closure, see [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnHandler<F>(F);

/// Wraps a closure that only needs the request and the response header.
///
/// # Examples
/// ```
/// use nova_http::{handler_fn, HandlerResult, Request, ResponseHeader, Router, TcpTransport};
///
/// let mut router: Router<TcpTransport> = Router::new();
/// router.register_get(
///     "/ping",
///     handler_fn(|_: &Request, header: &mut ResponseHeader| -> HandlerResult {
///         header.content_type("text/plain").body("pong");
///         Ok(())
///     }),
/// );
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request, &mut ResponseHeader) -> HandlerResult + Send + Sync + 'static,
{
    FnHandler(f)
}

impl<T, F> Handler<T> for FnHandler<F>
where
    T: Transport,
    F: Fn(&Request, &mut ResponseHeader) -> HandlerResult + Send + Sync + 'static,
{
    fn handle<'a>(
        &'a self,
        _: &'a mut Connection<T>,
        req: &'a Request,
        header: &'a mut ResponseHeader,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(std::future::ready((self.0)(req, header)))
    }
}

/// Whether the session keeps reading after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    KeepAlive,
    Close,
}

struct StaticFile {
    bytes: Vec<u8>,
    mime: String,
}

/// Maps `(method, path)` to static files and handlers.
///
/// # GET resolution
///
/// ```text
/// "/"        -> default document ("/index.html")
/// "/?q"      -> default document + "?q"
///
/// 1. static file registered for the path       -> 200 with the file
/// 2. GET handler registered for the exact path  -> handler, empty content
/// 3. path has '?' and a handler for the part
///    before it                                  -> handler, content = part after '?'
/// 4. otherwise                                  -> 404
/// ```
///
/// POST looks up the exact path (404 when missing), WebSocket upgrades
/// always get the handshake and then their handler, and every other verb
/// gets `501 Not Implemented`.
///
/// Registering the same path twice replaces the earlier entry.
pub struct Router<T: Transport> {
    get: HashMap<String, Box<dyn Handler<T>>>,
    post: HashMap<String, Box<dyn Handler<T>>>,
    websocket: HashMap<String, Box<dyn Handler<T>>>,
    static_files: HashMap<String, StaticFile>,
    default_document: String,
}

impl<T: Transport> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Router<T> {
    pub fn new() -> Self {
        Self {
            get: HashMap::new(),
            post: HashMap::new(),
            websocket: HashMap::new(),
            static_files: HashMap::new(),
            default_document: String::from("/index.html"),
        }
    }

    /// Path served for `/` (default: `/index.html`).
    pub fn default_document(&mut self, path: impl Into<String>) -> &mut Self {
        self.default_document = path.into();
        self
    }

    pub fn register_get<H: Handler<T>>(&mut self, path: impl Into<String>, handler: H) -> &mut Self {
        let handler: Box<dyn Handler<T>> = Box::new(handler);
        insert(&mut self.get, Method::Get, path.into(), handler);
        self
    }

    pub fn register_post<H: Handler<T>>(&mut self, path: impl Into<String>, handler: H) -> &mut Self {
        let handler: Box<dyn Handler<T>> = Box::new(handler);
        insert(&mut self.post, Method::Post, path.into(), handler);
        self
    }

    pub fn register_websocket<H: Handler<T>>(
        &mut self,
        path: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        let handler: Box<dyn Handler<T>> = Box::new(handler);
        insert(&mut self.websocket, Method::WebSocket, path.into(), handler);
        self
    }

    /// Serves `bytes` with `Content-Type: mime` for GET requests on `path`.
    pub fn register_static_file(
        &mut self,
        path: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        mime: impl Into<String>,
    ) -> &mut Self {
        let path = path.into();
        let file = StaticFile {
            bytes: bytes.into(),
            mime: mime.into(),
        };

        if self.static_files.insert(path.clone(), file).is_some() {
            warn!(%path, "static file registered twice, keeping the last one");
        }
        self
    }
}

fn insert<V>(table: &mut HashMap<String, V>, method: Method, path: String, value: V) {
    if table.insert(path.clone(), value).is_some() {
        warn!(method = method.as_str(), %path, "route registered twice, keeping the last one");
    }
}

// Dispatch
impl<T: Transport> Router<T> {
    pub(crate) async fn dispatch(
        &self,
        conn: &mut Connection<T>,
        request: &mut Request,
        header: &mut ResponseHeader,
    ) -> Result<Flow, ErrorKind> {
        let routed = match request.method() {
            Some(Method::WebSocket) => return self.upgrade(conn, request, header).await,
            Some(Method::Get) => self.route_get(conn, request, header).await,
            Some(Method::Post) => self.route_post(conn, request, header).await,
            None => Err(ErrorKind::HandlerLookupFailure),
        };

        if conn.is_closing() {
            return Ok(Flow::Close);
        }

        match routed {
            Ok(()) if conn.has_responded() => {}
            Ok(()) => conn.reply(header).await?,
            Err(err) => match err.status() {
                Some(_) if conn.has_responded() => {
                    warn!(error = %err, "handler failed after replying");
                    return Ok(Flow::Close);
                }
                Some(status) => {
                    match &err {
                        ErrorKind::HandlerInvocationFailure(_) => warn!(error = %err, path = %lossy(request.path()), "handler failed"),
                        _ => debug!(error = %err, path = %lossy(request.path()), "answering {}", status.reason()),
                    }
                    conn.reply_just_code(status).await?;
                }
                None => return Err(err),
            },
        }

        match header.wants_close() {
            true => Ok(Flow::Close),
            false => Ok(Flow::KeepAlive),
        }
    }

    /// Rewrites `/` and `/?query` to the default document.
    fn resolve_get_path<'p>(&self, path: &'p str) -> Cow<'p, str> {
        match path.strip_prefix('/') {
            Some("") => Cow::Owned(self.default_document.clone()),
            Some(rest) if rest.starts_with('?') => Cow::Owned(format!("{}{rest}", self.default_document)),
            _ => Cow::Borrowed(path),
        }
    }

    async fn route_get(
        &self,
        conn: &mut Connection<T>,
        request: &mut Request,
        header: &mut ResponseHeader,
    ) -> Result<(), ErrorKind> {
        let path = match request.path_str() {
            Some(path) => self.resolve_get_path(path).into_owned(),
            None => return Err(ErrorKind::RouteNotFound),
        };

        if let Some(file) = self.static_files.get(&path) {
            header
                .status(StatusCode::Ok)
                .content_type(file.mime.as_str())
                .body(file.bytes.as_slice());
            return Ok(());
        }

        if let Some(handler) = self.get.get(&path) {
            request.set_content(Vec::new());
            return invoke(handler.as_ref(), conn, request, header).await;
        }

        if let Some((base, query)) = path.split_once('?') {
            if let Some(handler) = self.get.get(base) {
                request.set_content(query.as_bytes().to_vec());
                return invoke(handler.as_ref(), conn, request, header).await;
            }
        }

        Err(ErrorKind::RouteNotFound)
    }

    async fn route_post(
        &self,
        conn: &mut Connection<T>,
        request: &mut Request,
        header: &mut ResponseHeader,
    ) -> Result<(), ErrorKind> {
        let handler = request
            .path_str()
            .and_then(|path| self.post.get(path))
            .ok_or(ErrorKind::RouteNotFound)?;

        invoke(handler.as_ref(), conn, request, header).await
    }

    async fn upgrade(
        &self,
        conn: &mut Connection<T>,
        request: &mut Request,
        header: &mut ResponseHeader,
    ) -> Result<Flow, ErrorKind> {
        let key = request
            .header_ignore_case(b"Sec-WebSocket-Key")
            .ok_or(ErrorKind::MissingWebSocketKey)?;
        conn.send(&websocket::handshake_response(key)).await?;

        let handler = request.path_str().and_then(|path| self.websocket.get(path));
        match handler {
            Some(handler) => {
                if let Err(err) = invoke(handler.as_ref(), conn, request, header).await {
                    warn!(error = %err, path = %lossy(request.path()), "websocket handler failed");
                }
            }
            None => debug!(path = %lossy(request.path()), "no websocket handler, closing"),
        }

        Ok(Flow::Close)
    }
}

async fn invoke<T: Transport>(
    handler: &dyn Handler<T>,
    conn: &mut Connection<T>,
    request: &Request,
    header: &mut ResponseHeader,
) -> Result<(), ErrorKind> {
    handler
        .handle(conn, request, header)
        .await
        .map_err(ErrorKind::HandlerInvocationFailure)
}

#[inline]
fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
