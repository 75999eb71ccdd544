use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request, Status},
        response::{self, ResponseHeader},
        types::StatusCode,
        websocket::{self, Decoded, Frame, FrameHead, Opcode},
    },
    limits::{AllLimits, ConnLimits, RespLimits},
    server::router::{Flow, Router},
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};
use tracing::{debug, trace};

/// Byte stream a [`Connection`] runs on.
///
/// The session only ever talks to the peer through these four operations,
/// so anything that can move bytes (a TCP socket, a TLS stream, an
/// in-memory pipe in tests) can host it.
pub trait Transport: Send + 'static {
    /// Appends newly received bytes to `buf` and returns how many arrived.
    /// `0` means the peer closed its side.
    fn recv(&mut self, buf: &mut Vec<u8>) -> impl Future<Output = io::Result<usize>> + Send;

    /// Writes all of `data`.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Closes the transport. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    fn is_closing(&self) -> bool;
}

/// [`Transport`] over a tokio TCP stream with per-operation timeouts taken
/// from [`ConnLimits`].
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    read_timeout: Duration,
    write_timeout: Duration,
    chunk: usize,
    closing: bool,
    shut_down: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, limits: &ConnLimits) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            trace!(error = %err, "TCP_NODELAY not set");
        }

        Self {
            stream,
            read_timeout: limits.socket_read_timeout,
            write_timeout: limits.socket_write_timeout,
            chunk: limits.read_chunk_size.max(1),
            closing: false,
            shut_down: false,
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Transport for TcpTransport {
    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        if self.closing {
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + self.chunk, 0);

        let result = tokio::select! {
            biased;

            read = self.stream.read(&mut buf[start..]) => read,
            _ = sleep(self.read_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        };

        match result {
            Ok(n) => {
                buf.truncate(start + n);
                self.closing = n == 0;
                Ok(n)
            }
            Err(err) => {
                buf.truncate(start);
                self.closing = true;
                Err(err)
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match timeout(self.write_timeout, self.stream.write_all(data)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout")),
        };

        if result.is_err() {
            self.closing = true;
        }
        result
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closing = true;
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        match self.stream.shutdown().await {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }

    #[inline]
    fn is_closing(&self) -> bool {
        self.closing
    }
}

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing of the next request has arrived yet.
    AwaitingRequestLine,
    /// Part of the header section is buffered.
    AccumulatingHeaders,
    /// Headers are parsed, waiting for the rest of the body.
    AccumulatingBody,
    /// A handler (or the router) is producing the reply.
    Dispatching,
    Closed,
}

/// One client connection: the session driving it and the handle handlers
/// use to talk back.
///
/// The session reads requests one at a time, hands each to the [`Router`]
/// and keeps the connection open between them. Any framing error,
/// oversized body or transport failure ends the session without a reply.
///
/// Handlers receive `&mut Connection` and can answer directly with
/// [`reply`](Self::reply), [`redirect`](Self::redirect) and friends; the
/// router then skips its own reply. WebSocket handlers use
/// [`recv_frame`](Self::recv_frame) and [`send_frame`](Self::send_frame).
pub struct Connection<T: Transport> {
    transport: T,
    buffer: Vec<u8>,
    limits: Arc<AllLimits>,
    state: State,
    responded: bool,
}

impl<T: Transport> Connection<T> {
    /// Wraps `transport` with default limits.
    pub fn new(transport: T) -> Self {
        Self::with_limits(transport, Arc::new(AllLimits::default()))
    }

    pub(crate) fn with_limits(transport: T, limits: Arc<AllLimits>) -> Self {
        Self {
            transport,
            buffer: Vec::with_capacity(limits.conn.read_chunk_size),
            limits,
            state: State::AwaitingRequestLine,
            responded: false,
        }
    }

    #[inline]
    pub const fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn response_limits(&self) -> &RespLimits {
        &self.limits.resp
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.transport.is_closing()
    }
}

// Session loop
impl<T: Transport> Connection<T> {
    /// Serves requests until the peer leaves, a handler closes the
    /// connection, or something fatal happens. The transport is closed on
    /// return.
    pub async fn run(&mut self, router: &Router<T>) {
        match self.serve(router).await {
            Ok(()) => trace!("session finished"),
            Err(err) => debug!(error = %err, state = ?self.state, "closing connection"),
        }

        self.state = State::Closed;
        if let Err(err) = self.transport.close().await {
            trace!(error = %err, "transport close failed");
        }
    }

    async fn serve(&mut self, router: &Router<T>) -> Result<(), ErrorKind> {
        while !self.transport.is_closing() {
            let Some(mut request) = self.read_request().await? else {
                break;
            };

            self.state = State::Dispatching;
            self.responded = false;

            let mut header = ResponseHeader::new(&self.limits.resp);
            if router.dispatch(self, &mut request, &mut header).await? == Flow::Close {
                break;
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> Result<Option<Request>, ErrorKind> {
        let deadline = self.limits.conn.request_timeout;

        match timeout(deadline, self.accumulate_request()).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Timeout),
        }
    }

    async fn accumulate_request(&mut self) -> Result<Option<Request>, ErrorKind> {
        let mut parser = Parser::new();

        loop {
            if !self.buffer.is_empty() {
                if let Status::Complete { request, consumed } =
                    parser.advance(&self.buffer, &self.limits.req)?
                {
                    self.buffer.drain(..consumed);
                    trace!(
                        method = %String::from_utf8_lossy(request.method_token()),
                        path = %String::from_utf8_lossy(request.path()),
                        "request received"
                    );
                    return Ok(Some(request));
                }
            }

            self.state = match (parser.has_head(), self.buffer.is_empty()) {
                (true, _) => State::AccumulatingBody,
                (false, true) => State::AwaitingRequestLine,
                (false, false) => State::AccumulatingHeaders,
            };

            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }

    #[inline]
    async fn fill(&mut self) -> Result<usize, ErrorKind> {
        Ok(self.transport.recv(&mut self.buffer).await?)
    }

    #[inline]
    pub(crate) fn has_responded(&self) -> bool {
        self.responded
    }
}

// Handler facing API
impl<T: Transport> Connection<T> {
    /// Writes raw bytes to the peer.
    #[inline]
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.transport.send(data).await
    }

    /// Serializes and sends `header` as this request's response.
    pub async fn reply(&mut self, header: &ResponseHeader) -> io::Result<()> {
        let bytes = header.to_bytes(&self.limits.resp);
        self.responded = true;
        self.send(&bytes).await
    }

    /// Sends `status` with a canned HTML body.
    pub async fn reply_just_code(&mut self, status: StatusCode) -> io::Result<()> {
        let header = ResponseHeader::just_code(&self.limits.resp, status);
        self.reply(&header).await
    }

    /// Brotli-compresses the body of `header`, then sends it.
    pub async fn reply_compress_brotli(&mut self, header: &mut ResponseHeader) -> io::Result<()> {
        header.compress_brotli()?;
        self.reply(header).await
    }

    /// Sends `301 Moved Permanently` with `Location: to` and no body.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::InvalidInput`] when `to` contains CR or LF; nothing
    /// is sent in that case.
    pub async fn redirect(&mut self, to: &str) -> io::Result<()> {
        if to.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line break in redirect target",
            ));
        }

        self.responded = true;
        self.send(&response::redirect(to.as_bytes())).await
    }

    /// Closes the transport. The session ends after the current handler.
    #[inline]
    pub async fn close(&mut self) -> io::Result<()> {
        self.transport.close().await
    }

    /// Reads the next WebSocket frame.
    ///
    /// Returns `Ok(None)` once the peer sends a close frame or goes away.
    /// Bytes that arrived with the upgrade request are used first.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::FrameTooLarge`] when a frame declares more than
    /// [`ConnLimits::max_frame_size`] bytes, checked before its payload is
    /// buffered.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, ErrorKind> {
        let max = self.limits.conn.max_frame_size;

        loop {
            if self.buffer.is_empty() {
                if self.fill().await? == 0 {
                    return Ok(None);
                }
                continue;
            }

            match websocket::decode_frame(&self.buffer)? {
                Decoded::Frame { frame, consumed } => {
                    self.buffer.drain(..consumed);
                    if frame.payload.len() as u64 > max {
                        return Err(ErrorKind::FrameTooLarge(frame.payload.len() as u64));
                    }
                    return Ok(Some(frame));
                }
                Decoded::Close => {
                    self.buffer.clear();
                    return Ok(None);
                }
                Decoded::Incomplete => {
                    if let Some(head) = FrameHead::parse(&self.buffer) {
                        if head.payload_len > max {
                            return Err(ErrorKind::FrameTooLarge(head.payload_len));
                        }
                    }
                    if self.fill().await? == 0 {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Sends one final, unmasked frame.
    #[inline]
    pub async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
        self.send(&websocket::encode_frame(opcode, payload)).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted peer: hands out `inbound` chunks one per `recv`, records
    /// everything sent.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct MockTransport {
        inbound: VecDeque<Vec<u8>>,
        pub(crate) outbound: Vec<u8>,
        pub(crate) close_calls: usize,
        hang_when_empty: bool,
        closed: bool,
    }

    impl MockTransport {
        pub(crate) fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            Self {
                inbound: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                ..Self::default()
            }
        }

        /// Never reports end of stream, `recv` just waits once the script is
        /// exhausted.
        pub(crate) fn hanging<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            Self {
                hang_when_empty: true,
                ..Self::new(chunks)
            }
        }

        pub(crate) fn output(&self) -> String {
            String::from_utf8_lossy(&self.outbound).into_owned()
        }
    }

    impl Transport for MockTransport {
        async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            if self.closed {
                return Ok(0);
            }

            match self.inbound.pop_front() {
                Some(chunk) => {
                    buf.extend_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.hang_when_empty => std::future::pending().await,
                None => Ok(0),
            }
        }

        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            if self.closed {
                return Err(io::ErrorKind::NotConnected.into());
            }
            self.outbound.extend_from_slice(data);
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            self.close_calls += 1;
            Ok(())
        }

        fn is_closing(&self) -> bool {
            self.closed
        }
    }
}
