use crate::{
    errors::ErrorKind,
    http::types::{slice_to_usize, Method},
    limits::ReqLimits,
};
use memchr::memmem;
use std::collections::HashMap;

/// A fully received HTTP request.
///
/// # Wire format
///
/// ```text
/// [METHOD] SP [PATH] SP [VERSION] CRLF
/// ([NAME] ": " [VALUE] CRLF)*
/// CRLF
/// [BODY]
/// ```
///
/// - The request line must split on single spaces into exactly three
///   tokens, anything else is rejected and the connection closed.
/// - A header line without `": "` is skipped. A repeated header name keeps
///   the last value.
/// - Header names keep the case they were received in. [`header`](Self::header)
///   looks them up exactly, [`header_ignore_case`](Self::header_ignore_case)
///   does not care.
///
/// # Body framing
///
/// | Request                          | Body                                  |
/// |----------------------------------|---------------------------------------|
/// | `Upgrade: websocket`             | none, [`Method::WebSocket`]           |
/// | `Content-Length: N`              | exactly `N` bytes, `N <= body_size`   |
/// | neither                          | connection closed                     |
///
/// # Content
///
/// [`content`](Self::content) holds the POST body. For GET requests routed by
/// prefix it holds the query string (the part after `?`) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub(crate) method: Option<Method>,
    pub(crate) method_token: Vec<u8>,
    pub(crate) path: Vec<u8>,
    pub(crate) version: Vec<u8>,
    pub(crate) headers: HashMap<Vec<u8>, Vec<u8>>,
    pub(crate) content: Vec<u8>,
}

// Public API
impl Request {
    /// Returns the dispatch method, `None` for verbs other than GET and POST.
    #[inline]
    pub const fn method(&self) -> Option<Method> {
        self.method
    }

    /// Returns the verb exactly as it appeared on the request line.
    #[inline]
    pub fn method_token(&self) -> &[u8] {
        &self.method_token
    }

    /// Returns the raw request target, query string included.
    #[inline]
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Returns the request target as `&str`, or `None` if it is not UTF-8.
    #[inline]
    pub fn path_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.path).ok()
    }

    /// Returns the version token, e.g. `b"HTTP/1.1"`. It is not validated.
    #[inline]
    pub fn version(&self) -> &[u8] {
        &self.version
    }

    #[inline]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    #[inline]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name.as_bytes())
            .and_then(|value| simdutf8::basic::from_utf8(value).ok())
    }

    pub fn header_ignore_case(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    /// Iterates over all headers in no particular order.
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_slice(), value.as_slice()))
    }

    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    #[inline]
    pub fn content_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.content).ok()
    }
}

impl Request {
    pub(crate) fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
    }

    /// Parses everything before the blank line: request line and headers.
    pub(crate) fn from_head(head: &[u8]) -> Result<Self, ErrorKind> {
        let mut lines = Lines::new(head);
        let first = lines.next().ok_or(ErrorKind::MalformedRequestLine)?;

        let mut tokens = first.split(|&byte| byte == b' ');
        let (method_token, path, version) = match (
            tokens.next(),
            tokens.next(),
            tokens.next(),
            tokens.next(),
        ) {
            (Some(method), Some(path), Some(version), None)
                if !method.is_empty() && !path.is_empty() && !version.is_empty() =>
            {
                (method, path, version)
            }
            _ => return Err(ErrorKind::MalformedRequestLine),
        };

        let mut headers = HashMap::new();
        for line in lines {
            match memmem::find(line, b": ") {
                Some(split) => {
                    headers.insert(line[..split].to_vec(), line[split + 2..].to_vec());
                }
                None => tracing::trace!(line = %String::from_utf8_lossy(line), "skipping header line"),
            }
        }

        let mut request = Request {
            method: Method::from_token(method_token),
            method_token: method_token.to_vec(),
            path: path.to_vec(),
            version: version.to_vec(),
            headers,
            content: Vec::new(),
        };

        if request.is_upgrade() {
            request.method = Some(Method::WebSocket);
        }

        Ok(request)
    }

    #[inline]
    fn is_upgrade(&self) -> bool {
        self.header_ignore_case(b"Upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case(b"websocket"))
    }

    /// The `Content-Length` value, matched case-insensitively. Spellings
    /// that disagree make the framing ambiguous.
    fn content_length(&self) -> Result<Option<&[u8]>, ErrorKind> {
        let mut values = self
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(b"Content-Length"))
            .map(|(_, value)| value.as_slice());

        let first = values.next();
        match first {
            Some(first) if values.any(|other| other != first) => Err(ErrorKind::InvalidContentLength),
            _ => Ok(first),
        }
    }

    /// Number of body bytes that follow the header section.
    fn body_len(&self, limits: &ReqLimits) -> Result<usize, ErrorKind> {
        if self.method == Some(Method::WebSocket) {
            return Ok(0);
        }

        match self.content_length()? {
            Some(value) => {
                let declared = slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
                if declared > limits.body_size {
                    return Err(ErrorKind::BodyTooLarge {
                        declared,
                        limit: limits.body_size,
                    });
                }
                Ok(declared)
            }
            None if limits.bodyless_get && self.method == Some(Method::Get) => Ok(0),
            None => Err(ErrorKind::MissingBodyFraming),
        }
    }
}

// CRLF separated lines of the header section
struct Lines<'a> {
    src: &'a [u8],
    finder: memmem::FindIter<'a, 'static>,
    start: usize,
    done: bool,
}

impl<'a> Lines<'a> {
    fn new(src: &'a [u8]) -> Self {
        Lines {
            src,
            finder: memmem::find_iter(src, b"\r\n"),
            start: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = match self.finder.next() {
            Some(end) => end,
            None => {
                self.done = true;
                self.src.len()
            }
        };
        let line = &self.src[self.start..end];
        self.start = end + 2;
        Some(line)
    }
}

/// Outcome of feeding the accumulated bytes to the [`Parser`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Status {
    /// More bytes are needed.
    Partial,
    /// A whole request is available. `consumed` bytes of the buffer belong
    /// to it, anything after them starts the next request.
    Complete { request: Request, consumed: usize },
}

#[derive(Debug)]
struct Pending {
    request: Request,
    body_start: usize,
    body_len: usize,
}

/// Incremental request parser.
///
/// The caller keeps appending received bytes to one buffer and calls
/// [`advance`](Self::advance) with the whole buffer each time. The header
/// section is parsed once; after that only the body length is checked.
#[derive(Debug, Default)]
pub(crate) struct Parser {
    pending: Option<Pending>,
}

impl Parser {
    #[inline]
    pub(crate) fn new() -> Self {
        Parser { pending: None }
    }

    /// Whether the header section has been parsed and the body is being
    /// waited for.
    #[inline]
    pub(crate) fn has_head(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn advance(&mut self, buf: &[u8], limits: &ReqLimits) -> Result<Status, ErrorKind> {
        let known = self
            .pending
            .as_ref()
            .map(|pending| (pending.body_start, pending.body_len));

        let (body_start, body_len) = match known {
            Some(known) => known,
            None => {
                let Some(end) = memmem::find(buf, b"\r\n\r\n") else {
                    if buf.len() > limits.header_size {
                        return Err(ErrorKind::HeadersTooLarge(limits.header_size));
                    }
                    return Ok(Status::Partial);
                };
                if end > limits.header_size {
                    return Err(ErrorKind::HeadersTooLarge(limits.header_size));
                }

                let request = Request::from_head(&buf[..end])?;
                let body_len = request.body_len(limits)?;
                let body_start = end + 4;

                self.pending = Some(Pending {
                    request,
                    body_start,
                    body_len,
                });
                (body_start, body_len)
            }
        };

        let consumed = body_start + body_len;
        if buf.len() < consumed {
            return Ok(Status::Partial);
        }

        match self.pending.take() {
            Some(Pending { mut request, .. }) => {
                request.content = buf[body_start..consumed].to_vec();
                Ok(Status::Complete { request, consumed })
            }
            None => Ok(Status::Partial),
        }
    }
}
