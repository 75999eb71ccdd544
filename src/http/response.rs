//! Response header model and its wire serialization

use crate::{http::types::StatusCode, limits::RespLimits, BodyWriter, WriteBuffer};
use std::io::{self, Read};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// Everything a handler can shape about its reply.
///
/// A fresh header is handed to every handler call, pre-filled from
/// [`RespLimits`]. The router writes it once the handler returns `Ok`,
/// unless the handler already answered through the
/// [`Connection`](crate::Connection).
///
/// # Serialization
///
/// Lines are always written in this order:
///
/// ```text
/// HTTP/1.1 [CODE] [REASON]\r\n
/// Server: [server_name]\r\n
/// Accept-Ranges: bytes\r\n
/// Content-Length: [body length]\r\n
/// Connection: [connection]\r\n
/// Keep-Alive: [keep_alive]\r\n
/// Content-Type: [content_type]\r\n
/// [additional line]\r\n          (zero or more, in insertion order)
/// \r\n
/// [body]
/// ```
///
/// # Examples
/// ```
/// use nova_http::{limits::RespLimits, ResponseHeader, StatusCode};
///
/// let mut header = ResponseHeader::new(&RespLimits::default());
/// header
///     .status(StatusCode::Created)
///     .content_type("application/json")
///     .header("Cache-Control", "no-store")
///     .body(r#"{"id":7}"#);
///
/// assert_eq!(header.status_code(), StatusCode::Created);
/// assert_eq!(header.reply_body(), br#"{"id":7}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    status: StatusCode,
    content_type: Vec<u8>,
    connection: Vec<u8>,
    keep_alive: Vec<u8>,
    additional_lines: Vec<Vec<u8>>,
    body: Vec<u8>,
}

impl ResponseHeader {
    pub fn new(limits: &RespLimits) -> Self {
        Self {
            status: StatusCode::Ok,
            content_type: limits.default_content_type.as_bytes().to_vec(),
            connection: b"keep-alive".to_vec(),
            keep_alive: limits.keep_alive_params.as_bytes().to_vec(),
            additional_lines: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Builds a code-only reply: the status, `text/html` and a small page
    /// naming the status as body.
    pub fn just_code(limits: &RespLimits, status: StatusCode) -> Self {
        let mut header = Self::new(limits);
        header
            .status(status)
            .content_type("text/html")
            .body(status.canned_html());
        header
    }
}

// Builder
impl ResponseHeader {
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn content_type<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.content_type.clear();
        value.write_to(&mut self.content_type);
        self
    }

    /// Sets the `Connection:` value. `close` ends the connection after this
    /// response is written.
    #[inline]
    pub fn connection<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.connection.clear();
        value.write_to(&mut self.connection);
        self
    }

    #[inline]
    pub fn keep_alive<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
        self.keep_alive.clear();
        value.write_to(&mut self.keep_alive);
        self
    }

    /// Appends a `Name: value` line after the fixed header lines.
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        let mut line = Vec::new();
        name.write_to(&mut line);
        line.extend_from_slice(b": ");
        value.write_to(&mut line);
        self.additional_lines.push(line);
        self
    }

    /// Appends a raw line, written verbatim followed by CRLF.
    pub fn header_line<T: WriteBuffer>(&mut self, line: T) -> &mut Self {
        let mut raw = Vec::new();
        line.write_to(&mut raw);
        self.additional_lines.push(raw);
        self
    }

    /// Replaces the body.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.body.clear();
        data.write_to(&mut self.body);
        self
    }

    /// Replaces the body with whatever `f` writes.
    ///
    /// # Examples
    /// ```
    /// use nova_http::{limits::RespLimits, ResponseHeader};
    /// use std::io::Write;
    ///
    /// let mut header = ResponseHeader::new(&RespLimits::default());
    /// header.body_with(|w| {
    ///     w.write("total: ");
    ///     write!(w, "{}", 6 * 7).unwrap();
    /// });
    ///
    /// assert_eq!(header.reply_body(), b"total: 42");
    /// ```
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self
    }

    /// Compresses the current body with brotli and appends
    /// `Content-Encoding: br`.
    pub fn compress_brotli(&mut self) -> io::Result<&mut Self> {
        let mut compressed = Vec::with_capacity(self.body.len() / 2 + 16);
        brotli::CompressorReader::new(
            self.body.as_slice(),
            BROTLI_BUFFER,
            BROTLI_QUALITY,
            BROTLI_WINDOW,
        )
        .read_to_end(&mut compressed)?;

        self.body = compressed;
        self.additional_lines.push(b"Content-Encoding: br".to_vec());
        Ok(self)
    }
}

// Accessors
impl ResponseHeader {
    #[inline]
    pub const fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn content_type_value(&self) -> &[u8] {
        &self.content_type
    }

    #[inline]
    pub fn connection_value(&self) -> &[u8] {
        &self.connection
    }

    #[inline]
    pub fn additional_lines(&self) -> &[Vec<u8>] {
        &self.additional_lines
    }

    #[inline]
    pub fn reply_body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub(crate) fn wants_close(&self) -> bool {
        self.connection.eq_ignore_ascii_case(b"close")
    }
}

// Wire format
impl ResponseHeader {
    pub(crate) fn write_to(&self, limits: &RespLimits, out: &mut Vec<u8>) {
        out.reserve(limits.default_capacity.max(self.body.len() + 256));

        out.extend_from_slice(self.status.status_line());
        line(out, b"Server: ", limits.server_name.as_bytes());
        out.extend_from_slice(b"Accept-Ranges: bytes\r\n");

        out.extend_from_slice(b"Content-Length: ");
        self.body.len().write_to(out);
        out.extend_from_slice(b"\r\n");

        line(out, b"Connection: ", &self.connection);
        line(out, b"Keep-Alive: ", &self.keep_alive);
        line(out, b"Content-Type: ", &self.content_type);

        for extra in &self.additional_lines {
            out.extend_from_slice(extra);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }

    /// Serializes the full response, body included.
    pub fn to_bytes(&self, limits: &RespLimits) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(limits, &mut out);
        out
    }
}

#[inline(always)]
fn line(out: &mut Vec<u8>, name: &[u8], value: &[u8]) {
    out.extend_from_slice(name);
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// Fixed `301 Moved Permanently` pointing at `to`.
pub(crate) fn redirect(to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(80 + to.len());
    out.extend_from_slice(StatusCode::MovedPermanently.status_line());
    line(&mut out, b"Location: ", to);
    out.extend_from_slice(b"Content-Length: 0\r\n\r\n");
    out
}

pub mod write {
    use std::{borrow::Cow, sync::Arc};

    /// Writer for building a body piece by piece.
    /// Used in [`body_with`](super::ResponseHeader::body_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into header values and bodies.
    ///
    /// Implemented for strings, byte containers, integers, `bool` and
    /// `char`. Floats are left out on purpose; format them yourself.
    ///
    /// # Example
    /// ```
    /// use nova_http::WriteBuffer;
    ///
    /// struct Celsius(i32);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice(" °C".as_bytes());
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (str => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &str = self.as_ref();
                    buffer.extend_from_slice(value.as_bytes());
                }
            })*
        };
        (bytes => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &[u8] = self.as_ref();
                    buffer.extend_from_slice(value);
                }
            })*
        };
        (unsigned => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    write_u128(*self as u128, buffer);
                }
            })*
        };
        (signed => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    if *self < 0 {
                        buffer.push(b'-');
                    }
                    write_u128(self.unsigned_abs() as u128, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }

    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl_write_buffer!(str => String, Box<str>, Cow<'_, str>, Arc<str>);
    impl_write_buffer!(bytes => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>);
    impl_write_buffer!(unsigned => u8, u16, u32, u64, u128, usize);
    impl_write_buffer!(signed => i8, i16, i32, i64, i128, isize);

    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(if *self { b"true" } else { b"false" });
        }
    }

    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    fn write_u128(mut n: u128, buffer: &mut Vec<u8>) {
        let mut digits = [0u8; 39];
        let mut i = digits.len();

        loop {
            i -= 1;
            digits[i] = b'0' + (n % 10) as u8;
            n /= 10;
            if n == 0 {
                break;
            }
        }

        buffer.extend_from_slice(&digits[i..]);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn fixed_line_order() {
        let limits = RespLimits::default();
        let mut header = ResponseHeader::new(&limits);
        header.body("hi");

        assert_eq!(
            text(&header.to_bytes(&limits)),
            "HTTP/1.1 200 OK\r\n\
             Server: Nova\r\n\
             Accept-Ranges: bytes\r\n\
             Content-Length: 2\r\n\
             Connection: keep-alive\r\n\
             Keep-Alive: timeout=30, max=100\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             hi"
        );
    }

    #[test]
    fn additional_lines_follow_content_type() {
        let limits = RespLimits {
            server_name: String::from("Test/1.0"),
            ..RespLimits::default()
        };
        let mut header = ResponseHeader::new(&limits);
        header
            .status(StatusCode::NotFound)
            .content_type("text/plain")
            .header("X-One", 1)
            .header_line("X-Two: two")
            .body(b"");

        assert_eq!(
            text(&header.to_bytes(&limits)),
            "HTTP/1.1 404 Not Found\r\n\
             Server: Test/1.0\r\n\
             Accept-Ranges: bytes\r\n\
             Content-Length: 0\r\n\
             Connection: keep-alive\r\n\
             Keep-Alive: timeout=30, max=100\r\n\
             Content-Type: text/plain\r\n\
             X-One: 1\r\n\
             X-Two: two\r\n\
             \r\n"
        );
    }

    #[test]
    fn content_length_counts_bytes() {
        let limits = RespLimits::default();

        #[rustfmt::skip]
        let cases: [(&str, &str); 4] = [
            ("", "Content-Length: 0\r\n"),
            ("hello", "Content-Length: 5\r\n"),
            ("привет", "Content-Length: 12\r\n"),
            ("0123456789", "Content-Length: 10\r\n"),
        ];

        for (body, expected) in cases {
            let mut header = ResponseHeader::new(&limits);
            header.body(body);
            assert!(text(&header.to_bytes(&limits)).contains(expected), "{body:?}");
        }
    }

    #[test]
    fn just_code() {
        let limits = RespLimits {
            default_content_type: String::from("application/json"),
            ..RespLimits::default()
        };
        let header = ResponseHeader::just_code(&limits, StatusCode::NotImplemented);

        assert_eq!(header.status_code(), StatusCode::NotImplemented);
        assert_eq!(header.content_type_value(), b"text/html");
        assert_eq!(header.reply_body(), StatusCode::NotImplemented.canned_html());

        let wire = header.to_bytes(&limits);
        assert!(wire.starts_with(b"HTTP/1.1 501 Not Implemented\r\n"));
        assert!(wire.ends_with(StatusCode::NotImplemented.canned_html()));
    }

    #[test]
    fn connection_close() {
        let limits = RespLimits::default();
        let mut header = ResponseHeader::new(&limits);
        assert!(!header.wants_close());

        header.connection("Close");
        assert!(header.wants_close());
        assert!(text(&header.to_bytes(&limits)).contains("\r\nConnection: Close\r\n"));
    }

    #[test]
    fn brotli_round_trip() {
        let limits = RespLimits::default();
        let body = "hello hello hello hello hello hello hello hello".repeat(20);

        let mut header = ResponseHeader::new(&limits);
        header.body(&body).compress_brotli().unwrap();

        assert_eq!(header.additional_lines(), [b"Content-Encoding: br".to_vec()]);
        assert!(header.reply_body().len() < body.len());

        let mut plain = Vec::new();
        brotli::Decompressor::new(header.reply_body(), 4096)
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, body.as_bytes());

        let wire = text_lossy(&header.to_bytes(&limits));
        let length = format!("Content-Length: {}\r\n", header.reply_body().len());
        assert!(wire.contains(&length));
        assert!(wire.contains("Content-Type: text/html\r\nContent-Encoding: br\r\n\r\n"));
    }

    fn text_lossy(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn redirect_is_bodyless() {
        assert_eq!(
            text(&redirect(b"/login")),
            "HTTP/1.1 301 Moved Permanently\r\nLocation: /login\r\nContent-Length: 0\r\n\r\n"
        );
    }

    fn written<T: WriteBuffer>(value: T) -> String {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn write_buffer_values() {
        assert_eq!(written(0u8), "0");
        assert_eq!(written(1234usize), "1234");
        assert_eq!(written(-56i32), "-56");
        assert_eq!(written(i64::MIN), "-9223372036854775808");
        assert_eq!(written(u128::MAX), "340282366920938463463374607431768211455");
        assert_eq!(written(true), "true");
        assert_eq!(written('ж'), "ж");
        assert_eq!(written(String::from("s")), "s");
        assert_eq!(written(&b"raw"[..]), "raw");
    }
}
