//! Method and status code tables shared by the parser, router and writer

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// Request kinds the router dispatches on.
///
/// Any request carrying `Upgrade: websocket` becomes [`Method::WebSocket`],
/// whatever verb its request line used. Other verbs are kept as raw bytes in
/// [`Request::method_token`](crate::Request::method_token) and answered with
/// `501 Not Implemented`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`, served from static files or GET handlers
    Get,
    /// `POST`, the body is handed to the handler as content
    Post,
    /// Upgrade request, answered with the RFC 6455 handshake
    WebSocket,
}

impl Method {
    /// Maps a request-line verb. Matching is case-sensitive.
    #[inline(always)]
    pub(crate) const fn from_token(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::WebSocket => "WEBSOCKET",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])*
        $name:ident = ($num:literal, $str:literal);
    )+) => {
        /// HTTP status codes the server can answer with
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])*
            $name = $num,
        )+ }

        impl StatusCode {
            /// Numeric code followed by its reason phrase, e.g. `"404 Not Found"`.
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => concat!($num, " ", $str),
                )+ }
            }

            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }

            pub const fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $num => Some(StatusCode::$name), )+
                    _ => None,
                }
            }

            // e.g. `b"HTTP/1.1 200 OK\r\n"`
            #[inline]
            pub(crate) const fn status_line(&self) -> &'static [u8] {
                match self { $(
                    StatusCode::$name => concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes(),
                )+ }
            }

            /// Minimal HTML page naming the status, used as the body of
            /// code-only replies.
            #[inline]
            pub const fn canned_html(&self) -> &'static [u8] {
                match self { $(
                    StatusCode::$name => concat!(
                        "<!DOCTYPE html><html><head><title>", $num, " ", $str,
                        "</title></head><body><h1>", $num, " ", $str,
                        "</h1></body></html>"
                    ).as_bytes(),
                )+ }
            }
        }
    }
}

set_status_codes! {
    /// Handshake answer to a WebSocket upgrade
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    /// Sent by [`Connection::redirect`](crate::Connection::redirect)
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    /// No static file or handler matched the path
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    /// A teapot is still not a coffee pot
    ImaTeapot = (418, "I'm a teapot");
    UnprocessableEntity = (422, "Unprocessable Entity");
    UpgradeRequired = (426, "Upgrade Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    /// A handler returned an error
    InternalServerError = (500, "Internal Server Error");
    /// The request verb has no handler table
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    /// Every worker is busy and the pending queue is full
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>); 7] = [
            (b"0", Some(0)),
            (b"5", Some(5)),
            (b"3145728", Some(3_145_728)),
            (b"", None),
            (b"12a", None),
            (b"-1", None),
            (b"99999999999999999999999999", None),
        ];

        for (input, expected) in cases {
            assert_eq!(slice_to_usize(input), expected);
        }
    }

    #[test]
    fn methods() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<Method>); 5] = [
            (b"GET", Some(Method::Get)),
            (b"POST", Some(Method::Post)),
            (b"get", None),
            (b"PUT", None),
            (b"", None),
        ];

        for (input, expected) in cases {
            assert_eq!(Method::from_token(input), expected);
        }
    }

    #[test]
    fn status_lines() {
        assert_eq!(StatusCode::Ok.status_line(), b"HTTP/1.1 200 OK\r\n");
        assert_eq!(StatusCode::NotFound.reason(), "404 Not Found");
        assert_eq!(
            StatusCode::ServiceUnavailable.status_line(),
            b"HTTP/1.1 503 Service Unavailable\r\n"
        );
        assert_eq!(StatusCode::from_u16(501), Some(StatusCode::NotImplemented));
        assert_eq!(StatusCode::from_u16(299), None);
        assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    }

    #[test]
    fn canned_pages_name_the_status() {
        let page = std::str::from_utf8(StatusCode::NotFound.canned_html()).unwrap();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<h1>404 Not Found</h1>"));
    }
}
