//! RFC 6455 opening handshake and frame codec
//!
//! Frames written by the server are always final (`FIN` set) and never
//! masked. Frames read from clients are unmasked when the `MASK` bit is set.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::{errors::ErrorKind, http::types::StatusCode};
use base64::Engine;
use sha1::{Digest, Sha1};

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// First byte of a final close frame. Treated as "peer is closing" without
/// decoding the rest.
const CLOSE_FIN: u8 = 0x88;

/// Frame opcode, the low four bits of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// 0x3-0x7 and 0xB-0xF, kept so every frame round-trips
    Reserved(u8),
}

impl Opcode {
    /// Only the low four bits of `bits` are used.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(bits) => bits & 0x0F,
        }
    }

    pub const fn is_control(self) -> bool {
        self.bits() & 0x08 != 0
    }
}

/// A decoded frame. `payload` is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    #[inline]
    pub fn payload_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.payload).ok()
    }
}

/// Result of [`decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame and the number of input bytes it occupied.
    Frame { frame: Frame, consumed: usize },
    /// The input ends inside a frame.
    Incomplete,
    /// Empty input or a final close frame.
    Close,
}

/// Header fields of a frame whose header bytes are all present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHead {
    pub(crate) fin: bool,
    pub(crate) opcode: Opcode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload_len: u64,
    pub(crate) header_len: usize,
}

impl FrameHead {
    /// `None` while the header itself is still incomplete.
    pub(crate) fn parse(buf: &[u8]) -> Option<Self> {
        let (&first, rest) = buf.split_first()?;
        let &second = rest.first()?;

        let (payload_len, mut offset) = match second & 0x7F {
            126 => {
                let ext = buf.get(2..4)?;
                (u16::from_be_bytes([ext[0], ext[1]]) as u64, 4)
            }
            127 => {
                let mut ext = [0u8; 8];
                ext.copy_from_slice(buf.get(2..10)?);
                (u64::from_be_bytes(ext), 10)
            }
            len => (len as u64, 2),
        };

        let mask = match second & 0x80 {
            0 => None,
            _ => {
                let key = buf.get(offset..offset + 4)?;
                offset += 4;
                Some([key[0], key[1], key[2], key[3]])
            }
        };

        Some(FrameHead {
            fin: first & 0x80 != 0,
            opcode: Opcode::from_bits(first),
            mask,
            payload_len,
            header_len: offset,
        })
    }
}

/// Decodes the first frame in `buf`.
///
/// # Errors
///
/// [`ErrorKind::FrameTooLarge`] when the declared length does not fit in
/// memory on this platform.
pub fn decode_frame(buf: &[u8]) -> Result<Decoded, ErrorKind> {
    match buf.first() {
        None | Some(&CLOSE_FIN) => return Ok(Decoded::Close),
        Some(_) => {}
    }

    let Some(head) = FrameHead::parse(buf) else {
        return Ok(Decoded::Incomplete);
    };

    let end = usize::try_from(head.payload_len)
        .ok()
        .and_then(|len| head.header_len.checked_add(len))
        .ok_or(ErrorKind::FrameTooLarge(head.payload_len))?;

    let Some(payload) = buf.get(head.header_len..end) else {
        return Ok(Decoded::Incomplete);
    };

    let mut payload = payload.to_vec();
    if let Some(key) = head.mask {
        apply_mask(&mut payload, key);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin: head.fin,
            opcode: head.opcode,
            mask: head.mask,
            payload,
        },
        consumed: end,
    })
}

/// Encodes a final, unmasked frame using the shortest length form.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 10);

    out.push(0x80 | opcode.bits());
    match len {
        0..=125 => out.push(len as u8),
        126..=0xFFFF => {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(payload);

    out
}

/// XORs `payload` with `key` in place. Applying it twice restores the input.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Full `101 Switching Protocols` answer to an upgrade request.
pub(crate) fn handshake_response(key: &[u8]) -> Vec<u8> {
    let accept = accept_key(key);

    let mut out = Vec::with_capacity(160);
    out.extend_from_slice(StatusCode::SwitchingProtocols.status_line());
    out.extend_from_slice(b"Upgrade: websocket\r\n");
    out.extend_from_slice(b"Connection: Upgrade\r\n");
    out.extend_from_slice(b"Sec-WebSocket-Accept: ");
    out.extend_from_slice(accept.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(buf: &[u8]) -> (Frame, usize) {
        match decode_frame(buf).unwrap() {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    fn client_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut frame = encode_frame(opcode, payload);
        let header_len = frame.len() - payload.len();
        frame[1] |= 0x80;

        let mut masked = payload.to_vec();
        apply_mask(&mut masked, key);

        frame.truncate(header_len);
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&masked);
        frame
    }

    #[test]
    fn rfc_accept_key() {
        assert_eq!(
            accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn handshake() {
        let response = handshake_response(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(
            std::str::from_utf8(&response).unwrap(),
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
    }

    #[test]
    fn length_forms() {
        #[rustfmt::skip]
        let cases: [(usize, &[u8]); 6] = [
            (0,       &[0x81, 0]),
            (125,     &[0x81, 125]),
            (126,     &[0x81, 126, 0x00, 0x7E]),
            (65535,   &[0x81, 126, 0xFF, 0xFF]),
            (65536,   &[0x81, 127, 0, 0, 0, 0, 0, 1, 0, 0]),
            (70000,   &[0x81, 127, 0, 0, 0, 0, 0, 1, 0x11, 0x70]),
        ];

        for (len, header) in cases {
            let payload = vec![b'x'; len];
            let frame = encode_frame(Opcode::Text, &payload);

            assert_eq!(&frame[..header.len()], header, "len {len}");
            assert_eq!(frame.len(), header.len() + len);
        }
    }

    #[test]
    fn round_trip() {
        let payloads: [&[u8]; 4] = [b"", b"hello", &[0u8; 126], &[7u8; 65536]];

        for bits in (0u8..16).filter(|&bits| bits != 0x8) {
            let opcode = Opcode::from_bits(bits);
            for payload in payloads {
                let encoded = encode_frame(opcode, payload);
                let (frame, consumed) = decoded(&encoded);

                assert_eq!(frame.opcode, opcode);
                assert_eq!(frame.payload, payload);
                assert!(frame.fin);
                assert_eq!(frame.mask, None);
                assert_eq!(consumed, encoded.len());
            }
        }
    }

    #[test]
    fn server_close_frame_reads_as_close() {
        let encoded = encode_frame(Opcode::Close, b"\x03\xe8");
        assert_eq!(decode_frame(&encoded).unwrap(), Decoded::Close);
        assert_eq!(decode_frame(b"").unwrap(), Decoded::Close);
    }

    #[test]
    fn masked_client_frames() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let buf = client_frame(Opcode::Text, b"Hello", key);
        assert_eq!(buf, [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]);

        let (frame, consumed) = decoded(&buf);
        assert_eq!(frame.payload_str(), Some("Hello"));
        assert_eq!(frame.mask, Some(key));
        assert_eq!(consumed, buf.len());

        let big = vec![0xAB; 300];
        let (frame, _) = decoded(&client_frame(Opcode::Binary, &big, key));
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(frame.payload, big);
    }

    #[test]
    fn mask_is_self_inverse() {
        let original: Vec<u8> = (0..=255).collect();
        let key = [1, 2, 3, 4];

        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn truncated_input_needs_more() {
        let buf = client_frame(Opcode::Text, &[b'z'; 200], [9, 8, 7, 6]);

        for end in 1..buf.len() {
            assert_eq!(decode_frame(&buf[..end]).unwrap(), Decoded::Incomplete, "cut at {end}");
        }
        assert!(matches!(decode_frame(&buf).unwrap(), Decoded::Frame { .. }));
    }

    #[test]
    fn overflowing_lengths_are_rejected() {
        let max = u64::MAX.to_be_bytes();
        let near_max = (u64::MAX - 3).to_be_bytes();

        let mut plain = vec![0x82, 127];
        plain.extend_from_slice(&max);

        let mut masked = vec![0x82, 0x80 | 127];
        masked.extend_from_slice(&near_max);
        masked.extend_from_slice(&[1, 2, 3, 4, 0xAA]);

        #[rustfmt::skip]
        let cases = [
            (plain.clone(),               u64::MAX),
            ([plain, vec![1]].concat(),   u64::MAX),
            (masked,                      u64::MAX - 3),
        ];

        for (buf, declared) in cases {
            assert!(
                matches!(decode_frame(&buf), Err(ErrorKind::FrameTooLarge(len)) if len == declared),
                "{buf:02x?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_left() {
        let mut buf = encode_frame(Opcode::Text, b"one");
        buf.extend_from_slice(&encode_frame(Opcode::Text, b"two"));

        let (first, consumed) = decoded(&buf);
        assert_eq!(first.payload, b"one");
        let (second, _) = decoded(&buf[consumed..]);
        assert_eq!(second.payload, b"two");
    }

    #[test]
    fn opcodes() {
        #[rustfmt::skip]
        let cases = [
            (0x0, Opcode::Continuation, false),
            (0x1, Opcode::Text,         false),
            (0x2, Opcode::Binary,       false),
            (0x8, Opcode::Close,        true),
            (0x9, Opcode::Ping,         true),
            (0xA, Opcode::Pong,         true),
            (0x3, Opcode::Reserved(3),  false),
            (0xF, Opcode::Reserved(15), true),
        ];

        for (bits, opcode, control) in cases {
            assert_eq!(Opcode::from_bits(bits), opcode);
            assert_eq!(opcode.bits(), bits);
            assert_eq!(opcode.is_control(), control);
        }
    }
}
