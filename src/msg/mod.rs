//! CoAP message codec (RFC 7252 section 3).
//!
//! Wire layout:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Options are delta-encoded against the preceding option number. Delta and
//! length nibbles 13 and 14 extend into one (+13) or two (+269, big-endian)
//! extra bytes; nibble 15 is reserved and only legal as part of the 0xFF
//! payload marker.

pub mod option;
pub mod token;

use std::fmt;
use thiserror::Error;

pub use option::{
    content_format, option_def, register_option, OptionDef, OptionNumber, Options, ValueFormat,
};
pub use token::{
    CountingTokenGenerator, MessageIdGenerator, RandomTokenGenerator, Token, TokenGenerator,
    MAX_TOKEN_LEN,
};

/// Protocol version carried in the 2-bit Ver field. Always 1.
pub const VERSION: u8 = 1;

/// The payload marker byte separating options from payload.
pub const PAYLOAD_MARKER: u8 = 0xff;

const EXT_BYTE: usize = 13;
const EXT_BYTE_ADDEND: usize = 13;
const EXT_WORD: usize = 14;
const EXT_WORD_ADDEND: usize = 269;
const EXT_RESERVED: usize = 15;

/// Errors produced while decoding a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported CoAP version: {0}")]
    InvalidVersion(u8),

    #[error("invalid token length: {0}")]
    InvalidTokenLength(u8),

    #[error("reserved code class: {0}")]
    ReservedCodeClass(u8),

    #[error("truncated message")]
    Truncated,

    #[error("message format error: {0}")]
    Format(&'static str),

    #[error("critical option {number} with invalid length {len}")]
    CriticalOptionLength { number: u16, len: usize },
}

// ============================================================================
// Message Type and Code
// ============================================================================

/// The four CoAP message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Requires acknowledgement.
    Confirmable = 0,
    /// Fire and forget.
    NonConfirmable = 1,
    /// Acknowledges a Confirmable message.
    Acknowledgement = 2,
    /// Permanent negative acknowledgement.
    Reset = 3,
}

impl MsgType {
    /// Decode from the 2-bit T field (already masked).
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => MsgType::Confirmable,
            1 => MsgType::NonConfirmable,
            2 => MsgType::Acknowledgement,
            _ => MsgType::Reset,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::Confirmable => "CON",
            MsgType::NonConfirmable => "NON",
            MsgType::Acknowledgement => "ACK",
            MsgType::Reset => "RST",
        };
        write!(f, "{}", name)
    }
}

/// An 8-bit CoAP code: 3-bit class, 5-bit detail.
///
/// Class 0 holds the Empty code and the request methods, class 2 success
/// responses, classes 4 and 5 client and server errors. Classes 1, 6 and 7
/// are reserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    // Request methods
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    // Success responses
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    // Client errors
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const NOT_ACCEPTABLE: Code = Code::new(4, 6);
    pub const PRECONDITION_FAILED: Code = Code::new(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code::new(4, 15);

    // Server errors
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const BAD_GATEWAY: Code = Code::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);
    pub const GATEWAY_TIMEOUT: Code = Code::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Code = Code::new(5, 5);

    /// Build a code from class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Code((class << 5) | (detail & 0x1f))
    }

    /// First 3 bits, range 0-7.
    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    /// Last 5 bits, range 0-31.
    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Request methods live in class 0, detail 1-4.
    pub fn is_request(&self) -> bool {
        matches!(*self, Code::GET | Code::POST | Code::PUT | Code::DELETE)
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }

    /// Client (4.xx) or server (5.xx) error class.
    pub fn is_error(&self) -> bool {
        self.class() >= 4
    }

    /// Human-readable name for the well-known codes.
    pub fn name(&self) -> &'static str {
        match *self {
            Code::EMPTY => "Empty",
            Code::GET => "GET",
            Code::POST => "POST",
            Code::PUT => "PUT",
            Code::DELETE => "DELETE",
            Code::CREATED => "Created",
            Code::DELETED => "Deleted",
            Code::VALID => "Valid",
            Code::CHANGED => "Changed",
            Code::CONTENT => "Content",
            Code::BAD_REQUEST => "Bad Request",
            Code::UNAUTHORIZED => "Unauthorized",
            Code::BAD_OPTION => "Bad Option",
            Code::FORBIDDEN => "Forbidden",
            Code::NOT_FOUND => "Not Found",
            Code::METHOD_NOT_ALLOWED => "Method Not Allowed",
            Code::NOT_ACCEPTABLE => "Not Acceptable",
            Code::PRECONDITION_FAILED => "Precondition Failed",
            Code::REQUEST_ENTITY_TOO_LARGE => "Request Entity Too Large",
            Code::UNSUPPORTED_CONTENT_FORMAT => "Unsupported Content-Format",
            Code::INTERNAL_SERVER_ERROR => "Internal Server Error",
            Code::NOT_IMPLEMENTED => "Not Implemented",
            Code::BAD_GATEWAY => "Bad Gateway",
            Code::SERVICE_UNAVAILABLE => "Service Unavailable",
            Code::GATEWAY_TIMEOUT => "Gateway Timeout",
            Code::PROXYING_NOT_SUPPORTED => "Proxying Not Supported",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Code {
    /// `"2.05 Content"` — the dotted form followed by the name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} {}", self.class(), self.detail(), self.name())
    }
}

// ============================================================================
// Message
// ============================================================================

/// One CoAP message: the unit the codec encodes and the connection routes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MsgType,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    pub options: Options,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Self {
            msg_type: MsgType::Confirmable,
            code: Code::EMPTY,
            message_id: 0,
            token: Token::empty(),
            options: Options::new(),
            payload: Vec::new(),
        }
    }

    /// Bare acknowledgement: Empty code, no token, echoes `message_id`.
    pub fn ack(message_id: u16) -> Self {
        Self {
            msg_type: MsgType::Acknowledgement,
            code: Code::EMPTY,
            message_id,
            token: Token::empty(),
            options: Options::new(),
            payload: Vec::new(),
        }
    }

    /// Reset: rejects the message carrying `message_id`.
    pub fn rst(message_id: u16) -> Self {
        Self {
            msg_type: MsgType::Reset,
            code: Code::EMPTY,
            message_id,
            token: Token::empty(),
            options: Options::new(),
            payload: Vec::new(),
        }
    }

    pub fn is_confirmable(&self) -> bool {
        self.msg_type == MsgType::Confirmable
    }

    /// Replace the Uri-Path options from a `/`-separated path.
    /// Empty components are dropped.
    pub fn set_path(&mut self, path: &str) {
        self.options.remove(OptionNumber::URI_PATH);
        for part in path.split('/').filter(|p| !p.is_empty()) {
            self.options.add(OptionNumber::URI_PATH, part);
        }
    }

    /// The Uri-Path options joined with `/`.
    pub fn path_string(&self) -> String {
        self.options
            .get_all(OptionNumber::URI_PATH)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Replace the Uri-Query options from a raw `&`-separated query string.
    /// Empty components are dropped.
    pub fn set_query(&mut self, query: &str) {
        self.options.remove(OptionNumber::URI_QUERY);
        for part in query.split('&').filter(|q| !q.is_empty()) {
            self.options.add(OptionNumber::URI_QUERY, part);
        }
    }

    /// Encode to wire bytes. Total for any message honoring the invariants;
    /// an Empty code forces a bare 4-byte header regardless of other fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 8);

        let token = if self.code.is_empty() { &[] } else { self.token.as_bytes() };

        buf.push((VERSION << 6) | (self.msg_type.to_byte() << 4) | (token.len() as u8 & 0xf));
        buf.push(self.code.as_u8());
        buf.extend_from_slice(&self.message_id.to_be_bytes());
        buf.extend_from_slice(token);

        if self.code.is_empty() {
            return buf;
        }

        let mut prev = 0usize;
        for (number, value) in self.options.iter() {
            let delta = number.as_u16() as usize - prev;
            write_option_header(&mut buf, delta, value.len());
            buf.extend_from_slice(value);
            prev = number.as_u16() as usize;
        }

        if !self.payload.is_empty() {
            buf.push(PAYLOAD_MARKER);
            buf.extend_from_slice(&self.payload);
        }

        buf
    }

    /// Decode from wire bytes, rejecting everything RFC 7252 section 3 calls
    /// a message format error.
    pub fn from_bytes(data: &[u8]) -> Result<Message, MessageError> {
        if data.len() < 4 {
            return Err(MessageError::TooShort(data.len()));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(MessageError::InvalidVersion(version));
        }

        let msg_type = MsgType::from_bits(data[0] >> 4);
        let token_len = data[0] & 0xf;
        if token_len as usize > MAX_TOKEN_LEN {
            return Err(MessageError::InvalidTokenLength(token_len));
        }

        let code = Code(data[1]);
        if code.is_empty() && (token_len != 0 || data.len() != 4) {
            return Err(MessageError::Format(
                "empty code with token, options, or payload",
            ));
        }
        let class = code.class();
        if class == 1 || class == 6 || class == 7 {
            return Err(MessageError::ReservedCodeClass(class));
        }

        let message_id = u16::from_be_bytes([data[2], data[3]]);

        if data.len() < 4 + token_len as usize {
            return Err(MessageError::Truncated);
        }
        let token = Token::from(&data[4..4 + token_len as usize]);

        let mut msg = Message {
            msg_type,
            code,
            message_id,
            token,
            options: Options::new(),
            payload: Vec::new(),
        };
        parse_options(&mut msg, &data[4 + token_len as usize..])?;
        Ok(msg)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] id={} token={} options={} payload={}B",
            self.msg_type,
            self.code,
            self.message_id,
            self.token,
            self.options.len(),
            self.payload.len()
        )
    }
}

fn write_option_header(buf: &mut Vec<u8>, delta: usize, length: usize) {
    fn split(v: usize) -> (usize, Option<Vec<u8>>) {
        if v < EXT_BYTE_ADDEND {
            (v, None)
        } else if v < EXT_WORD_ADDEND {
            (EXT_BYTE, Some(vec![(v - EXT_BYTE_ADDEND) as u8]))
        } else {
            let ext = (v - EXT_WORD_ADDEND) as u16;
            (EXT_WORD, Some(ext.to_be_bytes().to_vec()))
        }
    }

    let (d, d_ext) = split(delta);
    let (l, l_ext) = split(length);
    buf.push(((d as u8) << 4) | l as u8);
    if let Some(ext) = d_ext {
        buf.extend_from_slice(&ext);
    }
    if let Some(ext) = l_ext {
        buf.extend_from_slice(&ext);
    }
}

fn parse_options(msg: &mut Message, mut b: &[u8]) -> Result<(), MessageError> {
    let mut prev = 0usize;

    while !b.is_empty() {
        if b[0] == PAYLOAD_MARKER {
            // A marker followed by a zero-length payload is a format error.
            if b.len() < 2 {
                return Err(MessageError::Format(
                    "payload marker followed by zero-length payload",
                ));
            }
            msg.payload = b[1..].to_vec();
            return Ok(());
        }

        let delta_nibble = (b[0] >> 4) as usize;
        let length_nibble = (b[0] & 0x0f) as usize;
        if delta_nibble == EXT_RESERVED || length_nibble == EXT_RESERVED {
            return Err(MessageError::Format("reserved option nibble 15"));
        }
        b = &b[1..];

        let delta = parse_ext(delta_nibble, &mut b)?;
        let length = parse_ext(length_nibble, &mut b)?;

        if b.len() < length {
            return Err(MessageError::Truncated);
        }
        let number = OptionNumber((prev + delta) as u16);
        let value = &b[..length];

        match option_def(number) {
            Some(def) if !def.length_ok(length) => {
                if number.is_critical() {
                    // MUST reject the message (RFC 7252 sections 5.4.1, 5.4.3)
                    return Err(MessageError::CriticalOptionLength {
                        number: number.as_u16(),
                        len: length,
                    });
                }
                // Elective options with illegal lengths are silently ignored.
            }
            _ => msg.options.add(number, value),
        }

        b = &b[length..];
        prev = number.as_u16() as usize;
    }
    Ok(())
}

fn parse_ext(nibble: usize, b: &mut &[u8]) -> Result<usize, MessageError> {
    match nibble {
        EXT_BYTE => {
            if b.is_empty() {
                return Err(MessageError::Truncated);
            }
            let v = b[0] as usize + EXT_BYTE_ADDEND;
            *b = &b[1..];
            Ok(v)
        }
        EXT_WORD => {
            if b.len() < 2 {
                return Err(MessageError::Truncated);
            }
            let v = u16::from_be_bytes([b[0], b[1]]) as usize + EXT_WORD_ADDEND;
            *b = &b[2..];
            Ok(v)
        }
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::option::uint_to_bytes;

    fn get_foo() -> Message {
        let mut msg = Message::new();
        msg.code = Code::GET;
        msg.message_id = 1;
        msg.token = Token::from(vec![0x01]);
        msg.set_path("foo");
        msg
    }

    #[test]
    fn code_class_and_detail() {
        assert_eq!(Code::CONTENT.as_u8(), 0x45);
        assert_eq!(Code::CONTENT.class(), 2);
        assert_eq!(Code::CONTENT.detail(), 5);
        assert_eq!(Code::CONTENT.to_string(), "2.05 Content");
        assert_eq!(Code::GET.to_string(), "0.01 GET");
        assert!(Code::CONTENT.is_success());
        assert!(Code::NOT_FOUND.is_error());
        assert!(Code::INTERNAL_SERVER_ERROR.is_error());
        assert!(!Code::CONTENT.is_error());
        assert!(Code::GET.is_request());
        assert!(!Code::EMPTY.is_request());
    }

    #[test]
    fn encode_get_with_path() {
        let bytes = get_foo().to_bytes();
        assert_eq!(
            bytes,
            vec![0x41, 0x01, 0x00, 0x01, 0x01, 0xb3, b'f', b'o', b'o']
        );
    }

    #[test]
    fn encode_empty_code_is_bare_header() {
        let ack = Message::ack(0x7a10);
        assert_eq!(ack.to_bytes(), vec![0x60, 0x00, 0x7a, 0x10]);

        let rst = Message::rst(3);
        assert_eq!(rst.to_bytes(), vec![0x70, 0x00, 0x00, 0x03]);

        // Empty code suppresses token and payload even if set
        let mut ping = Message::new();
        ping.message_id = 2;
        ping.token = Token::from(vec![9]);
        ping.payload = b"x".to_vec();
        assert_eq!(ping.to_bytes(), vec![0x40, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn decode_rejects_malformed_headers() {
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01]),
            Err(MessageError::TooShort(2))
        );
        // version 2
        assert_eq!(
            Message::from_bytes(&[0x80, 0x01, 0, 1]),
            Err(MessageError::InvalidVersion(2))
        );
        // token length 9
        assert_eq!(
            Message::from_bytes(&[0x49, 0x01, 0, 1]),
            Err(MessageError::InvalidTokenLength(9))
        );
        // empty code with token length 1
        assert_eq!(
            Message::from_bytes(&[0x41, 0x00, 0, 1, 0xaa]),
            Err(MessageError::Format(
                "empty code with token, options, or payload"
            ))
        );
        // empty code with trailing bytes
        assert!(Message::from_bytes(&[0x40, 0x00, 0, 1, 0xff, 0x61]).is_err());
        // reserved class 1
        assert_eq!(
            Message::from_bytes(&[0x40, 0x25, 0, 1]),
            Err(MessageError::ReservedCodeClass(1))
        );
        // declared token longer than the datagram
        assert_eq!(
            Message::from_bytes(&[0x42, 0x01, 0, 1, 0xaa]),
            Err(MessageError::Truncated)
        );
    }

    #[test]
    fn decode_rejects_malformed_options() {
        // delta nibble 15 that is not a payload marker
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0xf1, 0x61]),
            Err(MessageError::Format("reserved option nibble 15"))
        );
        // truncated extended delta
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0xd0]),
            Err(MessageError::Truncated)
        );
        // truncated extended length
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0x1e, 0x00]),
            Err(MessageError::Truncated)
        );
        // option value shorter than declared
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0xb3, b'f']),
            Err(MessageError::Truncated)
        );
        // payload marker with nothing after it
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0xb1, b'f', 0xff]),
            Err(MessageError::Format(
                "payload marker followed by zero-length payload"
            ))
        );
    }

    #[test]
    fn decode_option_length_policy() {
        // Uri-Host (3, critical) with zero-length value: reject the message
        assert_eq!(
            Message::from_bytes(&[0x40, 0x01, 0, 1, 0x30]),
            Err(MessageError::CriticalOptionLength { number: 3, len: 0 })
        );
        // ETag (4, elective) with zero-length value: drop the option, keep
        // the message, and keep using its number as the delta base
        let msg = Message::from_bytes(&[
            0x40, 0x01, 0, 1, // header
            0x40, // ETag, len 0 (illegal, elective -> dropped)
            0x73, b'f', b'o', b'o', // delta 7 from 4 -> Uri-Path(11)
        ])
        .unwrap();
        assert!(!msg.options.contains(OptionNumber::ETAG));
        assert_eq!(msg.path_string(), "foo");
    }

    #[test]
    fn extended_deltas_and_lengths_round_trip() {
        let mut msg = Message::new();
        msg.code = Code::GET;
        msg.message_id = 7;
        msg.token = Token::from(vec![0xab, 0xcd]);
        // Size1 = 60: first delta needs the one-byte extension (60-13 = 47)
        msg.options.add_uint(OptionNumber::SIZE1, 1024);
        // a large vendor number forces the two-byte delta extension
        register_option(OptionDef {
            number: OptionNumber(3000),
            format: ValueFormat::Opaque,
            min_length: 0,
            max_length: 1024,
            repeatable: false,
        });
        msg.options.add(OptionNumber(3000), vec![0u8; 300]);
        msg.payload = b"payload".to_vec();

        let bytes = msg.to_bytes();
        // Size1 header: delta nibble 13, ext byte 47
        assert_eq!(bytes[6], 0xd2);
        assert_eq!(bytes[7], 47);

        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn repeated_options_keep_order() {
        let mut msg = Message::new();
        msg.code = Code::GET;
        msg.message_id = 3;
        msg.token = Token::from(vec![1]);
        msg.set_path("a/b/c");
        msg.set_query("x=1&y=2");

        let decoded = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.path_string(), "a/b/c");
        let queries: Vec<_> = decoded
            .options
            .get_all(OptionNumber::URI_QUERY)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        assert_eq!(queries, vec!["x=1", "y=2"]);
    }

    #[test]
    fn path_split_drops_empty_components() {
        let mut msg = Message::new();
        msg.set_path("/foo//bar/");
        assert_eq!(msg.path_string(), "foo/bar");
        msg.set_query("a=1&&b=2&");
        assert_eq!(msg.options.get_all(OptionNumber::URI_QUERY).len(), 2);
    }

    #[test]
    fn wire_bytes_round_trip() {
        // decode(encode(m)) == m for a message using most features
        let mut msg = Message::new();
        msg.msg_type = MsgType::Acknowledgement;
        msg.code = Code::CONTENT;
        msg.message_id = 0xbeef;
        msg.token = Token::from(vec![1, 2, 3, 4]);
        msg.options.add_uint(OptionNumber::OBSERVE, 12);
        msg.options.set_uint(OptionNumber::CONTENT_FORMAT, 50);
        msg.options.set_uint(OptionNumber::MAX_AGE, 60);
        msg.payload = b"22.5 C".to_vec();

        let bytes = msg.to_bytes();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);

        // encode(decode(b)) == b for canonically encoded bytes
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn observe_uint_zero_is_empty_value() {
        let mut msg = Message::new();
        msg.code = Code::GET;
        msg.message_id = 1;
        msg.token = Token::from(vec![0xaa]);
        msg.options.set_uint(OptionNumber::OBSERVE, 0);

        let bytes = msg.to_bytes();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.options.get_uint(OptionNumber::OBSERVE), Some(0));
        assert_eq!(decoded.options.get(OptionNumber::OBSERVE), Some(&[][..]));
        assert_eq!(uint_to_bytes(0).len(), 0);
    }
}
