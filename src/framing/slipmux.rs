//! SLIP (RFC 1055) and SlipMux (draft-bormann-t2trg-slipmux) framing.
//!
//! SlipMux multiplexes frame types over one SLIP byte stream. The first
//! byte after the frame delimiter selects the type: 0x0A starts a UTF-8
//! diagnostic message, 0xA9 a CoAP configuration message protected by an
//! FCS-16 checksum. The reader surfaces only CoAP frames; diagnostics are
//! logged and everything else is dropped.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{FramingError, Packet};

/// Frame delimiter.
const END: u8 = 0xc0;
/// Escape byte.
const ESC: u8 = 0xdb;
/// Escaped END.
const ESC_END: u8 = 0xdc;
/// Escaped ESC.
const ESC_ESC: u8 = 0xdd;

/// Start byte of a diagnostic frame.
const FRAME_DIAGNOSTIC: u8 = 0x0a;
/// Start byte of a CoAP configuration message.
const FRAME_COAP: u8 = 0xa9;

/// Frames larger than this are dropped; CoAP messages on a serial link stay
/// far below it.
const MAX_FRAME_LEN: usize = 8192;

/// FCS-16 (RFC 1662 appendix C) without the final complement.
fn crc16(data: &[u8]) -> u16 {
    let mut fcs: u16 = 0xffff;
    for &b in data {
        fcs ^= u16::from(b);
        for _ in 0..8 {
            fcs = if fcs & 1 != 0 { (fcs >> 1) ^ 0x8408 } else { fcs >> 1 };
        }
    }
    fcs
}

/// The FCS-16 value transmitted after a configuration frame, little-endian.
fn fcs16(data: &[u8]) -> u16 {
    !crc16(data)
}

/// A frame including its trailing FCS checks out when the running CRC lands
/// on the good-FCS residual.
fn check_fcs(data_with_fcs: &[u8]) -> bool {
    data_with_fcs.len() >= 2 && crc16(data_with_fcs) == 0xf0b8
}

/// Reads SlipMux frames from a byte stream, yielding CoAP payloads.
pub struct SlipmuxReader {
    stream: Box<dyn AsyncRead + Send + Unpin>,
    /// Raw bytes read from the stream but not yet consumed.
    pending: Vec<u8>,
    pending_pos: usize,
    /// The de-escaped frame being accumulated.
    frame: Vec<u8>,
    in_escape: bool,
    /// Set while discarding an oversized frame.
    discarding: bool,
}

impl SlipmuxReader {
    pub fn new(stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            stream: Box::new(stream),
            pending: Vec::new(),
            pending_pos: 0,
            frame: Vec::new(),
            in_escape: false,
            discarding: false,
        }
    }

    /// Read until a complete CoAP frame is decoded.
    ///
    /// Diagnostic frames are logged at debug level, frames with a bad
    /// checksum or unknown type are dropped with a warning; neither ends
    /// the stream. `is_prefix` is always false: frames are buffered whole.
    pub async fn read_packet(&mut self) -> Result<Packet, FramingError> {
        loop {
            if let Some(payload) = self.take_frame() {
                return Ok((payload, false));
            }

            let mut buf = [0u8; 1024];
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(FramingError::Closed);
            }
            self.pending.truncate(0);
            self.pending.extend_from_slice(&buf[..n]);
            self.pending_pos = 0;
        }
    }

    /// Consume pending bytes until a frame completes. Returns the payload of
    /// a valid CoAP frame, or None when more input is needed.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        while self.pending_pos < self.pending.len() {
            let byte = self.pending[self.pending_pos];
            self.pending_pos += 1;

            if byte == END {
                let frame = std::mem::take(&mut self.frame);
                self.in_escape = false;
                let discarded = std::mem::take(&mut self.discarding);
                if discarded || frame.is_empty() {
                    // SLIP idle between frames, or the tail of a dropped one.
                    continue;
                }
                if let Some(payload) = self.finish_frame(frame) {
                    return Some(payload);
                }
                continue;
            }

            if self.discarding {
                continue;
            }

            let decoded = if self.in_escape {
                self.in_escape = false;
                match byte {
                    ESC_END => END,
                    ESC_ESC => ESC,
                    other => {
                        warn!(byte = other, "bad SLIP escape sequence, dropping frame");
                        self.frame.clear();
                        self.discarding = true;
                        continue;
                    }
                }
            } else if byte == ESC {
                self.in_escape = true;
                continue;
            } else {
                byte
            };

            if self.frame.len() >= MAX_FRAME_LEN {
                warn!(max = MAX_FRAME_LEN, "oversized SlipMux frame, dropping");
                self.frame.clear();
                self.discarding = true;
                continue;
            }
            self.frame.push(decoded);
        }
        None
    }

    fn finish_frame(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        match frame[0] {
            FRAME_DIAGNOSTIC => {
                let text = String::from_utf8_lossy(&frame[1..]);
                debug!(message = %text.trim(), "SlipMux diagnostic");
                None
            }
            FRAME_COAP => {
                if !check_fcs(&frame) {
                    warn!(len = frame.len(), "SlipMux frame with bad checksum, dropping");
                    return None;
                }
                Some(frame[1..frame.len() - 2].to_vec())
            }
            other => {
                debug!(frame_type = other, len = frame.len(), "unknown SlipMux frame, dropping");
                None
            }
        }
    }
}

/// Writes CoAP payloads as SlipMux configuration frames.
pub struct SlipmuxWriter {
    stream: Box<dyn AsyncWrite + Send + Unpin>,
}

impl SlipmuxWriter {
    pub fn new(stream: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            stream: Box::new(stream),
        }
    }

    /// Frame and send one CoAP message.
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), FramingError> {
        let mut body = Vec::with_capacity(packet.len() + 3);
        body.push(FRAME_COAP);
        body.extend_from_slice(packet);
        let fcs = fcs16(&body);
        body.extend_from_slice(&fcs.to_le_bytes());

        let mut encoded = Vec::with_capacity(body.len() + 8);
        encoded.push(END);
        for &b in &body {
            match b {
                END => encoded.extend_from_slice(&[ESC, ESC_END]),
                ESC => encoded.extend_from_slice(&[ESC, ESC_ESC]),
                other => encoded.push(other),
            }
        }
        encoded.push(END);

        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn fcs_reference_values() {
        // X.25 check value
        assert_eq!(fcs16(b"123456789"), 0x906e);
        // an empty CoAP GET (header only) behind the 0xA9 type byte
        assert_eq!(fcs16(&[0xa9, 0x40, 0x01, 0x00, 0x00]), 0x38bc);
        let mut framed = vec![0xa9, 0x40, 0x01, 0x00, 0x00];
        framed.extend_from_slice(&0x38bcu16.to_le_bytes());
        assert!(check_fcs(&framed));
        framed[1] ^= 0x01;
        assert!(!check_fcs(&framed));
    }

    #[tokio::test]
    async fn writer_emits_known_encoding() {
        let (a, mut b) = duplex(256);
        let mut writer = SlipmuxWriter::new(a);
        writer.write_packet(&[0x40, 0x01, 0x00, 0x00]).await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut out = vec![0u8; 16];
        let n = b.read(&mut out).await.unwrap();
        assert_eq!(
            &out[..n],
            &[0xc0, 0xa9, 0x40, 0x01, 0x00, 0x00, 0xbc, 0x38, 0xc0]
        );
    }

    #[tokio::test]
    async fn round_trip_with_escapes() {
        let (a, b) = duplex(4096);
        let mut writer = SlipmuxWriter::new(a);
        let mut reader = SlipmuxReader::new(b);

        // payload containing both special bytes
        let payload = vec![0x40, 0x01, 0x00, 0x2a, 0xc0, 0xdb, 0xc0, 0xdb];
        writer.write_packet(&payload).await.unwrap();

        let (got, is_prefix) = reader.read_packet().await.unwrap();
        assert!(!is_prefix);
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn diagnostics_and_idle_are_skipped() {
        let (mut a, b) = duplex(4096);
        let mut reader = SlipmuxReader::new(b);

        use tokio::io::AsyncWriteExt;
        // idle ENDs, a diagnostic frame, then a CoAP frame
        let mut stream = vec![0xc0, 0xc0];
        stream.extend_from_slice(&[0xc0, 0x0a]);
        stream.extend_from_slice(b"hello");
        stream.push(0xc0);
        stream.extend_from_slice(&[0xc0, 0xa9, 0x40, 0x01, 0x00, 0x00, 0xbc, 0x38, 0xc0]);
        a.write_all(&stream).await.unwrap();

        let (got, _) = reader.read_packet().await.unwrap();
        assert_eq!(got, vec![0x40, 0x01, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn bad_checksum_is_dropped_not_fatal() {
        let (mut a, b) = duplex(4096);
        let mut reader = SlipmuxReader::new(b);

        use tokio::io::AsyncWriteExt;
        let mut stream = vec![0xc0, 0xa9, 0x40, 0x01, 0x00, 0x00, 0x00, 0x00, 0xc0];
        stream.extend_from_slice(&[0xc0, 0xa9, 0x40, 0x01, 0x00, 0x00, 0xbc, 0x38, 0xc0]);
        a.write_all(&stream).await.unwrap();

        let (got, _) = reader.read_packet().await.unwrap();
        assert_eq!(got, vec![0x40, 0x01, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let (mut a, b) = duplex(4096);
        let mut reader = SlipmuxReader::new(b);

        use tokio::io::AsyncWriteExt;
        let encoded = [0xc0, 0xa9, 0x40, 0x01, 0x00, 0x00, 0xbc, 0x38, 0xc0];
        let task = tokio::spawn(async move {
            for chunk in encoded.chunks(2) {
                a.write_all(chunk).await.unwrap();
                a.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            a
        });

        let (got, _) = reader.read_packet().await.unwrap();
        assert_eq!(got, vec![0x40, 0x01, 0x00, 0x00]);
        drop(task.await.unwrap());
    }

    #[tokio::test]
    async fn eof_reports_closed() {
        let (a, b) = duplex(64);
        drop(a);
        let mut reader = SlipmuxReader::new(b);
        assert!(matches!(
            reader.read_packet().await,
            Err(FramingError::Closed)
        ));
    }
}
