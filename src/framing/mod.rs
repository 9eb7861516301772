//! Packet framing over byte streams.
//!
//! The connection layer only needs atomic packets: `read_packet` yields one
//! frame (or a prefix of one when the framer cannot buffer it whole) and
//! `write_packet` emits one frame. Anything with that shape works — SlipMux
//! over a serial byte stream, a 1:1 UDP datagram mapping, or the in-memory
//! pair used by tests.
//!
//! Concrete framers are wrapped in the [`FrameReader`] / [`FrameWriter`]
//! enums rather than trait objects, so their methods can stay async.

pub mod mock;
pub mod slipmux;
pub mod udp;

use thiserror::Error;

use mock::{MockFrameReader, MockFrameWriter};
use slipmux::{SlipmuxReader, SlipmuxWriter};
use udp::{UdpFrameReader, UdpFrameWriter};

/// Errors surfaced by framers.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed")]
    Closed,
}

/// One packet as delivered by a framer: the bytes and whether they are only
/// a prefix of a larger frame still being read.
pub type Packet = (Vec<u8>, bool);

/// Read half of a framed link.
pub enum FrameReader {
    /// SlipMux frames over any byte stream.
    Slipmux(SlipmuxReader),
    /// One datagram per packet.
    Udp(UdpFrameReader),
    /// In-memory channel, for tests.
    Mock(MockFrameReader),
}

impl FrameReader {
    /// Read the next packet. `is_prefix` is true when the packet must be
    /// concatenated with the next read to form a full frame.
    pub async fn read_packet(&mut self) -> Result<Packet, FramingError> {
        match self {
            FrameReader::Slipmux(r) => r.read_packet().await,
            FrameReader::Udp(r) => r.read_packet().await,
            FrameReader::Mock(r) => r.read_packet().await,
        }
    }
}

/// Write half of a framed link.
pub enum FrameWriter {
    /// SlipMux frames over any byte stream.
    Slipmux(SlipmuxWriter),
    /// One datagram per packet.
    Udp(UdpFrameWriter),
    /// In-memory channel, for tests.
    Mock(MockFrameWriter),
}

impl FrameWriter {
    /// Emit one complete frame.
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), FramingError> {
        match self {
            FrameWriter::Slipmux(w) => w.write_packet(packet).await,
            FrameWriter::Udp(w) => w.write_packet(packet).await,
            FrameWriter::Mock(w) => w.write_packet(packet).await,
        }
    }
}
