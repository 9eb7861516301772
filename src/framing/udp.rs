//! UDP framing: one datagram per packet.
//!
//! The socket is connected to a single remote endpoint, so the 1:1 mapping
//! between datagrams and CoAP messages satisfies the framer contract with
//! no extra bytes on the wire.

use std::sync::Arc;
use tokio::net::UdpSocket;

use super::{FramingError, Packet};

/// Datagrams above this size are truncated by the read buffer; CoAP keeps
/// messages far smaller.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Split a connected socket into a framed reader/writer pair.
pub fn split(socket: Arc<UdpSocket>) -> (UdpFrameReader, UdpFrameWriter) {
    (
        UdpFrameReader {
            socket: Arc::clone(&socket),
        },
        UdpFrameWriter { socket },
    )
}

/// Read half: one `recv` per packet.
pub struct UdpFrameReader {
    socket: Arc<UdpSocket>,
}

impl UdpFrameReader {
    pub async fn read_packet(&mut self) -> Result<Packet, FramingError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = self.socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, false))
    }
}

/// Write half: one `send` per packet.
pub struct UdpFrameWriter {
    socket: Arc<UdpSocket>,
}

impl UdpFrameWriter {
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), FramingError> {
        self.socket.send(packet).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (Arc<UdpSocket>, Arc<UdpSocket>) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (Arc::new(a), Arc::new(b))
    }

    #[tokio::test]
    async fn datagram_per_packet() {
        let (a, b) = connected_pair().await;
        let (mut reader, _) = split(b);
        let (_, mut writer) = split(a);

        writer.write_packet(&[0x40, 0x01, 0x00, 0x01]).await.unwrap();
        writer.write_packet(&[0x70, 0x00, 0x00, 0x02]).await.unwrap();

        let (p1, prefix1) = reader.read_packet().await.unwrap();
        assert_eq!(p1, vec![0x40, 0x01, 0x00, 0x01]);
        assert!(!prefix1);
        let (p2, _) = reader.read_packet().await.unwrap();
        assert_eq!(p2, vec![0x70, 0x00, 0x00, 0x02]);
    }
}
