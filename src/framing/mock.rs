//! In-memory framer for tests: a channel-backed link whose far side plays
//! the server.

use tokio::sync::mpsc;

use super::{FramingError, Packet};

const LINK_CAPACITY: usize = 32;

/// Create a framed link. Returns the client-side reader/writer and the
/// remote end that a test drives as the server.
pub fn link() -> (MockFrameReader, MockFrameWriter, MockRemote) {
    let (to_client_tx, to_client_rx) = mpsc::channel(LINK_CAPACITY);
    let (to_server_tx, to_server_rx) = mpsc::channel(LINK_CAPACITY);
    (
        MockFrameReader { rx: to_client_rx },
        MockFrameWriter { tx: to_server_tx },
        MockRemote {
            tx: to_client_tx,
            rx: to_server_rx,
        },
    )
}

/// Client-side read half.
pub struct MockFrameReader {
    rx: mpsc::Receiver<Packet>,
}

impl MockFrameReader {
    pub async fn read_packet(&mut self) -> Result<Packet, FramingError> {
        self.rx.recv().await.ok_or(FramingError::Closed)
    }
}

/// Client-side write half.
pub struct MockFrameWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl MockFrameWriter {
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), FramingError> {
        self.tx
            .send(packet.to_vec())
            .await
            .map_err(|_| FramingError::Closed)
    }
}

/// The server end of the link. Dropping it closes the client's reader.
pub struct MockRemote {
    tx: mpsc::Sender<Packet>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl MockRemote {
    /// Deliver one complete packet to the client.
    pub async fn send(&self, packet: impl Into<Vec<u8>>) -> Result<(), FramingError> {
        self.tx
            .send((packet.into(), false))
            .await
            .map_err(|_| FramingError::Closed)
    }

    /// Deliver a packet fragment; the client must concatenate it with the
    /// following reads.
    pub async fn send_prefix(&self, chunk: impl Into<Vec<u8>>) -> Result<(), FramingError> {
        self.tx
            .send((chunk.into(), true))
            .await
            .map_err(|_| FramingError::Closed)
    }

    /// Receive the next packet written by the client.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
