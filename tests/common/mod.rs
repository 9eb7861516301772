//! Shared test harness: a connector backed by an in-memory link, with the
//! far side scripted as the server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use coapline::framing::{mock, FrameReader, FrameWriter};
use coapline::{
    Client, Connect, Connection, ConnectorError, CountingTokenGenerator, Message, Transport,
    TransportConfig, UART_SCHEME,
};

/// Hands out one pre-opened in-memory connection for every host.
pub struct TestConnector {
    conn: Arc<Connection>,
}

impl TestConnector {
    pub fn new(cfg: TransportConfig) -> (Self, mock::MockRemote) {
        let (reader, writer, remote) = mock::link();
        let conn = Connection::open(
            "test",
            FrameReader::Mock(reader),
            FrameWriter::Mock(writer),
            cfg,
        );
        (Self { conn }, remote)
    }

    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.conn)
    }
}

impl Connect for TestConnector {
    fn connect<'a>(
        &'a self,
        _host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Connection>, ConnectorError>> + Send + 'a>> {
        let conn = Arc::clone(&self.conn);
        Box::pin(async move { Ok(conn) })
    }
}

/// The scripted server side of the link.
pub struct TestServer {
    remote: mock::MockRemote,
}

impl TestServer {
    /// Receive and decode the client's next message.
    pub async fn recv_message(&mut self) -> Message {
        let packet = tokio::time::timeout(Duration::from_secs(3), self.remote.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("link closed while waiting for a client message");
        Message::from_bytes(&packet).expect("client sent an undecodable message")
    }

    /// Expect silence from the client for `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        if let Ok(Some(packet)) = tokio::time::timeout(window, self.remote.recv()).await {
            let msg = Message::from_bytes(&packet);
            panic!("expected no client traffic, got {:?}", msg);
        }
    }

    pub async fn send_message(&self, msg: &Message) {
        self.remote
            .send(msg.to_bytes())
            .await
            .expect("link closed while sending");
    }
}

/// A client with predictable tokens (1, 2, ...) and message-ids (1, 2, ...)
/// over an in-memory link, plus its scripted server.
pub fn test_client(cfg: TransportConfig) -> (Client, TestServer, Arc<Connection>) {
    let (connector, remote) = TestConnector::new(cfg.clone());
    let conn = connector.connection();
    let transport = Transport::new(UART_SCHEME, Arc::new(connector), cfg)
        .with_token_generator(Box::new(CountingTokenGenerator::new()));
    let client = Client::new(transport).with_timeout(Duration::from_secs(10));
    (client, TestServer { remote }, conn)
}

/// Defaults, minus the idle timer (pointless churn in tests).
pub fn test_config() -> TransportConfig {
    TransportConfig {
        idle_timeout_ms: Some(0),
        ..Default::default()
    }
}
