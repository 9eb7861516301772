//! Connectors: keyed caches of open connections.
//!
//! A connector normalizes a host token, reuses an open connection for it if
//! one is cached, and otherwise opens a fresh framed transport. Closed
//! connections are purged lazily on the next connect.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{TransportConfig, UartConfig, UdpConfig};
use crate::connection::Connection;
use crate::framing::slipmux::{SlipmuxReader, SlipmuxWriter};
use crate::framing::{udp, FrameReader, FrameWriter};

/// Default CoAP port, appended when a UDP host has none.
const DEFAULT_COAP_PORT: u16 = 5683;

/// How many numbered ports to probe when the host is `any`.
const ANY_PROBE_LIMIT: u32 = 100;

/// Errors from connection establishment.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("no usable serial port found")]
    NoUsablePort,

    /// The UART connector needs a port opener before it can reach hardware.
    #[error("no serial port opener configured")]
    NoPortOpener,

    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Boxed byte-stream halves of an opened serial port.
pub type PortStreams = (
    Box<dyn AsyncRead + Send + Unpin>,
    Box<dyn AsyncWrite + Send + Unpin>,
);

/// Opens a serial device by path. Physical port I/O lives outside this
/// crate; implementations typically wrap a serial-port library or, in
/// tests, an in-memory duplex.
pub trait PortOpen: Send + Sync {
    fn open<'a>(
        &'a self,
        path: &'a str,
        cfg: &'a UartConfig,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<PortStreams>> + Send + 'a>>;
}

/// Hands out connections for host tokens.
pub trait Connect: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Connection>, ConnectorError>> + Send + 'a>>;
}

// ============================================================================
// UART
// ============================================================================

/// Connector for SlipMux-framed serial ports.
///
/// Host tokens name a local device: `ttyACM0` becomes `/dev/ttyACM0` on
/// Unix-likes, `COM3` stays as-is on Windows, and `any` probes for the
/// first port that opens (remembering the last hit).
pub struct UartConnector {
    opener: Option<Arc<dyn PortOpen>>,
    uart: UartConfig,
    cfg: TransportConfig,
    connections: StdMutex<Vec<Arc<Connection>>>,
    /// Last port that satisfied an `any` lookup; tried first next time.
    last_any: StdMutex<Option<String>>,
    /// Serializes connection establishment.
    connect_lock: Mutex<()>,
}

impl UartConnector {
    /// A connector without a port opener; every connect fails with
    /// [`ConnectorError::NoPortOpener`]. Useful as a placeholder.
    pub fn new(uart: UartConfig, cfg: TransportConfig) -> Self {
        Self {
            opener: None,
            uart,
            cfg,
            connections: StdMutex::new(Vec::new()),
            last_any: StdMutex::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn PortOpen>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Map a URL host token to a device path.
    fn normalize(host: &str) -> String {
        if host == "any" {
            host.to_string()
        } else if cfg!(windows) {
            host.to_string()
        } else {
            // A host cannot carry a slash, so the /dev/ part of the device
            // file is implied (RFC 3986 allows system-specific host lookup).
            format!("/dev/{}", host)
        }
    }

    fn candidate_ports() -> impl Iterator<Item = String> {
        (0..ANY_PROBE_LIMIT).map(|i| {
            if cfg!(windows) {
                format!("COM{}", i)
            } else {
                format!("/dev/ttyS{}", i)
            }
        })
    }

    async fn open_path(&self, path: &str) -> Result<Arc<Connection>, ConnectorError> {
        let opener = self.opener.as_ref().ok_or(ConnectorError::NoPortOpener)?;
        let (read_half, write_half) =
            opener
                .open(path, &self.uart)
                .await
                .map_err(|source| ConnectorError::Open {
                    path: path.to_string(),
                    source,
                })?;
        let reader = FrameReader::Slipmux(SlipmuxReader::new(read_half));
        let writer = FrameWriter::Slipmux(SlipmuxWriter::new(write_half));
        Ok(Connection::open(path, reader, writer, self.cfg.clone()))
    }

    /// Resolve `any`: last known good port first, then the numbered probe.
    async fn open_any(&self) -> Result<Arc<Connection>, ConnectorError> {
        let last = self
            .last_any
            .lock()
            .expect("last_any lock poisoned")
            .clone();
        if let Some(path) = last {
            if let Ok(conn) = self.open_path(&path).await {
                return Ok(conn);
            }
        }
        for path in Self::candidate_ports() {
            match self.open_path(&path).await {
                Ok(conn) => {
                    info!(port = %path, "resolved host 'any'");
                    *self.last_any.lock().expect("last_any lock poisoned") = Some(path);
                    return Ok(conn);
                }
                Err(ConnectorError::NoPortOpener) => return Err(ConnectorError::NoPortOpener),
                Err(_) => continue,
            }
        }
        Err(ConnectorError::NoUsablePort)
    }
}

impl Connect for UartConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Connection>, ConnectorError>> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self.connect_lock.lock().await;
            let name = Self::normalize(host);

            {
                let mut connections = self
                    .connections
                    .lock()
                    .expect("connection cache lock poisoned");
                connections.retain(|c| !c.is_closed());
                if let Some(conn) = connections
                    .iter()
                    .find(|c| c.name() == name || host == "any")
                {
                    info!(port = %conn.name(), "reusing serial connection");
                    return Ok(Arc::clone(conn));
                }
            }

            let conn = if host == "any" {
                self.open_any().await?
            } else {
                self.open_path(&name).await?
            };
            debug!(port = %conn.name(), "serial connection opened");
            self.connections
                .lock()
                .expect("connection cache lock poisoned")
                .push(Arc::clone(&conn));
            Ok(conn)
        })
    }
}

// ============================================================================
// UDP
// ============================================================================

/// Connector mapping each remote `host:port` to one connected datagram
/// socket.
pub struct UdpConnector {
    udp: UdpConfig,
    cfg: TransportConfig,
    connections: StdMutex<Vec<Arc<Connection>>>,
    connect_lock: Mutex<()>,
}

impl UdpConnector {
    pub fn new(udp: UdpConfig, cfg: TransportConfig) -> Self {
        Self {
            udp,
            cfg,
            connections: StdMutex::new(Vec::new()),
            connect_lock: Mutex::new(()),
        }
    }

    /// `host:port`, defaulting the port when absent. Bracketed IPv6
    /// literals keep their colons.
    fn canonical_addr(host: &str) -> String {
        let has_port = host.rfind(':') > host.rfind(']');
        if has_port {
            host.to_string()
        } else {
            format!("{}:{}", host, DEFAULT_COAP_PORT)
        }
    }
}

impl Connect for UdpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<Connection>, ConnectorError>> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self.connect_lock.lock().await;
            let addr = Self::canonical_addr(host);

            {
                let mut connections = self
                    .connections
                    .lock()
                    .expect("connection cache lock poisoned");
                connections.retain(|c| !c.is_closed());
                if let Some(conn) = connections.iter().find(|c| c.name() == addr) {
                    debug!(addr = %addr, "reusing UDP connection");
                    return Ok(Arc::clone(conn));
                }
            }

            let socket = UdpSocket::bind(self.udp.bind_addr()).await?;
            socket.connect(&addr).await?;
            let socket = Arc::new(socket);
            let (reader, writer) = udp::split(socket);
            let conn = Connection::open(
                addr,
                FrameReader::Udp(reader),
                FrameWriter::Udp(writer),
                self.cfg.clone(),
            );
            self.connections
                .lock()
                .expect("connection cache lock poisoned")
                .push(Arc::clone(&conn));
            Ok(conn)
        })
    }
}
