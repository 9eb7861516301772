//! The client transport: executes one request/response (or observe
//! registration) against a host.
//!
//! `round_trip` builds the wire message from a [`Request`], acquires a
//! connection for the URL host from the connector, finds or creates the
//! interaction for the token, and drives the exchange. For observes it
//! installs a forwarding task that turns interaction notifications into
//! [`Response`] values on the response's lazy stream.

pub mod connector;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::client::{Method, Request, Response};
use crate::config::{Config, TransportConfig};
use crate::connection::{ConnectionError, InteractionError};
use crate::msg::{Message, MessageIdGenerator, MsgType, RandomTokenGenerator, Token, TokenGenerator};

pub use connector::{
    Connect, ConnectorError, PortOpen, PortStreams, UartConnector, UdpConnector,
};

/// URI scheme of the SlipMux serial transport.
pub const UART_SCHEME: &str = "coap+uart";

/// URI scheme of the UDP transport.
pub const UDP_SCHEME: &str = "coap+udp";

/// Errors surfaced by `round_trip`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid URL scheme: expected {expected}, got {got}")]
    SchemeMismatch { expected: String, got: String },

    #[error("request URL has no host")]
    MissingHost,

    #[error(transparent)]
    Interaction(#[from] InteractionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Executes requests over one connector. Cheap to share behind an `Arc`;
/// message-ids and tokens are allocated per transport instance.
pub struct Transport {
    scheme: String,
    connector: Arc<dyn Connect>,
    cfg: TransportConfig,
    tokens: Box<dyn TokenGenerator>,
    message_ids: MessageIdGenerator,
}

impl Transport {
    /// A transport for `scheme` over the given connector.
    pub fn new(scheme: impl Into<String>, connector: Arc<dyn Connect>, cfg: TransportConfig) -> Self {
        Self {
            scheme: scheme.into(),
            connector,
            cfg,
            tokens: Box::new(RandomTokenGenerator::new()),
            message_ids: MessageIdGenerator::new(),
        }
    }

    /// The serial transport: `coap+uart://<port>/...` over SlipMux.
    /// Attach a [`PortOpen`] via [`UartConnector`] to reach real hardware.
    pub fn uart(config: &Config) -> Self {
        let connector = UartConnector::new(config.uart.clone(), config.transport.clone());
        Self::new(UART_SCHEME, Arc::new(connector), config.transport.clone())
    }

    /// The datagram transport: `coap+udp://host:port/...`.
    pub fn udp(config: &Config) -> Self {
        let connector = UdpConnector::new(config.udp.clone(), config.transport.clone());
        Self::new(UDP_SCHEME, Arc::new(connector), config.transport.clone())
    }

    /// Replace the token source. Tests use the counting generator to make
    /// tokens predictable.
    pub fn with_token_generator(mut self, tokens: Box<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Execute a single CoAP exchange, returning the response.
    ///
    /// Multiple round trips may be in flight over the same connection;
    /// demultiplexing is by token. An error closes the interaction, so a
    /// failed exchange is never silently resumed.
    pub async fn round_trip(&self, req: &Request) -> Result<Response, TransportError> {
        if req.url.scheme() != self.scheme {
            return Err(TransportError::SchemeMismatch {
                expected: self.scheme.clone(),
                got: req.url.scheme().to_string(),
            });
        }
        let host = host_key(&req.url)?;

        let token = match req.method {
            // A ping is a bare Empty message; it is correlated by
            // message-id, never by token.
            Method::Ping => Token::empty(),
            _ => match &req.token {
                Some(token) => token.clone(),
                None => self.tokens.next_token(),
            },
        };
        let msg = self.build_message(req, &token);

        let conn = self.connector.connect(&host).await?;
        let ia = match conn.find_by_token(&token) {
            // An existing interaction for this token is how an observe
            // cancellation re-enters.
            Some(ia) => ia,
            None => conn.start_interaction(token.clone())?,
        };

        debug!(host = %host, msg = %msg, "sending request");
        let res_msg = match ia.round_trip(&req.context, &msg).await {
            Ok(res_msg) => res_msg,
            Err(e) => {
                conn.remove_interaction(&ia);
                ia.close().await;
                return Err(e.into());
            }
        };

        let mut res = build_response(&res_msg, req.clone());
        if ia.is_observing() {
            if let Some(notifications) = ia.take_notifications() {
                res.notifications = Some(self.spawn_notification_pump(notifications, req.clone()));
            }
        } else {
            conn.remove_interaction(&ia);
            ia.close().await;
        }
        Ok(res)
    }

    /// Build the wire message for a request.
    fn build_message(&self, req: &Request, token: &Token) -> Message {
        let mut msg = Message::new();
        msg.msg_type = if req.confirmable {
            MsgType::Confirmable
        } else {
            MsgType::NonConfirmable
        };
        msg.code = req.method.code();
        msg.message_id = self.message_ids.next_id();
        msg.token = token.clone();
        if req.method != Method::Ping {
            msg.options = req.options.clone();
            msg.set_path(req.url.path());
            if let Some(query) = req.url.query() {
                msg.set_query(query);
            }
            msg.payload = req.body.clone();
        }
        msg
    }

    /// Forward interaction notifications into a stream of responses. Ends
    /// when the interaction's stream closes, or when the consumer does not
    /// keep up (the interaction pump then emits the RST).
    fn spawn_notification_pump(
        &self,
        mut notifications: mpsc::Receiver<Message>,
        req: Request,
    ) -> mpsc::Receiver<Response> {
        let grace = self.cfg.notify_grace();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            while let Some(msg) = notifications.recv().await {
                let res = build_response(&msg, req.clone());
                if tx.send_timeout(res, grace).await.is_err() {
                    warn!(
                        url = %req.url,
                        "observe consumer not keeping up, stopping delivery"
                    );
                    break;
                }
            }
        });
        rx
    }
}

/// The connector key for a URL: the host token, with the port kept when the
/// URL carries one.
fn host_key(url: &Url) -> Result<String, TransportError> {
    let host = url.host_str().ok_or(TransportError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Map a response message into the client-facing shape.
fn build_response(msg: &Message, request: Request) -> Response {
    Response {
        status_code: msg.code.as_u8(),
        status: msg.code.to_string(),
        code: msg.code,
        body: msg.payload.clone(),
        options: msg.options.clone(),
        token: msg.token.clone(),
        request,
        notifications: None,
    }
}
