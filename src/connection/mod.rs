//! One framed link, many concurrent interactions.
//!
//! A `Connection` owns a framed reader/writer pair. The reader is consumed
//! by a dedicated receive-loop task that decodes inbound packets and routes
//! them to interactions by token (falling back to the last outbound
//! message-id for token-less ACKs and RSTs). Unmatched messages are
//! answered with an RST and dropped. All outbound writes are serialized by
//! the writer lock; the receive loop never holds it while delivering.

pub mod interaction;
mod observe;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::framing::{FrameReader, FrameWriter, FramingError};
use crate::msg::{Message, MsgType, Token};

pub use interaction::{Interaction, InteractionError};

/// Errors surfaced by connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    /// A live interaction already owns this token.
    #[error("interaction with token {0} already exists")]
    DuplicateToken(Token),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// A reusable framed link with an interaction registry and a receive loop.
pub struct Connection {
    /// Port or host name, for logs and connector reuse.
    name: String,
    cfg: TransportConfig,
    writer: Mutex<FrameWriter>,
    /// Live interactions in insertion order.
    interactions: StdMutex<Vec<Arc<Interaction>>>,
    closed: AtomicBool,
    recv_task: StdMutex<Option<JoinHandle<()>>>,
    last_activity: StdMutex<Instant>,
}

impl Connection {
    /// Wrap a framed pair and start the receive loop (and, when configured,
    /// the idle-close timer).
    pub fn open(
        name: impl Into<String>,
        reader: FrameReader,
        writer: FrameWriter,
        cfg: TransportConfig,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            name: name.into(),
            cfg,
            writer: Mutex::new(writer),
            interactions: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            recv_task: StdMutex::new(None),
            last_activity: StdMutex::new(Instant::now()),
        });
        conn.spawn_receive_loop(reader);
        conn.spawn_idle_timer();
        debug!(port = %conn.name, "connection opened");
        conn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions
            .lock()
            .expect("interaction registry lock poisoned")
            .len()
    }

    /// Write one encoded packet. Writes from concurrent interactions are
    /// globally ordered by the writer lock.
    pub async fn send_packet(&self, packet: &[u8]) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_packet(packet).await?;
        self.touch();
        Ok(())
    }

    /// Encode and write one message.
    pub async fn send_message(&self, msg: &Message) -> Result<(), ConnectionError> {
        self.send_packet(&msg.to_bytes()).await
    }

    /// Register a new interaction for `token`.
    ///
    /// Non-empty tokens must be unique among live interactions; token-less
    /// interactions (pings) are told apart by message-id and may coexist.
    pub fn start_interaction(
        self: &Arc<Self>,
        token: Token,
    ) -> Result<Arc<Interaction>, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let mut interactions = self
            .interactions
            .lock()
            .expect("interaction registry lock poisoned");
        if !token.is_empty() && interactions.iter().any(|ia| ia.token() == &token) {
            return Err(ConnectionError::DuplicateToken(token));
        }
        let ia = Arc::new(Interaction::new(
            token,
            Arc::downgrade(self),
            self.cfg.clone(),
        ));
        interactions.push(Arc::clone(&ia));
        Ok(ia)
    }

    /// Look up a live interaction by token, for reuse by the transport.
    pub fn find_by_token(&self, token: &Token) -> Option<Arc<Interaction>> {
        if token.is_empty() {
            return None;
        }
        self.interactions
            .lock()
            .expect("interaction registry lock poisoned")
            .iter()
            .find(|ia| ia.token() == token)
            .cloned()
    }

    /// Route an inbound message: by token when it has one, otherwise by the
    /// last outbound message-id (bare ACKs and RSTs omit the token).
    fn find_interaction(&self, token: &Token, message_id: u16) -> Option<Arc<Interaction>> {
        let interactions = self
            .interactions
            .lock()
            .expect("interaction registry lock poisoned");
        if !token.is_empty() {
            interactions.iter().find(|ia| ia.token() == token).cloned()
        } else {
            interactions
                .iter()
                .find(|ia| ia.last_message_id() == message_id)
                .cloned()
        }
    }

    /// Drop an interaction from the registry. Identity, not token, so two
    /// token-less pings cannot remove each other.
    pub fn remove_interaction(&self, ia: &Arc<Interaction>) {
        self.interactions
            .lock()
            .expect("interaction registry lock poisoned")
            .retain(|other| !Arc::ptr_eq(other, ia));
    }

    /// Close the connection: stops the receive loop and closes every
    /// registered interaction. Idempotent.
    pub async fn close(&self) {
        self.close_inner(true).await;
    }

    async fn close_inner(&self, abort_loop: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self
            .recv_task
            .lock()
            .expect("receive task lock poisoned")
            .take();
        if let Some(task) = task {
            if abort_loop {
                task.abort();
            }
        }
        let interactions: Vec<_> = {
            let mut registry = self
                .interactions
                .lock()
                .expect("interaction registry lock poisoned");
            registry.drain(..).collect()
        };
        for ia in interactions {
            ia.close().await;
        }
        debug!(port = %self.name, "connection closed");
    }

    /// Swap in a freshly opened framed pair without invalidating the
    /// connection identity (keep-alive reopen). Interactions that were in
    /// flight during the swap observe a close.
    pub async fn reopen(self: &Arc<Self>, reader: FrameReader, writer: FrameWriter) {
        self.close_inner(true).await;
        *self.writer.lock().await = writer;
        self.closed.store(false, Ordering::Release);
        self.touch();
        self.spawn_receive_loop(reader);
        info!(port = %self.name, "connection reopened");
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .expect("last activity lock poisoned") = Instant::now();
    }

    fn spawn_receive_loop(self: &Arc<Self>, reader: FrameReader) {
        let conn = Arc::clone(self);
        let task = tokio::spawn(receive_loop(conn, reader));
        *self
            .recv_task
            .lock()
            .expect("receive task lock poisoned") = Some(task);
    }

    fn spawn_idle_timer(self: &Arc<Self>) {
        let Some(idle) = self.cfg.idle_timeout() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(conn) = weak.upgrade() else { return };
                    if conn.is_closed() {
                        return;
                    }
                    let deadline = *conn
                        .last_activity
                        .lock()
                        .expect("last activity lock poisoned")
                        + idle;
                    deadline
                };
                tokio::time::sleep_until(deadline).await;
                let Some(conn) = weak.upgrade() else { return };
                if conn.is_closed() {
                    return;
                }
                let last = *conn
                    .last_activity
                    .lock()
                    .expect("last activity lock poisoned");
                if Instant::now() >= last + idle {
                    info!(port = %conn.name, "closing idle connection");
                    conn.close().await;
                    return;
                }
            }
        });
    }
}

/// The single reader of a connection: decode, route, answer RST for
/// strangers, and keep running through bad packets.
async fn receive_loop(conn: Arc<Connection>, mut reader: FrameReader) {
    debug!(port = %conn.name, "receive loop started");
    let mut assembled: Vec<u8> = Vec::new();

    loop {
        match reader.read_packet().await {
            Ok((chunk, is_prefix)) => {
                conn.touch();
                assembled.extend_from_slice(&chunk);
                if is_prefix {
                    continue;
                }
                let packet = std::mem::take(&mut assembled);
                if packet.is_empty() {
                    // Tolerates SLIP idle between messages.
                    continue;
                }

                let msg = match Message::from_bytes(&packet) {
                    Ok(msg) => msg,
                    Err(e) => {
                        // A single bad packet does not cost the connection.
                        warn!(port = %conn.name, error = %e, len = packet.len(),
                            "dropping undecodable packet");
                        continue;
                    }
                };
                debug!(port = %conn.name, msg = %msg, "inbound message");

                match conn.find_interaction(&msg.token, msg.message_id) {
                    Some(ia) => ia.handle_message(msg).await,
                    None => {
                        warn!(
                            port = %conn.name,
                            token = %msg.token,
                            message_id = msg.message_id,
                            "no interaction for inbound message, answering RST"
                        );
                        // Resetting a Reset is not allowed.
                        if msg.msg_type != MsgType::Reset {
                            if let Err(e) = conn.send_message(&Message::rst(msg.message_id)).await {
                                debug!(port = %conn.name, error = %e, "failed to send RST");
                            }
                        }
                    }
                }
            }
            Err(e) => {
                if !conn.is_closed() {
                    warn!(port = %conn.name, error = %e, "receive failed, closing connection");
                }
                conn.close_inner(false).await;
                break;
            }
        }
    }
    debug!(port = %conn.name, "receive loop stopped");
}
