//! Per-token interaction state machine.
//!
//! One interaction drives the CON/ACK, piggyback, separate-response and
//! Observe protocol for a single token. The connection's receive loop feeds
//! it through a bounded inbound channel; `round_trip` consumes from that
//! channel while it runs, and the observe pump consumes from it afterwards.
//! The round-trip mutex plus the pump stop handshake guarantee the two
//! never read concurrently.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex as StdMutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::context::ReqContext;
use crate::msg::{Message, MsgType, OptionNumber, Token};

use super::observe::{run_pump, ObservePump};
use super::{Connection, ConnectionError};

/// Capacity of the inbound channel. Small but non-zero: it decouples the
/// receive loop from a reader that is a step behind, and the delivery
/// timeout caps how long a stalled reader can hold the loop.
const INBOUND_CAPACITY: usize = 1;

/// Errors surfaced by a round trip or an observe.
#[derive(Debug, Error)]
pub enum InteractionError {
    /// The interaction or its connection was closed while waiting.
    #[error("interaction closed")]
    Closed,

    /// The caller's context was cancelled or its deadline passed while a
    /// read was pending. Distinct from [`InteractionError::Closed`].
    #[error("read cancelled by caller")]
    Cancelled,

    #[error("timed out after {0:?} waiting for a message")]
    Timeout(Duration),

    #[error("expected {expected} but got {got}")]
    UnexpectedType { expected: MsgType, got: MsgType },

    #[error("message id of response does not match: sent {expected}, got {got}")]
    MessageIdMismatch { expected: u16, got: u16 },

    #[error("token of response does not match: sent {expected}, got {got}")]
    TokenMismatch { expected: Token, got: Token },

    /// Requests must be CON or NON; passing an ACK or RST here is a
    /// programming error of the caller.
    #[error("invalid request type {0}")]
    InvalidRequestType(MsgType),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// One in-flight request/response (or notification stream), keyed by token.
pub struct Interaction {
    token: Token,
    /// Id of the most recent outbound request, used to match inbound
    /// messages that carry no token (bare ACKs and RSTs).
    last_message_id: AtomicU16,
    conn: Weak<Connection>,
    cfg: TransportConfig,

    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<mpsc::Receiver<Message>>,

    /// Serializes round trips on this token and guards the observe
    /// stop handshake.
    round_trip_lock: Mutex<()>,

    /// Running observe pump, if any.
    observe: StdMutex<Option<ObservePump>>,
    /// Notification stream handed to the transport after an observe
    /// registration succeeded.
    notifications: StdMutex<Option<mpsc::Receiver<Message>>>,

    closed_tx: watch::Sender<bool>,
}

impl Interaction {
    pub(super) fn new(token: Token, conn: Weak<Connection>, cfg: TransportConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (closed_tx, _) = watch::channel(false);
        Self {
            token,
            last_message_id: AtomicU16::new(0),
            conn,
            cfg,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            round_trip_lock: Mutex::new(()),
            observe: StdMutex::new(None),
            notifications: StdMutex::new(None),
            closed_tx,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub(super) fn last_message_id(&self) -> u16 {
        self.last_message_id.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// True while an observe pump is installed on this interaction.
    pub fn is_observing(&self) -> bool {
        self.observe
            .lock()
            .expect("observe lock poisoned")
            .is_some()
    }

    /// Take the notification stream created by an observe registration.
    /// Returns `None` if the interaction is not observing or the stream was
    /// already taken.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<Message>> {
        self.notifications
            .lock()
            .expect("notifications lock poisoned")
            .take()
    }

    pub(super) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub(super) fn inbound_rx(&self) -> &Mutex<mpsc::Receiver<Message>> {
        &self.inbound_rx
    }

    pub(super) fn config(&self) -> &TransportConfig {
        &self.cfg
    }

    /// Close the interaction: wakes pending reads with
    /// [`InteractionError::Closed`] and stops any observe pump.
    pub async fn close(&self) {
        let _ = self.closed_tx.send(true);
        self.stop_observe().await;
    }

    /// Close without joining the pump. Only for the pump's own teardown,
    /// which cannot await itself.
    pub(super) fn mark_closed(&self) {
        let _ = self.closed_tx.send(true);
        // Dropping the handle detaches the (already finishing) task.
        let _ = self.observe.lock().expect("observe lock poisoned").take();
    }

    /// Deliver an inbound message from the connection's receive loop.
    ///
    /// Blocks at most the configured delivery timeout; a stalled reader
    /// costs the message, not the receive loop.
    pub(super) async fn handle_message(&self, msg: Message) {
        let message_id = msg.message_id;
        match self
            .inbound_tx
            .send_timeout(msg, self.cfg.deliver_timeout())
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    token = %self.token,
                    message_id,
                    "interaction stalled, dropping inbound message"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(token = %self.token, message_id, "inbound channel gone");
            }
        }
    }

    /// Send a message, logging failures instead of propagating them.
    /// Used for ACKs and RSTs whose loss the peer handles by retransmitting.
    pub(super) async fn send_best_effort(&self, msg: Message) {
        let Some(conn) = self.conn.upgrade() else {
            return;
        };
        if let Err(e) = conn.send_message(&msg).await {
            debug!(token = %self.token, error = %e, "best-effort send failed");
        }
    }

    /// Execute one request/response exchange on this token.
    ///
    /// Holds the round-trip mutex for the whole exchange. An active observe
    /// pump is stopped (and awaited) first, so the pump cannot swallow the
    /// response to the new request. On success the interaction may have
    /// transitioned into observing; check [`Interaction::is_observing`].
    pub async fn round_trip(
        self: &std::sync::Arc<Self>,
        ctx: &ReqContext,
        req: &Message,
    ) -> Result<Message, InteractionError> {
        if matches!(req.msg_type, MsgType::Acknowledgement | MsgType::Reset) {
            return Err(InteractionError::InvalidRequestType(req.msg_type));
        }

        let _guard = self.round_trip_lock.lock().await;

        self.stop_observe().await;
        if self.is_closed() {
            return Err(InteractionError::Closed);
        }
        let conn = self.conn.upgrade().ok_or(InteractionError::Closed)?;

        self.last_message_id
            .store(req.message_id, Ordering::Release);
        let bytes = req.to_bytes();
        conn.send_packet(&bytes).await?;

        let mut rx = self.inbound_rx.lock().await;

        let res = match req.msg_type {
            MsgType::Confirmable => {
                let ack = self.read_with_retransmit(&conn, &bytes, ctx, &mut rx).await?;
                if ack.msg_type != MsgType::Acknowledgement {
                    return Err(InteractionError::UnexpectedType {
                        expected: MsgType::Acknowledgement,
                        got: ack.msg_type,
                    });
                }
                if ack.message_id != req.message_id {
                    return Err(InteractionError::MessageIdMismatch {
                        expected: req.message_id,
                        got: ack.message_id,
                    });
                }

                if ack.code.is_empty() {
                    // Separate response: the actual response arrives later as
                    // CON or NON, correlated by token. A CON carrier is ACKed.
                    let sep = self
                        .read_message(ctx, &mut rx, self.cfg.postponed_response_timeout())
                        .await?;
                    match sep.msg_type {
                        MsgType::Confirmable => {
                            conn.send_message(&Message::ack(sep.message_id)).await?;
                            sep
                        }
                        MsgType::NonConfirmable => sep,
                        got => {
                            return Err(InteractionError::UnexpectedType {
                                expected: MsgType::Confirmable,
                                got,
                            });
                        }
                    }
                } else {
                    // Piggybacked response. No further ack: the server
                    // retransmits if this ACK is lost.
                    ack
                }
            }
            MsgType::NonConfirmable => {
                let res = self
                    .read_message(ctx, &mut rx, self.cfg.ack_timeout())
                    .await?;
                if res.msg_type != MsgType::NonConfirmable {
                    return Err(InteractionError::UnexpectedType {
                        expected: MsgType::NonConfirmable,
                        got: res.msg_type,
                    });
                }
                if res.message_id != req.message_id {
                    return Err(InteractionError::MessageIdMismatch {
                        expected: req.message_id,
                        got: res.message_id,
                    });
                }
                res
            }
            got => return Err(InteractionError::InvalidRequestType(got)),
        };

        if res.token != req.token {
            return Err(InteractionError::TokenMismatch {
                expected: req.token.clone(),
                got: res.token.clone(),
            });
        }

        let registering = req.options.get_uint(OptionNumber::OBSERVE) == Some(0)
            && res.options.contains(OptionNumber::OBSERVE);
        if registering {
            drop(rx);
            self.start_observe(ctx);
        }

        Ok(res)
    }

    /// First read of a Confirmable exchange, retransmitting with exponential
    /// backoff until the peer answers or `max_retransmit` is exhausted.
    async fn read_with_retransmit(
        &self,
        conn: &Connection,
        bytes: &[u8],
        ctx: &ReqContext,
        rx: &mut mpsc::Receiver<Message>,
    ) -> Result<Message, InteractionError> {
        let mut timeout = self.cfg.ack_timeout();
        let mut attempt = 0u32;
        loop {
            match self.read_message(ctx, rx, timeout).await {
                Ok(msg) => return Ok(msg),
                Err(InteractionError::Timeout(_)) if attempt < self.cfg.max_retransmit() => {
                    attempt += 1;
                    timeout *= 2;
                    debug!(
                        token = %self.token,
                        attempt,
                        next_timeout_ms = timeout.as_millis() as u64,
                        "no reply, retransmitting"
                    );
                    conn.send_packet(bytes).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for one inbound message, honoring the step timeout, the
    /// caller's context and interaction close.
    async fn read_message(
        &self,
        ctx: &ReqContext,
        rx: &mut mpsc::Receiver<Message>,
        timeout: Duration,
    ) -> Result<Message, InteractionError> {
        let mut closed = self.closed_tx.subscribe();
        tokio::select! {
            msg = rx.recv() => msg.ok_or(InteractionError::Closed),
            _ = ctx.done() => Err(InteractionError::Cancelled),
            res = closed.wait_for(|c| *c) => {
                let _ = res;
                Err(InteractionError::Closed)
            }
            _ = tokio::time::sleep(timeout) => Err(InteractionError::Timeout(timeout)),
        }
    }

    /// Install the observe pump after a successful registration.
    fn start_observe(self: &std::sync::Arc<Self>, ctx: &ReqContext) {
        let (notify_tx, notify_rx) = mpsc::channel(1);
        *self
            .notifications
            .lock()
            .expect("notifications lock poisoned") = Some(notify_rx);

        let pump = run_pump(std::sync::Arc::clone(self), ctx.clone(), notify_tx);
        *self.observe.lock().expect("observe lock poisoned") = Some(pump);
        debug!(token = %self.token, "observe pump started");
    }

    /// Ask a running pump to stop and wait until it has released the
    /// inbound channel. No-op when not observing.
    pub(super) async fn stop_observe(&self) {
        let pump = self.observe.lock().expect("observe lock poisoned").take();
        if let Some(pump) = pump {
            pump.stop().await;
            debug!(token = %self.token, "observe pump stopped");
        }
    }

    /// Handle used by the pump to reach the connection.
    pub(super) fn connection(&self) -> Weak<Connection> {
        self.conn.clone()
    }
}
