//! The observe pump: a single-producer loop turning inbound notifications
//! into a downstream stream, with the RFC 7641 ACK/RST discipline.
//!
//! The pump owns the interaction's inbound channel while it runs. Stopping
//! it is a synchronous handshake: `ObservePump::stop` resolves only after
//! the task has finished and released the channel, so a re-entrant round
//! trip can never race it for inbound messages. Teardown always sends any
//! required RST before the notification channel closes.

use std::sync::Arc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ReqContext;
use crate::msg::{Message, MsgType};

use super::interaction::Interaction;

/// Why the pump loop ended. Decides whether an RST goes out.
enum PumpEnd {
    /// Stop handshake from a re-entrant round trip (observe cancel).
    Stopped,
    /// The caller's context was cancelled.
    Cancelled,
    /// Interaction or connection closed underneath us.
    Closed,
    /// The peer rejected the observation with an RST.
    PeerReset,
    /// A notification carried an error code (RFC 7641 section 3.2).
    ErrorCode,
    /// Downstream failed to take a notification within the grace period,
    /// or dropped the stream.
    Stalled,
}

/// Handle to a running pump.
pub(super) struct ObservePump {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ObservePump {
    /// Signal the pump and wait for it to finish.
    pub(super) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the pump for an interaction that just registered an observe.
pub(super) fn run_pump(
    ia: Arc<Interaction>,
    ctx: ReqContext,
    notify_tx: mpsc::Sender<Message>,
) -> ObservePump {
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(pump_loop(ia, ctx, stop_rx, notify_tx));
    ObservePump { stop_tx, task }
}

async fn pump_loop(
    ia: Arc<Interaction>,
    ctx: ReqContext,
    mut stop: watch::Receiver<bool>,
    notify_tx: mpsc::Sender<Message>,
) {
    let grace = ia.config().notify_grace();
    let mut closed = ia.closed_watch();
    let mut rx = ia.inbound_rx().lock().await;
    let mut last_id: Option<u16> = None;

    let end = loop {
        let msg = tokio::select! {
            res = stop.changed() => {
                let _ = res;
                break PumpEnd::Stopped;
            }
            _ = ctx.done() => break PumpEnd::Cancelled,
            res = closed.wait_for(|c| *c) => {
                let _ = res;
                break PumpEnd::Closed;
            }
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break PumpEnd::Closed,
            },
        };

        last_id = Some(msg.message_id);

        if msg.msg_type == MsgType::Reset {
            debug!(token = %ia.token(), "peer reset the observation");
            break PumpEnd::PeerReset;
        }
        if msg.code.is_error() {
            warn!(
                token = %ia.token(),
                code = %msg.code,
                "error notification, terminating observe"
            );
            break PumpEnd::ErrorCode;
        }

        let confirmable = msg.is_confirmable();
        let message_id = msg.message_id;

        // Deliver to exactly one consumer, blocking up to the grace period.
        match notify_tx.send_timeout(msg, grace).await {
            Ok(()) => {
                // Only acknowledge once the notification was accepted
                // downstream; an unacked CON makes the server retransmit.
                if confirmable {
                    ia.send_best_effort(Message::ack(message_id)).await;
                }
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    token = %ia.token(),
                    message_id,
                    "notification not consumed within grace period"
                );
                break PumpEnd::Stalled;
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(token = %ia.token(), "notification stream dropped downstream");
                break PumpEnd::Stalled;
            }
        }
    };

    drop(rx);

    // RST tells the server to stop notifying. Required for caller-driven
    // cancellation, error notifications and a stalled consumer; pointless
    // after a peer RST, a close, or the orderly stop handshake.
    match end {
        PumpEnd::Cancelled | PumpEnd::ErrorCode | PumpEnd::Stalled => {
            if let Some(message_id) = last_id {
                ia.send_best_effort(Message::rst(message_id)).await;
            }
        }
        PumpEnd::Stopped | PumpEnd::Closed | PumpEnd::PeerReset => {}
    }

    // The observation is over for every end except the stop handshake,
    // where the re-entrant round trip still owns the interaction. A closed
    // connection already tears its registry down itself.
    match end {
        PumpEnd::Cancelled | PumpEnd::ErrorCode | PumpEnd::Stalled | PumpEnd::PeerReset => {
            ia.mark_closed();
            if let Some(conn) = ia.connection().upgrade() {
                conn.remove_interaction(&ia);
            }
        }
        PumpEnd::Stopped | PumpEnd::Closed => {}
    }

    // The notification channel must close only after the RST went out.
    drop(notify_tx);
    debug!(token = %ia.token(), "observe pump finished");
}
