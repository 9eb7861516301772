//! Request contexts: caller-driven cancellation and deadlines.
//!
//! Every blocking read inside an interaction selects on its request's
//! context, so cancellation is observable while a round trip or an observe
//! is suspended on the wire.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A cancellation and deadline handle passed along with a request.
///
/// Cloning shares the same cancellation state. The default context is never
/// cancelled and has no deadline.
#[derive(Clone, Debug)]
pub struct ReqContext {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// The sending side of a context's cancellation flag.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the associated context. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl ReqContext {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        // One process-wide channel whose sender is never dropped, so the
        // receiver never reads "closed".
        static BACKGROUND: std::sync::OnceLock<(watch::Sender<bool>, watch::Receiver<bool>)> =
            std::sync::OnceLock::new();
        let (_, rx) = BACKGROUND.get_or_init(|| watch::channel(false));
        Self {
            cancelled: rx.clone(),
            deadline: None,
        }
    }

    /// A cancellable context and its handle.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancelled: rx,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Derive a context with a deadline `timeout` from now. The original
    /// cancellation state is shared.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: self.cancelled.clone(),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    /// True once the context was cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        *self.cancelled.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Wait until the context is cancelled or its deadline passes.
    /// Never returns for a background context.
    pub async fn done(&self) {
        let mut cancelled = self.cancelled.clone();
        let deadline_wait = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline_wait => {}
            res = cancelled.wait_for(|c| *c) => {
                // A dropped sender also counts as done.
                let _ = res;
            }
        }
    }
}

impl Default for ReqContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn background_never_completes() {
        let ctx = ReqContext::background();
        assert!(!ctx.is_done());
        assert!(timeout(Duration::from_millis(50), ctx.done()).await.is_err());
    }

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (ctx, handle) = ReqContext::cancellable();
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        handle.cancel();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn deadline_expires() {
        let ctx = ReqContext::background().with_timeout(Duration::from_millis(20));
        timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("deadline should fire");
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn nested_timeout_keeps_earlier_deadline() {
        let ctx = ReqContext::background().with_timeout(Duration::from_millis(20));
        let derived = ctx.with_timeout(Duration::from_secs(60));
        timeout(Duration::from_secs(1), derived.done())
            .await
            .expect("earlier deadline should win");
    }
}
