//! Responses, including the lazy notification stream of an observe.

use tokio::sync::mpsc;

use super::Request;
use crate::msg::{Code, Options, Token};

/// A CoAP response as seen by a client.
pub struct Response {
    /// Raw CoAP code, e.g. 0x45 for 2.05.
    pub status_code: u8,
    /// Dotted form with name, e.g. `"2.05 Content"`.
    pub status: String,
    pub code: Code,
    pub body: Vec<u8>,
    pub options: Options,
    pub token: Token,
    /// The request that produced this response.
    pub request: Request,
    /// Stream of subsequent notifications when this response registered an
    /// observe. `None` for plain responses.
    pub(crate) notifications: Option<mpsc::Receiver<Response>>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// True when this response opened an observe and notifications may
    /// still arrive.
    pub fn is_stream(&self) -> bool {
        self.notifications.is_some()
    }

    /// Wait for the next notification of an observe.
    ///
    /// Returns `None` for non-observe responses and once the observation
    /// terminated (cancelled, reset, or the connection went away). The
    /// sequence is finite and not restartable.
    pub async fn next(&mut self) -> Option<Response> {
        match self.notifications.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// The body interpreted as UTF-8 (lossy).
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .field("token", &self.token)
            .field("observing", &self.notifications.is_some())
            .finish()
    }
}
