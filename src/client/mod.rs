//! High-level client: GET/POST/PUT/DELETE wrappers, observe management and
//! ping, with a request timeout and the NSTART parallel-request limit.

mod request;
mod response;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::connection::InteractionError;
use crate::msg::{MsgType, OptionNumber};
use crate::transport::{Transport, TransportError};

pub use request::{Method, Request};
pub use response::Response;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The NSTART limit on concurrent exchanges was hit.
    #[error("too many parallel requests (limit {0})")]
    TooManyRequests(u32),

    /// A response cannot be cancelled unless it registered an observe.
    #[error("response is not an observe stream")]
    NotObserving,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A CoAP client over one transport.
///
/// Clients keep per-host connections alive between requests, so they should
/// be reused rather than created per call. All methods take `&self` and are
/// safe to share.
pub struct Client {
    transport: Transport,
    /// Time limit per request; `None` means no limit. Not applied to
    /// observe registrations, whose context outlives the exchange.
    timeout: Option<Duration>,
    /// NSTART: how many exchanges may be in flight at once. 0 = unlimited.
    max_parallel_requests: u32,
    running: AtomicU32,
}

impl Client {
    /// A client with a 1-request NSTART limit and no timeout, as RFC 7252
    /// section 4.7 proposes.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            timeout: None,
            max_parallel_requests: 1,
            running: AtomicU32::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the parallel-request limit; 0 removes it.
    pub fn with_max_parallel_requests(mut self, limit: u32) -> Self {
        self.max_parallel_requests = limit;
        self
    }

    /// Issue a GET.
    pub async fn get(&self, url: &str) -> Result<Response, ClientError> {
        self.execute(Request::new("GET", url)?).await
    }

    /// Issue a POST with a body and its content format.
    pub async fn post(
        &self,
        url: &str,
        content_format: u64,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, ClientError> {
        let mut req = Request::new("POST", url)?.with_body(body);
        req.options.set_uint(OptionNumber::CONTENT_FORMAT, content_format);
        self.execute(req).await
    }

    /// Issue a PUT with a body and its content format.
    pub async fn put(
        &self,
        url: &str,
        content_format: u64,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, ClientError> {
        let mut req = Request::new("PUT", url)?.with_body(body);
        req.options.set_uint(OptionNumber::CONTENT_FORMAT, content_format);
        self.execute(req).await
    }

    /// Issue a DELETE.
    pub async fn delete(&self, url: &str) -> Result<Response, ClientError> {
        self.execute(Request::new("DELETE", url)?).await
    }

    /// Register an observation: a GET with `Observe=0`. The returned
    /// response carries the current state; later notifications arrive via
    /// [`Response::next`]. The client timeout is not applied, since the
    /// stream is expected to outlive any single exchange.
    pub async fn observe(&self, url: &str) -> Result<Response, ClientError> {
        let mut req = Request::new("GET", url)?;
        req.options.set_uint(OptionNumber::OBSERVE, 0);
        self.execute_with_deadline(req, None).await
    }

    /// Cancel an observation: a GET with `Observe=1` on the same token,
    /// re-entering the existing interaction.
    pub async fn cancel_observe(&self, res: &Response) -> Result<Response, ClientError> {
        if !res.is_stream() {
            return Err(ClientError::NotObserving);
        }
        let mut req = res.request.clone().with_token(res.token.clone());
        req.options.set_uint(OptionNumber::OBSERVE, 1);
        self.execute(req).await
    }

    /// CoAP ping: a token-less Confirmable Empty message. The expected
    /// answer is an RST for our message-id, which the interaction reports
    /// as an unexpected-type error; anything else that still produced a
    /// reply counts as alive too.
    pub async fn ping(&self, url: &str) -> Result<(), ClientError> {
        match self.execute(Request::new("PING", url)?).await {
            Ok(_) => Ok(()),
            Err(ClientError::Transport(TransportError::Interaction(
                InteractionError::UnexpectedType {
                    got: MsgType::Reset,
                    ..
                },
            ))) => {
                debug!(url, "ping answered with RST");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Execute a prepared request, applying the client timeout.
    pub async fn execute(&self, req: Request) -> Result<Response, ClientError> {
        self.execute_with_deadline(req, self.timeout).await
    }

    async fn execute_with_deadline(
        &self,
        mut req: Request,
        timeout: Option<Duration>,
    ) -> Result<Response, ClientError> {
        let limit = self.max_parallel_requests;
        if limit != 0 && self.running.fetch_add(1, Ordering::AcqRel) >= limit {
            self.running.fetch_sub(1, Ordering::AcqRel);
            return Err(ClientError::TooManyRequests(limit));
        }

        if let Some(timeout) = timeout {
            req.context = req.context.with_timeout(timeout);
        }

        let result = self.transport.round_trip(&req).await;
        if limit != 0 {
            self.running.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(result?)
    }
}
