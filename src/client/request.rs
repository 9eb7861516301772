//! Requests, shaped like an HTTP client's for familiarity.

use std::fmt;
use url::Url;

use super::ClientError;
use crate::context::ReqContext;
use crate::msg::{Code, Options, Token};

/// The request methods a client can issue. `Ping` maps to a token-less
/// Confirmable Empty message rather than a method code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Ping,
}

impl Method {
    /// Parse the conventional uppercase name.
    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "PING" => Some(Method::Ping),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Ping => "PING",
        }
    }

    /// The request code carried on the wire.
    pub fn code(&self) -> Code {
        match self {
            Method::Get => Code::GET,
            Method::Post => Code::POST,
            Method::Put => Code::PUT,
            Method::Delete => Code::DELETE,
            Method::Ping => Code::EMPTY,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A CoAP request to be sent by a client.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    /// Confirmable requests are retransmitted until acknowledged.
    pub confirmable: bool,
    /// `coap+uart://<port>/<path>?<query>` or `coap+udp://host:port/...`.
    pub url: Url,
    pub options: Options,
    pub body: Vec<u8>,
    /// Explicit token, set when re-entering an existing interaction
    /// (observe cancellation). Freshly allocated otherwise.
    pub token: Option<Token>,
    pub context: ReqContext,
}

impl Request {
    /// Build a request, validating the method name and URL.
    pub fn new(method: &str, url: &str) -> Result<Request, ClientError> {
        let method = Method::parse(method)
            .ok_or_else(|| ClientError::InvalidMethod(method.to_string()))?;
        let url = Url::parse(url)?;
        Ok(Request {
            method,
            confirmable: true,
            url,
            options: Options::new(),
            body: Vec::new(),
            token: None,
            context: ReqContext::background(),
        })
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_context(mut self, context: ReqContext) -> Self {
        self.context = context;
        self
    }

    pub fn non_confirmable(mut self) -> Self {
        self.confirmable = false;
        self
    }
}
