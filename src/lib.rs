//! coapline: a CoAP (RFC 7252) client with Observe (RFC 7641) support,
//! speaking CoAP over framed byte transports - SlipMux on serial lines,
//! plain datagrams over UDP.
//!
//! The layering, bottom up: [`msg`] is the binary codec, [`framing`] turns
//! byte streams into atomic packets, [`connection`] multiplexes concurrent
//! interactions over one framed link, [`transport`] builds requests and
//! drives round trips, and [`client`] is the HTTP-client-shaped surface.

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod framing;
pub mod msg;
pub mod transport;

// Re-export message types
pub use msg::{
    option_def, register_option, Code, CountingTokenGenerator, Message, MessageError,
    MessageIdGenerator, MsgType, OptionDef, OptionNumber, Options, RandomTokenGenerator, Token,
    TokenGenerator, ValueFormat,
};

// Re-export config types
pub use config::{Config, ConfigError, Parity, StopBits, TransportConfig, UartConfig, UdpConfig};

// Re-export framing types
pub use framing::{FrameReader, FrameWriter, FramingError};

// Re-export connection types
pub use connection::{Connection, ConnectionError, Interaction, InteractionError};

// Re-export transport types
pub use transport::{
    Connect, ConnectorError, PortOpen, PortStreams, Transport, TransportError, UartConnector,
    UdpConnector, UART_SCHEME, UDP_SCHEME,
};

// Re-export client types
pub use client::{Client, ClientError, Method, Request, Response};

// Re-export context types
pub use context::{CancelHandle, ReqContext};
