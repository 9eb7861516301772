//! Tokens and message-id allocation.
//!
//! A token correlates every message of one interaction; the generator must
//! never hand out the same token twice while an interaction with it is
//! still live, because tokens are the demux key on the connection.

use rand::RngCore;
use std::fmt;
use std::sync::Mutex;

/// Maximum token length allowed by the wire format.
pub const MAX_TOKEN_LEN: usize = 8;

/// An opaque 0-8 byte interaction identifier. Equality is byte equality.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// The zero-length token used by Empty messages (ping, bare ACK/RST).
    pub fn empty() -> Self {
        Token(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Token {
    fn from(bytes: Vec<u8>) -> Self {
        Token(bytes)
    }
}

impl From<&[u8]> for Token {
    fn from(bytes: &[u8]) -> Self {
        Token(bytes.to_vec())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(0x{})", self)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "-");
        }
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Source of fresh tokens. Implementations must be thread-safe.
pub trait TokenGenerator: Send + Sync {
    fn next_token(&self) -> Token;
}

/// Production token source: random bytes with the first byte overwritten by
/// a wrapping sequence counter, so two live tokens can never collide even if
/// the random source repeats.
pub struct RandomTokenGenerator {
    len: usize,
    seq: Mutex<u8>,
}

impl RandomTokenGenerator {
    pub fn new() -> Self {
        Self::with_len(4)
    }

    /// Use `len` byte tokens (clamped to 1..=8).
    pub fn with_len(len: usize) -> Self {
        Self {
            len: len.clamp(1, MAX_TOKEN_LEN),
            seq: Mutex::new(0),
        }
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn next_token(&self) -> Token {
        let mut bytes = vec![0u8; self.len];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut seq = self.seq.lock().expect("token sequence lock poisoned");
        *seq = seq.wrapping_add(1);
        bytes[0] = *seq;
        Token(bytes)
    }
}

/// Test token source: single-byte tokens counting up from 1, so tests can
/// predict them.
#[derive(Default)]
pub struct CountingTokenGenerator {
    seq: Mutex<u8>,
}

impl CountingTokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenGenerator for CountingTokenGenerator {
    fn next_token(&self) -> Token {
        let mut seq = self.seq.lock().expect("token sequence lock poisoned");
        *seq = seq.wrapping_add(1);
        Token(vec![*seq])
    }
}

/// Message-id allocator: a locked, wrapping u16 counter starting at zero,
/// so the first allocated id is 1.
#[derive(Default)]
pub struct MessageIdGenerator {
    last: Mutex<u16>,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u16 {
        let mut last = self.last.lock().expect("message id lock poisoned");
        *last = last.wrapping_add(1);
        *last
    }
}
