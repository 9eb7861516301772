//! Configuration: protocol timing, serial line parameters and UDP binding.
//!
//! Loaded from YAML files with a cascading priority system:
//! 1. `./coapline.yaml` (current directory - highest priority)
//! 2. `~/.config/coapline/coapline.yaml` (user config directory)
//! 3. `/etc/coapline/coapline.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files; unset values fall back to the RFC 7252 defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "coapline.yaml";

/// Initial retransmission timeout (RFC 7252 section 4.8).
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Spread factor applied to `ACK_TIMEOUT` (RFC 7252 section 4.8).
pub const ACK_RANDOM_FACTOR: f64 = 1.5;

/// Maximum number of retransmissions of a Confirmable request.
pub const MAX_RETRANSMIT: u32 = 4;

/// How long to wait for the separate response after an empty ACK.
pub const POSTPONED_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Informational: servers should confirm liveness within this interval
/// while an observe registration is active (RFC 7641).
pub const OBSERVE_MAX: Duration = Duration::from_secs(256);

/// Budget for the downstream consumer to accept one notification before the
/// observe is torn down with an RST.
pub const NOTIFY_GRACE: Duration = Duration::from_secs(5);

/// How long the receive loop waits on a stalled interaction before dropping
/// an inbound message.
pub const DELIVER_TIMEOUT: Duration = Duration::from_secs(3);

/// Idle time after which a cached connection is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Protocol timing configuration (`transport.*`). All durations in
/// milliseconds; unset values use the RFC defaults above.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Initial ACK timeout in ms (`ack_timeout_ms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,

    /// Multiplier on the ACK timeout (`ack_random_factor`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_random_factor: Option<f64>,

    /// Maximum retransmissions of a Confirmable request (`max_retransmit`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retransmit: Option<u32>,

    /// Wait for a separate response in ms (`postponed_response_timeout_ms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postponed_response_timeout_ms: Option<u64>,

    /// Per-notification delivery budget in ms (`notify_grace_ms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_grace_ms: Option<u64>,

    /// Inbound delivery stall budget in ms (`deliver_timeout_ms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_timeout_ms: Option<u64>,

    /// Connection idle close in ms (`idle_timeout_ms`). 0 disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl TransportConfig {
    /// The first-read timeout: `ACK_TIMEOUT * ACK_RANDOM_FACTOR`.
    pub fn ack_timeout(&self) -> Duration {
        let base = self
            .ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(ACK_TIMEOUT);
        base.mul_f64(self.ack_random_factor.unwrap_or(ACK_RANDOM_FACTOR))
    }

    pub fn max_retransmit(&self) -> u32 {
        self.max_retransmit.unwrap_or(MAX_RETRANSMIT)
    }

    pub fn postponed_response_timeout(&self) -> Duration {
        self.postponed_response_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(POSTPONED_RESPONSE_TIMEOUT)
    }

    pub fn notify_grace(&self) -> Duration {
        self.notify_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(NOTIFY_GRACE)
    }

    pub fn deliver_timeout(&self) -> Duration {
        self.deliver_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DELIVER_TIMEOUT)
    }

    /// Idle close interval; `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(IDLE_TIMEOUT),
        }
    }

    fn merge(&mut self, other: TransportConfig) {
        if other.ack_timeout_ms.is_some() {
            self.ack_timeout_ms = other.ack_timeout_ms;
        }
        if other.ack_random_factor.is_some() {
            self.ack_random_factor = other.ack_random_factor;
        }
        if other.max_retransmit.is_some() {
            self.max_retransmit = other.max_retransmit;
        }
        if other.postponed_response_timeout_ms.is_some() {
            self.postponed_response_timeout_ms = other.postponed_response_timeout_ms;
        }
        if other.notify_grace_ms.is_some() {
            self.notify_grace_ms = other.notify_grace_ms;
        }
        if other.deliver_timeout_ms.is_some() {
            self.deliver_timeout_ms = other.deliver_timeout_ms;
        }
        if other.idle_timeout_ms.is_some() {
            self.idle_timeout_ms = other.idle_timeout_ms;
        }
    }
}

/// Parity of the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    /// Parity bit always 1.
    Mark,
    /// Parity bit always 0.
    Space,
}

/// Stop bits of the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OneAndHalf,
    #[serde(rename = "2")]
    Two,
}

/// Serial line configuration (`uart.*`), handed to the port opener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UartConfig {
    /// Baud rate (`baud`). Defaults to 115200.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,

    /// Number of data bits (`data_bits`). Defaults to 8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<u8>,

    /// Parity (`parity`). Defaults to none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,

    /// Stop bits (`stop_bits`). Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<StopBits>,

    /// Blocking read quantum in ms (`read_timeout_ms`). Defaults to 100, the
    /// granularity at which cancellation becomes observable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

impl UartConfig {
    pub fn baud(&self) -> u32 {
        self.baud.unwrap_or(115_200)
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits.unwrap_or(8)
    }

    pub fn parity(&self) -> Parity {
        self.parity.unwrap_or_default()
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits.unwrap_or_default()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.unwrap_or(100))
    }

    fn merge(&mut self, other: UartConfig) {
        if other.baud.is_some() {
            self.baud = other.baud;
        }
        if other.data_bits.is_some() {
            self.data_bits = other.data_bits;
        }
        if other.parity.is_some() {
            self.parity = other.parity;
        }
        if other.stop_bits.is_some() {
            self.stop_bits = other.stop_bits;
        }
        if other.read_timeout_ms.is_some() {
            self.read_timeout_ms = other.read_timeout_ms;
        }
    }
}

/// UDP configuration (`udp.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Local bind address (`bind_addr`). Defaults to "0.0.0.0:0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
}

impl UdpConfig {
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or("0.0.0.0:0")
    }

    fn merge(&mut self, other: UdpConfig) {
        if other.bind_addr.is_some() {
            self.bind_addr = other.bind_addr;
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Protocol timing (`transport.*`).
    #[serde(default)]
    pub transport: TransportConfig,

    /// Serial line parameters (`uart.*`).
    #[serde(default)]
    pub uart: UartConfig,

    /// UDP parameters (`udp.*`).
    #[serde(default)]
    pub udp: UdpConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths, merging in
    /// priority order.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        Self::load_from_paths(&Self::search_paths())
    }

    /// Load configuration from specific paths. Later paths override earlier
    /// ones; missing files are skipped.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("/etc/coapline").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("coapline").join(CONFIG_FILENAME));
        }

        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one. Values set in `other`
    /// override values in `self`.
    pub fn merge(&mut self, other: Config) {
        self.transport.merge(other.transport);
        self.uart.merge(other.uart);
        self.udp.merge(other.udp);
    }
}
