//! # Configuration Management
//!
//! Centralized configuration for the transport core.
//!
//! Every knob the owning connection layer can turn lives here: retransmission timing,
//! fragmentation limits, payload transforms, key exchange strength and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`RELIABLE_PROTOCOL_*`)
//! - Direct instantiation with defaults
//!
//! ## Wire Constants
//! All multi-byte header fields are big-endian. Header sizes are fixed (see
//! [`crate::core::header`]).

use crate::error::{ProtocolError, Result};
use crate::protocol::dh::KeySize;
use crate::utils::compression::CompressionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed payload size of a single frame (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Hard cap on a reassembled fragment set (1 MiB)
pub const MAX_REASSEMBLED_SIZE: usize = 1024 * 1024;

/// Default maximum datagram unit size
pub const DEFAULT_MAX_UNIT_SIZE: usize = 1200;

/// Whether to enable compression by default
pub const ENABLE_COMPRESSION: bool = false;

/// Whether to enable encryption by default
pub const ENABLE_ENCRYPTION: bool = true;

const ENV_PREFIX: &str = "RELIABLE_PROTOCOL_";

/// Top-level configuration for one protocol instance
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Retransmission timing and ordering
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Datagram fragmentation and reassembly limits
    #[serde(default)]
    pub fragmentation: FragmentationConfig,

    /// Compression and encryption of payloads
    #[serde(default)]
    pub transform: TransformConfig,

    /// Key exchange settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("INITIAL_RTO_MS")? {
            config.reliability.initial_rto = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MIN_RTO_MS")? {
            config.reliability.min_rto = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MAX_RTO_MS")? {
            config.reliability.max_rto = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("MAX_ATTEMPTS")? {
            config.reliability.max_attempts = attempts;
        }
        if let Some(mtu) = env_parse::<usize>("MAX_UNIT_SIZE")? {
            config.fragmentation.max_unit_size = mtu;
        }
        if let Some(ms) = env_parse::<u64>("REASSEMBLY_TIMEOUT_MS")? {
            config.fragmentation.reassembly_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse::<usize>("MAX_REASSEMBLED_SIZE")? {
            config.fragmentation.max_reassembled_size = size;
        }
        if let Some(ratio) = env_parse::<f64>("COMPRESSION_RATIO")? {
            config.transform.compression_ratio = ratio;
        }
        if let Some(bits) = env_parse::<u32>("KEY_SIZE")? {
            config.security.key_size = KeySize::from_bits(bits).ok_or_else(|| {
                ProtocolError::ConfigError(format!("Unsupported key size: {bits}"))
            })?;
        }
        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.reliability.validate());
        errors.extend(self.fragmentation.validate());
        errors.extend(self.transform.validate());
        errors.extend(self.security.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}

/// Retransmission timing and receive-side ordering
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// RTO used before the first round-trip sample
    #[serde(with = "duration_serde")]
    pub initial_rto: Duration,

    /// Lower clamp for the computed RTO
    #[serde(with = "duration_serde")]
    pub min_rto: Duration,

    /// Upper clamp for the computed RTO
    #[serde(with = "duration_serde")]
    pub max_rto: Duration,

    /// Clock granularity term of the RTO formula
    #[serde(with = "duration_serde")]
    pub clock_granularity: Duration,

    /// Retransmissions allowed per reliable message before the connection fails
    pub max_attempts: u32,

    /// Period of the retry scan
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Number of recently accepted sequence numbers kept for duplicate detection
    pub duplicate_window: usize,

    /// How far past the next expected sequence an inbound message may be buffered
    pub max_out_of_order: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(250),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_millis(5000),
            clock_granularity: Duration::from_millis(10),
            max_attempts: 5,
            tick_interval: Duration::from_millis(50),
            duplicate_window: 128,
            max_out_of_order: 1024,
        }
    }
}

impl ReliabilityConfig {
    /// Validate reliability configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.min_rto.is_zero() {
            errors.push("Minimum RTO must be greater than 0".to_string());
        }
        if self.min_rto > self.max_rto {
            errors.push(format!(
                "Minimum RTO ({}ms) exceeds maximum RTO ({}ms)",
                self.min_rto.as_millis(),
                self.max_rto.as_millis()
            ));
        }
        if self.initial_rto < self.min_rto || self.initial_rto > self.max_rto {
            errors.push(format!(
                "Initial RTO ({}ms) must lie within [min_rto, max_rto]",
                self.initial_rto.as_millis()
            ));
        }
        if self.max_rto.as_secs() > 120 {
            errors.push("Maximum RTO too long (maximum: 120s)".to_string());
        }
        if self.max_attempts == 0 {
            errors.push("Max attempts must be greater than 0".to_string());
        } else if self.max_attempts > 64 {
            errors.push(format!(
                "Max attempts too high: {} (maximum: 64)",
                self.max_attempts
            ));
        }
        if self.tick_interval.as_millis() < 1 {
            errors.push("Tick interval too short (minimum: 1ms)".to_string());
        } else if self.tick_interval > self.min_rto {
            errors.push("Tick interval should not exceed the minimum RTO".to_string());
        }
        if self.duplicate_window == 0 {
            errors.push("Duplicate window must be greater than 0".to_string());
        }
        if self.max_out_of_order == 0 {
            errors.push("Out-of-order window must be greater than 0".to_string());
        }

        errors
    }
}

/// Fragmentation and reassembly limits for datagram transports
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FragmentationConfig {
    /// Largest datagram the transport carries unfragmented
    pub max_unit_size: usize,

    /// Idle time after which an incomplete fragment set is discarded
    #[serde(with = "duration_serde")]
    pub reassembly_timeout: Duration,

    /// Hard cap on the aggregate size of one fragment set
    pub max_reassembled_size: usize,

    /// Incomplete sets tracked per peer before the oldest is evicted
    pub max_concurrent_sets: usize,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            max_unit_size: DEFAULT_MAX_UNIT_SIZE,
            reassembly_timeout: Duration::from_secs(3),
            max_reassembled_size: MAX_REASSEMBLED_SIZE,
            max_concurrent_sets: 64,
        }
    }
}

impl FragmentationConfig {
    /// Validate fragmentation configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let overhead = crate::protocol::fragment::FRAGMENT_OVERHEAD;
        if self.max_unit_size <= overhead {
            errors.push(format!(
                "Max unit size {} cannot carry {} bytes of headers plus payload",
                self.max_unit_size, overhead
            ));
        } else if self.max_unit_size > 65_507 {
            errors.push(format!(
                "Max unit size too large: {} (maximum UDP payload: 65507)",
                self.max_unit_size
            ));
        }

        if self.reassembly_timeout.as_millis() < 100 {
            errors.push("Reassembly timeout too short (minimum: 100ms)".to_string());
        } else if self.reassembly_timeout.as_secs() > 60 {
            errors.push("Reassembly timeout too long (maximum: 60s)".to_string());
        }

        if self.max_reassembled_size == 0 {
            errors.push("Max reassembled size cannot be 0".to_string());
        } else if self.max_reassembled_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Max reassembled size {} exceeds max payload size {}",
                self.max_reassembled_size, MAX_PAYLOAD_SIZE
            ));
        }

        if self.max_concurrent_sets == 0 {
            errors.push("Max concurrent fragment sets must be greater than 0".to_string());
        }

        errors
    }
}

/// Transform configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Whether to enable compression
    pub compression_enabled: bool,

    /// Whether to enable encryption
    pub encryption_enabled: bool,

    /// Compression algorithm
    pub compression_kind: CompressionKind,

    /// Minimum payload size (bytes) before compression is attempted
    pub compression_threshold_bytes: usize,

    /// Compressed output is kept only when smaller than `ratio × original`
    pub compression_ratio: f64,

    /// Maximum allowed payload size in bytes
    pub max_payload_size: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            compression_enabled: ENABLE_COMPRESSION,
            encryption_enabled: ENABLE_ENCRYPTION,
            compression_kind: CompressionKind::Lz4,
            compression_threshold_bytes: 512,
            compression_ratio: 0.9,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl TransformConfig {
    /// Validate transform configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum: {} bytes)",
                self.max_payload_size, MAX_PAYLOAD_SIZE
            ));
        }

        if self.compression_enabled {
            if !(self.compression_ratio > 0.0 && self.compression_ratio <= 1.0) {
                errors.push(format!(
                    "Invalid compression ratio: {} (valid range: (0, 1])",
                    self.compression_ratio
                ));
            }
            if self.compression_threshold_bytes > self.max_payload_size {
                errors.push(
                    "Compression threshold cannot be larger than max payload size".to_string(),
                );
            }
        }

        errors
    }
}

/// Key exchange configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Diffie-Hellman modulus size
    pub key_size: KeySize,

    /// How long a handshake may stay unanswered
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_size: KeySize::Bits2048,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl SecurityConfig {
    /// Validate security configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 60 {
            errors.push("Handshake timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("reliable-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
