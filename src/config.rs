//! Configuration types for WS-Security message processing.

use crate::error::{Result, WsSecurityError};
use crate::names::algorithms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for configured lifetimes, skews and windows (100 years).
pub const MAX_INTERVAL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Main configuration for message-level security.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSecurityConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Algorithm suite used to sign, encrypt and wrap keys
    pub algorithm_suite: AlgorithmSuiteConfig,

    /// Timestamp generation and validation
    pub timestamp: TimestampConfig,

    /// Replay detection
    pub replay: ReplayConfig,

    /// Secure-then-send pipeline settings
    pub pipeline: PipelineConfig,
}

impl Default for MessageSecurityConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            algorithm_suite: AlgorithmSuiteConfig::default(),
            timestamp: TimestampConfig::default(),
            replay: ReplayConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl MessageSecurityConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| WsSecurityError::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.settings.max_buffer_size == 0 {
            return Err(WsSecurityError::Config(
                "settings.max_buffer_size must be greater than zero".into(),
            ));
        }
        if self.settings.max_message_size < self.settings.max_buffer_size {
            return Err(WsSecurityError::Config(
                "settings.max_message_size must not be smaller than max_buffer_size".into(),
            ));
        }
        self.algorithm_suite.validate()?;
        if self.timestamp.time_to_live_secs == 0 {
            return Err(WsSecurityError::Config(
                "timestamp.time_to_live_secs must be greater than zero".into(),
            ));
        }
        for (name, secs) in [
            ("timestamp.time_to_live_secs", self.timestamp.time_to_live_secs),
            ("timestamp.max_clock_skew_secs", self.timestamp.max_clock_skew_secs),
            ("replay.window_secs", self.replay.window_secs),
        ] {
            if secs > MAX_INTERVAL_SECS {
                return Err(WsSecurityError::Config(format!(
                    "{} must not exceed {} seconds, got {}",
                    name, MAX_INTERVAL_SECS, secs
                )));
            }
        }
        if self.replay.enabled && self.replay.max_cached_entries == 0 {
            return Err(WsSecurityError::Config(
                "replay.max_cached_entries must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// True when full message security (not transport-only) is in effect.
    pub fn message_security(&self) -> bool {
        self.settings.security_mode == SecurityMode::Message
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Whether messages carry a primary signature or only supporting tokens
    pub security_mode: SecurityMode,

    /// Relative order of signing and encryption
    pub protection_order: ProtectionOrder,

    /// Header classification policy for received messages
    pub header_layout: HeaderLayout,

    /// Maximum decoded size of a single cipher value (bytes)
    pub max_buffer_size: usize,

    /// Maximum envelope size accepted by the parser (bytes)
    pub max_message_size: usize,

    /// Add a wsu:Timestamp to outgoing security headers
    pub include_timestamp: bool,

    /// Track and validate signature confirmations across request and reply
    pub require_signature_confirmation: bool,

    /// Actor/role of the emitted security header
    pub actor: Option<String>,

    /// mustUnderstand flag of the emitted security header
    pub must_understand: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            security_mode: SecurityMode::Message,
            protection_order: ProtectionOrder::SignBeforeEncrypt,
            header_layout: HeaderLayout::Strict,
            max_buffer_size: 65_536, // 64KB
            max_message_size: 1_048_576, // 1MB
            include_timestamp: true,
            require_signature_confirmation: false,
            actor: None,
            must_understand: true,
        }
    }
}

/// Security mode of the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Body and headers are protected by a primary signature
    #[default]
    Message,
    /// The transport protects the message; the header only carries supporting tokens
    Transport,
}

/// Relative sequencing of sign and encrypt operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionOrder {
    /// Sign plaintext, then encrypt content; signatures stay visible
    #[default]
    SignBeforeEncrypt,
    /// Sign plaintext, then encrypt content and the primary signature
    SignBeforeEncryptAndEncryptSignature,
    /// Encrypt content, then sign the ciphertext
    EncryptBeforeSign,
}

impl ProtectionOrder {
    /// Whether the primary signature is itself encrypted.
    pub fn encrypts_signature(&self) -> bool {
        matches!(self, Self::SignBeforeEncryptAndEncryptSignature)
    }

    /// Whether signatures are computed over plaintext content.
    pub fn signs_plaintext(&self) -> bool {
        !matches!(self, Self::EncryptBeforeSign)
    }
}

/// Header classification policy applied to received security headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderLayout {
    /// The first signature in wire order is the primary signature
    #[default]
    Strict,
    /// The primary signature is the first one that does not sign another signature
    Lax,
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

/// Algorithm identifiers and key sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmSuiteConfig {
    /// Symmetric content key length in bits
    pub symmetric_key_length: usize,

    /// Derived signature key length in bits. Reserved for derived-key
    /// tokens; the default provider signs with the token key directly.
    pub signature_key_derivation_length: usize,

    /// Derived encryption key length in bits. Reserved for derived-key
    /// tokens; content keys use `symmetric_key_length`.
    pub encryption_key_derivation_length: usize,

    /// Canonicalization algorithm URI
    pub canonicalization: String,

    /// Digest algorithm URI
    pub digest: String,

    /// Symmetric signature algorithm URI
    pub symmetric_signature: String,

    /// Content encryption algorithm URI
    pub encryption: String,

    /// Key wrap algorithm URI
    pub key_wrap: String,
}

impl Default for AlgorithmSuiteConfig {
    fn default() -> Self {
        Self {
            symmetric_key_length: 256,
            signature_key_derivation_length: 192,
            encryption_key_derivation_length: 256,
            canonicalization: algorithms::EXCLUSIVE_C14N.to_string(),
            digest: algorithms::SHA256.to_string(),
            symmetric_signature: algorithms::HMAC_SHA256.to_string(),
            encryption: algorithms::AES256_GCM.to_string(),
            key_wrap: algorithms::AES256_GCM.to_string(),
        }
    }
}

impl AlgorithmSuiteConfig {
    /// The content key must fit the configured encryption algorithm.
    fn validate(&self) -> Result<()> {
        let required = match self.encryption.as_str() {
            algorithms::AES256_GCM => 256,
            other => {
                return Err(WsSecurityError::Config(format!(
                    "unsupported encryption algorithm: {}",
                    other
                )))
            }
        };
        if self.symmetric_key_length != required {
            return Err(WsSecurityError::Config(format!(
                "symmetric_key_length {} does not match {} (requires {})",
                self.symmetric_key_length, self.encryption, required
            )));
        }
        Ok(())
    }
}

/// Timestamp configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Reject received messages without a timestamp
    pub require_timestamp: bool,

    /// Lifetime written into outgoing timestamps (seconds)
    pub time_to_live_secs: u64,

    /// Tolerated clock difference between peers (seconds)
    pub max_clock_skew_secs: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            require_timestamp: false,
            time_to_live_secs: 300, // 5 minutes
            max_clock_skew_secs: 300,
        }
    }
}

/// Replay detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Reject messages whose primary signature value was already seen
    pub enabled: bool,

    /// Maximum number of remembered signature values
    pub max_cached_entries: usize,

    /// How long a signature value is remembered (seconds)
    pub window_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cached_entries: 10_000,
            window_secs: 600,
        }
    }
}

/// Secure-then-send pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default timeout budget shared by both pipeline phases (milliseconds)
    pub send_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 60_000,
        }
    }
}

impl PipelineConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
