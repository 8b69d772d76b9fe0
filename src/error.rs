//! Error types for WS-Security message processing.

use crate::config::SoapVersion;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while securing or verifying a message.
#[derive(Error, Debug)]
pub enum WsSecurityError {
    /// An operation was invoked in a lifecycle state that forbids it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Plaintext was requested from an encrypted element that is not set up for decryption.
    #[error("Bad encryption state: {0}")]
    BadEncryptionState(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Required argument missing: {0}")]
    ArgumentNull(&'static str),

    #[error("Index {index} is out of range (count: {count})")]
    IndexRange { index: usize, count: usize },

    #[error("Cryptographic failure: {0}")]
    Cryptographic(String),

    /// Malformed, oversized or duplicate wire content.
    #[error("Security format error: {0}")]
    SecurityFormat(String),

    /// General security processing failure.
    #[error("Message security error: {0}")]
    MessageSecurity(String),

    #[error("Replay detected: {0}")]
    ReplayDetected(String),

    #[error("Message expired: {0}")]
    MessageExpired(String),

    #[error("Operation timed out after {budget:?}")]
    Timeout { budget: Duration },

    #[error("XML error: {0}")]
    XmlParse(#[from] quick_xml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsSecurityError {
    /// True for the general security failure and its distinguished subtypes.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::MessageSecurity(_) | Self::ReplayDetected(_) | Self::MessageExpired(_)
        )
    }

    /// True when the failure was raised by replay detection, so callers can audit it separately.
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::ReplayDetected(_))
    }

    /// WS-Security fault code reported to the peer for this error.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            Self::SecurityFormat(_) | Self::XmlParse(_) => FaultCode::InvalidSecurity,
            Self::Cryptographic(_) => FaultCode::FailedCheck,
            Self::MessageExpired(_) => FaultCode::MessageExpired,
            Self::ReplayDetected(_) => FaultCode::FailedAuthentication,
            Self::MessageSecurity(_) => FaultCode::FailedCheck,
            _ => FaultCode::InvalidSecurity,
        }
    }
}

impl From<base64::DecodeError> for WsSecurityError {
    fn from(e: base64::DecodeError) -> Self {
        WsSecurityError::SecurityFormat(format!("invalid base64 content: {}", e))
    }
}

impl From<quick_xml::events::attributes::AttrError> for WsSecurityError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        WsSecurityError::XmlParse(e.into())
    }
}

pub type Result<T, E = WsSecurityError> = std::result::Result<T, E>;

/// WS-Security 1.0 fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// An unsupported token was provided
    UnsupportedSecurityToken,
    /// An unsupported signature or encryption algorithm was used
    UnsupportedAlgorithm,
    /// An error was discovered processing the security header
    InvalidSecurity,
    /// An invalid security token was provided
    InvalidSecurityToken,
    /// The security token could not be authenticated or authorized
    FailedAuthentication,
    /// The signature or decryption was invalid
    FailedCheck,
    /// Referenced security token could not be retrieved
    SecurityTokenUnavailable,
    /// The message has expired
    MessageExpired,
}

impl FaultCode {
    /// Qualified fault code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedSecurityToken => "wsse:UnsupportedSecurityToken",
            Self::UnsupportedAlgorithm => "wsse:UnsupportedAlgorithm",
            Self::InvalidSecurity => "wsse:InvalidSecurity",
            Self::InvalidSecurityToken => "wsse:InvalidSecurityToken",
            Self::FailedAuthentication => "wsse:FailedAuthentication",
            Self::FailedCheck => "wsse:FailedCheck",
            Self::SecurityTokenUnavailable => "wsse:SecurityTokenUnavailable",
            Self::MessageExpired => "wsse:MessageExpired",
        }
    }

    /// Reason text sent to the peer. Deliberately generic.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedSecurityToken => "An unsupported token was provided",
            Self::UnsupportedAlgorithm => "An unsupported signature or encryption algorithm was used",
            Self::InvalidSecurity => "An error was discovered processing the <wsse:Security> header",
            Self::InvalidSecurityToken => "An invalid security token was provided",
            Self::FailedAuthentication => "The security token could not be authenticated or authorized",
            Self::FailedCheck => "The signature or decryption was invalid",
            Self::SecurityTokenUnavailable => "Referenced security token could not be retrieved",
            Self::MessageExpired => "The message has expired",
        }
    }
}

/// Generate a SOAP Fault for a security processing failure.
pub fn soap_fault_response(error: &WsSecurityError, version: SoapVersion) -> String {
    let code = error.fault_code();
    match version {
        SoapVersion::Soap11 => soap_11_fault(code),
        SoapVersion::Soap12 => soap_12_fault(code),
    }
}

fn soap_11_fault(code: FaultCode) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:wsse="{}">
  <soap:Body>
    <soap:Fault>
      <faultcode>{}</faultcode>
      <faultstring>{}</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        crate::names::WSSE_NS,
        code.as_str(),
        xml_escape(code.reason()),
    )
}

fn soap_12_fault(code: FaultCode) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsse="{}">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:Sender</soap:Value>
        <soap:Subcode>
          <soap:Value>{}</soap:Value>
        </soap:Subcode>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{}</soap:Text>
      </soap:Reason>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        crate::names::WSSE_NS,
        code.as_str(),
        xml_escape(code.reason()),
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
