//! WS-Security message protection for Zentinel SOAP services.
//!
//! Builds and verifies the `wsse:Security` header of SOAP messages.
//!
//! # Features
//!
//! - Send side: tokens, timestamp, primary and endorsing signatures,
//!   signature confirmations and encryption assembled in the configured
//!   protection order
//! - Receive side: positional header parsing, key unwrapping, lazy
//!   decryption, signature classification (strict or lax) and verification
//! - Correlation state threaded from a request to its reply
//! - Replay detection and timestamp freshness checks
//! - A two-phase secure-then-send pipeline with a shared timeout budget
//!
//! # Example
//!
//! ```ignore
//! use zentinel_wss::{MessageSecurityConfig, MessageSecurityProtocol, Message, SoapVersion};
//!
//! let protocol = MessageSecurityProtocol::new(Arc::new(config), resolver)?
//!     .with_signing_token(token);
//! let mut message = Message::new(SoapVersion::Soap11, body);
//! let correlation = protocol.secure_outgoing_message(&mut message, None)?;
//! ```

pub mod classifier;
pub mod config;
pub mod correlation;
pub mod crypto;
pub mod encryption;
pub mod envelope;
pub mod error;
pub mod header_entry;
pub mod message;
pub mod names;
pub mod pipeline;
pub mod protocol;
pub mod receive;
pub mod reference_list;
pub mod replay;
pub mod send;
pub mod send_container;
pub mod signature;
pub mod timestamp;
pub mod token;
mod xml;

pub use classifier::{classifier_for, HeaderClassifier, LaxClassifier, StrictClassifier};
pub use config::{MessageSecurityConfig, ProtectionOrder, SecurityMode, SoapVersion};
pub use correlation::{CorrelationState, SignatureConfirmations};
pub use encryption::{EncryptedElement, EncryptionState};
pub use envelope::parse_envelope;
pub use error::{soap_fault_response, FaultCode, Result, WsSecurityError};
pub use header_entry::{BindingMode, EntrySummary, HeaderCategory, HeaderElementEntry};
pub use message::{DelegatingHeader, Message, MessageHeader};
pub use pipeline::{Completion, SecureAndSendPipeline, SecureStep, SendOperation, TransportSender};
pub use protocol::MessageSecurityProtocol;
pub use receive::{inspect_security_header, ReceiveSecurityHeader, ReceivedSecurityHeader};
pub use reference_list::ReferenceList;
pub use send::SendSecurityHeader;
pub use send_container::SendHeaderElementContainer;
pub use token::{
    InMemoryTokenResolver, KeyWrapCredential, SecurityToken, SecurityTokenAttachmentMode,
    SecurityTokenSpecification, SupportingTokenSpecification, TokenResolver,
};
