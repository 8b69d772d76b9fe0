//! Message security protocol facade.
//!
//! Owns the configuration, collaborators and credentials of one endpoint and
//! runs the send and receive sides of the security header pipeline.

use crate::config::{MessageSecurityConfig, SoapVersion};
use crate::correlation::CorrelationState;
use crate::crypto::{CryptoProvider, DefaultCryptoProvider};
use crate::error::{soap_fault_response, Result, WsSecurityError};
use crate::message::Message;
use crate::pipeline::{Completion, SecureOutput, SecureStep};
use crate::receive::{ReceiveSecurityHeader, ReceivedSecurityHeader};
use crate::replay::ReplayCache;
use crate::send::SendSecurityHeader;
use crate::token::{KeyWrapCredential, SecurityToken, SupportingTokenSpecification, TokenResolver};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// WS-Security endpoint: secures outgoing and verifies incoming messages.
pub struct MessageSecurityProtocol {
    config: Arc<MessageSecurityConfig>,
    crypto: Arc<dyn CryptoProvider>,
    resolver: Arc<dyn TokenResolver>,
    signing_token: Option<Arc<SecurityToken>>,
    supporting_tokens: Vec<SupportingTokenSpecification>,
    encryption: Option<KeyWrapCredential>,
    replay_cache: Option<Mutex<ReplayCache>>,
    /// Counters
    messages_secured: AtomicU64,
    messages_verified: AtomicU64,
    messages_rejected: AtomicU64,
}

/// Snapshot of the protocol counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub messages_secured: u64,
    pub messages_verified: u64,
    pub messages_rejected: u64,
}

impl MessageSecurityProtocol {
    /// Create a protocol instance with the default crypto provider.
    pub fn new(config: Arc<MessageSecurityConfig>, resolver: Arc<dyn TokenResolver>) -> Result<Self> {
        config.validate()?;
        let replay_cache = if config.replay.enabled {
            Some(Mutex::new(ReplayCache::new(&config.replay)?))
        } else {
            None
        };
        info!(
            security_mode = ?config.settings.security_mode,
            protection_order = ?config.settings.protection_order,
            header_layout = ?config.settings.header_layout,
            replay_detection = replay_cache.is_some(),
            "Message security protocol initialized"
        );
        Ok(Self {
            config,
            crypto: Arc::new(DefaultCryptoProvider),
            resolver,
            signing_token: None,
            supporting_tokens: Vec::new(),
            encryption: None,
            replay_cache,
            messages_secured: AtomicU64::new(0),
            messages_verified: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
        })
    }

    pub fn with_crypto_provider(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    /// Token that keys the primary signature of outgoing messages.
    pub fn with_signing_token(mut self, token: Arc<SecurityToken>) -> Self {
        self.signing_token = Some(token);
        self
    }

    pub fn with_supporting_tokens(mut self, tokens: Vec<SupportingTokenSpecification>) -> Self {
        self.supporting_tokens = tokens;
        self
    }

    /// Encrypt outgoing content for the holder of `credential`.
    pub fn with_encryption(mut self, credential: KeyWrapCredential) -> Self {
        self.encryption = Some(credential);
        self
    }

    pub fn config(&self) -> &MessageSecurityConfig {
        &self.config
    }

    /// Default budget for the secure-and-send pipeline.
    pub fn send_timeout(&self) -> Duration {
        self.config.pipeline.send_timeout()
    }

    /// Add a security header to `message`.
    ///
    /// `correlation` is the state of the request being answered, if any.
    pub fn secure_outgoing_message(
        &self,
        message: &mut Message,
        correlation: Option<Arc<CorrelationState>>,
    ) -> Result<Arc<CorrelationState>> {
        let mut header = SendSecurityHeader::new(&self.config, self.crypto.as_ref())
            .with_supporting_tokens(self.supporting_tokens.clone())
            .with_correlation(correlation);
        if let Some(token) = &self.signing_token {
            header = header.with_signing_token(token.clone());
        }
        if let Some(credential) = &self.encryption {
            header = header.with_encryption(credential);
        }
        let state = header.secure(message)?;
        self.messages_secured.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(state))
    }

    /// Verify the security header of `message`.
    pub fn verify_incoming_message(
        &self,
        message: &Message,
        correlation: Option<&CorrelationState>,
    ) -> Result<ReceivedSecurityHeader> {
        let mut receiver =
            ReceiveSecurityHeader::new(&self.config, self.crypto.as_ref(), self.resolver.as_ref());
        if let Some(cache) = &self.replay_cache {
            receiver = receiver.with_replay_cache(cache);
        }
        match receiver.process(message, correlation) {
            Ok(received) => {
                self.messages_verified.fetch_add(1, Ordering::Relaxed);
                Ok(received)
            }
            Err(e) => {
                self.messages_rejected.fetch_add(1, Ordering::Relaxed);
                if e.is_replay() {
                    warn!(error = %e, "Replayed message rejected");
                } else {
                    warn!(error = %e, "Message rejected");
                }
                Err(e)
            }
        }
    }

    /// SOAP fault to return to the peer for `error`.
    pub fn create_fault(&self, error: &WsSecurityError, version: SoapVersion) -> String {
        debug!(fault_code = error.fault_code().as_str(), "Building security fault");
        soap_fault_response(error, version)
    }

    pub fn stats(&self) -> ProtocolStats {
        ProtocolStats {
            messages_secured: self.messages_secured.load(Ordering::Relaxed),
            messages_verified: self.messages_verified.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
        }
    }
}

impl SecureStep for MessageSecurityProtocol {
    fn secure<'a>(
        &'a self,
        mut message: Message,
        correlation: Option<Arc<CorrelationState>>,
        _timeout: Duration,
    ) -> Completion<'a, Result<SecureOutput>> {
        let result = self.secure_outgoing_message(&mut message, correlation);
        Completion::Ready(result.map(|state| SecureOutput {
            message: Some(message),
            correlation_state: Some(state),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{SecureAndSendPipeline, SendOperation, TransportSender};
    use crate::token::{InMemoryTokenResolver, SecurityTokenSpecification};
    use parking_lot::Mutex as SyncMutex;

    fn client_token() -> Arc<SecurityToken> {
        Arc::new(SecurityToken::new("client", "urn:zentinel:token", b"client".to_vec(), vec![1; 32]))
    }

    fn protocol() -> MessageSecurityProtocol {
        let resolver = InMemoryTokenResolver::new();
        resolver.add_token(SecurityTokenSpecification::new(client_token(), vec![]));
        MessageSecurityProtocol::new(Arc::new(MessageSecurityConfig::default()), Arc::new(resolver))
            .unwrap()
            .with_signing_token(client_token())
    }

    fn message() -> Message {
        Message::new(SoapVersion::Soap11, "<m:Ping xmlns:m=\"urn:test\"/>")
    }

    #[derive(Default)]
    struct CapturingSender {
        sent: SyncMutex<Vec<Message>>,
    }

    impl TransportSender for CapturingSender {
        fn send<'a>(&'a self, message: Message, _timeout: Duration) -> Completion<'a, Result<()>> {
            self.sent.lock().push(message);
            Completion::Ready(Ok(()))
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MessageSecurityConfig::default();
        config.settings.max_buffer_size = 0;
        let result =
            MessageSecurityProtocol::new(Arc::new(config), Arc::new(InMemoryTokenResolver::new()));
        assert!(matches!(result, Err(WsSecurityError::Config(_))));
    }

    #[test]
    fn test_secure_then_verify_updates_stats() {
        let protocol = protocol();
        let mut message = message();
        let state = protocol.secure_outgoing_message(&mut message, None).unwrap();
        assert_eq!(state.security_token().unwrap().id(), "client");

        protocol.verify_incoming_message(&message, None).unwrap();
        let err = protocol.verify_incoming_message(&message, None).unwrap_err();
        assert!(err.is_replay());

        assert_eq!(
            protocol.stats(),
            ProtocolStats {
                messages_secured: 1,
                messages_verified: 1,
                messages_rejected: 1,
            }
        );
    }

    #[test]
    fn test_fault_for_replay() {
        let protocol = protocol();
        let fault = protocol.create_fault(
            &WsSecurityError::ReplayDetected("seen".into()),
            SoapVersion::Soap11,
        );
        assert!(fault.contains("FailedAuthentication"));
        assert!(!fault.contains("seen"));
    }

    #[test]
    fn test_protocol_as_pipeline_secure_step() {
        let protocol = protocol();
        let sender = CapturingSender::default();
        let pipeline = SecureAndSendPipeline::new(&protocol, &sender);

        match pipeline.begin(message(), None, protocol.send_timeout()) {
            SendOperation::CompletedSynchronously(result) => assert!(result.unwrap().is_some()),
            SendOperation::InFlight(_) => panic!("protocol secures synchronously"),
        }
        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(protocol.verify_incoming_message(&sent[0], None).is_ok());
    }
}
