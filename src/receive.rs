//! Processing of a received security header.
//!
//! [`ReceiveSecurityHeader::process`] runs the full verification:
//!
//! 1. parse the header children into positional entries
//! 2. unwrap encrypted keys and set up decryption of what they reference
//! 3. decrypt encrypted header elements in place
//! 4. authenticate tokens, then classify the signatures
//! 5. verify the primary and endorsing signatures
//! 6. settle token binding modes, freshness and confirmations, then record
//!    the message for replay detection
//!
//! The body is decrypted only when a digest or the caller needs it.

use crate::classifier::{classifier_for, HeaderClassifier};
use crate::config::MessageSecurityConfig;
use crate::correlation::{CorrelationState, SignatureConfirmations};
use crate::crypto::CryptoProvider;
use crate::encryption::{EncryptedElement, EncryptionState};
use crate::error::{Result, WsSecurityError};
use crate::header_entry::{
    check_unique_ids, read_entries, BindingMode, EntrySummary, HeaderElementEntry, HeaderItem,
};
use crate::message::{header_xml, Message};
use crate::names::{elements, WSSE_NS};
use crate::replay::ReplayCache;
use crate::signature::SignatureElement;
use crate::token::{
    KeyIdentifierClause, SecurityTokenAttachmentMode, SecurityTokenSpecification,
    SupportingTokenSpecification, TokenResolver,
};
use crate::xml::ElementParts;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verifier for the security header of incoming messages.
pub struct ReceiveSecurityHeader<'a> {
    config: &'a MessageSecurityConfig,
    crypto: &'a dyn CryptoProvider,
    resolver: &'a dyn TokenResolver,
    classifier: &'a dyn HeaderClassifier,
    replay_cache: Option<&'a Mutex<ReplayCache>>,
}

/// Outcome of a successful [`ReceiveSecurityHeader::process`].
#[derive(Debug)]
pub struct ReceivedSecurityHeader {
    entries: Vec<HeaderElementEntry>,
    raw_body: String,
    encrypted_body: Option<EncryptedElement>,
    primary_token: Option<SecurityTokenSpecification>,
    supporting_tokens: Vec<SupportingTokenSpecification>,
    correlation_state: Arc<CorrelationState>,
}

impl ReceivedSecurityHeader {
    /// Header entries in wire order, with their final binding modes.
    pub fn entries(&self) -> &[HeaderElementEntry] {
        &self.entries
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.entries.iter().map(HeaderElementEntry::summary).collect()
    }

    /// Number of entries classified with exactly `mode`.
    pub fn count_with_binding(&self, mode: BindingMode) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.binding_mode() == mode)
            .count()
    }

    /// Token that produced the primary signature.
    pub fn primary_token(&self) -> Option<&SecurityTokenSpecification> {
        self.primary_token.as_ref()
    }

    pub fn supporting_tokens(&self) -> &[SupportingTokenSpecification] {
        &self.supporting_tokens
    }

    /// State to hand to the operation that answers this message.
    pub fn correlation_state(&self) -> &Arc<CorrelationState> {
        &self.correlation_state
    }

    pub fn is_body_encrypted(&self) -> bool {
        self.encrypted_body.is_some()
    }

    /// Plaintext body. An encrypted body is decrypted on first access.
    pub fn body(&mut self) -> Result<&str> {
        match &mut self.encrypted_body {
            Some(encrypted) => std::str::from_utf8(encrypted.get_plaintext()?).map_err(|e| {
                WsSecurityError::SecurityFormat(format!("decrypted body is not UTF-8: {}", e))
            }),
            None => Ok(&self.raw_body),
        }
    }
}

impl<'a> ReceiveSecurityHeader<'a> {
    pub fn new(
        config: &'a MessageSecurityConfig,
        crypto: &'a dyn CryptoProvider,
        resolver: &'a dyn TokenResolver,
    ) -> Self {
        Self {
            config,
            crypto,
            resolver,
            classifier: classifier_for(config.settings.header_layout),
            replay_cache: None,
        }
    }

    /// Override the classifier picked from the configured header layout.
    pub fn with_classifier(mut self, classifier: &'a dyn HeaderClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_replay_cache(mut self, cache: &'a Mutex<ReplayCache>) -> Self {
        self.replay_cache = Some(cache);
        self
    }

    /// Verify the security header of `message`.
    ///
    /// `correlation` is the state of the request this message answers, if any;
    /// its signature values must be confirmed when confirmations are required.
    pub fn process(
        &self,
        message: &Message,
        correlation: Option<&CorrelationState>,
    ) -> Result<ReceivedSecurityHeader> {
        let settings = &self.config.settings;
        let message_security = self.config.message_security();

        let header = message
            .find_header(elements::SECURITY, WSSE_NS)
            .ok_or_else(|| {
                WsSecurityError::MessageSecurity("message has no security header".into())
            })?;
        let header_xml = header_xml(header, message.version())?;
        let mut entries = read_entries(&header_xml, settings.max_buffer_size)?;
        let mut encrypted_body = read_encrypted_body(message.body(), settings.max_buffer_size)?;
        debug!(
            entries = entries.len(),
            encrypted_body = encrypted_body.is_some(),
            classifier = self.classifier.name(),
            "Read security header"
        );

        self.unwrap_keys(&mut entries, &mut encrypted_body)?;
        self.decrypt_header_elements(&mut entries)?;
        self.resolve_tokens(&mut entries)?;
        self.classifier.classify(&mut entries, message_security)?;

        let primary_index = entries
            .iter()
            .position(|entry| entry.binding_mode() == BindingMode::PRIMARY);
        if message_security && primary_index.is_none() {
            return Err(WsSecurityError::MessageSecurity(
                "message has no primary signature".into(),
            ));
        }

        let mut primary_value = None;
        let mut primary_token = None;
        if let Some(index) = primary_index {
            let signature = signature_at(&entries, index)?.clone();
            self.verify_references(&signature, &entries, message, &mut encrypted_body)?;
            let key_token = self.verify_signature_value(&signature, &entries)?;
            if let Some(token_index) = key_token {
                entries[token_index].token_tracker_mut().is_primary = true;
                primary_token = token_specification(&entries[token_index]);
            }
            for reference in &signature.signed_info.references {
                if let Some(entry) = entries.iter_mut().find(|e| e.is_referenced_by(&reference.id)) {
                    if matches!(entry.item(), HeaderItem::Token(_)) {
                        entry.token_tracker_mut().is_signed = true;
                    }
                }
            }
            primary_value = Some(signature.value.clone());
        }

        let endorsing_target = endorsing_target(&entries, primary_index);
        let endorsing: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.binding_mode() == BindingMode::ENDORSING)
            .map(|(index, _)| index)
            .collect();
        for index in endorsing {
            let signature = signature_at(&entries, index)?.clone();
            let target = endorsing_target.as_deref().ok_or_else(|| {
                WsSecurityError::MessageSecurity(
                    "endorsing signature has neither a primary signature nor a timestamp to endorse"
                        .into(),
                )
            })?;
            if !signature.signed_info.references_id(target) {
                return Err(WsSecurityError::MessageSecurity(format!(
                    "endorsing signature '{}' does not cover '{}'",
                    signature.id, target
                )));
            }
            self.verify_references(&signature, &entries, message, &mut encrypted_body)?;
            if let Some(token_index) = self.verify_signature_value(&signature, &entries)? {
                entries[token_index].token_tracker_mut().is_endorsing = true;
            }
        }

        let mut supporting_tokens = Vec::new();
        for entry in entries.iter_mut() {
            if !matches!(entry.item(), HeaderItem::Token(_)) {
                continue;
            }
            let tracker = entry.token_tracker_mut().clone();
            let mode = tracker.binding_mode();
            entry.set_binding_mode(mode)?;
            if let Some(attachment) = attachment_mode(mode, tracker.was_encrypted) {
                if let Some(specification) = token_specification(entry) {
                    supporting_tokens.push(SupportingTokenSpecification::new(
                        specification,
                        attachment,
                    ));
                }
            }
        }

        let now = Utc::now();
        self.check_timestamp(&entries, now)?;

        let replay_value = primary_value.or_else(|| {
            entries.iter().find_map(|entry| match entry.item() {
                HeaderItem::Signature(signature) => Some(signature.value.clone()),
                _ => None,
            })
        });
        if settings.require_signature_confirmation {
            if let Some(expected) = correlation.and_then(CorrelationState::signature_confirmations) {
                check_confirmations(&entries, expected)?;
            }
        }

        // only fully verified messages are remembered
        if let (Some(cache), Some(value)) = (self.replay_cache, replay_value) {
            cache.lock().check_and_insert(&value, now)?;
        }

        let confirmations = if settings.require_signature_confirmation {
            let mut received = SignatureConfirmations::new();
            for entry in &entries {
                if let HeaderItem::Signature(signature) = entry.item() {
                    received.add_confirmation(signature.value.clone(), entry.was_encrypted());
                }
            }
            Some(received)
        } else {
            None
        };
        let correlation_state = Arc::new(CorrelationState::new(
            primary_token.as_ref().map(|spec| spec.token.clone()),
            confirmations,
        ));

        info!(
            entries = entries.len(),
            primary = primary_index.is_some(),
            endorsing = entries
                .iter()
                .filter(|e| e.binding_mode() == BindingMode::ENDORSING)
                .count(),
            supporting_tokens = supporting_tokens.len(),
            "Verified security header"
        );

        Ok(ReceivedSecurityHeader {
            entries,
            raw_body: message.body().to_string(),
            encrypted_body,
            primary_token,
            supporting_tokens,
            correlation_state,
        })
    }

    /// Unwrap every EncryptedKey and attach ciphers to the data it references.
    fn unwrap_keys(
        &self,
        entries: &mut [HeaderElementEntry],
        body: &mut Option<EncryptedElement>,
    ) -> Result<()> {
        // (content key, or None when each element names its own key; referenced ids)
        let mut assignments: Vec<(Option<Vec<u8>>, Vec<String>)> = Vec::new();
        for entry in entries.iter_mut() {
            match entry.item_mut() {
                HeaderItem::EncryptedKey(key) => {
                    let clause = key.key_info().cloned().ok_or_else(|| {
                        WsSecurityError::SecurityFormat("encrypted key has no KeyInfo".into())
                    })?;
                    let key_encryption_key = self.resolver.resolve_clause(&clause)?;
                    let cipher = self
                        .crypto
                        .cipher(key.algorithm(), key_encryption_key.key())?;
                    key.set_up_decryption(cipher)?;
                    let content_key = key.get_plaintext()?.to_vec();
                    let ids = key
                        .reference_list()
                        .map(|list| list.referred_ids().map(str::to_string).collect())
                        .unwrap_or_default();
                    assignments.push((Some(content_key), ids));
                }
                HeaderItem::ReferenceList(list) => {
                    assignments.push((None, list.referred_ids().map(str::to_string).collect()));
                }
                _ => {}
            }
        }

        for (content_key, ids) in assignments {
            for id in ids {
                let data = match body.as_mut().filter(|data| data.id() == Some(id.as_str())) {
                    Some(data) => data,
                    None => entries
                        .iter_mut()
                        .find_map(|entry| match entry.item_mut() {
                            HeaderItem::EncryptedData(data) if data.id() == Some(id.as_str()) => {
                                Some(data)
                            }
                            _ => None,
                        })
                        .ok_or_else(|| {
                            WsSecurityError::SecurityFormat(format!(
                                "reference to unknown encrypted element '{}'",
                                id
                            ))
                        })?,
                };
                self.set_up_data(data, content_key.as_deref())?;
            }
        }
        Ok(())
    }

    fn set_up_data(&self, data: &mut EncryptedElement, content_key: Option<&[u8]>) -> Result<()> {
        let cipher = match content_key {
            Some(key) => self.crypto.cipher(data.algorithm(), key)?,
            None => {
                let clause = data.key_info().ok_or_else(|| {
                    WsSecurityError::SecurityFormat(format!(
                        "encrypted element '{}' names no key",
                        data.id().unwrap_or_default()
                    ))
                })?;
                let token = self.resolver.resolve_clause(clause)?;
                self.crypto.cipher(data.algorithm(), token.key())?
            }
        };
        data.set_up_decryption(cipher)
    }

    /// Replace each encrypted header element with the element it carries.
    fn decrypt_header_elements(&self, entries: &mut [HeaderElementEntry]) -> Result<()> {
        for entry in entries.iter_mut() {
            let plaintext = match entry.item_mut() {
                HeaderItem::EncryptedData(data) => {
                    if data.state() != EncryptionState::DecryptionSetup {
                        return Err(WsSecurityError::MessageSecurity(format!(
                            "encrypted header element '{}' is not referenced by any key",
                            data.id().unwrap_or_default()
                        )));
                    }
                    String::from_utf8(data.get_plaintext()?.to_vec()).map_err(|e| {
                        WsSecurityError::SecurityFormat(format!(
                            "decrypted header element is not UTF-8: {}",
                            e
                        ))
                    })?
                }
                _ => continue,
            };
            let local_name = ElementParts::parse(&plaintext)?.local_name;
            let item = match HeaderItem::read_from(
                &local_name,
                &plaintext,
                self.config.settings.max_buffer_size,
            )? {
                Some(HeaderItem::EncryptedData(_)) | Some(HeaderItem::EncryptedKey(_)) | None => {
                    return Err(WsSecurityError::SecurityFormat(format!(
                        "unsupported encrypted header element <{}>",
                        local_name
                    )))
                }
                Some(item) => item,
            };
            entry.replace_with_decrypted(item)?;
            if entry.id().is_none() {
                return Err(WsSecurityError::SecurityFormat(format!(
                    "decrypted <{}> has no id",
                    local_name
                )));
            }
            debug!(
                position = entry.position(),
                id = entry.id(),
                encrypted_form_id = entry.encrypted_form_id(),
                "Decrypted header element"
            );
        }
        check_unique_ids(entries)
    }

    fn resolve_tokens(&self, entries: &mut [HeaderElementEntry]) -> Result<()> {
        for entry in entries.iter_mut() {
            if let HeaderItem::Token(token) = entry.item_mut() {
                token.specification = Some(self.resolver.resolve_token(&token.wire)?);
            }
        }
        Ok(())
    }

    /// Check every digest in the signature's SignedInfo.
    fn verify_references(
        &self,
        signature: &SignatureElement,
        entries: &[HeaderElementEntry],
        message: &Message,
        body: &mut Option<EncryptedElement>,
    ) -> Result<()> {
        for reference in &signature.signed_info.references {
            let covered = self.referenced_bytes(&reference.id, entries, message, body)?;
            let digest = self.crypto.digest(&reference.digest_method, &covered)?;
            if digest != reference.digest {
                warn!(
                    signature = %signature.id,
                    reference = %reference.id,
                    "Digest mismatch"
                );
                return Err(WsSecurityError::MessageSecurity(format!(
                    "digest of '{}' does not match signature '{}'",
                    reference.id, signature.id
                )));
            }
        }
        Ok(())
    }

    /// Bytes a reference to `id` was digested over.
    fn referenced_bytes(
        &self,
        id: &str,
        entries: &[HeaderElementEntry],
        message: &Message,
        body: &mut Option<EncryptedElement>,
    ) -> Result<Vec<u8>> {
        if message.body_id() == Some(id) {
            return match body {
                Some(encrypted) if self.config.settings.protection_order.signs_plaintext() => {
                    Ok(encrypted.get_plaintext()?.to_vec())
                }
                _ => Ok(message.body().as_bytes().to_vec()),
            };
        }
        let entry = entries
            .iter()
            .find(|entry| entry.is_referenced_by(id))
            .ok_or_else(|| {
                WsSecurityError::MessageSecurity(format!(
                    "signature references unknown element '{}'",
                    id
                ))
            })?;
        if entry.id() == Some(id) {
            entry.item().canonical_bytes()
        } else {
            entry.encrypted_form().map(<[u8]>::to_vec).ok_or_else(|| {
                WsSecurityError::InvalidState(format!("no encrypted form recorded for '{}'", id))
            })
        }
    }

    /// Verify the signature value; returns the position of the header token
    /// that keyed it, if the key came from the header.
    fn verify_signature_value(
        &self,
        signature: &SignatureElement,
        entries: &[HeaderElementEntry],
    ) -> Result<Option<usize>> {
        let clause = signature.key_info.as_ref().ok_or_else(|| {
            WsSecurityError::MessageSecurity(format!("signature '{}' has no KeyInfo", signature.id))
        })?;
        match clause {
            KeyIdentifierClause::LocalId(id) => {
                let index = entries
                    .iter()
                    .position(|entry| {
                        entry.id() == Some(id.as_str())
                            && matches!(entry.item(), HeaderItem::Token(_))
                    })
                    .ok_or_else(|| {
                        WsSecurityError::MessageSecurity(format!(
                            "signature '{}' refers to unknown token '{}'",
                            signature.id, id
                        ))
                    })?;
                let specification = token_specification(&entries[index]).ok_or_else(|| {
                    WsSecurityError::MessageSecurity(format!("token '{}' is not resolved", id))
                })?;
                signature.verify_value(self.crypto, specification.token.key())?;
                Ok(Some(index))
            }
            other => {
                let token = self.resolver.resolve_clause(other)?;
                signature.verify_value(self.crypto, token.key())?;
                Ok(None)
            }
        }
    }

    fn check_timestamp(&self, entries: &[HeaderElementEntry], now: chrono::DateTime<Utc>) -> Result<()> {
        let mut timestamps = entries.iter().filter_map(|entry| match entry.item() {
            HeaderItem::Timestamp(timestamp) => Some(timestamp),
            _ => None,
        });
        match (timestamps.next(), timestamps.next()) {
            (Some(_), Some(_)) => Err(WsSecurityError::SecurityFormat(
                "security header carries more than one timestamp".into(),
            )),
            (Some(timestamp), None) => timestamp.validate(&self.config.timestamp, now),
            (None, _) if self.config.timestamp.require_timestamp => Err(
                WsSecurityError::MessageSecurity("security header has no timestamp".into()),
            ),
            (None, _) => Ok(()),
        }
    }
}

/// Parse a classified header without keys: no decryption, no verification.
pub fn inspect_security_header(
    message: &Message,
    config: &MessageSecurityConfig,
) -> Result<Vec<EntrySummary>> {
    let header = message
        .find_header(elements::SECURITY, WSSE_NS)
        .ok_or_else(|| WsSecurityError::MessageSecurity("message has no security header".into()))?;
    let xml = header_xml(header, message.version())?;
    let mut entries = read_entries(&xml, config.settings.max_buffer_size)?;
    classifier_for(config.settings.header_layout).classify(&mut entries, config.message_security())?;
    Ok(entries.iter().map(HeaderElementEntry::summary).collect())
}

fn read_encrypted_body(body: &str, max_buffer_size: usize) -> Result<Option<EncryptedElement>> {
    match ElementParts::parse(body) {
        Ok(parts) if parts.local_name == elements::ENCRYPTED_DATA => {
            Ok(Some(EncryptedElement::read_from(body, max_buffer_size)?))
        }
        _ => Ok(None),
    }
}

/// Id every endorsing signature has to cover: the primary signature under
/// message security, the timestamp otherwise.
fn endorsing_target(entries: &[HeaderElementEntry], primary_index: Option<usize>) -> Option<String> {
    match primary_index {
        Some(index) => entries[index].id().map(str::to_string),
        None => entries
            .iter()
            .find(|entry| matches!(entry.item(), HeaderItem::Timestamp(_)))
            .and_then(|entry| entry.id().map(str::to_string)),
    }
}

fn signature_at(entries: &[HeaderElementEntry], index: usize) -> Result<&SignatureElement> {
    match entries.get(index).map(HeaderElementEntry::item) {
        Some(HeaderItem::Signature(signature)) => Ok(signature),
        _ => Err(WsSecurityError::InvalidState(format!(
            "header entry {} is not a signature",
            index
        ))),
    }
}

fn token_specification(entry: &HeaderElementEntry) -> Option<SecurityTokenSpecification> {
    match entry.item() {
        HeaderItem::Token(token) => token.specification.clone(),
        _ => None,
    }
}

/// Attachment mode reported for a supporting token; `None` for the primary token.
fn attachment_mode(mode: BindingMode, was_encrypted: bool) -> Option<SecurityTokenAttachmentMode> {
    if mode == BindingMode::PRIMARY {
        None
    } else if mode == BindingMode::SIGNED_ENDORSING {
        Some(SecurityTokenAttachmentMode::SignedEndorsing)
    } else if mode == BindingMode::ENDORSING {
        Some(SecurityTokenAttachmentMode::Endorsing)
    } else if was_encrypted {
        Some(SecurityTokenAttachmentMode::SignedEncrypted)
    } else {
        Some(SecurityTokenAttachmentMode::Signed)
    }
}

/// The confirmations in the header must echo exactly the expected values.
fn check_confirmations(
    entries: &[HeaderElementEntry],
    expected: &SignatureConfirmations,
) -> Result<()> {
    let received: Vec<Option<&[u8]>> = entries
        .iter()
        .filter_map(|entry| match entry.item() {
            HeaderItem::SignatureConfirmation(confirmation) => Some(confirmation.value.as_deref()),
            _ => None,
        })
        .collect();

    let matches = if expected.is_empty() {
        !received.is_empty() && received.iter().all(Option::is_none)
    } else {
        let mut received_values: Vec<&[u8]> = received
            .into_iter()
            .collect::<Option<_>>()
            .unwrap_or_default();
        let mut expected_values: Vec<&[u8]> = expected.values().collect();
        received_values.sort_unstable();
        expected_values.sort_unstable();
        received_values == expected_values
    };
    if matches {
        Ok(())
    } else {
        warn!(expected = expected.count(), "Signature confirmation mismatch");
        Err(WsSecurityError::MessageSecurity(
            "signature confirmations do not match the signatures sent".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProtectionOrder, ReplayConfig, SecurityMode, SoapVersion};
    use crate::crypto::DefaultCryptoProvider;
    use crate::header_entry::HeaderCategory;
    use crate::message::SecurityHeader;
    use crate::names::{algorithms, encryption_types};
    use crate::reference_list::ReferenceList;
    use crate::send::SendSecurityHeader;
    use crate::token::{InMemoryTokenResolver, KeyWrapCredential, SecurityToken};
    use crate::xml;

    const BODY: &str = "<m:Transfer xmlns:m=\"urn:bank\"><m:Amount>100</m:Amount></m:Transfer>";
    const KEK: [u8; 32] = [9u8; 32];

    struct Fixture {
        config: MessageSecurityConfig,
        crypto: DefaultCryptoProvider,
        resolver: InMemoryTokenResolver,
        client: Arc<SecurityToken>,
        credential: KeyWrapCredential,
    }

    impl Fixture {
        fn new(config: MessageSecurityConfig) -> Self {
            let resolver = InMemoryTokenResolver::new();
            resolver.add_key("service-kek", KEK.to_vec());
            let client = Self::register(&resolver, "client", 1);
            Self {
                config,
                crypto: DefaultCryptoProvider,
                resolver,
                client,
                credential: KeyWrapCredential::new("service-kek", KEK.to_vec()),
            }
        }

        fn register(resolver: &InMemoryTokenResolver, name: &str, key: u8) -> Arc<SecurityToken> {
            let token = Arc::new(SecurityToken::new(
                name,
                "urn:zentinel:token",
                name.as_bytes().to_vec(),
                vec![key; 32],
            ));
            resolver.add_token(SecurityTokenSpecification::new(token.clone(), vec![]));
            token
        }

        fn supporting(&self, name: &str, key: u8, mode: SecurityTokenAttachmentMode) -> SupportingTokenSpecification {
            let token = Self::register(&self.resolver, name, key);
            SupportingTokenSpecification::new(SecurityTokenSpecification::new(token, vec![]), mode)
        }

        fn secure(&self, supporting: Vec<SupportingTokenSpecification>, encrypt: bool) -> Message {
            let mut message = Message::new(SoapVersion::Soap11, BODY);
            let mut header = SendSecurityHeader::new(&self.config, &self.crypto)
                .with_signing_token(self.client.clone())
                .with_supporting_tokens(supporting);
            if encrypt {
                header = header.with_encryption(&self.credential);
            }
            header.secure(&mut message).unwrap();
            message
        }

        fn receiver(&self) -> ReceiveSecurityHeader<'_> {
            ReceiveSecurityHeader::new(&self.config, &self.crypto, &self.resolver)
        }
    }

    #[test]
    fn test_signed_message_verifies() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let supporting = vec![
            fixture.supporting("user", 2, SecurityTokenAttachmentMode::Signed),
            fixture.supporting("device", 3, SecurityTokenAttachmentMode::Endorsing),
            fixture.supporting("partner", 4, SecurityTokenAttachmentMode::SignedEndorsing),
        ];
        let message = fixture.secure(supporting, false);

        let mut received = fixture.receiver().process(&message, None).unwrap();
        assert_eq!(received.count_with_binding(BindingMode::PRIMARY), 2); // signature + its token
        assert_eq!(received.count_with_binding(BindingMode::ENDORSING), 3); // 2 signatures + device
        assert_eq!(received.count_with_binding(BindingMode::SIGNED), 1);
        assert_eq!(received.count_with_binding(BindingMode::SIGNED_ENDORSING), 1);
        assert_eq!(received.primary_token().unwrap().token.id(), "client");

        let modes: Vec<SecurityTokenAttachmentMode> =
            received.supporting_tokens().iter().map(|s| s.mode).collect();
        assert_eq!(
            modes,
            vec![
                SecurityTokenAttachmentMode::Signed,
                SecurityTokenAttachmentMode::SignedEndorsing,
                SecurityTokenAttachmentMode::Endorsing,
            ]
        );
        assert!(!received.is_body_encrypted());
        assert_eq!(received.body().unwrap(), BODY);
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let mut message = fixture.secure(vec![], false);
        message.set_body("<m:Transfer xmlns:m=\"urn:bank\"><m:Amount>100000</m:Amount></m:Transfer>");

        let err = fixture.receiver().process(&message, None).unwrap_err();
        assert!(matches!(err, WsSecurityError::MessageSecurity(_)));
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let message = fixture.secure(vec![], false);
        let empty = InMemoryTokenResolver::new();
        let err = ReceiveSecurityHeader::new(&fixture.config, &fixture.crypto, &empty)
            .process(&message, None)
            .unwrap_err();
        assert!(err.is_security_failure());
    }

    #[test]
    fn test_missing_security_header() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let message = Message::new(SoapVersion::Soap11, BODY);
        assert!(fixture.receiver().process(&message, None).is_err());
    }

    #[test]
    fn test_encrypt_before_sign_decrypts_body_lazily() {
        let mut config = MessageSecurityConfig::default();
        config.settings.protection_order = ProtectionOrder::EncryptBeforeSign;
        let fixture = Fixture::new(config);
        let message = fixture.secure(vec![], true);

        let mut received = fixture.receiver().process(&message, None).unwrap();
        assert!(received.is_body_encrypted());
        assert_eq!(
            received.encrypted_body.as_ref().unwrap().state(),
            EncryptionState::DecryptionSetup
        );
        assert_eq!(received.body().unwrap(), BODY);
        assert_eq!(
            received.encrypted_body.as_ref().unwrap().state(),
            EncryptionState::Decrypted
        );
    }

    #[test]
    fn test_sign_before_encrypt_digests_plaintext_body() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let message = fixture.secure(vec![], true);
        assert!(message.body().contains("EncryptedData"));

        let mut received = fixture.receiver().process(&message, None).unwrap();
        // the primary digest already needed the plaintext
        assert_eq!(
            received.encrypted_body.as_ref().unwrap().state(),
            EncryptionState::Decrypted
        );
        assert_eq!(received.body().unwrap(), BODY);
    }

    #[test]
    fn test_encrypted_token_keeps_its_encrypted_form_id() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let supporting = vec![fixture.supporting(
            "secret",
            5,
            SecurityTokenAttachmentMode::SignedEncrypted,
        )];
        let message = fixture.secure(supporting, true);

        let received = fixture.receiver().process(&message, None).unwrap();
        let token = received
            .entries()
            .iter()
            .find(|entry| entry.was_encrypted())
            .unwrap();
        assert_eq!(token.category(), HeaderCategory::Token);
        assert!(token.encrypted_form_id().is_some());
        assert_eq!(token.binding_mode(), BindingMode::SIGNED);
        assert_eq!(
            received.supporting_tokens()[0].mode,
            SecurityTokenAttachmentMode::SignedEncrypted
        );
    }

    #[test]
    fn test_encrypted_primary_signature_is_classified_after_decryption() {
        let mut config = MessageSecurityConfig::default();
        config.settings.protection_order = ProtectionOrder::SignBeforeEncryptAndEncryptSignature;
        let fixture = Fixture::new(config);
        let supporting = vec![fixture.supporting("device", 3, SecurityTokenAttachmentMode::Endorsing)];
        let message = fixture.secure(supporting, true);

        let received = fixture.receiver().process(&message, None).unwrap();
        let primary = received
            .entries()
            .iter()
            .find(|entry| entry.category() == HeaderCategory::Signature)
            .unwrap();
        assert_eq!(primary.binding_mode(), BindingMode::PRIMARY);
        assert!(primary.was_encrypted());
    }

    #[test]
    fn test_standalone_reference_list_uses_element_keys() {
        let mut config = MessageSecurityConfig::default();
        config.settings.security_mode = SecurityMode::Transport;
        let fixture = Fixture::new(config);
        fixture.resolver.add_key("shared", vec![5u8; 32]);
        let crypto = DefaultCryptoProvider;

        let token_xml = {
            let mut writer = xml::writer();
            fixture.client.to_binary_token().write_to(&mut writer).unwrap();
            writer.into_inner()
        };
        let mut data = EncryptedElement::new_data("_enc", Some(encryption_types::ELEMENT));
        data.set_key_info(KeyIdentifierClause::KeyName("shared".into()));
        data.set_up_encryption(crypto.cipher(algorithms::AES256_GCM, &[5u8; 32]).unwrap(), token_xml)
            .unwrap();
        data.force_encryption().unwrap();
        let mut list = ReferenceList::new();
        list.add_referred_id("_enc").unwrap();

        let mut writer = xml::writer();
        list.write_to(&mut writer).unwrap();
        data.write_to(&mut writer).unwrap();
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        message.add_header(Box::new(SecurityHeader::new(xml::into_string(writer).unwrap())));

        let received = fixture.receiver().process(&message, None).unwrap();
        let token = &received.entries()[1];
        assert_eq!(token.id(), Some("client"));
        assert_eq!(token.encrypted_form_id(), Some("_enc"));
        assert_eq!(token.binding_mode(), BindingMode::BASIC);
        assert_eq!(
            received.supporting_tokens()[0].mode,
            SecurityTokenAttachmentMode::SignedEncrypted
        );
    }

    #[test]
    fn test_unreferenced_encrypted_data_is_rejected() {
        let mut config = MessageSecurityConfig::default();
        config.settings.security_mode = SecurityMode::Transport;
        let fixture = Fixture::new(config);
        let crypto = DefaultCryptoProvider;

        let mut data = EncryptedElement::new_data("_enc", Some(encryption_types::ELEMENT));
        data.set_up_encryption(crypto.cipher(algorithms::AES256_GCM, &[5u8; 32]).unwrap(), b"<x/>".to_vec())
            .unwrap();
        data.force_encryption().unwrap();
        let mut writer = xml::writer();
        data.write_to(&mut writer).unwrap();
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        message.add_header(Box::new(SecurityHeader::new(xml::into_string(writer).unwrap())));

        let err = fixture.receiver().process(&message, None).unwrap_err();
        assert!(matches!(err, WsSecurityError::MessageSecurity(_)));
    }

    #[test]
    fn test_required_timestamp() {
        let mut config = MessageSecurityConfig::default();
        config.settings.include_timestamp = false;
        config.timestamp.require_timestamp = true;
        let fixture = Fixture::new(config);
        let message = fixture.secure(vec![], false);

        let err = fixture.receiver().process(&message, None).unwrap_err();
        assert!(matches!(err, WsSecurityError::MessageSecurity(_)));
    }

    #[test]
    fn test_replayed_message_is_rejected() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let cache = Mutex::new(ReplayCache::new(&ReplayConfig::default()).unwrap());
        let message = fixture.secure(vec![], false);
        let receiver = fixture.receiver().with_replay_cache(&cache);

        receiver.process(&message, None).unwrap();
        let err = receiver.process(&message, None).unwrap_err();
        assert!(err.is_replay());
    }

    #[test]
    fn test_confirmations_are_checked_against_correlation() {
        let mut config = MessageSecurityConfig::default();
        config.settings.require_signature_confirmation = true;
        let fixture = Fixture::new(config);

        // request: the client remembers its signature value
        let mut request = Message::new(SoapVersion::Soap11, BODY);
        let request_state = SendSecurityHeader::new(&fixture.config, &fixture.crypto)
            .with_signing_token(fixture.client.clone())
            .secure(&mut request)
            .unwrap();

        // the service verifies and echoes it in the reply
        let received = fixture.receiver().process(&request, None).unwrap();
        let mut reply = Message::new(SoapVersion::Soap11, "<m:Done xmlns:m=\"urn:bank\"/>");
        SendSecurityHeader::new(&fixture.config, &fixture.crypto)
            .with_signing_token(fixture.client.clone())
            .with_correlation(Some(received.correlation_state().clone()))
            .secure(&mut reply)
            .unwrap();
        fixture.receiver().process(&reply, Some(&request_state)).unwrap();

        // a reply that confirms some other request fails
        let mut unrelated = SignatureConfirmations::new();
        unrelated.add_confirmation(b"not-my-signature".to_vec(), false);
        let wrong = CorrelationState::new(None, Some(unrelated));
        let err = fixture.receiver().process(&reply, Some(&wrong)).unwrap_err();
        assert!(matches!(err, WsSecurityError::MessageSecurity(_)));
    }

    #[test]
    fn test_unconfirmed_reply_is_not_remembered() {
        let mut config = MessageSecurityConfig::default();
        config.settings.require_signature_confirmation = true;
        let fixture = Fixture::new(config);
        let cache = Mutex::new(ReplayCache::new(&ReplayConfig::default()).unwrap());

        let mut request = Message::new(SoapVersion::Soap11, BODY);
        let request_state = SendSecurityHeader::new(&fixture.config, &fixture.crypto)
            .with_signing_token(fixture.client.clone())
            .secure(&mut request)
            .unwrap();
        let received = fixture.receiver().process(&request, None).unwrap();
        let mut reply = Message::new(SoapVersion::Soap11, "<m:Done xmlns:m=\"urn:bank\"/>");
        SendSecurityHeader::new(&fixture.config, &fixture.crypto)
            .with_signing_token(fixture.client.clone())
            .with_correlation(Some(received.correlation_state().clone()))
            .secure(&mut reply)
            .unwrap();

        let mut unrelated = SignatureConfirmations::new();
        unrelated.add_confirmation(b"not-my-signature".to_vec(), false);
        let wrong = CorrelationState::new(None, Some(unrelated));
        let receiver = fixture.receiver().with_replay_cache(&cache);
        assert!(receiver.process(&reply, Some(&wrong)).is_err());
        assert!(cache.lock().is_empty());

        // the same reply still verifies against the request it answers
        receiver.process(&reply, Some(&request_state)).unwrap();
        assert_eq!(cache.lock().len(), 1);
    }

    #[test]
    fn test_inspect_without_keys() {
        let fixture = Fixture::new(MessageSecurityConfig::default());
        let supporting = vec![fixture.supporting("device", 3, SecurityTokenAttachmentMode::Endorsing)];
        let message = fixture.secure(supporting, false);

        let summaries = inspect_security_header(&message, &fixture.config).unwrap();
        let modes: Vec<&str> = summaries
            .iter()
            .filter(|s| s.category == HeaderCategory::Signature)
            .map(|s| s.binding_mode)
            .collect();
        assert_eq!(modes, vec!["Primary", "Endorsing"]);
    }
}
