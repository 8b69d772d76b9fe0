//! Construction of the outgoing security header.
//!
//! A [`SendSecurityHeader`] is built per outgoing message. It stages every
//! header element in a [`SendHeaderElementContainer`], signs and encrypts in
//! the sequence the configured [`ProtectionOrder`] dictates, then emits the
//! staged buckets as a single `wsse:Security` header.

use crate::config::{MessageSecurityConfig, ProtectionOrder};
use crate::correlation::{CorrelationState, SignatureConfirmations};
use crate::crypto::{CryptoProvider, SymmetricCipher};
use crate::encryption::EncryptedElement;
use crate::error::{Result, WsSecurityError};
use crate::message::{DelegatingHeader, Message, MessageHeader, SecurityHeader};
use crate::names::{elements, encryption_types, WSSE_NS};
use crate::reference_list::ReferenceList;
use crate::send_container::{
    ConfirmationElement, SendHeaderElement, SendHeaderElementContainer, SignatureHeaderElement,
    TokenElement,
};
use crate::signature::{SignatureConfirmationElement, SignatureElement, SignedInfo};
use crate::timestamp::SecurityTimestamp;
use crate::token::{
    BinarySecurityToken, KeyIdentifierClause, KeyWrapCredential, SecurityToken,
    SecurityTokenAttachmentMode, SupportingTokenSpecification,
};
use crate::xml::{self, XmlWriter};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Sequential wsu:Id values ("_0", "_1", ...) unique within one header.
#[derive(Debug, Default)]
struct IdGenerator {
    next: usize,
}

impl IdGenerator {
    fn next_id(&mut self) -> String {
        let id = format!("_{}", self.next);
        self.next += 1;
        id
    }
}

/// Content key and the EncryptedKey that carries it to the recipient.
struct EncryptionContext {
    content_cipher: Arc<dyn SymmetricCipher>,
    wrapped_key: EncryptedElement,
    references: ReferenceList,
}

/// Builder for the security header of one outgoing message.
pub struct SendSecurityHeader<'a> {
    config: &'a MessageSecurityConfig,
    crypto: &'a dyn CryptoProvider,
    signing_token: Option<Arc<SecurityToken>>,
    supporting_tokens: Vec<SupportingTokenSpecification>,
    encryption_credential: Option<&'a KeyWrapCredential>,
    correlation: Option<Arc<CorrelationState>>,
    container: SendHeaderElementContainer,
    ids: IdGenerator,
    encryption: Option<EncryptionContext>,
    /// Encrypted replacements, keyed by the id of the plaintext element
    encrypted: HashMap<String, EncryptedElement>,
    secured: bool,
}

impl<'a> SendSecurityHeader<'a> {
    pub fn new(config: &'a MessageSecurityConfig, crypto: &'a dyn CryptoProvider) -> Self {
        Self {
            config,
            crypto,
            signing_token: None,
            supporting_tokens: Vec::new(),
            encryption_credential: None,
            correlation: None,
            container: SendHeaderElementContainer::new(),
            ids: IdGenerator::default(),
            encryption: None,
            encrypted: HashMap::new(),
            secured: false,
        }
    }

    /// Token whose key produces the primary signature.
    pub fn with_signing_token(mut self, token: Arc<SecurityToken>) -> Self {
        self.signing_token = Some(token);
        self
    }

    pub fn with_supporting_tokens(mut self, tokens: Vec<SupportingTokenSpecification>) -> Self {
        self.supporting_tokens = tokens;
        self
    }

    /// Recipient key used to wrap the content encryption key.
    pub fn with_encryption(mut self, credential: &'a KeyWrapCredential) -> Self {
        self.encryption_credential = Some(credential);
        self
    }

    /// State of the operation this message answers.
    pub fn with_correlation(mut self, correlation: Option<Arc<CorrelationState>>) -> Self {
        self.correlation = correlation;
        self
    }

    /// Staged header elements.
    pub fn container(&self) -> &SendHeaderElementContainer {
        &self.container
    }

    /// Add the security header to `message`.
    ///
    /// Returns the correlation state for the reply to this message.
    pub fn secure(&mut self, message: &mut Message) -> Result<CorrelationState> {
        if self.secured {
            return Err(WsSecurityError::InvalidState(
                "security header has already been built".into(),
            ));
        }
        if message.find_header(elements::SECURITY, WSSE_NS).is_some() {
            return Err(WsSecurityError::InvalidState(
                "message already carries a security header".into(),
            ));
        }
        let message_security = self.config.message_security();
        if message_security && self.signing_token.is_none() {
            return Err(WsSecurityError::MessageSecurity(
                "message security requires a signing token".into(),
            ));
        }
        let order = self.config.settings.protection_order;

        // the body travels trimmed; digests must match what the peer parses
        let body = message.body().trim();
        if body.len() != message.body().len() {
            let body = body.to_string();
            message.set_body(body);
        }
        if message.body_id().is_none() {
            message.set_body_id(Some(self.ids.next_id()));
        }
        self.stage_timestamp()?;
        self.stage_tokens(message_security)?;
        self.stage_signature_confirmations()?;
        self.set_up_encryption()?;

        if order == ProtectionOrder::EncryptBeforeSign {
            self.encrypt_content(message, message_security)?;
        }
        if message_security {
            self.sign_primary(message)?;
        }
        self.sign_endorsing()?;
        self.container.complete_construction();

        if order != ProtectionOrder::EncryptBeforeSign {
            self.encrypt_content(message, message_security)?;
            if order.encrypts_signature() {
                if let Some(primary) = self.container.primary_signature().cloned() {
                    self.encrypt_element(primary.id(), primary.item().canonical_bytes()?)?;
                }
            }
        }
        self.finish_wrapped_key()?;

        let content = self.write_header_content(order)?;
        let header: Box<dyn MessageHeader> = Box::new(SecurityHeader::new(content));
        let settings = &self.config.settings;
        let header: Box<dyn MessageHeader> = if settings.actor.is_some() || !settings.must_understand {
            Box::new(DelegatingHeader::new(
                header,
                settings.must_understand,
                settings.actor.clone(),
                false,
            ))
        } else {
            header
        };
        message.add_header(header);
        self.secured = true;

        info!(
            order = ?order,
            supporting_tokens = self.container.supporting_tokens().len(),
            encrypted_parts = self.encrypted.len(),
            "Secured outgoing message"
        );
        Ok(self.correlation_state())
    }

    fn stage_timestamp(&mut self) -> Result<()> {
        if !self.config.settings.include_timestamp {
            return Ok(());
        }
        let id = self.ids.next_id();
        let timestamp =
            SecurityTimestamp::new(id.clone(), Utc::now(), self.config.timestamp.time_to_live_secs)?;
        self.container
            .set_timestamp(SendHeaderElement::new(id, Arc::new(timestamp)));
        Ok(())
    }

    fn stage_tokens(&mut self, message_security: bool) -> Result<()> {
        if let Some(token) = self.signing_token.clone() {
            let id = self.ids.next_id();
            self.container
                .map_security_token_to_str_clause(&token, KeyIdentifierClause::LocalId(id.clone()));
            self.container
                .set_source_signing_token(SendHeaderElement::new(id, token));
        }

        for supporting in std::mem::take(&mut self.supporting_tokens) {
            let token = supporting.token().clone();
            let id = self.ids.next_id();
            self.container
                .map_security_token_to_str_clause(&token, KeyIdentifierClause::LocalId(id.clone()));
            let mut element = SendHeaderElement::new(id, token);
            match (supporting.mode, message_security) {
                (SecurityTokenAttachmentMode::Signed, true) => {
                    self.container.add_signed_supporting_token(element)
                }
                (SecurityTokenAttachmentMode::SignedEncrypted, true) => {
                    element.mark_for_encryption();
                    self.container.add_signed_supporting_token(element)
                }
                // the transport already protects the message; nothing signs these
                (SecurityTokenAttachmentMode::Signed, false) => {
                    self.container.add_basic_supporting_token(element)
                }
                (SecurityTokenAttachmentMode::SignedEncrypted, false) => {
                    element.mark_for_encryption();
                    self.container.add_basic_supporting_token(element)
                }
                (SecurityTokenAttachmentMode::Endorsing, _) => {
                    self.container.add_endorsing_supporting_token(element)
                }
                (SecurityTokenAttachmentMode::SignedEndorsing, _) => {
                    self.container.add_signed_endorsing_supporting_token(element)
                }
            }
        }
        Ok(())
    }

    /// Echo the signature values of the correlated request.
    fn stage_signature_confirmations(&mut self) -> Result<()> {
        if !self.config.settings.require_signature_confirmation {
            return Ok(());
        }
        let received = match self
            .correlation
            .as_ref()
            .and_then(|state| state.signature_confirmations())
        {
            Some(received) => received.clone(),
            None => return Ok(()),
        };
        let encrypt = self.encryption_credential.is_some()
            && (received.is_marked_for_encryption()
                || self.config.settings.protection_order.encrypts_signature());

        let values: Vec<Option<Vec<u8>>> = if received.is_empty() {
            // the request was unsigned: confirm that with a single valueless element
            vec![None]
        } else {
            received.values().map(|value| Some(value.to_vec())).collect()
        };
        for value in values {
            let id = self.ids.next_id();
            let mut element = SendHeaderElement::new(
                id.clone(),
                Arc::new(SignatureConfirmationElement { id, value }),
            );
            if encrypt {
                element.mark_for_encryption();
            }
            self.container.add_signature_confirmation(element)?;
        }
        Ok(())
    }

    fn set_up_encryption(&mut self) -> Result<()> {
        let credential = match self.encryption_credential {
            Some(credential) => credential,
            None => {
                let marked = self
                    .container
                    .supporting_tokens()
                    .iter()
                    .any(|token| token.is_marked_for_encryption());
                if marked {
                    return Err(WsSecurityError::MessageSecurity(
                        "encrypted supporting tokens require an encryption credential".into(),
                    ));
                }
                return Ok(());
            }
        };
        let suite = &self.config.algorithm_suite;
        let content_key = self.crypto.generate_key(suite.symmetric_key_length);
        let content_cipher = self.crypto.cipher(&suite.encryption, &content_key)?;

        let mut wrapped_key = EncryptedElement::new_key(self.ids.next_id());
        wrapped_key.set_key_info(KeyIdentifierClause::KeyName(credential.key_name.clone()));
        wrapped_key.set_recipient(credential.recipient.clone());
        wrapped_key.set_carried_key_name(credential.carried_key_name.clone())?;
        wrapped_key.set_up_encryption(
            self.crypto.cipher(&suite.key_wrap, &credential.key)?,
            content_key,
        )?;

        self.encryption = Some(EncryptionContext {
            content_cipher,
            wrapped_key,
            references: ReferenceList::new(),
        });
        Ok(())
    }

    /// Encrypt the body (message security only) and every element marked for encryption.
    fn encrypt_content(&mut self, message: &mut Message, message_security: bool) -> Result<()> {
        if self.encryption.is_none() {
            return Ok(());
        }
        if message_security {
            self.encrypt_body(message)?;
        }
        let mut marked: Vec<(String, Vec<u8>)> = Vec::new();
        for token in self.container.supporting_tokens() {
            if token.is_marked_for_encryption() {
                marked.push((token.id().to_string(), token_bytes(&token)?));
            }
        }
        for confirmation in self.container.signature_confirmations().unwrap_or_default() {
            if confirmation.is_marked_for_encryption() {
                marked.push((
                    confirmation.id().to_string(),
                    confirmation.item().canonical_bytes()?,
                ));
            }
        }
        for (id, plaintext) in marked {
            self.encrypt_element(&id, plaintext)?;
        }
        Ok(())
    }

    fn encrypt_body(&mut self, message: &mut Message) -> Result<()> {
        let context = self.encryption.as_mut().ok_or_else(|| {
            WsSecurityError::InvalidState("encryption has not been set up".into())
        })?;
        let id = self.ids.next_id();
        let mut data = EncryptedElement::new_data(id.clone(), Some(encryption_types::CONTENT));
        data.set_up_encryption(
            context.content_cipher.clone(),
            message.body().as_bytes().to_vec(),
        )?;
        data.force_encryption()?;
        context.references.add_referred_id(id)?;

        let mut writer = xml::writer();
        data.write_to(&mut writer)?;
        message.set_body(xml::into_string(writer)?);
        debug!(id = data.id(), "Encrypted message body");
        Ok(())
    }

    /// Encrypt one header element; its EncryptedData replaces it on the wire.
    fn encrypt_element(&mut self, element_id: &str, plaintext: Vec<u8>) -> Result<()> {
        if self.encrypted.contains_key(element_id) {
            return Ok(());
        }
        let context = self.encryption.as_mut().ok_or_else(|| {
            WsSecurityError::InvalidState("encryption has not been set up".into())
        })?;
        let id = self.ids.next_id();
        let mut data = EncryptedElement::new_data(id.clone(), Some(encryption_types::ELEMENT));
        data.set_up_encryption(context.content_cipher.clone(), plaintext)?;
        data.force_encryption()?;
        context.references.add_referred_id(id)?;
        debug!(element = element_id, id = data.id(), "Encrypted header element");
        self.encrypted.insert(element_id.to_string(), data);
        Ok(())
    }

    /// Id and bytes a signature reference to `id` covers: the ciphertext once
    /// the element has been encrypted, the plaintext otherwise.
    fn reference_target(&self, id: &str, plaintext: Vec<u8>) -> Result<(String, Vec<u8>)> {
        match self.encrypted.get(id) {
            Some(data) => Ok((
                data.id().unwrap_or(id).to_string(),
                data.canonical_bytes()?,
            )),
            None => Ok((id.to_string(), plaintext)),
        }
    }

    fn sign_primary(&mut self, message: &Message) -> Result<()> {
        let suite = &self.config.algorithm_suite;
        let crypto = self.crypto;
        let mut signed_info = SignedInfo::new(&suite.canonicalization, &suite.symmetric_signature);

        let body_id = message.body_id().ok_or_else(|| {
            WsSecurityError::InvalidState("message body has no id".into())
        })?;
        signed_info.add_reference(crypto, &suite.digest, body_id, message.body().as_bytes())?;

        if let Some(timestamp) = self.container.timestamp() {
            signed_info.add_reference(
                crypto,
                &suite.digest,
                timestamp.id(),
                &timestamp.item().canonical_bytes()?,
            )?;
        }
        for token in self.container.signed_tokens() {
            let (id, bytes) = self.reference_target(token.id(), token_bytes(&token)?)?;
            signed_info.add_reference(crypto, &suite.digest, &id, &bytes)?;
        }
        for confirmation in self.container.signature_confirmations().unwrap_or_default() {
            let (id, bytes) =
                self.reference_target(confirmation.id(), confirmation.item().canonical_bytes()?)?;
            signed_info.add_reference(crypto, &suite.digest, &id, &bytes)?;
        }

        let signing = self.container.source_signing_token().cloned().ok_or_else(|| {
            WsSecurityError::MessageSecurity("message security requires a signing token".into())
        })?;
        let key_info = self.container.try_get_identifier_clause(signing.item()).cloned();
        let id = self.ids.next_id();
        let signature =
            SignatureElement::sign(crypto, id.clone(), signed_info, signing.item().key(), key_info)?;
        debug!(
            id = %id,
            references = signature.signed_info.references.len(),
            "Computed primary signature"
        );
        self.container
            .set_primary_signature(SendHeaderElement::new(id, Arc::new(signature)))
    }

    /// One signature per endorsing token, over the primary signature or, without
    /// one, over the timestamp.
    fn sign_endorsing(&mut self) -> Result<()> {
        let endorsing = self.container.endorsing_tokens();
        if endorsing.is_empty() {
            return Ok(());
        }
        let (target_id, target_bytes) = match (
            self.container.primary_signature(),
            self.container.timestamp(),
        ) {
            (Some(primary), _) => (primary.id().to_string(), primary.item().canonical_bytes()?),
            (None, Some(timestamp)) => {
                (timestamp.id().to_string(), timestamp.item().canonical_bytes()?)
            }
            (None, None) => {
                return Err(WsSecurityError::MessageSecurity(
                    "endorsing tokens need a primary signature or a timestamp to sign".into(),
                ))
            }
        };

        let suite = &self.config.algorithm_suite;
        for token in endorsing {
            let mut signed_info =
                SignedInfo::new(&suite.canonicalization, &suite.symmetric_signature);
            signed_info.add_reference(self.crypto, &suite.digest, &target_id, &target_bytes)?;
            let key_info = self.container.try_get_identifier_clause(token.item()).cloned();
            let id = self.ids.next_id();
            let signature = SignatureElement::sign(
                self.crypto,
                id.clone(),
                signed_info,
                token.item().key(),
                key_info,
            )?;
            debug!(id = %id, token = token.id(), "Computed endorsing signature");
            self.container
                .add_endorsing_signature(SendHeaderElement::new(id, Arc::new(signature)));
        }
        Ok(())
    }

    /// Wrap the content key once every reference is known.
    fn finish_wrapped_key(&mut self) -> Result<()> {
        let context = match self.encryption.take() {
            Some(context) => context,
            None => return Ok(()),
        };
        if context.references.is_empty() {
            debug!("Nothing was encrypted; omitting the wrapped key");
            return Ok(());
        }
        let mut wrapped_key = context.wrapped_key;
        wrapped_key.set_reference_list(context.references)?;
        wrapped_key.force_encryption()?;
        self.container.set_wrapped_encryption_key(wrapped_key);
        Ok(())
    }

    fn write_header_content(&self, order: ProtectionOrder) -> Result<String> {
        let mut writer = xml::writer();
        if let Some(timestamp) = self.container.timestamp() {
            timestamp.item().write_to(&mut writer)?;
        }
        if let Some(token) = self.container.source_signing_token() {
            self.write_token(&mut writer, token)?;
        }
        for token in self.container.supporting_tokens() {
            self.write_token(&mut writer, &token)?;
        }
        if order != ProtectionOrder::EncryptBeforeSign {
            self.write_wrapped_key(&mut writer)?;
        }
        for confirmation in self.container.signature_confirmations().unwrap_or_default() {
            self.write_confirmation(&mut writer, &confirmation)?;
        }
        if let Some(primary) = self.container.primary_signature() {
            self.write_signature(&mut writer, primary)?;
        }
        for signature in self.container.endorsing_signatures().unwrap_or_default() {
            self.write_signature(&mut writer, &signature)?;
        }
        if order == ProtectionOrder::EncryptBeforeSign {
            self.write_wrapped_key(&mut writer)?;
        }
        xml::into_string(writer)
    }

    fn write_token(&self, writer: &mut XmlWriter, token: &TokenElement) -> Result<()> {
        match self.encrypted.get(token.id()) {
            Some(data) => data.write_to(writer),
            None => wire_token(token).write_to(writer),
        }
    }

    fn write_confirmation(
        &self,
        writer: &mut XmlWriter,
        confirmation: &ConfirmationElement,
    ) -> Result<()> {
        match self.encrypted.get(confirmation.id()) {
            Some(data) => data.write_to(writer),
            None => confirmation.item().write_to(writer),
        }
    }

    fn write_signature(
        &self,
        writer: &mut XmlWriter,
        signature: &SignatureHeaderElement,
    ) -> Result<()> {
        match self.encrypted.get(signature.id()) {
            Some(data) => data.write_to(writer),
            None => signature.item().write_to(writer),
        }
    }

    fn write_wrapped_key(&self, writer: &mut XmlWriter) -> Result<()> {
        match self.container.wrapped_encryption_key() {
            Some(key) => key.write_to(writer),
            None => Ok(()),
        }
    }

    /// Signing token plus, when confirmations are required, the signature
    /// values the reply has to echo.
    fn correlation_state(&self) -> CorrelationState {
        let confirmations = if self.config.settings.require_signature_confirmation {
            let encrypted = self.config.settings.protection_order.encrypts_signature();
            let mut confirmations = SignatureConfirmations::new();
            if let Some(primary) = self.container.primary_signature() {
                confirmations.add_confirmation(primary.item().value.clone(), encrypted);
            }
            for signature in self.container.endorsing_signatures().unwrap_or_default() {
                confirmations.add_confirmation(signature.item().value.clone(), false);
            }
            Some(confirmations)
        } else {
            None
        };
        CorrelationState::new(self.signing_token.clone(), confirmations)
    }
}

fn wire_token(token: &TokenElement) -> BinarySecurityToken {
    BinarySecurityToken {
        id: token.id().to_string(),
        ..token.item().to_binary_token()
    }
}

fn token_bytes(token: &TokenElement) -> Result<Vec<u8>> {
    let mut writer = xml::writer();
    wire_token(token).write_to(&mut writer)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SecurityMode, SoapVersion};
    use crate::crypto::DefaultCryptoProvider;
    use crate::header_entry::read_entries;
    use crate::header_entry::HeaderCategory;
    use crate::message::header_xml;
    use crate::token::SecurityTokenSpecification;

    const BODY: &str = "<m:GetUser xmlns:m=\"urn:users\"><m:Id>42</m:Id></m:GetUser>";

    fn token(name: &str) -> Arc<SecurityToken> {
        Arc::new(SecurityToken::new(
            name,
            "urn:zentinel:token",
            name.as_bytes().to_vec(),
            vec![name.len() as u8; 32],
        ))
    }

    fn supporting(name: &str, mode: SecurityTokenAttachmentMode) -> SupportingTokenSpecification {
        SupportingTokenSpecification::new(SecurityTokenSpecification::new(token(name), vec![]), mode)
    }

    fn categories(message: &Message) -> Vec<HeaderCategory> {
        let header = message.find_header(elements::SECURITY, WSSE_NS).unwrap();
        let xml = header_xml(header, message.version()).unwrap();
        read_entries(&xml, 65_536)
            .unwrap()
            .iter()
            .map(|entry| entry.category())
            .collect()
    }

    #[test]
    fn test_sign_only_layout() {
        let config = MessageSecurityConfig::default();
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);

        let mut header = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .with_supporting_tokens(vec![supporting("audit", SecurityTokenAttachmentMode::Endorsing)]);
        header.secure(&mut message).unwrap();

        assert_eq!(message.body(), BODY);
        assert_eq!(
            categories(&message),
            vec![
                HeaderCategory::Timestamp,
                HeaderCategory::Token,
                HeaderCategory::Token,
                HeaderCategory::Signature,
                HeaderCategory::Signature,
            ]
        );
        let container = header.container();
        let primary = container.primary_signature().unwrap();
        let endorsing = container.endorsing_signatures().unwrap();
        assert_eq!(endorsing.len(), 1);
        assert!(endorsing[0].item().signed_info.references_id(primary.id()));
        assert!(primary
            .item()
            .signed_info
            .references_id(message.body_id().unwrap()));
    }

    #[test]
    fn test_message_security_requires_signing_token() {
        let config = MessageSecurityConfig::default();
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        let result = SendSecurityHeader::new(&config, &crypto).secure(&mut message);
        assert!(matches!(result, Err(WsSecurityError::MessageSecurity(_))));
        assert!(message.headers().is_empty());
    }

    #[test]
    fn test_secure_twice_is_rejected() {
        let config = MessageSecurityConfig::default();
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        let mut header = SendSecurityHeader::new(&config, &crypto).with_signing_token(token("client"));
        header.secure(&mut message).unwrap();

        assert!(matches!(
            header.secure(&mut message),
            Err(WsSecurityError::InvalidState(_))
        ));
        let mut again = SendSecurityHeader::new(&config, &crypto).with_signing_token(token("client"));
        assert!(matches!(
            again.secure(&mut message),
            Err(WsSecurityError::InvalidState(_))
        ));
    }

    #[test]
    fn test_sign_before_encrypt_keeps_signature_visible() {
        let config = MessageSecurityConfig::default();
        let crypto = DefaultCryptoProvider;
        let credential = KeyWrapCredential::new("service-kek", vec![9u8; 32]);
        let mut message = Message::new(SoapVersion::Soap11, BODY);

        let mut header = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .with_encryption(&credential);
        header.secure(&mut message).unwrap();

        assert!(message.body().starts_with("<xenc:EncryptedData"));
        assert_eq!(
            categories(&message),
            vec![
                HeaderCategory::Timestamp,
                HeaderCategory::Token,
                HeaderCategory::EncryptedKey,
                HeaderCategory::Signature,
            ]
        );
        let key = header.container().wrapped_encryption_key().unwrap();
        assert_eq!(key.reference_list().unwrap().data_reference_count(), 1);
    }

    #[test]
    fn test_encrypted_signature_is_replaced_in_place() {
        let mut config = MessageSecurityConfig::default();
        config.settings.protection_order = ProtectionOrder::SignBeforeEncryptAndEncryptSignature;
        let crypto = DefaultCryptoProvider;
        let credential = KeyWrapCredential::new("service-kek", vec![9u8; 32]);
        let mut message = Message::new(SoapVersion::Soap12, BODY);

        SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .with_encryption(&credential)
            .secure(&mut message)
            .unwrap();

        assert_eq!(
            categories(&message),
            vec![
                HeaderCategory::Timestamp,
                HeaderCategory::Token,
                HeaderCategory::EncryptedKey,
                HeaderCategory::EncryptedData,
            ]
        );
    }

    #[test]
    fn test_encrypt_before_sign_signs_ciphertext() {
        let mut config = MessageSecurityConfig::default();
        config.settings.protection_order = ProtectionOrder::EncryptBeforeSign;
        let crypto = DefaultCryptoProvider;
        let credential = KeyWrapCredential::new("service-kek", vec![9u8; 32]);
        let mut message = Message::new(SoapVersion::Soap11, BODY);

        let mut header = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .with_supporting_tokens(vec![supporting(
                "secret",
                SecurityTokenAttachmentMode::SignedEncrypted,
            )])
            .with_encryption(&credential);
        header.secure(&mut message).unwrap();

        let container = header.container();
        let primary = container.primary_signature().unwrap();
        let encrypted_token = &header.encrypted[container.signed_tokens()[0].id()];
        // the reference goes to the EncryptedData, not to the token
        assert!(primary
            .item()
            .signed_info
            .references_id(encrypted_token.id().unwrap()));
        assert_eq!(
            categories(&message).last(),
            Some(&HeaderCategory::EncryptedKey)
        );
    }

    #[test]
    fn test_encrypted_token_requires_credential() {
        let config = MessageSecurityConfig::default();
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        let result = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .with_supporting_tokens(vec![supporting(
                "secret",
                SecurityTokenAttachmentMode::SignedEncrypted,
            )])
            .secure(&mut message);
        assert!(matches!(result, Err(WsSecurityError::MessageSecurity(_))));
    }

    #[test]
    fn test_transport_mode_endorses_timestamp() {
        let mut config = MessageSecurityConfig::default();
        config.settings.security_mode = SecurityMode::Transport;
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);

        let mut header = SendSecurityHeader::new(&config, &crypto).with_supporting_tokens(vec![
            supporting("user", SecurityTokenAttachmentMode::Signed),
            supporting("device", SecurityTokenAttachmentMode::Endorsing),
        ]);
        header.secure(&mut message).unwrap();

        let container = header.container();
        assert!(container.primary_signature().is_none());
        assert_eq!(container.basic_supporting_tokens().unwrap().len(), 1);
        assert!(container.signed_supporting_tokens().is_none());
        let timestamp_id = container.timestamp().unwrap().id().to_string();
        let endorsing = container.endorsing_signatures().unwrap();
        assert!(endorsing[0].item().signed_info.references_id(&timestamp_id));
    }

    #[test]
    fn test_transport_endorsing_without_timestamp_fails() {
        let mut config = MessageSecurityConfig::default();
        config.settings.security_mode = SecurityMode::Transport;
        config.settings.include_timestamp = false;
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);

        let result = SendSecurityHeader::new(&config, &crypto)
            .with_supporting_tokens(vec![supporting("device", SecurityTokenAttachmentMode::Endorsing)])
            .secure(&mut message);
        assert!(matches!(result, Err(WsSecurityError::MessageSecurity(_))));
    }

    #[test]
    fn test_confirmations_echo_correlated_values() {
        let mut config = MessageSecurityConfig::default();
        config.settings.require_signature_confirmation = true;
        let crypto = DefaultCryptoProvider;

        let mut received = SignatureConfirmations::new();
        received.add_confirmation(b"sig-1".to_vec(), false);
        received.add_confirmation(b"sig-2".to_vec(), false);
        let correlation = Arc::new(CorrelationState::new(None, Some(received)));

        let mut message = Message::new(SoapVersion::Soap11, BODY);
        let mut header = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("service"))
            .with_correlation(Some(correlation));
        let state = header.secure(&mut message).unwrap();

        let echoed: Vec<Option<Vec<u8>>> = header
            .container()
            .signature_confirmations()
            .unwrap()
            .iter()
            .map(|c| c.item().value.clone())
            .collect();
        assert_eq!(echoed, vec![Some(b"sig-1".to_vec()), Some(b"sig-2".to_vec())]);

        // the reply's own signature is what the next hop must confirm
        let primary_value = header.container().primary_signature().unwrap().item().value.clone();
        let confirmations = state.signature_confirmations().unwrap();
        assert_eq!(confirmations.get_confirmation(0).unwrap().0, primary_value.as_slice());
    }

    #[test]
    fn test_unsigned_request_is_confirmed_without_value() {
        let mut config = MessageSecurityConfig::default();
        config.settings.require_signature_confirmation = true;
        let crypto = DefaultCryptoProvider;
        let correlation = Arc::new(CorrelationState::new(None, Some(SignatureConfirmations::new())));

        let mut message = Message::new(SoapVersion::Soap11, BODY);
        let mut header = SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("service"))
            .with_correlation(Some(correlation));
        header.secure(&mut message).unwrap();

        let confirmations = header.container().signature_confirmations().unwrap();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].item().value, None);
    }

    #[test]
    fn test_actor_wraps_header() {
        let mut config = MessageSecurityConfig::default();
        config.settings.actor = Some("urn:gateway".into());
        let crypto = DefaultCryptoProvider;
        let mut message = Message::new(SoapVersion::Soap11, BODY);
        SendSecurityHeader::new(&config, &crypto)
            .with_signing_token(token("client"))
            .secure(&mut message)
            .unwrap();

        let header = message.find_header(elements::SECURITY, WSSE_NS).unwrap();
        assert_eq!(header.actor(), Some("urn:gateway"));
        assert!(header.must_understand());
        assert!(message.to_xml().unwrap().contains("s:actor=\"urn:gateway\""));
    }
}
