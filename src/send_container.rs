//! Staging area for the elements of an outgoing security header.

use crate::encryption::EncryptedElement;
use crate::error::{Result, WsSecurityError};
use crate::signature::{SignatureConfirmationElement, SignatureElement};
use crate::timestamp::SecurityTimestamp;
use crate::token::{KeyIdentifierClause, SecurityToken};
use std::fmt;
use std::sync::Arc;

/// An (id, payload) pair staged for the outgoing header.
///
/// Two elements are equal only when they share the same payload allocation.
pub struct SendHeaderElement<T> {
    id: String,
    item: Arc<T>,
    marked_for_encryption: bool,
}

impl<T> SendHeaderElement<T> {
    pub fn new(id: impl Into<String>, item: Arc<T>) -> Self {
        Self {
            id: id.into(),
            item,
            marked_for_encryption: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    pub fn is_marked_for_encryption(&self) -> bool {
        self.marked_for_encryption
    }

    pub fn mark_for_encryption(&mut self) {
        self.marked_for_encryption = true;
    }
}

impl<T> Clone for SendHeaderElement<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            item: self.item.clone(),
            marked_for_encryption: self.marked_for_encryption,
        }
    }
}

impl<T> PartialEq for SendHeaderElement<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.item, &other.item)
    }
}

impl<T> Eq for SendHeaderElement<T> {}

impl<T> fmt::Debug for SendHeaderElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHeaderElement")
            .field("id", &self.id)
            .field("marked_for_encryption", &self.marked_for_encryption)
            .finish()
    }
}

pub type TokenElement = SendHeaderElement<SecurityToken>;
pub type SignatureHeaderElement = SendHeaderElement<SignatureElement>;
pub type ConfirmationElement = SendHeaderElement<SignatureConfirmationElement>;

fn snapshot<T>(elements: &[SendHeaderElement<T>]) -> Option<Vec<SendHeaderElement<T>>> {
    if elements.is_empty() {
        None
    } else {
        Some(elements.to_vec())
    }
}

/// Buckets of staged header elements, by category.
///
/// Buckets are append-only. Readers get snapshots (`None` when a bucket is
/// empty), never a live view.
#[derive(Debug, Default)]
pub struct SendHeaderElementContainer {
    timestamp: Option<SendHeaderElement<SecurityTimestamp>>,
    source_signing_token: Option<TokenElement>,
    wrapped_encryption_key: Option<EncryptedElement>,
    signed_supporting_tokens: Vec<TokenElement>,
    basic_supporting_tokens: Vec<TokenElement>,
    endorsing_supporting_tokens: Vec<TokenElement>,
    endorsing_derived_supporting_tokens: Vec<TokenElement>,
    signed_endorsing_supporting_tokens: Vec<TokenElement>,
    signed_endorsing_derived_supporting_tokens: Vec<TokenElement>,
    signature_confirmations: Vec<ConfirmationElement>,
    endorsing_signatures: Vec<SignatureHeaderElement>,
    primary_signature: Option<SignatureHeaderElement>,
    token_clauses: Vec<(Arc<SecurityToken>, KeyIdentifierClause)>,
    construction_complete: bool,
}

impl SendHeaderElementContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(&self) -> Option<&SendHeaderElement<SecurityTimestamp>> {
        self.timestamp.as_ref()
    }

    pub fn set_timestamp(&mut self, timestamp: SendHeaderElement<SecurityTimestamp>) {
        self.timestamp = Some(timestamp);
    }

    /// Token the primary signature is computed with.
    pub fn source_signing_token(&self) -> Option<&TokenElement> {
        self.source_signing_token.as_ref()
    }

    pub fn set_source_signing_token(&mut self, token: TokenElement) {
        self.source_signing_token = Some(token);
    }

    pub fn wrapped_encryption_key(&self) -> Option<&EncryptedElement> {
        self.wrapped_encryption_key.as_ref()
    }

    pub fn set_wrapped_encryption_key(&mut self, key: EncryptedElement) {
        self.wrapped_encryption_key = Some(key);
    }

    pub fn add_signed_supporting_token(&mut self, token: TokenElement) {
        self.signed_supporting_tokens.push(token);
    }

    pub fn signed_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.signed_supporting_tokens)
    }

    pub fn add_basic_supporting_token(&mut self, token: TokenElement) {
        self.basic_supporting_tokens.push(token);
    }

    pub fn basic_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.basic_supporting_tokens)
    }

    pub fn add_endorsing_supporting_token(&mut self, token: TokenElement) {
        self.endorsing_supporting_tokens.push(token);
    }

    pub fn endorsing_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.endorsing_supporting_tokens)
    }

    pub fn add_endorsing_derived_supporting_token(&mut self, token: TokenElement) {
        self.endorsing_derived_supporting_tokens.push(token);
    }

    pub fn endorsing_derived_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.endorsing_derived_supporting_tokens)
    }

    pub fn add_signed_endorsing_supporting_token(&mut self, token: TokenElement) {
        self.signed_endorsing_supporting_tokens.push(token);
    }

    pub fn signed_endorsing_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.signed_endorsing_supporting_tokens)
    }

    pub fn add_signed_endorsing_derived_supporting_token(&mut self, token: TokenElement) {
        self.signed_endorsing_derived_supporting_tokens.push(token);
    }

    pub fn signed_endorsing_derived_supporting_tokens(&self) -> Option<Vec<TokenElement>> {
        snapshot(&self.signed_endorsing_derived_supporting_tokens)
    }

    /// Every staged supporting token, in emission order.
    pub fn supporting_tokens(&self) -> Vec<TokenElement> {
        [
            &self.signed_supporting_tokens,
            &self.signed_endorsing_supporting_tokens,
            &self.signed_endorsing_derived_supporting_tokens,
            &self.endorsing_supporting_tokens,
            &self.endorsing_derived_supporting_tokens,
            &self.basic_supporting_tokens,
        ]
        .into_iter()
        .flat_map(|bucket| bucket.iter().cloned())
        .collect()
    }

    /// Tokens the primary signature covers.
    pub fn signed_tokens(&self) -> Vec<TokenElement> {
        [
            &self.signed_supporting_tokens,
            &self.signed_endorsing_supporting_tokens,
            &self.signed_endorsing_derived_supporting_tokens,
        ]
        .into_iter()
        .flat_map(|bucket| bucket.iter().cloned())
        .collect()
    }

    /// Tokens that sign the primary signature.
    pub fn endorsing_tokens(&self) -> Vec<TokenElement> {
        [
            &self.signed_endorsing_supporting_tokens,
            &self.signed_endorsing_derived_supporting_tokens,
            &self.endorsing_supporting_tokens,
            &self.endorsing_derived_supporting_tokens,
        ]
        .into_iter()
        .flat_map(|bucket| bucket.iter().cloned())
        .collect()
    }

    /// Only allowed while the header is being constructed.
    pub fn add_signature_confirmation(&mut self, confirmation: ConfirmationElement) -> Result<()> {
        if self.construction_complete {
            return Err(WsSecurityError::InvalidState(
                "signature confirmations can only be added while the header is constructed".into(),
            ));
        }
        self.signature_confirmations.push(confirmation);
        Ok(())
    }

    pub fn signature_confirmations(&self) -> Option<Vec<ConfirmationElement>> {
        snapshot(&self.signature_confirmations)
    }

    pub fn add_endorsing_signature(&mut self, signature: SignatureHeaderElement) {
        self.endorsing_signatures.push(signature);
    }

    pub fn endorsing_signatures(&self) -> Option<Vec<SignatureHeaderElement>> {
        snapshot(&self.endorsing_signatures)
    }

    pub fn primary_signature(&self) -> Option<&SignatureHeaderElement> {
        self.primary_signature.as_ref()
    }

    /// The slot holds at most one signature.
    pub fn set_primary_signature(&mut self, signature: SignatureHeaderElement) -> Result<()> {
        if self.primary_signature.is_some() {
            return Err(WsSecurityError::InvalidState(
                "primary signature has already been set".into(),
            ));
        }
        self.primary_signature = Some(signature);
        Ok(())
    }

    /// Remember how `token` is referenced. The first mapping for a token wins.
    pub fn map_security_token_to_str_clause(
        &mut self,
        token: &Arc<SecurityToken>,
        clause: KeyIdentifierClause,
    ) {
        if self.try_get_identifier_clause(token).is_none() {
            self.token_clauses.push((token.clone(), clause));
        }
    }

    pub fn try_get_identifier_clause(&self, token: &Arc<SecurityToken>) -> Option<&KeyIdentifierClause> {
        self.token_clauses
            .iter()
            .find(|(mapped, _)| Arc::ptr_eq(mapped, token))
            .map(|(_, clause)| clause)
    }

    pub fn complete_construction(&mut self) {
        self.construction_complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: &str) -> Arc<SecurityToken> {
        Arc::new(SecurityToken::new(id, "urn:t", id.as_bytes().to_vec(), vec![0; 32]))
    }

    #[test]
    fn test_element_identity_is_by_reference() {
        let shared = token("a");
        let first = SendHeaderElement::new("_1", shared.clone());
        let same_payload = SendHeaderElement::new("_2", shared);
        let equal_but_distinct = SendHeaderElement::new("_1", token("a"));

        assert_eq!(first, same_payload);
        assert_ne!(first, equal_but_distinct);
    }

    #[test]
    fn test_first_clause_mapping_wins() {
        let mut container = SendHeaderElementContainer::new();
        let tok = token("a");
        container.map_security_token_to_str_clause(&tok, KeyIdentifierClause::LocalId("a".into()));
        container.map_security_token_to_str_clause(&tok, KeyIdentifierClause::KeyName("other".into()));

        assert_eq!(
            container.try_get_identifier_clause(&tok),
            Some(&KeyIdentifierClause::LocalId("a".into()))
        );
        // structurally equal but distinct token has no mapping
        assert!(container.try_get_identifier_clause(&token("a")).is_none());
    }

    #[test]
    fn test_snapshots() {
        let mut container = SendHeaderElementContainer::new();
        assert!(container.signed_supporting_tokens().is_none());
        assert!(container.endorsing_signatures().is_none());

        container.add_signed_supporting_token(SendHeaderElement::new("_1", token("a")));
        let snapshot = container.signed_supporting_tokens().unwrap();
        container.add_signed_supporting_token(SendHeaderElement::new("_2", token("b")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(container.signed_supporting_tokens().unwrap().len(), 2);
    }

    #[test]
    fn test_bucket_views() {
        let mut container = SendHeaderElementContainer::new();
        container.add_signed_supporting_token(SendHeaderElement::new("_s", token("s")));
        container.add_endorsing_supporting_token(SendHeaderElement::new("_e", token("e")));
        container.add_endorsing_derived_supporting_token(SendHeaderElement::new("_ed", token("ed")));
        container.add_signed_endorsing_supporting_token(SendHeaderElement::new("_se", token("se")));
        container.add_signed_endorsing_derived_supporting_token(SendHeaderElement::new(
            "_sed",
            token("sed"),
        ));
        container.add_basic_supporting_token(SendHeaderElement::new("_b", token("b")));

        let ids = |tokens: Vec<TokenElement>| tokens.iter().map(|t| t.id().to_string()).collect::<Vec<_>>();
        assert_eq!(ids(container.signed_tokens()), vec!["_s", "_se", "_sed"]);
        assert_eq!(ids(container.endorsing_tokens()), vec!["_se", "_sed", "_e", "_ed"]);
        assert_eq!(container.supporting_tokens().len(), 6);
        assert_eq!(container.endorsing_derived_supporting_tokens().unwrap().len(), 1);
        assert_eq!(container.basic_supporting_tokens().unwrap().len(), 1);
    }

    #[test]
    fn test_single_primary_signature() {
        use crate::signature::SignedInfo;

        let signature = Arc::new(SignatureElement {
            id: "_sig".into(),
            signed_info: SignedInfo::new("c14n", "hmac"),
            value: vec![1],
            key_info: None,
        });
        let mut container = SendHeaderElementContainer::new();
        container
            .set_primary_signature(SendHeaderElement::new("_sig", signature.clone()))
            .unwrap();
        assert!(matches!(
            container.set_primary_signature(SendHeaderElement::new("_sig", signature)),
            Err(WsSecurityError::InvalidState(_))
        ));
    }

    #[test]
    fn test_confirmations_closed_after_construction() {
        let mut container = SendHeaderElementContainer::new();
        let confirmation = Arc::new(SignatureConfirmationElement {
            id: "_c".into(),
            value: None,
        });
        container
            .add_signature_confirmation(SendHeaderElement::new("_c", confirmation.clone()))
            .unwrap();
        container.complete_construction();
        assert!(container
            .add_signature_confirmation(SendHeaderElement::new("_c2", confirmation))
            .is_err());
        assert_eq!(container.signature_confirmations().unwrap().len(), 1);
    }
}
