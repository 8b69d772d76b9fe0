//! State carried from one security operation to the next related one.

use crate::error::{Result, WsSecurityError};
use crate::token::SecurityToken;
use std::sync::Arc;

/// Signature values to be echoed by, or checked against, the correlated message.
///
/// The encryption flag is shared by all entries: once any confirmation is
/// added as encrypted, every confirmation reports `encrypted = true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureConfirmations {
    confirmations: Vec<Vec<u8>>,
    encrypted: bool,
}

impl SignatureConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_confirmation(&mut self, value: Vec<u8>, encrypted: bool) {
        self.confirmations.push(value);
        self.encrypted |= encrypted;
    }

    /// The value at `index` together with the current shared encryption flag.
    pub fn get_confirmation(&self, index: usize) -> Result<(&[u8], bool)> {
        self.confirmations
            .get(index)
            .map(|value| (value.as_slice(), self.encrypted))
            .ok_or(WsSecurityError::IndexRange {
                index,
                count: self.confirmations.len(),
            })
    }

    pub fn count(&self) -> usize {
        self.confirmations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmations.is_empty()
    }

    pub fn is_marked_for_encryption(&self) -> bool {
        self.encrypted
    }

    pub fn values(&self) -> impl Iterator<Item = &[u8]> {
        self.confirmations.iter().map(Vec::as_slice)
    }
}

/// Immutable result of a completed secure or verify operation.
///
/// Callers treat it as opaque and hand it, usually behind an `Arc`, to the
/// next operation of the same exchange.
#[derive(Debug, Clone, Default)]
pub struct CorrelationState {
    token: Option<Arc<SecurityToken>>,
    signature_confirmations: Option<SignatureConfirmations>,
}

impl CorrelationState {
    pub fn new(
        token: Option<Arc<SecurityToken>>,
        signature_confirmations: Option<SignatureConfirmations>,
    ) -> Self {
        Self {
            token,
            signature_confirmations,
        }
    }

    pub fn security_token(&self) -> Option<&Arc<SecurityToken>> {
        self.token.as_ref()
    }

    pub fn signature_confirmations(&self) -> Option<&SignatureConfirmations> {
        self.signature_confirmations.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_flag_is_shared() {
        let mut confirmations = SignatureConfirmations::new();
        confirmations.add_confirmation(b"v1".to_vec(), false);
        assert_eq!(confirmations.get_confirmation(0).unwrap(), (&b"v1"[..], false));

        confirmations.add_confirmation(b"v2".to_vec(), true);
        assert_eq!(confirmations.get_confirmation(0).unwrap(), (&b"v1"[..], true));
        assert_eq!(confirmations.get_confirmation(1).unwrap(), (&b"v2"[..], true));

        // a later plaintext entry does not clear the flag
        confirmations.add_confirmation(b"v3".to_vec(), false);
        assert!(confirmations.is_marked_for_encryption());
    }

    #[test]
    fn test_index_out_of_range() {
        let mut confirmations = SignatureConfirmations::new();
        confirmations.add_confirmation(b"v1".to_vec(), false);
        confirmations.add_confirmation(b"v2".to_vec(), true);
        assert!(matches!(
            confirmations.get_confirmation(2),
            Err(WsSecurityError::IndexRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_correlation_state_is_shareable() {
        let token = Arc::new(SecurityToken::new("tok", "urn:t", vec![1], vec![2; 32]));
        let mut confirmations = SignatureConfirmations::new();
        confirmations.add_confirmation(vec![9], false);

        let state = Arc::new(CorrelationState::new(Some(token.clone()), Some(confirmations)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.signature_confirmations().map(|c| c.count()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(1));
        }
        assert!(Arc::ptr_eq(state.security_token().unwrap(), &token));
    }
}
