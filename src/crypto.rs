//! Cryptographic collaborator interface and the default AES-GCM / HMAC provider.
//!
//! The header pipeline never touches primitives directly: it asks a
//! [`CryptoProvider`] for keyed [`SymmetricCipher`] instances, digests and
//! signatures, and wraps every primitive failure in
//! [`WsSecurityError::Cryptographic`].

use crate::error::{Result, WsSecurityError};
use crate::names::algorithms;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Standard 12-byte nonce length for AES-GCM.
pub const GCM_IV_LEN: usize = 12;

/// A keyed symmetric algorithm.
pub trait SymmetricCipher: Send + Sync {
    /// Algorithm URI written into EncryptionMethod.
    fn algorithm(&self) -> &str;

    /// Length of the IV prefixed to every cipher value.
    fn iv_len(&self) -> usize;

    /// Encrypt with a freshly generated IV; returns `(iv, ciphertext)`.
    fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>;

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

impl fmt::Debug for dyn SymmetricCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricCipher")
            .field("algorithm", &self.algorithm())
            .finish()
    }
}

/// Source of keyed ciphers, digests and symmetric signatures.
pub trait CryptoProvider: Send + Sync {
    /// Build a cipher for `algorithm` keyed with `key`.
    fn cipher(&self, algorithm: &str, key: &[u8]) -> Result<Arc<dyn SymmetricCipher>>;

    /// Generate random key material of `bits` length.
    fn generate_key(&self, bits: usize) -> Vec<u8>;

    fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>>;

    fn sign(&self, algorithm: &str, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Constant-time signature check.
    fn verify(&self, algorithm: &str, key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool>;
}

/// AES-256-GCM keyed cipher.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key).map_err(|_| {
            WsSecurityError::Cryptographic(format!(
                "AES-256-GCM requires a 32-byte key, got {} bytes",
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }
}

impl SymmetricCipher for AesGcmCipher {
    fn algorithm(&self) -> &str {
        algorithms::AES256_GCM
    }

    fn iv_len(&self) -> usize {
        GCM_IV_LEN
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut iv = vec![0u8; GCM_IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| WsSecurityError::Cryptographic("AES-GCM seal failed".into()))?;
        Ok((iv, ciphertext))
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != GCM_IV_LEN {
            return Err(WsSecurityError::Cryptographic(format!(
                "invalid IV length: expected {}, got {}",
                GCM_IV_LEN,
                iv.len()
            )));
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| {
                WsSecurityError::Cryptographic(
                    "decryption failed: authentication tag mismatch (corrupted or tampered data)"
                        .into(),
                )
            })
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Provider backed by AES-256-GCM, SHA-256 and HMAC-SHA256.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCryptoProvider;

impl DefaultCryptoProvider {
    fn hmac(key: &[u8], data: &[u8]) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| WsSecurityError::Cryptographic("invalid HMAC key".into()))?;
        mac.update(data);
        Ok(mac)
    }

    fn unsupported(kind: &str, algorithm: &str) -> WsSecurityError {
        WsSecurityError::Cryptographic(format!("unsupported {} algorithm: {}", kind, algorithm))
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn cipher(&self, algorithm: &str, key: &[u8]) -> Result<Arc<dyn SymmetricCipher>> {
        match algorithm {
            algorithms::AES256_GCM => Ok(Arc::new(AesGcmCipher::new(key)?)),
            other => Err(Self::unsupported("encryption", other)),
        }
    }

    fn generate_key(&self, bits: usize) -> Vec<u8> {
        let mut key = vec![0u8; bits / 8];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    fn digest(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>> {
        match algorithm {
            algorithms::SHA256 => Ok(<Sha256 as Digest>::digest(data).to_vec()),
            other => Err(Self::unsupported("digest", other)),
        }
    }

    fn sign(&self, algorithm: &str, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match algorithm {
            algorithms::HMAC_SHA256 => Ok(Self::hmac(key, data)?.finalize().into_bytes().to_vec()),
            other => Err(Self::unsupported("signature", other)),
        }
    }

    fn verify(&self, algorithm: &str, key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool> {
        match algorithm {
            algorithms::HMAC_SHA256 => Ok(Self::hmac(key, data)?.verify_slice(signature).is_ok()),
            other => Err(Self::unsupported("signature", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let provider = DefaultCryptoProvider;
        let key = provider.generate_key(256);
        assert_eq!(key.len(), 32);

        let cipher = provider.cipher(algorithms::AES256_GCM, &key).unwrap();
        let (iv, ct) = cipher.encrypt(b"<m:GetUser/>").unwrap();
        assert_eq!(iv.len(), GCM_IV_LEN);
        assert_eq!(cipher.decrypt(&iv, &ct).unwrap(), b"<m:GetUser/>");
    }

    #[test]
    fn test_tampered_ciphertext_is_cryptographic_error() {
        let provider = DefaultCryptoProvider;
        let cipher = provider.cipher(algorithms::AES256_GCM, &[1u8; 32]).unwrap();
        let (iv, mut ct) = cipher.encrypt(b"payload").unwrap();
        ct[0] ^= 0xff;
        assert!(matches!(
            cipher.decrypt(&iv, &ct),
            Err(WsSecurityError::Cryptographic(_))
        ));
    }

    #[test]
    fn test_wrong_key_length() {
        let provider = DefaultCryptoProvider;
        assert!(provider.cipher(algorithms::AES256_GCM, &[0u8; 16]).is_err());
        assert!(provider.cipher("urn:unknown", &[0u8; 32]).is_err());
    }

    #[test]
    fn test_hmac_sign_verify() {
        let provider = DefaultCryptoProvider;
        let key = [9u8; 32];
        let sig = provider.sign(algorithms::HMAC_SHA256, &key, b"signed info").unwrap();
        assert!(provider.verify(algorithms::HMAC_SHA256, &key, b"signed info", &sig).unwrap());
        assert!(!provider.verify(algorithms::HMAC_SHA256, &key, b"other", &sig).unwrap());
        assert!(!provider.verify(algorithms::HMAC_SHA256, &[8u8; 32], b"signed info", &sig).unwrap());
    }

    #[test]
    fn test_sha256_digest() {
        let provider = DefaultCryptoProvider;
        let digest = provider.digest(algorithms::SHA256, b"abc").unwrap();
        assert_eq!(digest.len(), 32);
        assert_eq!(digest[0], 0xba);
    }
}
