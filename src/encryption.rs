//! Encrypted elements (xenc:EncryptedData and xenc:EncryptedKey) and their lifecycle.
//!
//! Every ciphertext moves through one of two one-way paths:
//!
//! ```text
//! New -> EncryptionSetup -> Encrypted                 (sending)
//! Read -> DecryptionSetup -> Decrypted                (receiving)
//! ```
//!
//! Decryption is lazy: [`EncryptedElement::get_plaintext`] runs the cipher on
//! first access only and caches the result.

use crate::crypto::SymmetricCipher;
use crate::error::{Result, WsSecurityError};
use crate::names::{attributes, elements, qnames, xmlns, DSIG_NS, XENC_NS};
use crate::reference_list::ReferenceList;
use crate::token::KeyIdentifierClause;
use crate::xml::{self, ElementParts, XmlWriter};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle state of an encrypted element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    New,
    EncryptionSetup,
    Encrypted,
    DecryptionSetup,
    Decrypted,
    Read,
}

/// What the ciphertext carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptedKind {
    /// Encrypted content or element (xenc:EncryptedData)
    Data { type_uri: Option<String> },
    /// A wrapped symmetric key (xenc:EncryptedKey)
    Key {
        reference_list: Option<ReferenceList>,
        carried_key_name: Option<String>,
    },
}

pub struct EncryptedElement {
    id: Option<String>,
    kind: EncryptedKind,
    state: EncryptionState,
    algorithm: String,
    key_info: Option<KeyIdentifierClause>,
    recipient: Option<String>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    plaintext: Option<Vec<u8>>,
    cipher: Option<Arc<dyn SymmetricCipher>>,
}

impl EncryptedElement {
    fn new(id: Option<String>, kind: EncryptedKind) -> Self {
        Self {
            id,
            kind,
            state: EncryptionState::New,
            algorithm: String::new(),
            key_info: None,
            recipient: None,
            iv: Vec::new(),
            ciphertext: Vec::new(),
            plaintext: None,
            cipher: None,
        }
    }

    /// Empty xenc:EncryptedData.
    pub fn new_data(id: impl Into<String>, type_uri: Option<&str>) -> Self {
        Self::new(
            Some(id.into()),
            EncryptedKind::Data {
                type_uri: type_uri.map(str::to_string),
            },
        )
    }

    /// Empty xenc:EncryptedKey.
    pub fn new_key(id: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            EncryptedKind::Key {
                reference_list: None,
                carried_key_name: None,
            },
        )
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn kind(&self) -> &EncryptedKind {
        &self.kind
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, EncryptedKind::Key { .. })
    }

    pub fn state(&self) -> EncryptionState {
        self.state
    }

    /// Algorithm URI; empty until encryption is set up or the element is read.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn key_info(&self) -> Option<&KeyIdentifierClause> {
        self.key_info.as_ref()
    }

    pub fn set_key_info(&mut self, clause: KeyIdentifierClause) {
        self.key_info = Some(clause);
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn set_recipient(&mut self, recipient: Option<String>) {
        self.recipient = recipient;
    }

    pub fn type_uri(&self) -> Option<&str> {
        match &self.kind {
            EncryptedKind::Data { type_uri } => type_uri.as_deref(),
            EncryptedKind::Key { .. } => None,
        }
    }

    pub fn reference_list(&self) -> Option<&ReferenceList> {
        match &self.kind {
            EncryptedKind::Key { reference_list, .. } => reference_list.as_ref(),
            EncryptedKind::Data { .. } => None,
        }
    }

    pub fn carried_key_name(&self) -> Option<&str> {
        match &self.kind {
            EncryptedKind::Key {
                carried_key_name, ..
            } => carried_key_name.as_deref(),
            EncryptedKind::Data { .. } => None,
        }
    }

    /// Attach the reference list of a wrapped key.
    pub fn set_reference_list(&mut self, list: ReferenceList) -> Result<()> {
        match &mut self.kind {
            EncryptedKind::Key { reference_list, .. } => {
                *reference_list = Some(list);
                Ok(())
            }
            EncryptedKind::Data { .. } => Err(WsSecurityError::InvalidState(
                "only an encrypted key carries a reference list".into(),
            )),
        }
    }

    pub fn set_carried_key_name(&mut self, name: Option<String>) -> Result<()> {
        match &mut self.kind {
            EncryptedKind::Key {
                carried_key_name, ..
            } => {
                *carried_key_name = name;
                Ok(())
            }
            EncryptedKind::Data { .. } => Err(WsSecurityError::InvalidState(
                "only an encrypted key carries a key name".into(),
            )),
        }
    }

    fn describe(&self) -> &str {
        self.id.as_deref().unwrap_or("<anonymous>")
    }

    /// Stage `plaintext` for encryption with `cipher`. Valid only in `New`.
    pub fn set_up_encryption(
        &mut self,
        cipher: Arc<dyn SymmetricCipher>,
        plaintext: Vec<u8>,
    ) -> Result<()> {
        if self.state != EncryptionState::New {
            return Err(WsSecurityError::InvalidState(format!(
                "cannot set up encryption of '{}' in state {:?}",
                self.describe(),
                self.state
            )));
        }
        if cipher.algorithm().is_empty() {
            return Err(WsSecurityError::Argument(
                "encryption algorithm must be specified".into(),
            ));
        }
        self.algorithm = cipher.algorithm().to_string();
        self.cipher = Some(cipher);
        self.plaintext = Some(plaintext);
        self.state = EncryptionState::EncryptionSetup;
        Ok(())
    }

    /// Run the cipher over the staged plaintext.
    ///
    /// # Panics
    ///
    /// Panics unless the element is in `EncryptionSetup`: encrypting an element
    /// that was never staged is a construction bug in the caller.
    pub fn force_encryption(&mut self) -> Result<()> {
        assert_eq!(
            self.state,
            EncryptionState::EncryptionSetup,
            "force_encryption called on '{}' outside EncryptionSetup",
            self.describe()
        );
        let (iv, ciphertext) = match (&self.cipher, &self.plaintext) {
            (Some(cipher), Some(plaintext)) => cipher.encrypt(plaintext).map_err(|e| {
                WsSecurityError::Cryptographic(format!(
                    "failed to encrypt '{}': {}",
                    self.describe(),
                    e
                ))
            })?,
            _ => unreachable!("EncryptionSetup always holds a cipher and plaintext"),
        };
        self.iv = iv;
        self.ciphertext = ciphertext;
        self.plaintext = None;
        self.cipher = None;
        self.state = EncryptionState::Encrypted;
        Ok(())
    }

    /// Attach the cipher that will decrypt this element. Valid only in `Read`.
    pub fn set_up_decryption(&mut self, cipher: Arc<dyn SymmetricCipher>) -> Result<()> {
        if self.state != EncryptionState::Read {
            return Err(WsSecurityError::InvalidState(format!(
                "cannot set up decryption of '{}' in state {:?}",
                self.describe(),
                self.state
            )));
        }
        if cipher.algorithm() != self.algorithm {
            return Err(WsSecurityError::Argument(format!(
                "'{}' is encrypted with {}, not {}",
                self.describe(),
                self.algorithm,
                cipher.algorithm()
            )));
        }
        // the wire carries iv || ciphertext
        let iv_len = cipher.iv_len();
        if self.ciphertext.len() < iv_len {
            return Err(WsSecurityError::SecurityFormat(format!(
                "cipher value of '{}' is shorter than its IV",
                self.describe()
            )));
        }
        self.iv = self.ciphertext.drain(..iv_len).collect();
        self.cipher = Some(cipher);
        self.state = EncryptionState::DecryptionSetup;
        Ok(())
    }

    /// Decrypted bytes. Decrypts on first call, then serves the cached buffer.
    pub fn get_plaintext(&mut self) -> Result<&[u8]> {
        match self.state {
            EncryptionState::DecryptionSetup => {
                let plaintext = match &self.cipher {
                    Some(cipher) => cipher.decrypt(&self.iv, &self.ciphertext).map_err(|e| {
                        WsSecurityError::Cryptographic(format!(
                            "failed to decrypt '{}': {}",
                            self.describe(),
                            e
                        ))
                    })?,
                    None => unreachable!("DecryptionSetup always holds a cipher"),
                };
                debug!(id = self.describe(), bytes = plaintext.len(), "Decrypted element");
                self.plaintext = Some(plaintext);
                self.cipher = None;
                self.state = EncryptionState::Decrypted;
            }
            EncryptionState::Decrypted => {}
            other => {
                return Err(WsSecurityError::BadEncryptionState(format!(
                    "plaintext of '{}' is not available in state {:?}",
                    self.describe(),
                    other
                )))
            }
        }
        match &self.plaintext {
            Some(plaintext) => Ok(plaintext),
            None => unreachable!("Decrypted always holds plaintext"),
        }
    }

    /// Serialize the element. Requires ciphertext to be present.
    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        if matches!(
            self.state,
            EncryptionState::New | EncryptionState::EncryptionSetup
        ) {
            return Err(WsSecurityError::InvalidState(format!(
                "'{}' has no ciphertext to write in state {:?}",
                self.describe(),
                self.state
            )));
        }

        let name = match self.kind {
            EncryptedKind::Data { .. } => qnames::ENCRYPTED_DATA,
            EncryptedKind::Key { .. } => qnames::ENCRYPTED_KEY,
        };
        let mut attrs: Vec<(&str, &str)> = vec![(xmlns::XENC, XENC_NS)];
        if let Some(id) = &self.id {
            attrs.push((attributes::ID, id));
        }
        if let Some(type_uri) = self.type_uri() {
            attrs.push((attributes::TYPE, type_uri));
        }
        if let Some(recipient) = &self.recipient {
            attrs.push((attributes::RECIPIENT, recipient));
        }
        xml::start(writer, name, &attrs)?;
        xml::empty(
            writer,
            qnames::ENCRYPTION_METHOD,
            &[(attributes::ALGORITHM, &self.algorithm)],
        )?;
        if let Some(clause) = &self.key_info {
            xml::start(writer, qnames::KEY_INFO, &[(xmlns::DS, DSIG_NS)])?;
            clause.write_to(writer)?;
            xml::end(writer, qnames::KEY_INFO)?;
        }

        let mut cipher_value = Vec::with_capacity(self.iv.len() + self.ciphertext.len());
        cipher_value.extend_from_slice(&self.iv);
        cipher_value.extend_from_slice(&self.ciphertext);
        xml::start(writer, qnames::CIPHER_DATA, &[])?;
        xml::text_element(writer, qnames::CIPHER_VALUE, &[], &xml::encode_base64(&cipher_value))?;
        xml::end(writer, qnames::CIPHER_DATA)?;

        if let Some(list) = self.reference_list() {
            list.write_to(writer)?;
        }
        if let Some(name) = self.carried_key_name() {
            xml::text_element(writer, qnames::CARRIED_KEY_NAME, &[], name)?;
        }
        xml::end(writer, name)
    }

    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = xml::writer();
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// Read an EncryptedData or EncryptedKey. Cipher content larger than
    /// `max_buffer_size` bytes is rejected before it is decoded.
    pub(crate) fn read_from(xml: &str, max_buffer_size: usize) -> Result<Self> {
        let parts = ElementParts::parse(xml)?;
        let mut element = match parts.local_name.as_str() {
            elements::ENCRYPTED_DATA => Self::new(
                parts.attribute(attributes::ID).map(str::to_string),
                EncryptedKind::Data {
                    type_uri: parts.attribute(attributes::TYPE).map(str::to_string),
                },
            ),
            elements::ENCRYPTED_KEY => Self::new(
                parts.attribute(attributes::ID).map(str::to_string),
                EncryptedKind::Key {
                    reference_list: None,
                    carried_key_name: None,
                },
            ),
            other => {
                return Err(WsSecurityError::SecurityFormat(format!(
                    "<{}> is not an encrypted element",
                    other
                )))
            }
        };
        element.recipient = parts.attribute(attributes::RECIPIENT).map(str::to_string);

        let mut cipher_value = None;
        for child in parts.children()? {
            let child_parts = ElementParts::parse(child.xml)?;
            match child.local_name.as_str() {
                elements::ENCRYPTION_METHOD => {
                    element.algorithm = child_parts
                        .required_attribute(attributes::ALGORITHM)?
                        .to_string();
                }
                elements::KEY_INFO => {
                    element.key_info = Some(KeyIdentifierClause::read_from_key_info(&child_parts)?);
                }
                elements::CIPHER_DATA => {
                    for inner in child_parts.children()? {
                        if inner.local_name == elements::CIPHER_VALUE {
                            let text = ElementParts::parse(inner.xml)?.text()?;
                            cipher_value = Some(xml::decode_base64_bounded(
                                &text,
                                max_buffer_size,
                                "cipher value",
                            )?);
                        }
                    }
                }
                elements::REFERENCE_LIST => {
                    element.set_reference_list(ReferenceList::read_from(child.xml)?)?;
                }
                elements::CARRIED_KEY_NAME => {
                    element.set_carried_key_name(Some(child_parts.text()?))?;
                }
                other => debug!(element = other, "Ignoring encrypted element child"),
            }
        }

        if element.algorithm.is_empty() {
            return Err(WsSecurityError::SecurityFormat(format!(
                "'{}' has no encryption method",
                element.describe()
            )));
        }
        element.ciphertext = cipher_value.ok_or_else(|| {
            WsSecurityError::SecurityFormat(format!(
                "'{}' has no cipher value",
                element.describe()
            ))
        })?;
        element.state = EncryptionState::Read;
        Ok(element)
    }
}

impl fmt::Debug for EncryptedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // plaintext stays out of logs
        f.debug_struct("EncryptedElement")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("algorithm", &self.algorithm)
            .field("recipient", &self.recipient)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}
