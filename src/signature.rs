//! ds:Signature and wsse11:SignatureConfirmation wire models.

use crate::crypto::CryptoProvider;
use crate::error::{Result, WsSecurityError};
use crate::names::{attributes, elements, qnames, xmlns, DSIG_NS, WSSE11_NS, WSU_NS};
use crate::token::KeyIdentifierClause;
use crate::xml::{self, ElementParts, XmlWriter};

/// One ds:Reference: a same-document id and the digest of its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReference {
    /// Referenced id, without the leading '#'
    pub id: String,
    pub digest_method: String,
    pub digest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInfo {
    pub canonicalization: String,
    pub signature_method: String,
    pub references: Vec<SignatureReference>,
}

impl SignedInfo {
    pub fn new(canonicalization: impl Into<String>, signature_method: impl Into<String>) -> Self {
        Self {
            canonicalization: canonicalization.into(),
            signature_method: signature_method.into(),
            references: Vec::new(),
        }
    }

    /// Digest `canonical` and append a reference to `id`.
    pub fn add_reference(
        &mut self,
        crypto: &dyn CryptoProvider,
        digest_method: &str,
        id: &str,
        canonical: &[u8],
    ) -> Result<()> {
        self.references.push(SignatureReference {
            id: id.to_string(),
            digest_method: digest_method.to_string(),
            digest: crypto.digest(digest_method, canonical)?,
        });
        Ok(())
    }

    pub fn references_id(&self, id: &str) -> bool {
        self.references.iter().any(|reference| reference.id == id)
    }

    fn write_to(&self, writer: &mut XmlWriter, standalone: bool) -> Result<()> {
        if standalone {
            xml::start(writer, qnames::SIGNED_INFO, &[(xmlns::DS, DSIG_NS)])?;
        } else {
            xml::start(writer, qnames::SIGNED_INFO, &[])?;
        }
        xml::empty(
            writer,
            qnames::CANONICALIZATION_METHOD,
            &[(attributes::ALGORITHM, &self.canonicalization)],
        )?;
        xml::empty(
            writer,
            qnames::SIGNATURE_METHOD,
            &[(attributes::ALGORITHM, &self.signature_method)],
        )?;
        for reference in &self.references {
            let uri = format!("#{}", reference.id);
            xml::start(writer, qnames::DS_REFERENCE, &[(attributes::URI, &uri)])?;
            xml::empty(
                writer,
                qnames::DIGEST_METHOD,
                &[(attributes::ALGORITHM, &reference.digest_method)],
            )?;
            xml::text_element(
                writer,
                qnames::DIGEST_VALUE,
                &[],
                &xml::encode_base64(&reference.digest),
            )?;
            xml::end(writer, qnames::DS_REFERENCE)?;
        }
        xml::end(writer, qnames::SIGNED_INFO)
    }

    /// Bytes the signature value is computed over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = xml::writer();
        self.write_to(&mut writer, true)?;
        Ok(writer.into_inner())
    }

    fn read_from(parts: &ElementParts<'_>) -> Result<Self> {
        let mut signed_info = Self::new(String::new(), String::new());
        for child in parts.children()? {
            let child_parts = ElementParts::parse(child.xml)?;
            match child.local_name.as_str() {
                elements::CANONICALIZATION_METHOD => {
                    signed_info.canonicalization =
                        child_parts.required_attribute(attributes::ALGORITHM)?.to_string();
                }
                elements::SIGNATURE_METHOD => {
                    signed_info.signature_method =
                        child_parts.required_attribute(attributes::ALGORITHM)?.to_string();
                }
                elements::REFERENCE => {
                    signed_info.references.push(read_reference(&child_parts)?);
                }
                other => {
                    return Err(WsSecurityError::SecurityFormat(format!(
                        "unexpected <{}> in SignedInfo",
                        other
                    )))
                }
            }
        }
        if signed_info.canonicalization.is_empty() || signed_info.signature_method.is_empty() {
            return Err(WsSecurityError::SecurityFormat(
                "SignedInfo must declare canonicalization and signature methods".into(),
            ));
        }
        if signed_info.references.is_empty() {
            return Err(WsSecurityError::SecurityFormat(
                "SignedInfo contains no references".into(),
            ));
        }
        Ok(signed_info)
    }
}

fn read_reference(parts: &ElementParts<'_>) -> Result<SignatureReference> {
    let id = xml::fragment(parts.required_attribute(attributes::URI)?)?.to_string();
    let mut digest_method = None;
    let mut digest = None;
    for child in parts.children()? {
        let child_parts = ElementParts::parse(child.xml)?;
        match child.local_name.as_str() {
            elements::DIGEST_METHOD => {
                digest_method = Some(child_parts.required_attribute(attributes::ALGORITHM)?.to_string());
            }
            elements::DIGEST_VALUE => {
                digest = Some(xml::decode_base64(&child_parts.text()?)?);
            }
            _ => {}
        }
    }
    match (digest_method, digest) {
        (Some(digest_method), Some(digest)) => Ok(SignatureReference {
            id,
            digest_method,
            digest,
        }),
        _ => Err(WsSecurityError::SecurityFormat(format!(
            "reference to '#{}' is missing its digest",
            id
        ))),
    }
}

/// A complete ds:Signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureElement {
    pub id: String,
    pub signed_info: SignedInfo,
    pub value: Vec<u8>,
    pub key_info: Option<KeyIdentifierClause>,
}

impl SignatureElement {
    /// Sign `signed_info` with `key`.
    pub fn sign(
        crypto: &dyn CryptoProvider,
        id: impl Into<String>,
        signed_info: SignedInfo,
        key: &[u8],
        key_info: Option<KeyIdentifierClause>,
    ) -> Result<Self> {
        let value = crypto.sign(&signed_info.signature_method, key, &signed_info.canonical_bytes()?)?;
        Ok(Self {
            id: id.into(),
            signed_info,
            value,
            key_info,
        })
    }

    /// Check the signature value against `key`.
    pub fn verify_value(&self, crypto: &dyn CryptoProvider, key: &[u8]) -> Result<()> {
        let signed = self.signed_info.canonical_bytes()?;
        if crypto.verify(&self.signed_info.signature_method, key, &signed, &self.value)? {
            Ok(())
        } else {
            Err(WsSecurityError::MessageSecurity(format!(
                "signature '{}' value does not verify",
                self.id
            )))
        }
    }

    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::start(
            writer,
            qnames::SIGNATURE,
            &[(xmlns::DS, DSIG_NS), (attributes::ID, &self.id)],
        )?;
        self.signed_info.write_to(writer, false)?;
        xml::text_element(
            writer,
            qnames::SIGNATURE_VALUE,
            &[],
            &xml::encode_base64(&self.value),
        )?;
        if let Some(clause) = &self.key_info {
            xml::start(writer, qnames::KEY_INFO, &[])?;
            clause.write_to(writer)?;
            xml::end(writer, qnames::KEY_INFO)?;
        }
        xml::end(writer, qnames::SIGNATURE)
    }

    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = xml::writer();
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub(crate) fn read_from(xml: &str) -> Result<Self> {
        let parts = ElementParts::parse_expected(xml, elements::SIGNATURE)?;
        let mut signed_info = None;
        let mut value = None;
        let mut key_info = None;
        for child in parts.children()? {
            let child_parts = ElementParts::parse(child.xml)?;
            match child.local_name.as_str() {
                elements::SIGNED_INFO => signed_info = Some(SignedInfo::read_from(&child_parts)?),
                elements::SIGNATURE_VALUE => {
                    value = Some(xml::decode_base64(&child_parts.text()?)?)
                }
                elements::KEY_INFO => {
                    key_info = Some(KeyIdentifierClause::read_from_key_info(&child_parts)?)
                }
                _ => {}
            }
        }
        Ok(Self {
            id: parts.required_attribute(attributes::ID)?.to_string(),
            signed_info: signed_info.ok_or_else(|| {
                WsSecurityError::SecurityFormat("signature has no SignedInfo".into())
            })?,
            value: value.ok_or_else(|| {
                WsSecurityError::SecurityFormat("signature has no SignatureValue".into())
            })?,
            key_info,
        })
    }
}

/// Echo of a signature value received in the correlated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfirmationElement {
    pub id: String,
    /// Absent when the request carried no signature
    pub value: Option<Vec<u8>>,
}

impl SignatureConfirmationElement {
    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        let encoded = self.value.as_deref().map(xml::encode_base64);
        let mut attrs: Vec<(&str, &str)> = vec![
            (xmlns::WSSE11, WSSE11_NS),
            (xmlns::WSU, WSU_NS),
            (qnames::WSU_ID, &self.id),
        ];
        if let Some(value) = &encoded {
            attrs.push((attributes::VALUE, value));
        }
        xml::empty(writer, qnames::SIGNATURE_CONFIRMATION, &attrs)
    }

    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = xml::writer();
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub(crate) fn read_from(xml: &str) -> Result<Self> {
        let parts = ElementParts::parse_expected(xml, elements::SIGNATURE_CONFIRMATION)?;
        Ok(Self {
            id: parts.required_attribute(attributes::ID)?.to_string(),
            value: parts
                .attribute(attributes::VALUE)
                .map(xml::decode_base64)
                .transpose()?,
        })
    }
}
