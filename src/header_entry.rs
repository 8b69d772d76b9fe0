//! Positional entries over the children of a received security header.

use crate::encryption::EncryptedElement;
use crate::error::{Result, WsSecurityError};
use crate::names::{attributes, elements};
use crate::reference_list::ReferenceList;
use crate::signature::{SignatureConfirmationElement, SignatureElement};
use crate::timestamp::SecurityTimestamp;
use crate::token::{BinarySecurityToken, SecurityTokenSpecification};
use crate::xml::{self, ElementParts};
use bitflags::bitflags;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

bitflags! {
    /// Role the classifier assigned to a header element.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindingMode: u8 {
        const PRIMARY = 0b0000_0001;
        const ENDORSING = 0b0000_0010;
        const SIGNED = 0b0000_0100;
        const SIGNED_ENDORSING = Self::SIGNED.bits() | Self::ENDORSING.bits();
        const BASIC = 0b0000_1000;
    }
}

impl BindingMode {
    pub const UNKNOWN: BindingMode = BindingMode::empty();

    pub fn label(&self) -> &'static str {
        if *self == Self::PRIMARY {
            "Primary"
        } else if *self == Self::SIGNED_ENDORSING {
            "SignedEndorsing"
        } else if *self == Self::ENDORSING {
            "Endorsing"
        } else if *self == Self::SIGNED {
            "Signed"
        } else if *self == Self::BASIC {
            "Basic"
        } else {
            "Unknown"
        }
    }
}

/// Category of a header child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderCategory {
    Timestamp,
    Token,
    Signature,
    SignatureConfirmation,
    ReferenceList,
    EncryptedKey,
    EncryptedData,
}

/// A token found in the header, plus its resolution once known.
#[derive(Debug, Clone)]
pub struct ReceivedToken {
    pub wire: BinarySecurityToken,
    pub specification: Option<SecurityTokenSpecification>,
}

/// The parsed object behind an entry.
#[derive(Debug)]
pub enum HeaderItem {
    Timestamp(SecurityTimestamp),
    Token(ReceivedToken),
    Signature(SignatureElement),
    SignatureConfirmation(SignatureConfirmationElement),
    ReferenceList(ReferenceList),
    EncryptedKey(EncryptedElement),
    EncryptedData(EncryptedElement),
}

impl HeaderItem {
    pub fn category(&self) -> HeaderCategory {
        match self {
            Self::Timestamp(_) => HeaderCategory::Timestamp,
            Self::Token(_) => HeaderCategory::Token,
            Self::Signature(_) => HeaderCategory::Signature,
            Self::SignatureConfirmation(_) => HeaderCategory::SignatureConfirmation,
            Self::ReferenceList(_) => HeaderCategory::ReferenceList,
            Self::EncryptedKey(_) => HeaderCategory::EncryptedKey,
            Self::EncryptedData(_) => HeaderCategory::EncryptedData,
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            Self::Timestamp(ts) => Some(&ts.id),
            Self::Token(token) => Some(&token.wire.id),
            Self::Signature(signature) => Some(&signature.id),
            Self::SignatureConfirmation(confirmation) => Some(&confirmation.id),
            Self::ReferenceList(_) => None,
            Self::EncryptedKey(element) | Self::EncryptedData(element) => element.id(),
        }
    }

    /// Canonical bytes a signature reference to this item is digested over.
    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Timestamp(ts) => ts.canonical_bytes(),
            Self::Token(token) => {
                let mut writer = xml::writer();
                token.wire.write_to(&mut writer)?;
                Ok(writer.into_inner())
            }
            Self::Signature(signature) => signature.canonical_bytes(),
            Self::SignatureConfirmation(confirmation) => confirmation.canonical_bytes(),
            Self::ReferenceList(list) => {
                let mut writer = xml::writer();
                list.write_to(&mut writer)?;
                Ok(writer.into_inner())
            }
            Self::EncryptedKey(element) | Self::EncryptedData(element) => element.canonical_bytes(),
        }
    }

    /// Parse one header child. `None` for categories this pipeline does not process.
    pub(crate) fn read_from(
        local_name: &str,
        xml: &str,
        max_buffer_size: usize,
    ) -> Result<Option<Self>> {
        let item = match local_name {
            elements::TIMESTAMP => Self::Timestamp(SecurityTimestamp::read_from(xml)?),
            elements::BINARY_SECURITY_TOKEN => Self::Token(ReceivedToken {
                wire: BinarySecurityToken::read_from(xml)?,
                specification: None,
            }),
            elements::SIGNATURE => Self::Signature(SignatureElement::read_from(xml)?),
            elements::SIGNATURE_CONFIRMATION => {
                Self::SignatureConfirmation(SignatureConfirmationElement::read_from(xml)?)
            }
            elements::REFERENCE_LIST => Self::ReferenceList(ReferenceList::read_from(xml)?),
            elements::ENCRYPTED_KEY => {
                Self::EncryptedKey(EncryptedElement::read_from(xml, max_buffer_size)?)
            }
            elements::ENCRYPTED_DATA => {
                Self::EncryptedData(EncryptedElement::read_from(xml, max_buffer_size)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(item))
    }
}

/// What the receive pipeline learned about a supporting token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTracker {
    /// Token keys the primary signature
    pub is_primary: bool,
    /// Token is covered by the primary signature
    pub is_signed: bool,
    /// Token keys an endorsing signature
    pub is_endorsing: bool,
    /// Token travelled encrypted
    pub was_encrypted: bool,
}

impl TokenTracker {
    pub fn binding_mode(&self) -> BindingMode {
        if self.is_primary {
            BindingMode::PRIMARY
        } else if self.is_signed && self.is_endorsing {
            BindingMode::SIGNED_ENDORSING
        } else if self.is_endorsing {
            BindingMode::ENDORSING
        } else if self.is_signed {
            BindingMode::SIGNED
        } else {
            BindingMode::BASIC
        }
    }
}

/// One child of the received security header, in wire order.
#[derive(Debug)]
pub struct HeaderElementEntry {
    position: usize,
    item: HeaderItem,
    id: Option<String>,
    encrypted_form_id: Option<String>,
    encrypted_form: Option<Vec<u8>>,
    binding_mode: BindingMode,
    binding_mode_assigned: bool,
    token_tracker: Option<TokenTracker>,
}

impl HeaderElementEntry {
    pub(crate) fn new(position: usize, item: HeaderItem) -> Self {
        let id = item.id().map(str::to_string);
        Self {
            position,
            item,
            id,
            encrypted_form_id: None,
            encrypted_form: None,
            binding_mode: BindingMode::UNKNOWN,
            binding_mode_assigned: false,
            token_tracker: None,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn item(&self) -> &HeaderItem {
        &self.item
    }

    pub(crate) fn item_mut(&mut self) -> &mut HeaderItem {
        &mut self.item
    }

    pub fn category(&self) -> HeaderCategory {
        self.item.category()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Id the element had on the wire before it was decrypted.
    pub fn encrypted_form_id(&self) -> Option<&str> {
        self.encrypted_form_id.as_deref()
    }

    pub(crate) fn encrypted_form(&self) -> Option<&[u8]> {
        self.encrypted_form.as_deref()
    }

    pub fn was_encrypted(&self) -> bool {
        self.encrypted_form_id.is_some()
    }

    /// Answer to a reference by `id`: the current form, or the encrypted form it replaced.
    pub(crate) fn is_referenced_by(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id) || self.encrypted_form_id.as_deref() == Some(id)
    }

    /// Swap a decrypted item in, keeping the encrypted form's id and bytes.
    pub(crate) fn replace_with_decrypted(&mut self, item: HeaderItem) -> Result<()> {
        let encrypted_form = self.item.canonical_bytes()?;
        self.encrypted_form_id = self.id.take();
        self.encrypted_form = Some(encrypted_form);
        self.id = item.id().map(str::to_string);
        self.item = item;
        Ok(())
    }

    pub fn binding_mode(&self) -> BindingMode {
        self.binding_mode
    }

    /// Assign the binding mode. An entry is assigned at most once.
    pub fn set_binding_mode(&mut self, mode: BindingMode) -> Result<()> {
        if self.binding_mode_assigned {
            return Err(WsSecurityError::InvalidState(format!(
                "binding mode of header element at position {} is already {}",
                self.position,
                self.binding_mode.label()
            )));
        }
        self.binding_mode = mode;
        self.binding_mode_assigned = true;
        Ok(())
    }

    pub fn token_tracker(&self) -> Option<&TokenTracker> {
        self.token_tracker.as_ref()
    }

    pub(crate) fn token_tracker_mut(&mut self) -> &mut TokenTracker {
        let was_encrypted = self.was_encrypted();
        self.token_tracker.get_or_insert_with(|| TokenTracker {
            was_encrypted,
            ..TokenTracker::default()
        })
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            position: self.position,
            category: self.category(),
            id: self.id.clone(),
            encrypted_form_id: self.encrypted_form_id.clone(),
            binding_mode: self.binding_mode.label(),
        }
    }
}

/// Serializable view of an entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub position: usize,
    pub category: HeaderCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_form_id: Option<String>,
    pub binding_mode: &'static str,
}

/// Fail on a repeated id across the entries.
pub(crate) fn check_unique_ids(entries: &[HeaderElementEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        for id in [entry.id(), entry.encrypted_form_id()].into_iter().flatten() {
            if !seen.insert(id) {
                return Err(WsSecurityError::SecurityFormat(format!(
                    "duplicate id '{}' in security header",
                    id
                )));
            }
        }
    }
    Ok(())
}

/// Read the children of a wsse:Security element into entries, in wire order.
///
/// Unsupported categories are skipped. Every processed element except a bare
/// reference list must carry an id.
pub(crate) fn read_entries(security_xml: &str, max_buffer_size: usize) -> Result<Vec<HeaderElementEntry>> {
    let security = ElementParts::parse_expected(security_xml, elements::SECURITY)?;
    let mut entries = Vec::new();

    for child in security.children()? {
        let item = match HeaderItem::read_from(&child.local_name, child.xml, max_buffer_size)? {
            Some(item) => item,
            None => {
                debug!(element = %child.local_name, "Skipping unsupported security header element");
                continue;
            }
        };
        if item.id().is_none() && item.category() != HeaderCategory::ReferenceList {
            return Err(WsSecurityError::SecurityFormat(format!(
                "<{}> in security header is missing required attribute '{}'",
                child.local_name,
                attributes::ID
            )));
        }
        entries.push(HeaderElementEntry::new(entries.len(), item));
    }

    check_unique_ids(&entries)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{WSSE_NS, WSU_NS};

    fn security(children: &str) -> String {
        format!(
            r#"<wsse:Security xmlns:wsse="{}" xmlns:wsu="{}">{}</wsse:Security>"#,
            WSSE_NS, WSU_NS, children
        )
    }

    const TIMESTAMP: &str = r#"<wsu:Timestamp wsu:Id="_0"><wsu:Created>2030-01-01T00:00:00Z</wsu:Created></wsu:Timestamp>"#;

    #[test]
    fn test_unknown_elements_are_skipped() {
        let xml = security(&format!(
            r#"{}<wsse:UsernameToken wsu:Id="_u"><wsse:Username>alice</wsse:Username></wsse:UsernameToken>"#,
            TIMESTAMP
        ));
        let entries = read_entries(&xml, 1024).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category(), HeaderCategory::Timestamp);
        assert_eq!(entries[0].id(), Some("_0"));
        assert_eq!(entries[0].binding_mode(), BindingMode::UNKNOWN);
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let xml = security(
            r#"<wsse:BinarySecurityToken ValueType="urn:x">AAAA</wsse:BinarySecurityToken>"#,
        );
        assert!(matches!(
            read_entries(&xml, 1024),
            Err(WsSecurityError::SecurityFormat(_))
        ));
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let xml = security(&format!(
            r#"{}<wsse:BinarySecurityToken wsu:Id="_0" ValueType="urn:x">AAAA</wsse:BinarySecurityToken>"#,
            TIMESTAMP
        ));
        let err = read_entries(&xml, 1024).unwrap_err();
        assert!(matches!(err, WsSecurityError::SecurityFormat(ref msg) if msg.contains("_0")));
    }

    #[test]
    fn test_binding_mode_assigned_once() {
        let xml = security(TIMESTAMP);
        let mut entries = read_entries(&xml, 1024).unwrap();
        entries[0].set_binding_mode(BindingMode::BASIC).unwrap();
        assert!(matches!(
            entries[0].set_binding_mode(BindingMode::SIGNED),
            Err(WsSecurityError::InvalidState(_))
        ));
        assert_eq!(entries[0].binding_mode(), BindingMode::BASIC);
    }

    #[test]
    fn test_tracker_binding_modes() {
        let signed_endorsing = TokenTracker {
            is_signed: true,
            is_endorsing: true,
            ..TokenTracker::default()
        };
        assert_eq!(signed_endorsing.binding_mode(), BindingMode::SIGNED_ENDORSING);
        assert!(BindingMode::SIGNED_ENDORSING.contains(BindingMode::ENDORSING));
        assert_eq!(TokenTracker::default().binding_mode(), BindingMode::BASIC);
        assert_eq!(BindingMode::UNKNOWN.label(), "Unknown");
    }
}
