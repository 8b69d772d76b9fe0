//! xenc:ReferenceList: the ids of the EncryptedData elements a key covers.

use crate::error::{Result, WsSecurityError};
use crate::names::{attributes, elements, qnames, xmlns, XENC_NS};
use crate::xml::{self, ElementParts, XmlWriter};

/// Ordered set of unique data reference ids.
///
/// Ids are stored without the leading `#`; the URI form is only used on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceList {
    referred_ids: Vec<String>,
}

impl ReferenceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id. Repeated ids are rejected.
    pub fn add_referred_id(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(WsSecurityError::Argument(
                "data reference id must not be empty".into(),
            ));
        }
        if self.contains_referred_id(&id) {
            return Err(WsSecurityError::SecurityFormat(format!(
                "reference list already contains id '{}'",
                id
            )));
        }
        self.referred_ids.push(id);
        Ok(())
    }

    pub fn contains_referred_id(&self, id: &str) -> bool {
        self.referred_ids.iter().any(|existing| existing == id)
    }

    pub fn data_reference_count(&self) -> usize {
        self.referred_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.referred_ids.is_empty()
    }

    pub fn get_referred_id(&self, index: usize) -> Result<&str> {
        self.referred_ids
            .get(index)
            .map(String::as_str)
            .ok_or(WsSecurityError::IndexRange {
                index,
                count: self.referred_ids.len(),
            })
    }

    /// Remove `id` if present. Returns whether it was found.
    pub fn try_remove_referred_id(&mut self, id: &str) -> bool {
        match self.referred_ids.iter().position(|existing| existing == id) {
            Some(index) => {
                self.referred_ids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn referred_ids(&self) -> impl Iterator<Item = &str> {
        self.referred_ids.iter().map(String::as_str)
    }

    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        if self.referred_ids.is_empty() {
            return Err(WsSecurityError::SecurityFormat(
                "reference list must contain at least one data reference".into(),
            ));
        }
        xml::start(writer, qnames::REFERENCE_LIST, &[(xmlns::XENC, XENC_NS)])?;
        for id in &self.referred_ids {
            let uri = format!("#{}", id);
            xml::empty(writer, qnames::DATA_REFERENCE, &[(attributes::URI, &uri)])?;
        }
        xml::end(writer, qnames::REFERENCE_LIST)
    }

    pub(crate) fn read_from(xml: &str) -> Result<Self> {
        let parts = ElementParts::parse_expected(xml, elements::REFERENCE_LIST)?;
        let mut list = Self::new();
        for child in parts.children()? {
            if child.local_name != elements::DATA_REFERENCE {
                return Err(WsSecurityError::SecurityFormat(format!(
                    "unexpected <{}> in reference list",
                    child.local_name
                )));
            }
            let reference = ElementParts::parse(child.xml)?;
            let uri = reference.required_attribute(attributes::URI)?;
            list.add_referred_id(xml::fragment(uri)?)?;
        }
        if list.is_empty() {
            return Err(WsSecurityError::SecurityFormat(
                "reference list must contain at least one data reference".into(),
            ));
        }
        Ok(list)
    }
}
