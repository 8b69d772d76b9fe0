//! Security tokens, key identifier clauses and token resolution.

use crate::error::{Result, WsSecurityError};
use crate::names::{algorithms, attributes, elements, qnames, xmlns, WSSE_NS, WSU_NS};
use crate::xml::{self, ElementParts, XmlWriter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A security token: public representation plus the key material it proves possession of.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken {
    id: String,
    value_type: String,
    data: Vec<u8>,
    key: Vec<u8>,
    key_name: Option<String>,
}

impl SecurityToken {
    pub fn new(
        id: impl Into<String>,
        value_type: impl Into<String>,
        data: Vec<u8>,
        key: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            value_type: value_type.into(),
            data,
            key,
            key_name: None,
        }
    }

    pub fn with_key_name(mut self, name: impl Into<String>) -> Self {
        self.key_name = Some(name.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Public token bytes written into the BinarySecurityToken.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Symmetric key used to sign or wrap with this token.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Wire form of this token.
    pub fn to_binary_token(&self) -> BinarySecurityToken {
        BinarySecurityToken {
            id: self.id.clone(),
            value_type: self.value_type.clone(),
            data: self.data.clone(),
        }
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // key material stays out of logs
        f.debug_struct("SecurityToken")
            .field("id", &self.id)
            .field("value_type", &self.value_type)
            .field("key_name", &self.key_name)
            .finish()
    }
}

/// How a KeyInfo refers to a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdentifierClause {
    /// Same-document reference to a token by its wsu:Id
    LocalId(String),
    /// ds:KeyName
    KeyName(String),
    /// wsse:KeyIdentifier with a value type
    KeyIdentifier { value_type: String, value: Vec<u8> },
}

impl KeyIdentifierClause {
    /// Write the clause as the content of a ds:KeyInfo element.
    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        match self {
            Self::LocalId(id) => {
                let uri = format!("#{}", id);
                xml::start(writer, qnames::SECURITY_TOKEN_REFERENCE, &[(xmlns::WSSE, WSSE_NS)])?;
                xml::empty(writer, qnames::WSSE_REFERENCE, &[(attributes::URI, &uri)])?;
                xml::end(writer, qnames::SECURITY_TOKEN_REFERENCE)
            }
            Self::KeyName(name) => xml::text_element(writer, qnames::KEY_NAME, &[], name),
            Self::KeyIdentifier { value_type, value } => {
                xml::start(writer, qnames::SECURITY_TOKEN_REFERENCE, &[(xmlns::WSSE, WSSE_NS)])?;
                xml::text_element(
                    writer,
                    qnames::KEY_IDENTIFIER,
                    &[
                        (attributes::VALUE_TYPE, value_type),
                        (attributes::ENCODING_TYPE, algorithms::BASE64_BINARY),
                    ],
                    &xml::encode_base64(value),
                )?;
                xml::end(writer, qnames::SECURITY_TOKEN_REFERENCE)
            }
        }
    }

    /// Read the clause from the content of a ds:KeyInfo element.
    pub(crate) fn read_from_key_info(key_info: &ElementParts<'_>) -> Result<Self> {
        for child in key_info.children()? {
            let parts = ElementParts::parse(child.xml)?;
            match parts.local_name.as_str() {
                elements::KEY_NAME => return Ok(Self::KeyName(parts.text()?)),
                elements::SECURITY_TOKEN_REFERENCE => {
                    for inner in parts.children()? {
                        let reference = ElementParts::parse(inner.xml)?;
                        match reference.local_name.as_str() {
                            elements::REFERENCE => {
                                let uri = reference.required_attribute(attributes::URI)?;
                                return Ok(Self::LocalId(xml::fragment(uri)?.to_string()));
                            }
                            elements::KEY_IDENTIFIER => {
                                return Ok(Self::KeyIdentifier {
                                    value_type: reference
                                        .required_attribute(attributes::VALUE_TYPE)?
                                        .to_string(),
                                    value: xml::decode_base64(&reference.text()?)?,
                                });
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        Err(WsSecurityError::SecurityFormat(
            "KeyInfo does not contain a supported key identifier clause".into(),
        ))
    }
}

/// A claim asserted about the bearer of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub resource: String,
    pub right: String,
}

/// Claims bound to a token by the credential layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    pub id: String,
    pub issuer: String,
    pub claims: Vec<Claim>,
}

/// A token together with the authorization policies it carries.
#[derive(Debug, Clone)]
pub struct SecurityTokenSpecification {
    pub token: Arc<SecurityToken>,
    pub policies: Vec<AuthorizationPolicy>,
}

impl SecurityTokenSpecification {
    pub fn new(token: Arc<SecurityToken>, policies: Vec<AuthorizationPolicy>) -> Self {
        Self { token, policies }
    }
}

/// How a supporting token is attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityTokenAttachmentMode {
    /// Token is covered by the primary signature
    Signed,
    /// Token signs the primary signature
    Endorsing,
    /// Both of the above
    SignedEndorsing,
    /// Signed, and the token itself travels encrypted
    SignedEncrypted,
}

#[derive(Debug, Clone)]
pub struct SupportingTokenSpecification {
    pub specification: SecurityTokenSpecification,
    pub mode: SecurityTokenAttachmentMode,
}

impl SupportingTokenSpecification {
    pub fn new(specification: SecurityTokenSpecification, mode: SecurityTokenAttachmentMode) -> Self {
        Self {
            specification,
            mode,
        }
    }

    pub fn token(&self) -> &Arc<SecurityToken> {
        &self.specification.token
    }
}

/// Key the recipient uses to unwrap content keys.
#[derive(Clone)]
pub struct KeyWrapCredential {
    pub key_name: String,
    pub key: Vec<u8>,
    /// Recipient attribute written on the EncryptedKey
    pub recipient: Option<String>,
    /// Name the content key is advertised under (CarriedKeyName)
    pub carried_key_name: Option<String>,
}

impl KeyWrapCredential {
    pub fn new(key_name: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            key_name: key_name.into(),
            key,
            recipient: None,
            carried_key_name: None,
        }
    }
}

impl fmt::Debug for KeyWrapCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyWrapCredential")
            .field("key_name", &self.key_name)
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// wsse:BinarySecurityToken as it appears in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySecurityToken {
    pub id: String,
    pub value_type: String,
    pub data: Vec<u8>,
}

impl BinarySecurityToken {
    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::text_element(
            writer,
            qnames::BINARY_SECURITY_TOKEN,
            &[
                (xmlns::WSSE, WSSE_NS),
                (xmlns::WSU, WSU_NS),
                (qnames::WSU_ID, &self.id),
                (attributes::VALUE_TYPE, &self.value_type),
                (attributes::ENCODING_TYPE, algorithms::BASE64_BINARY),
            ],
            &xml::encode_base64(&self.data),
        )
    }

    pub(crate) fn read_from(xml: &str) -> Result<Self> {
        let parts = ElementParts::parse_expected(xml, elements::BINARY_SECURITY_TOKEN)?;
        Ok(Self {
            id: parts.required_attribute(attributes::ID)?.to_string(),
            value_type: parts.required_attribute(attributes::VALUE_TYPE)?.to_string(),
            data: xml::decode_base64(&parts.text()?)?,
        })
    }
}

/// Resolves tokens found on the wire, and tokens referenced only by clause.
pub trait TokenResolver: Send + Sync {
    /// Authenticate a token carried in the header.
    fn resolve_token(&self, token: &BinarySecurityToken) -> Result<SecurityTokenSpecification>;

    /// Find an out-of-band token (e.g. a key-wrap key) by clause.
    fn resolve_clause(&self, clause: &KeyIdentifierClause) -> Result<Arc<SecurityToken>>;
}

/// Resolver over a fixed set of known tokens.
#[derive(Default)]
pub struct InMemoryTokenResolver {
    by_data: RwLock<HashMap<Vec<u8>, SecurityTokenSpecification>>,
    by_name: RwLock<HashMap<String, Arc<SecurityToken>>>,
}

impl InMemoryTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token that may appear in incoming headers.
    pub fn add_token(&self, specification: SecurityTokenSpecification) {
        let token = specification.token.clone();
        if let Some(name) = token.key_name() {
            self.by_name.write().insert(name.to_string(), token.clone());
        }
        self.by_data.write().insert(token.data().to_vec(), specification);
    }

    /// Register a named key, e.g. the local key-wrap key.
    pub fn add_key(&self, name: impl Into<String>, key: Vec<u8>) {
        let name = name.into();
        let token = SecurityToken::new(name.clone(), "", Vec::new(), key).with_key_name(name.clone());
        self.by_name.write().insert(name, Arc::new(token));
    }
}

impl TokenResolver for InMemoryTokenResolver {
    fn resolve_token(&self, token: &BinarySecurityToken) -> Result<SecurityTokenSpecification> {
        self.by_data
            .read()
            .get(&token.data)
            .filter(|spec| spec.token.value_type() == token.value_type)
            .cloned()
            .ok_or_else(|| {
                WsSecurityError::MessageSecurity(format!(
                    "security token '{}' could not be authenticated",
                    token.id
                ))
            })
    }

    fn resolve_clause(&self, clause: &KeyIdentifierClause) -> Result<Arc<SecurityToken>> {
        match clause {
            KeyIdentifierClause::KeyName(name) => self.by_name.read().get(name).cloned(),
            KeyIdentifierClause::KeyIdentifier { value, .. } => self
                .by_data
                .read()
                .get(value)
                .map(|spec| spec.token.clone()),
            KeyIdentifierClause::LocalId(_) => None,
        }
        .ok_or_else(|| {
            WsSecurityError::MessageSecurity(format!(
                "referenced security token could not be retrieved: {:?}",
                clause
            ))
        })
    }
}
