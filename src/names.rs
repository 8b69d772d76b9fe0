//! Wire names: namespaces, prefixes, element and attribute names, algorithm URIs.

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSSE_NS: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSSE11_NS: &str = "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";
pub const WSU_NS: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

/// xmlns declarations for the prefixes this crate writes.
pub mod xmlns {
    pub const SOAP: &str = "xmlns:s";
    pub const WSSE: &str = "xmlns:wsse";
    pub const WSSE11: &str = "xmlns:wsse11";
    pub const WSU: &str = "xmlns:wsu";
    pub const DS: &str = "xmlns:ds";
    pub const XENC: &str = "xmlns:xenc";
}

/// Qualified names as written on the wire.
pub mod qnames {
    pub const SOAP_ENVELOPE: &str = "s:Envelope";
    pub const SOAP_HEADER: &str = "s:Header";
    pub const SOAP_BODY: &str = "s:Body";
    pub const SECURITY: &str = "wsse:Security";
    pub const WSU_ID: &str = "wsu:Id";
    pub const TIMESTAMP: &str = "wsu:Timestamp";
    pub const CREATED: &str = "wsu:Created";
    pub const EXPIRES: &str = "wsu:Expires";
    pub const BINARY_SECURITY_TOKEN: &str = "wsse:BinarySecurityToken";
    pub const SECURITY_TOKEN_REFERENCE: &str = "wsse:SecurityTokenReference";
    pub const WSSE_REFERENCE: &str = "wsse:Reference";
    pub const KEY_IDENTIFIER: &str = "wsse:KeyIdentifier";
    pub const SIGNATURE: &str = "ds:Signature";
    pub const SIGNED_INFO: &str = "ds:SignedInfo";
    pub const CANONICALIZATION_METHOD: &str = "ds:CanonicalizationMethod";
    pub const SIGNATURE_METHOD: &str = "ds:SignatureMethod";
    pub const DS_REFERENCE: &str = "ds:Reference";
    pub const DIGEST_METHOD: &str = "ds:DigestMethod";
    pub const DIGEST_VALUE: &str = "ds:DigestValue";
    pub const SIGNATURE_VALUE: &str = "ds:SignatureValue";
    pub const KEY_INFO: &str = "ds:KeyInfo";
    pub const KEY_NAME: &str = "ds:KeyName";
    pub const SIGNATURE_CONFIRMATION: &str = "wsse11:SignatureConfirmation";
    pub const ENCRYPTED_KEY: &str = "xenc:EncryptedKey";
    pub const ENCRYPTED_DATA: &str = "xenc:EncryptedData";
    pub const ENCRYPTION_METHOD: &str = "xenc:EncryptionMethod";
    pub const CIPHER_DATA: &str = "xenc:CipherData";
    pub const CIPHER_VALUE: &str = "xenc:CipherValue";
    pub const REFERENCE_LIST: &str = "xenc:ReferenceList";
    pub const DATA_REFERENCE: &str = "xenc:DataReference";
    pub const CARRIED_KEY_NAME: &str = "xenc:CarriedKeyName";
}

/// Local element names.
pub mod elements {
    pub const ENVELOPE: &str = "Envelope";
    pub const HEADER: &str = "Header";
    pub const BODY: &str = "Body";
    pub const SECURITY: &str = "Security";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const CREATED: &str = "Created";
    pub const EXPIRES: &str = "Expires";
    pub const BINARY_SECURITY_TOKEN: &str = "BinarySecurityToken";
    pub const SECURITY_TOKEN_REFERENCE: &str = "SecurityTokenReference";
    pub const REFERENCE: &str = "Reference";
    pub const KEY_IDENTIFIER: &str = "KeyIdentifier";
    pub const SIGNATURE: &str = "Signature";
    pub const SIGNED_INFO: &str = "SignedInfo";
    pub const CANONICALIZATION_METHOD: &str = "CanonicalizationMethod";
    pub const SIGNATURE_METHOD: &str = "SignatureMethod";
    pub const DIGEST_METHOD: &str = "DigestMethod";
    pub const DIGEST_VALUE: &str = "DigestValue";
    pub const SIGNATURE_VALUE: &str = "SignatureValue";
    pub const KEY_INFO: &str = "KeyInfo";
    pub const KEY_NAME: &str = "KeyName";
    pub const SIGNATURE_CONFIRMATION: &str = "SignatureConfirmation";
    pub const ENCRYPTED_KEY: &str = "EncryptedKey";
    pub const ENCRYPTED_DATA: &str = "EncryptedData";
    pub const ENCRYPTION_METHOD: &str = "EncryptionMethod";
    pub const CIPHER_DATA: &str = "CipherData";
    pub const CIPHER_VALUE: &str = "CipherValue";
    pub const REFERENCE_LIST: &str = "ReferenceList";
    pub const DATA_REFERENCE: &str = "DataReference";
    pub const CARRIED_KEY_NAME: &str = "CarriedKeyName";
}

/// Local attribute names.
pub mod attributes {
    pub const ID: &str = "Id";
    pub const URI: &str = "URI";
    pub const ALGORITHM: &str = "Algorithm";
    pub const TYPE: &str = "Type";
    pub const VALUE: &str = "Value";
    pub const VALUE_TYPE: &str = "ValueType";
    pub const ENCODING_TYPE: &str = "EncodingType";
    pub const RECIPIENT: &str = "Recipient";
    pub const MUST_UNDERSTAND: &str = "mustUnderstand";
    pub const ACTOR: &str = "actor";
    pub const ROLE: &str = "role";
    pub const RELAY: &str = "relay";
}

/// Algorithm and type identifiers.
pub mod algorithms {
    pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
    pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
    pub const HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";
    pub const AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";
    pub const BASE64_BINARY: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
}

/// EncryptedData Type attribute values.
pub mod encryption_types {
    pub const CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";
    pub const ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";
}
