//! SOAP envelope parsing and serialization.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).

use crate::config::SoapVersion;
use crate::error::{Result, WsSecurityError};
use crate::message::{write_header, Message, RawHeader};
use crate::names::{attributes, elements, qnames, xmlns, SOAP_11_NS, SOAP_12_NS, WSU_NS};
use crate::xml::{self, XmlWriter};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use std::collections::HashMap;
use tracing::debug;

/// Namespace URI of the SOAP version.
pub fn soap_namespace(version: SoapVersion) -> &'static str {
    match version {
        SoapVersion::Soap11 => SOAP_11_NS,
        SoapVersion::Soap12 => SOAP_12_NS,
    }
}

/// Parse raw bytes as a SOAP envelope.
///
/// Header children are captured verbatim as [`RawHeader`]s and the body's inner
/// XML is kept as-is, so a signed body digests to the same bytes it was sent as.
pub fn parse_envelope(data: &[u8], max_size: usize) -> Result<Message> {
    if data.len() > max_size {
        return Err(WsSecurityError::SecurityFormat(format!(
            "message of {} bytes exceeds the maximum of {} bytes",
            data.len(),
            max_size
        )));
    }
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| WsSecurityError::SecurityFormat(format!("Invalid UTF-8: {}", e)))?;

    // DOCTYPE and entity declarations are rejected outright
    check_xxe_patterns(xml_str)?;

    let mut reader = xml::reader(xml_str);
    let mut scope = NamespaceScope::default();

    // Detect Envelope
    let (version, envelope_prefix) = loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if xml::local_name(&e) != elements::ENVELOPE {
                    return Err(missing_envelope());
                }
                scope.declare(&e)?;
                let prefix = prefix_of(&e);
                let version = match scope.resolve(&prefix) {
                    Some(SOAP_11_NS) => SoapVersion::Soap11,
                    Some(SOAP_12_NS) => SoapVersion::Soap12,
                    _ => return Err(missing_envelope()),
                };
                break (version, prefix);
            }
            Event::Eof => return Err(missing_envelope()),
            _ => {}
        }
    };

    let mut message = Message::new(version, "");
    let mut seen_body = false;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(e) if xml::local_name(&e) == elements::HEADER && !seen_body => {
                scope.declare(&e)?;
                read_headers(&mut reader, xml_str, &scope, &envelope_prefix, &mut message)?;
            }
            Event::Empty(e) if xml::local_name(&e) == elements::HEADER => {}
            Event::Start(e) if xml::local_name(&e) == elements::BODY => {
                message.set_body_id(xml::attribute(&e, attributes::ID)?);
                let name = e.name().as_ref().to_vec();
                let span = reader.read_to_end(QName(&name))?;
                message.set_body(xml_str[span.start as usize..span.end as usize].trim());
                seen_body = true;
            }
            Event::Empty(e) if xml::local_name(&e) == elements::BODY => {
                message.set_body_id(xml::attribute(&e, attributes::ID)?);
                seen_body = true;
            }
            Event::End(_) | Event::Eof => break,
            Event::Start(e) => {
                return Err(WsSecurityError::SecurityFormat(format!(
                    "unexpected <{}> in envelope",
                    xml::local_name(&e)
                )))
            }
            _ => {}
        }
    }

    if !seen_body {
        return Err(WsSecurityError::SecurityFormat(
            "SOAP envelope has no Body".into(),
        ));
    }
    debug!(
        version = ?message.version(),
        headers = message.headers().len(),
        body_id = message.body_id(),
        "Parsed SOAP envelope"
    );
    Ok(message)
}

fn read_headers(
    reader: &mut quick_xml::Reader<&[u8]>,
    xml_str: &str,
    scope: &NamespaceScope,
    envelope_prefix: &str,
    message: &mut Message,
) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let span = reader.read_to_end(QName(&name))?;
                let content = xml_str[span.start as usize..span.end as usize].trim();
                message.add_header(Box::new(raw_header(&e, content, scope, envelope_prefix)?));
            }
            Event::Empty(e) => {
                message.add_header(Box::new(raw_header(&e, "", scope, envelope_prefix)?));
            }
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(WsSecurityError::SecurityFormat(
                    "unterminated SOAP Header".into(),
                ))
            }
            _ => {}
        }
    }
}

fn raw_header(
    e: &BytesStart<'_>,
    content: &str,
    scope: &NamespaceScope,
    envelope_prefix: &str,
) -> Result<RawHeader> {
    let qualified_name = std::str::from_utf8(e.name().as_ref())
        .unwrap_or("")
        .to_string();

    let mut local_scope = scope.clone();
    local_scope.declare(e)?;
    let namespace = local_scope
        .resolve(&prefix_of(e))
        .unwrap_or_default()
        .to_string();

    let mut header = RawHeader::new(qualified_name, namespace, content);
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("").to_string();
        let value = attr.unescape_value()?.into_owned();
        let soap_attribute = attr
            .key
            .prefix()
            .map(|p| p.as_ref() == envelope_prefix.as_bytes())
            .unwrap_or(false);
        if !soap_attribute {
            header = header.with_attribute(key, value);
            continue;
        }
        let local = std::str::from_utf8(attr.key.local_name().as_ref())
            .unwrap_or("")
            .to_string();
        header = match local.as_str() {
            attributes::MUST_UNDERSTAND => header.with_must_understand(xml::is_true(&value)),
            attributes::ACTOR | attributes::ROLE => header.with_actor(Some(value)),
            attributes::RELAY => header.with_relay(xml::is_true(&value)),
            _ => header.with_attribute(key, value),
        };
    }
    Ok(header)
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<()> {
    // DOCTYPE detection
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(WsSecurityError::SecurityFormat(
            "DOCTYPE declarations are not allowed".into(),
        ));
    }

    // External entity patterns
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(WsSecurityError::SecurityFormat(
            "Entity declarations are not allowed".into(),
        ));
    }

    Ok(())
}

fn missing_envelope() -> WsSecurityError {
    WsSecurityError::SecurityFormat("No valid SOAP Envelope found with recognized namespace".into())
}

fn prefix_of(e: &BytesStart<'_>) -> String {
    e.name()
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
        .unwrap_or_default()
}

/// Prefix -> namespace bindings in effect; the empty prefix is the default namespace.
#[derive(Debug, Clone, Default)]
struct NamespaceScope {
    bindings: HashMap<String, String>,
}

impl NamespaceScope {
    fn declare(&mut self, e: &BytesStart<'_>) -> Result<()> {
        for attr in e.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
            let prefix = if key == "xmlns" {
                ""
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                prefix
            } else {
                continue;
            };
            self.bindings
                .insert(prefix.to_string(), attr.unescape_value()?.into_owned());
        }
        Ok(())
    }

    fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }
}

impl Message {
    /// Serialize as a complete SOAP envelope.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = xml::writer();
        self.write_envelope(&mut writer)?;
        xml::into_string(writer)
    }

    fn write_envelope(&self, writer: &mut XmlWriter) -> Result<()> {
        let version = self.version();
        xml::start(
            writer,
            qnames::SOAP_ENVELOPE,
            &[(xmlns::SOAP, soap_namespace(version))],
        )?;
        if !self.headers().is_empty() {
            xml::start(writer, qnames::SOAP_HEADER, &[])?;
            for header in self.headers() {
                write_header(header.as_ref(), writer, version)?;
            }
            xml::end(writer, qnames::SOAP_HEADER)?;
        }
        match self.body_id() {
            Some(id) => xml::start(
                writer,
                qnames::SOAP_BODY,
                &[(xmlns::WSU, WSU_NS), (qnames::WSU_ID, id)],
            )?,
            None => xml::start(writer, qnames::SOAP_BODY, &[])?,
        }
        xml::raw(writer, self.body());
        xml::end(writer, qnames::SOAP_BODY)?;
        xml::end(writer, qnames::SOAP_ENVELOPE)
    }
}
