//! Small quick-xml helpers shared by the wire models.
//!
//! quick-xml does not expand entities, so none of the readers below are exposed to XXE.

use crate::error::{Result, WsSecurityError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

pub(crate) type XmlWriter = Writer<Vec<u8>>;

pub(crate) fn writer() -> XmlWriter {
    Writer::new(Vec::new())
}

pub(crate) fn into_string(writer: XmlWriter) -> Result<String> {
    String::from_utf8(writer.into_inner()).map_err(|e| {
        WsSecurityError::SecurityFormat(format!("serialized XML is not valid UTF-8: {}", e))
    })
}

/// Reader over an in-memory document; positions are byte offsets into `xml`.
pub(crate) fn reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    reader
}

pub(crate) fn start(writer: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let mut element = BytesStart::new(name);
    for (key, value) in attrs {
        element.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(element))?;
    Ok(())
}

pub(crate) fn end(writer: &mut XmlWriter, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

pub(crate) fn empty(writer: &mut XmlWriter, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let mut element = BytesStart::new(name);
    for (key, value) in attrs {
        element.push_attribute((*key, *value));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

pub(crate) fn text_element(
    writer: &mut XmlWriter,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    start(writer, name, attrs)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

/// Append already-serialized XML verbatim.
pub(crate) fn raw(writer: &mut XmlWriter, xml: &str) {
    writer.get_mut().extend_from_slice(xml.as_bytes());
}

/// Extract local name from element.
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    let name = e.local_name();
    std::str::from_utf8(name.as_ref()).unwrap_or("").to_string()
}

/// Value of the attribute with the given local name, whatever its prefix.
pub(crate) fn attribute(e: &BytesStart<'_>, local: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// SOAP boolean attribute ("1" or "true").
pub(crate) fn is_true(value: &str) -> bool {
    value == "1" || value == "true"
}

/// Strip the leading '#' of a same-document reference.
pub(crate) fn fragment(uri: &str) -> Result<&str> {
    match uri.strip_prefix('#') {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(WsSecurityError::SecurityFormat(format!(
            "unsupported reference URI '{}'",
            uri
        ))),
    }
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode base64 content, failing before allocation when it would exceed `max_size` bytes.
pub(crate) fn decode_base64_bounded(text: &str, max_size: usize, what: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    let estimate = base64::decoded_len_estimate(compact.len());
    if estimate > max_size.saturating_add(3) {
        return Err(WsSecurityError::SecurityFormat(format!(
            "{} exceeds the maximum buffer size of {} bytes",
            what, max_size
        )));
    }
    let decoded = STANDARD.decode(compact)?;
    if decoded.len() > max_size {
        return Err(WsSecurityError::SecurityFormat(format!(
            "{} of {} bytes exceeds the maximum buffer size of {} bytes",
            what,
            decoded.len(),
            max_size
        )));
    }
    Ok(decoded)
}

/// A top-level child element captured verbatim from its parent's content.
#[derive(Debug, Clone)]
pub(crate) struct ChildElement<'x> {
    pub local_name: String,
    pub xml: &'x str,
}

/// Split element content into its top-level child elements, in document order.
pub(crate) fn child_elements(content: &str) -> Result<Vec<ChildElement<'_>>> {
    let mut reader = reader(content);
    let mut children = Vec::new();

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end(QName(&name))?;
                let after = reader.buffer_position() as usize;
                children.push(ChildElement {
                    local_name: local_name(&e),
                    xml: content[before..after].trim(),
                });
            }
            Event::Empty(e) => {
                let after = reader.buffer_position() as usize;
                children.push(ChildElement {
                    local_name: local_name(&e),
                    xml: content[before..after].trim(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(children)
}

/// An element split into its name, attributes and verbatim content.
#[derive(Debug, Clone)]
pub(crate) struct ElementParts<'x> {
    pub local_name: String,
    /// (local name, unescaped value) in document order
    pub attributes: Vec<(String, String)>,
    pub content: &'x str,
}

impl<'x> ElementParts<'x> {
    pub fn parse(xml: &'x str) -> Result<Self> {
        let mut reader = reader(xml);
        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let attributes = collect_attributes(&e)?;
                    let name = e.name().as_ref().to_vec();
                    let span = reader.read_to_end(QName(&name))?;
                    return Ok(Self {
                        local_name: local_name(&e),
                        attributes,
                        content: &xml[span.start as usize..span.end as usize],
                    });
                }
                Event::Empty(e) => {
                    return Ok(Self {
                        local_name: local_name(&e),
                        attributes: collect_attributes(&e)?,
                        content: "",
                    });
                }
                Event::Eof => {
                    return Err(WsSecurityError::SecurityFormat(
                        "expected an XML element".into(),
                    ))
                }
                _ => {}
            }
        }
    }

    /// Parse and check the local name in one step.
    pub fn parse_expected(xml: &'x str, expected: &str) -> Result<Self> {
        let parts = Self::parse(xml)?;
        if parts.local_name != expected {
            return Err(WsSecurityError::SecurityFormat(format!(
                "expected <{}>, found <{}>",
                expected, parts.local_name
            )));
        }
        Ok(parts)
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn required_attribute(&self, local: &str) -> Result<&str> {
        self.attribute(local).ok_or_else(|| {
            WsSecurityError::SecurityFormat(format!(
                "<{}> is missing required attribute '{}'",
                self.local_name, local
            ))
        })
    }

    pub fn children(&self) -> Result<Vec<ChildElement<'x>>> {
        child_elements(self.content)
    }

    /// Unescaped, trimmed text content.
    pub fn text(&self) -> Result<String> {
        let unescaped = quick_xml::escape::unescape(self.content.trim()).map_err(|e| {
            WsSecurityError::SecurityFormat(format!(
                "invalid text in <{}>: {}",
                self.local_name, e
            ))
        })?;
        Ok(unescaped.into_owned())
    }
}

fn collect_attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .unwrap_or("")
            .to_string();
        attributes.push((key, attr.unescape_value()?.into_owned()));
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_parts() {
        let xml = r#"<wsu:Timestamp xmlns:wsu="urn:wsu" wsu:Id="_0"><wsu:Created>now &amp; then</wsu:Created></wsu:Timestamp>"#;
        let parts = ElementParts::parse_expected(xml, "Timestamp").unwrap();
        assert_eq!(parts.attribute("Id"), Some("_0"));
        assert!(parts.required_attribute("Missing").is_err());

        let children = parts.children().unwrap();
        assert_eq!(children.len(), 1);
        let created = ElementParts::parse(children[0].xml).unwrap();
        assert_eq!(created.text().unwrap(), "now & then");

        assert!(ElementParts::parse_expected(xml, "Signature").is_err());
    }

    #[test]
    fn test_child_elements_keep_order_and_text() {
        let content = r#"
            <a:First xmlns:a="urn:a" Id="1"><a:Inner>x</a:Inner></a:First>
            <!-- note -->
            <b:Second xmlns:b="urn:b"/>
        "#;
        let children = child_elements(content).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].local_name, "First");
        assert_eq!(
            children[0].xml,
            r#"<a:First xmlns:a="urn:a" Id="1"><a:Inner>x</a:Inner></a:First>"#
        );
        assert_eq!(children[1].local_name, "Second");
        assert_eq!(children[1].xml, r#"<b:Second xmlns:b="urn:b"/>"#);
    }

    #[test]
    fn test_bounded_decode() {
        let encoded = encode_base64(&[7u8; 64]);
        assert_eq!(decode_base64_bounded(&encoded, 64, "cipher value").unwrap().len(), 64);

        let err = decode_base64_bounded(&encoded, 16, "cipher value").unwrap_err();
        assert!(matches!(err, WsSecurityError::SecurityFormat(_)));

        let err = decode_base64_bounded(&encoded, 63, "cipher value").unwrap_err();
        assert!(matches!(err, WsSecurityError::SecurityFormat(_)));
    }

    #[test]
    fn test_fragment() {
        assert_eq!(fragment("#_1").unwrap(), "_1");
        assert!(fragment("http://example.org/x").is_err());
        assert!(fragment("#").is_err());
    }
}
