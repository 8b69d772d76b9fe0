//! Message abstraction: a SOAP version, an ordered header collection and a
//! replaceable body.

use crate::config::SoapVersion;
use crate::error::Result;
use crate::names::{attributes, qnames, xmlns, WSSE_NS, WSU_NS};
use crate::xml::{self, XmlWriter};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::fmt;

/// Capability interface of a message header.
///
/// The SOAP header attributes (mustUnderstand, actor/role, relay) are computed
/// by the message from `must_understand`, `actor` and `relay` and handed to
/// `write_start`, so a wrapper can override them without touching the inner header.
pub trait MessageHeader: fmt::Debug + Send + Sync {
    /// Local name
    fn name(&self) -> &str;

    /// Namespace URI
    fn namespace(&self) -> &str;

    fn must_understand(&self) -> bool {
        false
    }

    fn relay(&self) -> bool {
        false
    }

    fn actor(&self) -> Option<&str> {
        None
    }

    /// Write the start tag with the header's own attributes plus `soap_attributes`.
    fn write_start(&self, writer: &mut XmlWriter, soap_attributes: &[(&str, &str)]) -> Result<()>;

    fn write_contents(&self, writer: &mut XmlWriter) -> Result<()>;

    fn write_end(&self, writer: &mut XmlWriter) -> Result<()>;
}

/// Write `header` as a child of soap:Header.
pub(crate) fn write_header(
    header: &dyn MessageHeader,
    writer: &mut XmlWriter,
    version: SoapVersion,
) -> Result<()> {
    let soap_prefix = "s:";
    let must_understand_name = format!("{}{}", soap_prefix, attributes::MUST_UNDERSTAND);
    let actor_name = match version {
        SoapVersion::Soap11 => format!("{}{}", soap_prefix, attributes::ACTOR),
        SoapVersion::Soap12 => format!("{}{}", soap_prefix, attributes::ROLE),
    };
    let relay_name = format!("{}{}", soap_prefix, attributes::RELAY);

    let mut soap_attributes: Vec<(&str, &str)> = Vec::new();
    if header.must_understand() {
        soap_attributes.push((must_understand_name.as_str(), "1"));
    }
    if let Some(actor) = header.actor() {
        soap_attributes.push((actor_name.as_str(), actor));
    }
    // relay only exists in SOAP 1.2
    if header.relay() && version == SoapVersion::Soap12 {
        soap_attributes.push((relay_name.as_str(), "true"));
    }

    header.write_start(writer, &soap_attributes)?;
    header.write_contents(writer)?;
    header.write_end(writer)
}

/// A header captured verbatim from a parsed envelope.
#[derive(Debug, Clone)]
pub struct RawHeader {
    qualified_name: String,
    local_name: String,
    namespace: String,
    /// Non-SOAP attributes, qualified names as written
    attributes: Vec<(String, String)>,
    must_understand: bool,
    actor: Option<String>,
    relay: bool,
    content: String,
}

impl RawHeader {
    pub fn new(
        qualified_name: impl Into<String>,
        namespace: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let qualified_name = qualified_name.into();
        let local_name = qualified_name
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            qualified_name,
            local_name,
            namespace: namespace.into(),
            attributes: Vec::new(),
            must_understand: false,
            actor: None,
            relay: false,
            content: content.into(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_must_understand(mut self, must_understand: bool) -> Self {
        self.must_understand = must_understand;
        self
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    /// Inner XML of the header element.
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl MessageHeader for RawHeader {
    fn name(&self) -> &str {
        &self.local_name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn must_understand(&self) -> bool {
        self.must_understand
    }

    fn relay(&self) -> bool {
        self.relay
    }

    fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    fn write_start(&self, writer: &mut XmlWriter, soap_attributes: &[(&str, &str)]) -> Result<()> {
        let mut start = BytesStart::new(self.qualified_name.as_str());
        for (name, value) in &self.attributes {
            start.push_attribute((name.as_str(), value.as_str()));
        }
        for (name, value) in soap_attributes {
            start.push_attribute((*name, *value));
        }
        writer.write_event(Event::Start(start))?;
        Ok(())
    }

    fn write_contents(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::raw(writer, &self.content);
        Ok(())
    }

    fn write_end(&self, writer: &mut XmlWriter) -> Result<()> {
        writer.write_event(Event::End(BytesEnd::new(self.qualified_name.as_str())))?;
        Ok(())
    }
}

/// The wsse:Security header produced by the send pipeline.
#[derive(Debug, Clone)]
pub struct SecurityHeader {
    content: String,
}

impl SecurityHeader {
    /// `content` is the serialized sequence of header children.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl MessageHeader for SecurityHeader {
    fn name(&self) -> &str {
        crate::names::elements::SECURITY
    }

    fn namespace(&self) -> &str {
        WSSE_NS
    }

    fn must_understand(&self) -> bool {
        true
    }

    fn write_start(&self, writer: &mut XmlWriter, soap_attributes: &[(&str, &str)]) -> Result<()> {
        let mut attrs: Vec<(&str, &str)> = vec![(xmlns::WSSE, WSSE_NS), (xmlns::WSU, WSU_NS)];
        attrs.extend_from_slice(soap_attributes);
        xml::start(writer, qnames::SECURITY, &attrs)
    }

    fn write_contents(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::raw(writer, &self.content);
        Ok(())
    }

    fn write_end(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::end(writer, qnames::SECURITY)
    }
}

/// Wraps a header and overrides its SOAP header attributes.
#[derive(Debug)]
pub struct DelegatingHeader {
    inner: Box<dyn MessageHeader>,
    must_understand: bool,
    actor: Option<String>,
    relay: bool,
}

impl DelegatingHeader {
    pub fn new(
        inner: Box<dyn MessageHeader>,
        must_understand: bool,
        actor: Option<String>,
        relay: bool,
    ) -> Self {
        Self {
            inner,
            must_understand,
            actor,
            relay,
        }
    }

    pub fn inner(&self) -> &dyn MessageHeader {
        self.inner.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn MessageHeader> {
        self.inner
    }
}

impl MessageHeader for DelegatingHeader {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    fn must_understand(&self) -> bool {
        self.must_understand
    }

    fn relay(&self) -> bool {
        self.relay
    }

    fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    fn write_start(&self, writer: &mut XmlWriter, soap_attributes: &[(&str, &str)]) -> Result<()> {
        self.inner.write_start(writer, soap_attributes)
    }

    fn write_contents(&self, writer: &mut XmlWriter) -> Result<()> {
        self.inner.write_contents(writer)
    }

    fn write_end(&self, writer: &mut XmlWriter) -> Result<()> {
        self.inner.write_end(writer)
    }
}

/// A SOAP message.
#[derive(Debug)]
pub struct Message {
    version: SoapVersion,
    headers: Vec<Box<dyn MessageHeader>>,
    body_id: Option<String>,
    body: String,
}

impl Message {
    pub fn new(version: SoapVersion, body: impl Into<String>) -> Self {
        Self {
            version,
            headers: Vec::new(),
            body_id: None,
            body: body.into(),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn headers(&self) -> &[Box<dyn MessageHeader>] {
        &self.headers
    }

    pub fn add_header(&mut self, header: Box<dyn MessageHeader>) {
        self.headers.push(header);
    }

    pub fn find_header(&self, name: &str, namespace: &str) -> Option<&dyn MessageHeader> {
        self.headers
            .iter()
            .find(|h| h.name() == name && h.namespace() == namespace)
            .map(|h| h.as_ref())
    }

    pub fn remove_header(&mut self, name: &str, namespace: &str) -> Option<Box<dyn MessageHeader>> {
        let index = self
            .headers
            .iter()
            .position(|h| h.name() == name && h.namespace() == namespace)?;
        Some(self.headers.remove(index))
    }

    /// wsu:Id of the body, if it has one.
    pub fn body_id(&self) -> Option<&str> {
        self.body_id.as_deref()
    }

    pub fn set_body_id(&mut self, id: Option<String>) {
        self.body_id = id;
    }

    /// Inner XML of the body.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }
}

/// Serialize a single header on its own, e.g. to re-read its children.
pub(crate) fn header_xml(header: &dyn MessageHeader, version: SoapVersion) -> Result<String> {
    let mut writer = xml::writer();
    write_header(header, &mut writer, version)?;
    xml::into_string(writer)
}
