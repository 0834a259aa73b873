//! Response document model.
//!
//! Responses are read with quick-xml into a small owned element tree that
//! supports the path lookups the protocol needs (`//a/b` anywhere in the
//! document, `a/b` relative to an element) and can write sub-trees back out
//! so captured blocks can be echoed into later requests.
//!
//! quick-xml does not expand external entities, so DOCTYPE tricks in a
//! response cannot reach the filesystem or network.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{BankError, BankResult};

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with its attributes and children, as read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name, including any namespace prefix
    name: String,
    /// Attributes in document order, values unescaped
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder helper: add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    fn from_start(start: &BytesStart) -> BankResult<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| BankError::malformed(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| BankError::malformed(format!("bad attribute value {}: {}", key, e)))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Qualified name (`prefix:local` or `local`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without namespace prefix. Path steps match on this.
    pub fn local_name(&self) -> &str {
        self.name
            .rsplit_once(':')
            .map_or(self.name.as_str(), |(_, local)| local)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text of this element and all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Select every element matching `path`.
    ///
    /// `a/b/c` walks child steps from this element. `//a/b` matches `a`
    /// anywhere in this element's subtree (itself included) and then walks
    /// child steps from each match. Results are in document order.
    pub fn select(&self, path: &str) -> Vec<&Element> {
        let (descendant, rest) = match path.strip_prefix("//") {
            Some(rest) => (true, rest),
            None => (false, path),
        };

        let mut steps = rest.split('/').filter(|step| !step.is_empty());
        let Some(first) = steps.next() else {
            return Vec::new();
        };

        let mut current: Vec<&Element> = if descendant {
            let mut found = Vec::new();
            self.collect_named(first, &mut found);
            found
        } else {
            self.child_elements()
                .filter(|child| child.local_name() == first)
                .collect()
        };

        for step in steps {
            current = current
                .into_iter()
                .flat_map(|element| {
                    element
                        .child_elements()
                        .filter(move |child| child.local_name() == step)
                })
                .collect();
        }

        current
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        if self.local_name() == name {
            found.push(self);
        }
        for child in self.child_elements() {
            child.collect_named(name, found);
        }
    }

    /// First element matching `path`, if any.
    pub fn node_at(&self, path: &str) -> Option<&Element> {
        self.select(path).into_iter().next()
    }

    /// Trimmed text at `path`, or `None` when the path is absent.
    pub fn text_at(&self, path: &str) -> Option<String> {
        self.node_at(path).map(|element| element.text().trim().to_string())
    }

    /// Trimmed text at `path`, or `default` when the path is absent.
    ///
    /// Absence is never an error here; callers that need the field use
    /// [`Element::required_text_at`].
    pub fn value_at(&self, path: &str, default: &str) -> String {
        self.text_at(path).unwrap_or_else(|| default.to_string())
    }

    /// Trimmed text at `path`, failing with `MalformedResponse` when absent.
    pub fn required_text_at(&self, path: &str) -> BankResult<String> {
        self.text_at(path).ok_or_else(|| {
            BankError::malformed(format!("missing required field {} in <{}>", path, self.name))
        })
    }

    /// Serialize this element, tags included.
    pub fn outer_xml(&self) -> BankResult<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        into_string(writer)
    }

    /// Serialize this element's children, without its own tags.
    pub fn inner_xml(&self) -> BankResult<String> {
        let mut writer = Writer::new(Vec::new());
        write_children(&mut writer, &self.children)?;
        into_string(writer)
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> BankResult<()> {
    writer
        .write_event(event)
        .map_err(|e| BankError::malformed(format!("failed to write XML: {}", e)))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> BankResult<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return write_event(writer, Event::Empty(start));
    }

    write_event(writer, Event::Start(start))?;
    write_children(writer, &element.children)?;
    write_event(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn write_children(writer: &mut Writer<Vec<u8>>, children: &[Node]) -> BankResult<()> {
    for node in children {
        match node {
            Node::Element(element) => write_element(writer, element)?,
            Node::Text(text) => write_event(writer, Event::Text(BytesText::new(text)))?,
        }
    }
    Ok(())
}

fn into_string(writer: Writer<Vec<u8>>) -> BankResult<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| BankError::malformed(format!("serialized XML is not UTF-8: {}", e)))
}

/// A parsed response document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Element,
}

impl Document {
    /// Parse raw response bytes.
    ///
    /// Anything that is not a single well-formed XML element tree fails with
    /// `MalformedResponse`.
    pub fn parse(data: &[u8]) -> BankResult<Self> {
        let xml = std::str::from_utf8(data)
            .map_err(|e| BankError::malformed(format!("invalid UTF-8: {}", e)))?;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    stack.push(Element::from_start(e)?);
                }

                Ok(Event::Empty(ref e)) => {
                    let element = Element::from_start(e)?;
                    attach(&mut stack, &mut root, element)?;
                }

                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| BankError::malformed("unexpected closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }

                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| BankError::malformed(format!("bad text content: {}", e)))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Text(text.into_owned())),
                        None if text.trim().is_empty() => {}
                        None => return Err(BankError::malformed("text outside root element")),
                    }
                }

                Ok(Event::CData(ref e)) => {
                    let parent = stack
                        .last_mut()
                        .ok_or_else(|| BankError::malformed("CDATA outside root element"))?;
                    parent
                        .children
                        .push(Node::Text(String::from_utf8_lossy(e).into_owned()));
                }

                Ok(Event::Eof) => break,

                Err(e) => {
                    return Err(BankError::malformed(format!(
                        "XML parse error at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }

                // Declarations, comments, processing instructions, DOCTYPE
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(BankError::malformed(format!("unclosed element <{}>", open.name)));
        }

        root.map(|root| Document { root })
            .ok_or_else(|| BankError::malformed("document has no root element"))
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// See [`Element::select`]; `//` paths search the whole document.
    pub fn select(&self, path: &str) -> Vec<&Element> {
        self.root.select(path)
    }

    pub fn node_at(&self, path: &str) -> Option<&Element> {
        self.root.node_at(path)
    }

    pub fn text_at(&self, path: &str) -> Option<String> {
        self.root.text_at(path)
    }

    pub fn value_at(&self, path: &str, default: &str) -> String {
        self.root.value_at(path, default)
    }

    pub fn required_text_at(&self, path: &str) -> BankResult<String> {
        self.root.required_text_at(path)
    }

    /// The `faultstring` of a SOAP Fault, when the response is one.
    pub fn fault(&self) -> Option<String> {
        self.node_at("//Fault").map(|fault| {
            fault
                .text_at("faultstring")
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "unspecified SOAP fault".to_string())
        })
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> BankResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(BankError::malformed("multiple root elements")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body>
    <ns:obtenerPosGlobal_LIPResponse xmlns:ns="urn:test">
      <methodResult>
        <datosUsuario>
          <nombre>ANA</nombre>
          <canal codigo="5">MOV</canal>
        </datosUsuario>
        <cuentas>
          <cuenta><IBAN> ES12 3456 </IBAN></cuenta>
          <cuenta><IBAN>ES99</IBAN></cuenta>
        </cuentas>
        <note><![CDATA[a < b]]></note>
        <escaped>Fish &amp; Chips</escaped>
      </methodResult>
    </ns:obtenerPosGlobal_LIPResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;

    fn sample() -> Document {
        Document::parse(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_root() {
        let doc = sample();
        assert_eq!(doc.root().name(), "soapenv:Envelope");
        assert_eq!(doc.root().local_name(), "Envelope");
    }

    #[test]
    fn test_descendant_path_ignores_prefixes() {
        let doc = sample();
        assert_eq!(doc.select("//Body").len(), 1);
        assert_eq!(doc.select("//cuentas/cuenta").len(), 2);
        assert_eq!(doc.select("//methodResult/datosUsuario").len(), 1);
    }

    #[test]
    fn test_relative_path() {
        let doc = sample();
        let accounts = doc.select("//cuentas/cuenta");
        assert_eq!(accounts[0].value_at("IBAN", ""), "ES12 3456");
        assert_eq!(accounts[1].value_at("IBAN", ""), "ES99");
        assert!(accounts[0].select("//cuentas").is_empty());
    }

    #[test]
    fn test_value_at_default_on_absence() {
        let doc = sample();
        assert_eq!(doc.value_at("//methodResult/finLista", ""), "");
        assert_eq!(doc.value_at("//methodResult/finLista", "S"), "S");
        assert!(doc.text_at("//nowhere").is_none());
    }

    #[test]
    fn test_required_text_at() {
        let doc = sample();
        assert_eq!(doc.required_text_at("//nombre").unwrap(), "ANA");
        let err = doc.required_text_at("//apellido").unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_unescaped_text_and_cdata() {
        let doc = sample();
        assert_eq!(doc.value_at("//escaped", ""), "Fish & Chips");
        assert_eq!(doc.value_at("//note", ""), "a < b");
    }

    #[test]
    fn test_inner_and_outer_xml() {
        let doc = sample();
        let profile = doc.node_at("//methodResult/datosUsuario").unwrap();
        assert_eq!(
            profile.inner_xml().unwrap(),
            r#"<nombre>ANA</nombre><canal codigo="5">MOV</canal>"#
        );

        let escaped = doc.node_at("//escaped").unwrap();
        assert_eq!(
            escaped.outer_xml().unwrap(),
            "<escaped>Fish &amp; Chips</escaped>"
        );
    }

    #[test]
    fn test_outer_xml_empty_element() {
        let element = Element::new("repo").with_attribute("tipo", "A");
        assert_eq!(element.outer_xml().unwrap(), r#"<repo tipo="A"/>"#);
    }

    #[test]
    fn test_reparse_serialized_subtree() {
        let doc = sample();
        let profile = doc.node_at("//datosUsuario").unwrap();
        let reparsed = Document::parse(profile.outer_xml().unwrap().as_bytes()).unwrap();
        assert_eq!(reparsed.root(), profile);
    }

    #[test]
    fn test_malformed_inputs() {
        for input in [
            "",
            "not xml at all",
            "<a><b></a>",
            "<a><b>",
            "<a/><b/>",
            "<a>&bogus;</a>",
            "<a/>garbage",
            "junk<a/>",
            "<a/><![CDATA[x]]>",
        ] {
            let err = Document::parse(input.as_bytes()).unwrap_err();
            assert_eq!(err.code(), "MALFORMED_RESPONSE", "input: {:?}", input);
        }
    }

    #[test]
    fn test_whitespace_around_root_is_accepted() {
        let doc = Document::parse(b"\n  <a>x</a>\n\n").unwrap();
        assert_eq!(doc.root().text(), "x");
    }

    #[test]
    fn test_invalid_utf8() {
        let err = Document::parse(&[0x3c, 0x61, 0x3e, 0xff, 0x3c, 0x2f, 0x61, 0x3e]).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_fault_detection() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Server</faultcode>
      <faultstring>Credenciales incorrectas</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;
        let doc = Document::parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.fault().as_deref(), Some("Credenciales incorrectas"));
        assert!(sample().fault().is_none());
    }
}
