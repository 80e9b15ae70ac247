// src/extract/tree.rs
//! Owned element tree with namespace-agnostic lookups.
//!
//! Feeds bind the DATEX II namespace to whatever prefix the producer likes
//! (`d2:`, `ns2:`, default namespace...), so every lookup here compares
//! *local* names. The resolved namespace URI is still kept on elements and
//! attributes for the few places that need a canonical qualified name
//! (`xsi:type`).

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::errors::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Direct text content, trimmed. `None` when blank.
    pub text: Option<String>,
    pub children: Vec<Element>,
}

/// Pre-order walk over an element's descendants (the element itself excluded).
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        let el = self.stack.pop()?;
        self.stack.extend(el.children.iter().rev());
        Some(el)
    }
}

impl Element {
    pub fn local_name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attribute by local name, preferring an unqualified one.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .filter(|a| a.name == local)
            .min_by_key(|a| a.namespace.is_some())
            .map(|a| a.value.as_str())
    }

    /// Attribute by canonical namespace URI + local name, whatever prefix the
    /// document bound to that URI.
    pub fn attr_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == local && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First descendant in document order satisfying `pred`.
    pub fn find_first<P>(&self, mut pred: P) -> Option<&Element>
    where
        P: FnMut(&Element) -> bool,
    {
        self.descendants().find(|e| pred(e))
    }

    pub fn find_local(&self, name: &str) -> Option<&Element> {
        self.find_first(|e| e.name == name)
    }

    pub fn find_all_local<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.descendants().filter(move |e| e.name == name)
    }

    pub fn child_local(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first descendant named `name`. Only that first match is
    /// considered: if it has no text the answer is `None`.
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.find_local(name).and_then(Element::text)
    }

    /// Nested first-match: descend through one predicate per level (descendant
    /// axis at each step) and return the first leaf that satisfies the whole
    /// path. Backtracks, so a first `validity` lacking the inner elements does
    /// not hide a later one that has them. An empty path yields `self`.
    pub fn find_path_with<P>(&self, path: &[P]) -> Option<&Element>
    where
        P: Fn(&Element) -> bool,
    {
        let Some((head, rest)) = path.split_first() else {
            return Some(self);
        };
        self.descendants()
            .filter(|e| head(e))
            .find_map(|e| e.find_path_with(rest))
    }

    pub fn find_path(&self, names: &[&str]) -> Option<&Element> {
        let preds: Vec<_> = names
            .iter()
            .map(|n| move |e: &Element| e.name == *n)
            .collect();
        self.find_path_with(&preds)
    }
}

fn namespace_uri(res: ResolveResult<'_>) -> Option<String> {
    match res {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.0).into_owned()),
        _ => None,
    }
}

fn syntax(position: impl TryInto<u64>, message: impl ToString) -> ParseError {
    ParseError::Syntax {
        position: position.try_into().unwrap_or(0),
        message: message.to_string(),
    }
}

/// Element under construction plus its not-yet-trimmed text.
struct Open {
    element: Element,
    text: String,
}

impl Open {
    fn close(mut self) -> Element {
        let t = self.text.trim();
        if !t.is_empty() {
            self.element.text = Some(t.to_string());
        }
        self.element
    }
}

/// Parse a whole document into an owned tree.
pub fn parse(bytes: &[u8]) -> Result<Element, ParseError> {
    let mut reader = NsReader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| syntax(reader.buffer_position(), e))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                if root.is_some() {
                    return Err(ParseError::MultipleRoots);
                }
                let (ns, local) = reader.resolve_element(e.name());
                let mut element = Element {
                    name: String::from_utf8_lossy(local.as_ref()).into_owned(),
                    namespace: namespace_uri(ns),
                    ..Element::default()
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| syntax(reader.buffer_position(), err))?;
                    if attr.key.as_namespace_binding().is_some() {
                        continue;
                    }
                    let (ans, alocal) = reader.resolve_attribute(attr.key);
                    let value = attr
                        .unescape_value()
                        .map_err(|err| syntax(reader.buffer_position(), err))?;
                    element.attributes.push(Attribute {
                        name: String::from_utf8_lossy(alocal.as_ref()).into_owned(),
                        namespace: namespace_uri(ans),
                        value: value.into_owned(),
                    });
                }

                let open = Open {
                    element,
                    text: String::new(),
                };
                if is_empty {
                    attach(&mut stack, &mut root, open.close());
                } else {
                    stack.push(open);
                }
            }
            Event::End(_) => {
                // quick-xml already rejects mismatched end names.
                let open = stack
                    .pop()
                    .ok_or_else(|| syntax(reader.buffer_position(), "unexpected end tag"))?;
                attach(&mut stack, &mut root, open.close());
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|err| syntax(reader.buffer_position(), err))?;
                match stack.last_mut() {
                    Some(open) => open.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(syntax(reader.buffer_position(), "text outside root")),
                }
            }
            Event::CData(c) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            // declarations, comments, processing instructions, doctype
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Unclosed(open.element.name.clone()));
    }
    root.ok_or(ParseError::Empty)
}

fn attach(stack: &mut [Open], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.element.children.push(el),
        None => *root = Some(el),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

    #[test]
    fn local_names_ignore_prefixes() {
        let xml = r#"<a:root xmlns:a="urn:x" xmlns:b="urn:y"><b:child>1</b:child><child>2</child></a:root>"#;
        let root = parse(xml.as_bytes()).unwrap();
        assert_eq!(root.local_name(), "root");
        assert_eq!(root.namespace.as_deref(), Some("urn:x"));
        let texts: Vec<_> = root.find_all_local("child").filter_map(Element::text).collect();
        assert_eq!(texts, vec!["1", "2"]);
    }

    #[test]
    fn qualified_attribute_resolves_whatever_prefix() {
        let xml = format!(
            r#"<r xmlns:q="{XSI}"><rec q:type="ns2:Accident" id="7"/></r>"#
        );
        let root = parse(xml.as_bytes()).unwrap();
        let rec = root.find_local("rec").unwrap();
        assert_eq!(rec.attr_ns(XSI, "type"), Some("ns2:Accident"));
        assert_eq!(rec.attr("id"), Some("7"));
        assert_eq!(rec.attr_ns("urn:other", "type"), None);
    }

    #[test]
    fn first_match_is_document_order() {
        let xml = "<r><x><v>deep</v></x><v>shallow</v></r>";
        let root = parse(xml.as_bytes()).unwrap();
        assert_eq!(root.first_text("v"), Some("deep"));
    }

    #[test]
    fn first_match_without_text_does_not_fall_through() {
        let xml = "<r><v/><v>later</v></r>";
        let root = parse(xml.as_bytes()).unwrap();
        assert_eq!(root.first_text("v"), None);
    }

    #[test]
    fn path_search_backtracks() {
        let xml = "<r><validity><other/></validity><validity><span><start>t</start></span></validity></r>";
        let root = parse(xml.as_bytes()).unwrap();
        let hit = root.find_path(&["validity", "span", "start"]).unwrap();
        assert_eq!(hit.text(), Some("t"));
        assert!(root.find_path(&["validity", "missing"]).is_none());
        assert_eq!(root.find_path(&[]).map(Element::local_name), Some("r"));
    }

    #[test]
    fn entities_and_cdata_are_decoded() {
        let xml = "<r><a>x &amp; y</a><b><![CDATA[<raw>]]></b></r>";
        let root = parse(xml.as_bytes()).unwrap();
        assert_eq!(root.first_text("a"), Some("x & y"));
        assert_eq!(root.first_text("b"), Some("<raw>"));
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(parse(b"<r><a></b></r>").is_err());
        assert!(parse(b"<r><a>").is_err());
        assert!(matches!(parse(b"   "), Err(ParseError::Empty)));
        assert!(matches!(parse(b"<a/><b/>"), Err(ParseError::MultipleRoots)));
    }
}
