use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{RestError, Result};

/// A node of a parsed XML document.
///
/// Text directly inside the element is concatenated into `content`; child
/// elements keep their document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub content: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document and return its root element
    pub fn parse(data: &str) -> Result<XmlNode> {
        XmlNode::parse_traced(data, false)
    }

    /// Parse, logging every element opened when `trace` is set
    pub fn parse_traced(data: &str, trace: bool) -> Result<XmlNode> {
        let mut reader = Reader::from_str(data);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let node = node_from_start(&e)?;
                    if trace {
                        tracing::debug!(target: "restproxy::xml", depth = stack.len(), element = %node.name, "open");
                    }
                    stack.push(node);
                }
                Event::Empty(e) => {
                    let node = node_from_start(&e)?;
                    if trace {
                        tracing::debug!(target: "restproxy::xml", depth = stack.len(), element = %node.name, "empty");
                    }
                    attach(&mut stack, &mut root, node);
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| RestError::InvalidResponse("unbalanced XML end tag".to_string()))?;
                    attach(&mut stack, &mut root, node);
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    push_text(&mut stack, &text);
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    push_text(&mut stack, &text);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(RestError::InvalidResponse("unclosed XML element".to_string()));
        }
        root.ok_or_else(|| RestError::InvalidResponse("XML document has no root element".to_string()))
    }

    /// Value of an attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Direct children with the given tag name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant (or self) with this tag
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

fn node_from_start(e: &BytesStart<'_>) -> Result<XmlNode> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attrs.insert(key, value);
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn push_text(stack: &mut [XmlNode], text: &str) {
    if let Some(node) = stack.last_mut() {
        node.content.get_or_insert_with(String::new).push_str(text);
    }
}
