//! Secure XML loader
//!
//! Turns raw report bytes into a small, namespace-free element tree that the
//! JUnit and Jacoco parsers walk. The loader never fetches anything: the
//! `<!DOCTYPE>` declaration is skipped and only the predefined XML entities and
//! character references are expanded, so a document relying on DTD-declared
//! entities is rejected as malformed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;

use crate::error::ParseError;

/// A node below an element: either a child element or a non-blank text run
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with its local name, attributes in document order and children
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// A loaded document. The root element is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute value that must be present
    pub fn required_attribute(&self, name: &str) -> Result<&str, ParseError> {
        self.attribute(name)
            .ok_or_else(|| ParseError::missing_attribute(&self.name, name))
    }

    /// Attribute value parsed into `T` (integers, floats)
    pub fn parse_attribute<T: FromStr>(&self, name: &str) -> Result<T, ParseError> {
        let raw = self.required_attribute(name)?;
        raw.trim()
            .parse()
            .map_err(|_| ParseError::invalid_attribute(&self.name, name, raw))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// All elements below this one with the given local name, in document order
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.name == name {
                found.push(child);
            }
            child.collect_named(name, found);
        }
    }

    pub fn first_descendant_named(&self, name: &str) -> Option<&Element> {
        self.child_elements().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child.first_descendant_named(name)
            }
        })
    }

    /// Concatenated text of every descendant text node
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, text: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => text.push_str(t),
                Node::Element(element) => element.collect_text(text),
            }
        }
    }
}

/// Load every stream, failing the whole batch on the first malformed one
pub fn load_documents<R: Read>(streams: Vec<R>) -> Result<Vec<Document>, ParseError> {
    streams
        .into_iter()
        .enumerate()
        .map(|(index, stream)| load_document(index, BufReader::new(stream)))
        .collect()
}

pub fn load_str(xml: &str) -> Result<Document, ParseError> {
    load_document(0, xml.as_bytes())
}

/// A report format read from loaded XML documents
pub trait ReportParser {
    type Output;

    fn parse_document(&self, document: &Document) -> Result<Self::Output, ParseError>;

    /// Parses documents in order; the first failing document aborts the batch
    fn parse_documents(&self, documents: &[Document]) -> Result<Vec<Self::Output>, ParseError> {
        documents.iter().map(|doc| self.parse_document(doc)).collect()
    }

    /// Loads and parses raw report streams
    fn parse_streams<R: Read>(&self, streams: Vec<R>) -> Result<Vec<Self::Output>, ParseError> {
        let documents = load_documents(streams)?;
        self.parse_documents(&documents)
    }
}

fn load_document<R: BufRead>(index: usize, input: R) -> Result<Document, ParseError> {
    let malformed = |reason: String| ParseError::MalformedDocument { index, reason };

    let mut reader = Reader::from_reader(input);
    reader.check_end_names(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            malformed(format!("{} (at byte {})", e, reader.buffer_position()))
        })?;

        match event {
            Event::Start(ref e) => {
                if root.is_some() {
                    return Err(malformed("content after the root element".to_string()));
                }
                stack.push(start_element(&reader, e).map_err(malformed)?);
            }
            Event::Empty(ref e) => {
                let element = start_element(&reader, e).map_err(malformed)?;
                attach(&mut stack, &mut root, element).map_err(malformed)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element).map_err(malformed)?;
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(|e| malformed(e.to_string()))?;
                push_text(&mut stack, &text).map_err(malformed)?;
            }
            Event::CData(ref e) => {
                let text = reader
                    .decoder()
                    .decode(e)
                    .map_err(|e| malformed(e.to_string()))?;
                push_text(&mut stack, &text).map_err(malformed)?;
            }
            // DOCTYPE is never followed, declarations and comments carry no report data
            Event::DocType(_) | Event::Decl(_) | Event::PI(_) | Event::Comment(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!("unexpected end of document inside <{}>", open.name)));
    }

    root.map(|root| Document { root })
        .ok_or_else(|| malformed("document has no root element".to_string()))
}

fn start_element<R>(reader: &Reader<R>, e: &BytesStart) -> Result<Element, String> {
    let decoder = reader.decoder();
    let name = decoder
        .decode(e.local_name().as_ref())
        .map_err(|e| e.to_string())?
        .into_owned();

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let key = decoder
            .decode(attr.key.local_name().as_ref())
            .map_err(|e| e.to_string())?
            .into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err("content after the root element".to_string()),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), String> {
    // Whitespace-only runs are formatting, not content
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            // Adjacent runs (text next to CDATA) form one node
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None => Err("text outside the root element".to_string()),
    }
}
