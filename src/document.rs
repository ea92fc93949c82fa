//! Input document tree.
//!
//! The interpreter receives documents already validated against the external
//! schema, so parsing here only has to produce the element tree: names,
//! unique-keyed attributes, and children in document order. Document order is
//! significant - it is execution order for call elements and positional order
//! for collection elements.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Document has no root element")]
    Empty,

    #[error("Duplicate attribute '{attribute}' on element '{element}'")]
    DuplicateAttribute { element: String, attribute: String },
}

/// One named node: attributes plus ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentElement {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DocumentElement>,
}

impl DocumentElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, child: DocumentElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First child with the given name, if any.
    pub fn child(&self, name: &str) -> Option<&DocumentElement> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse an XML string into a [`DocumentElement`] tree.
///
/// Text content is ignored; the scripting format carries all data in
/// attributes and element structure.
pub fn parse_document(xml: &str) -> Result<DocumentElement, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<DocumentElement> = Vec::new();
    let mut root: Option<DocumentElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let element = element_from_tag(e)?;
                stack.push(element);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from_tag(e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Malformed("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DocumentError::Malformed(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(DocumentError::Malformed("unclosed element".to_string()));
    }
    root.ok_or(DocumentError::Empty)
}

fn element_from_tag(tag: &quick_xml::events::BytesStart<'_>) -> Result<DocumentElement, DocumentError> {
    let name = String::from_utf8_lossy(tag.name().as_ref()).to_string();
    let mut element = DocumentElement::new(&name);

    for attr in tag.attributes() {
        let attr = attr.map_err(|e| DocumentError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = String::from_utf8_lossy(&attr.value).to_string();
        if element.attributes.insert(key.clone(), value).is_some() {
            return Err(DocumentError::DuplicateAttribute {
                element: name,
                attribute: key,
            });
        }
    }

    Ok(element)
}

fn attach(
    stack: &mut Vec<DocumentElement>,
    root: &mut Option<DocumentElement>,
    element: DocumentElement,
) -> Result<(), DocumentError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(DocumentError::Malformed("multiple root elements".to_string()));
    }
    *root = Some(element);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attributes_and_nested_children() {
        let doc = parse_document(
            r#"<script><Resize width="64" height="64"/><Draw><Path x="1"/></Draw></script>"#,
        )
        .unwrap();

        assert_eq!(doc.name, "script");
        assert_eq!(doc.children.len(), 2);
        assert_eq!(doc.children[0].name, "Resize");
        assert_eq!(doc.children[0].attribute("width"), Some("64"));
        assert_eq!(doc.children[1].child("Path").unwrap().attribute("x"), Some("1"));
    }

    #[test]
    fn preserves_child_order() {
        let doc = parse_document(r#"<p><a/><b/><a/></p>"#).unwrap();
        let names: Vec<&str> = doc.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "a"]);
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert!(matches!(parse_document(""), Err(DocumentError::Empty)));
        assert!(matches!(
            parse_document("<a><b></a>"),
            Err(DocumentError::Malformed(_))
        ));
    }
}
