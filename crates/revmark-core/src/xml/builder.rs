use super::arena::XmlDocument;
use super::namespaces::XMLNS;
use super::node::XmlNodeData;
use super::xname::{XAttribute, XName};
use crate::error::{Result, RevmarkError};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

type NamespaceMap = HashMap<String, String>;

pub fn serialize(doc: &XmlDocument) -> Result<String> {
    let bytes = serialize_bytes(doc)?;
    String::from_utf8(bytes).map_err(|e| RevmarkError::XmlWrite(e.to_string()))
}

pub fn serialize_bytes(doc: &XmlDocument) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(write_error)?;

    if let Some(root_id) = doc.root() {
        write_node(doc, root_id, &mut writer, &NamespaceMap::new())?;
    }

    Ok(writer.into_inner().into_inner())
}

/// Serialize a subtree starting from a specific node (no XML declaration).
/// Namespace declarations inherited from ancestors are repeated on the
/// subtree root so the fragment stands alone.
pub fn serialize_subtree(doc: &XmlDocument, node_id: indextree::NodeId) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let Some(node_data) = doc.get(node_id) else {
        return Ok(String::new());
    };

    match node_data {
        XmlNodeData::Element { name, attributes } => {
            let mut merged_attrs = attributes.clone();
            let mut declared: HashSet<XName> = merged_attrs
                .iter()
                .filter(|attr| is_xmlns_attr(attr))
                .map(|attr| attr.name.clone())
                .collect();
            merged_attrs.extend(collect_ancestor_namespace_attrs(doc, node_id, &mut declared));
            write_element(doc, node_id, name, &merged_attrs, &mut writer, &NamespaceMap::new())?;
        }
        _ => write_node(doc, node_id, &mut writer, &NamespaceMap::new())?,
    }

    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| RevmarkError::XmlWrite(e.to_string()))
}

fn write_error(e: impl std::fmt::Display) -> RevmarkError {
    RevmarkError::XmlWrite(e.to_string())
}

fn is_xmlns_attr(attr: &XAttribute) -> bool {
    (attr.name.namespace.is_none() && attr.name.local_name == "xmlns")
        || attr.name.namespace.as_deref() == Some(XMLNS)
}

fn collect_ancestor_namespace_attrs(
    doc: &XmlDocument,
    node_id: indextree::NodeId,
    declared: &mut HashSet<XName>,
) -> Vec<XAttribute> {
    let mut collected = Vec::new();
    for ancestor_id in doc.ancestors(node_id).skip(1) {
        let Some(attrs) = doc.get(ancestor_id).and_then(|d| d.attributes()) else {
            continue;
        };
        for attr in attrs {
            if is_xmlns_attr(attr) && declared.insert(attr.name.clone()) {
                collected.push(attr.clone());
            }
        }
    }
    collected
}

fn extend_namespace_map(namespace_map: &mut NamespaceMap, attributes: &[XAttribute]) {
    for attr in attributes {
        match attr.name.namespace.as_deref() {
            None if attr.name.local_name == "xmlns" => {
                namespace_map.insert(attr.value.clone(), String::new());
            }
            Some(XMLNS) => {
                namespace_map.insert(attr.value.clone(), attr.name.local_name.clone());
            }
            _ => {}
        }
    }
}

fn qualified(name: &XName, prefix: &str) -> String {
    if prefix.is_empty() {
        name.local_name.clone()
    } else {
        format!("{}:{}", prefix, name.local_name)
    }
}

fn write_node<W: std::io::Write>(
    doc: &XmlDocument,
    node_id: indextree::NodeId,
    writer: &mut Writer<W>,
    namespace_map: &NamespaceMap,
) -> Result<()> {
    let Some(node_data) = doc.get(node_id) else {
        return Ok(());
    };

    match node_data {
        XmlNodeData::Element { name, attributes } => {
            write_element(doc, node_id, name, attributes, writer, namespace_map)?;
        }
        XmlNodeData::Text(text) => {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?;
        }
        XmlNodeData::CData(text) => {
            writer
                .write_event(Event::CData(BytesCData::new(text)))
                .map_err(write_error)?;
        }
        XmlNodeData::Comment(text) => {
            writer
                .write_event(Event::Comment(BytesText::new(text)))
                .map_err(write_error)?;
        }
        XmlNodeData::ProcessingInstruction { target, data } => {
            let content = if data.is_empty() {
                target.clone()
            } else {
                format!("{} {}", target, data)
            };
            writer
                .write_event(Event::PI(BytesPI::new(&content)))
                .map_err(write_error)?;
        }
    }

    Ok(())
}

fn write_element<W: std::io::Write>(
    doc: &XmlDocument,
    node_id: indextree::NodeId,
    name: &XName,
    attributes: &[XAttribute],
    writer: &mut Writer<W>,
    namespace_map: &NamespaceMap,
) -> Result<()> {
    let mut scoped_map = namespace_map.clone();
    extend_namespace_map(&mut scoped_map, attributes);

    let tag_name = match &name.namespace {
        Some(ns) => {
            let prefix = scoped_map
                .get(ns)
                .map(String::as_str)
                .unwrap_or_else(|| fallback_prefix(ns));
            qualified(name, prefix)
        }
        None => name.local_name.clone(),
    };

    let mut elem = BytesStart::new(tag_name.as_str());
    for attr in attributes {
        let attr_name = match attr.name.namespace.as_deref() {
            Some(XMLNS) => qualified(&attr.name, "xmlns"),
            Some(ns) => {
                let prefix = scoped_map
                    .get(ns)
                    .filter(|p| !p.is_empty())
                    .map(String::as_str)
                    .unwrap_or_else(|| fallback_prefix(ns));
                qualified(&attr.name, prefix)
            }
            None => attr.name.local_name.clone(),
        };
        elem.push_attribute((attr_name.as_str(), attr.value.as_str()));
    }

    let children: Vec<_> = doc.children(node_id).collect();
    if children.is_empty() {
        writer.write_event(Event::Empty(elem)).map_err(write_error)?;
    } else {
        writer.write_event(Event::Start(elem)).map_err(write_error)?;
        for child_id in children {
            write_node(doc, child_id, writer, &scoped_map)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(tag_name.as_str())))
            .map_err(write_error)?;
    }

    Ok(())
}

/// Conventional prefixes for namespaces that were never declared in the tree.
fn fallback_prefix(namespace: &str) -> &'static str {
    match namespace {
        "http://schemas.openxmlformats.org/wordprocessingml/2006/main" => "w",
        "http://schemas.microsoft.com/office/word/2010/wordml" => "w14",
        "http://schemas.openxmlformats.org/officeDocument/2006/math" => "m",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships" => "r",
        "http://schemas.openxmlformats.org/markup-compatibility/2006" => "mc",
        "http://schemas.openxmlformats.org/drawingml/2006/main" => "a",
        "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" => "wp",
        "http://schemas.microsoft.com/office/word/2010/wordprocessingShape" => "wps",
        "urn:schemas-microsoft-com:vml" => "v",
        "http://schemas.revmark.dev/2024/consolidation" => "rvm",
        "http://www.w3.org/XML/1998/namespace" => "xml",
        _ => "ns",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::namespaces::W;
    use crate::xml::parser::parse;

    #[test]
    fn serialize_simple_document() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(XName::local("root")));
        doc.add_child(root, XmlNodeData::text("content"));

        let xml = serialize(&doc).unwrap();
        assert!(xml.contains("<root>content</root>"));
    }

    #[test]
    fn serialize_empty_element() {
        let mut doc = XmlDocument::new();
        doc.add_root(XmlNodeData::element(XName::local("empty")));

        let xml = serialize(&doc).unwrap();
        assert!(xml.contains("<empty/>"));
    }

    #[test]
    fn declared_prefixes_are_reused() {
        let xml = r#"<x:document xmlns:x="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><x:body/></x:document>"#;
        let doc = parse(xml).unwrap();
        let out = serialize(&doc).unwrap();
        assert!(out.contains("<x:body/>"));
    }

    #[test]
    fn undeclared_word_namespace_uses_w_prefix() {
        let mut doc = XmlDocument::new();
        let p = doc.add_root(XmlNodeData::element(W::p()));
        doc.add_child(p, XmlNodeData::element(W::r()));
        let out = serialize(&doc).unwrap();
        assert!(out.contains("<w:p><w:r/></w:p>"));
    }

    #[test]
    fn subtree_repeats_inherited_declarations() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p/></w:body></w:document>"#;
        let doc = parse(xml).unwrap();
        let root = doc.root().unwrap();
        let body = doc.first_child_named(root, W::NS, "body").unwrap();
        let out = serialize_subtree(&doc, body).unwrap();
        assert!(out.starts_with("<w:body xmlns:w="));
    }
}
