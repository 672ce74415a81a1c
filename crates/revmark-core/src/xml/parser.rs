use super::arena::XmlDocument;
use super::namespaces::{XML, XMLNS};
use super::node::XmlNodeData;
use super::xname::{XAttribute, XName};
use crate::error::{Result, RevmarkError};

/// Elements whose whitespace-only text is content rather than indentation.
const TEXT_BEARING_ELEMENTS: &[&str] = &["t", "delText", "instrText", "delInstrText"];

pub fn parse(xml: &str) -> Result<XmlDocument> {
    let doc = roxmltree::Document::parse_with_options(
        xml,
        roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        },
    )
    .map_err(|e| RevmarkError::XmlParse {
        message: e.to_string(),
        location: format!("line {}", e.pos().row),
    })?;

    let mut xml_doc = XmlDocument::new();
    build_tree(doc.root_element(), &mut xml_doc, None);
    Ok(xml_doc)
}

fn build_tree(node: roxmltree::Node, doc: &mut XmlDocument, parent: Option<indextree::NodeId>) {
    let node_data = match node.node_type() {
        roxmltree::NodeType::Element => {
            let name = XName::new(
                node.tag_name().namespace().unwrap_or(""),
                node.tag_name().name(),
            );

            let mut attributes: Vec<XAttribute> = node
                .attributes()
                .map(|attr| {
                    XAttribute::new(
                        XName::new(attr.namespace().unwrap_or(""), attr.name()),
                        attr.value(),
                    )
                })
                .collect();

            // roxmltree reports inherited declarations on every element; only
            // keep the ones introduced here.
            let inherited: Vec<(Option<&str>, &str)> = node
                .parent_element()
                .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
                .unwrap_or_default();
            for ns in node.namespaces() {
                if inherited.contains(&(ns.name(), ns.uri())) || ns.uri() == XML::NS {
                    continue;
                }
                match ns.name() {
                    Some(prefix) => attributes.push(XAttribute::new(XName::new(XMLNS, prefix), ns.uri())),
                    None => attributes.push(XAttribute::new(XName::local("xmlns"), ns.uri())),
                }
            }

            XmlNodeData::Element { name, attributes }
        }
        roxmltree::NodeType::Text => {
            let Some(text) = node.text() else { return };
            let keeps_whitespace = node
                .parent_element()
                .is_some_and(|p| TEXT_BEARING_ELEMENTS.contains(&p.tag_name().name()));
            if text.trim().is_empty() && !keeps_whitespace {
                return;
            }
            XmlNodeData::Text(text.to_string())
        }
        roxmltree::NodeType::Comment => {
            let Some(text) = node.text() else { return };
            XmlNodeData::Comment(text.to_string())
        }
        roxmltree::NodeType::PI => {
            let Some(pi) = node.pi() else { return };
            XmlNodeData::ProcessingInstruction {
                target: pi.target.to_string(),
                data: pi.value.unwrap_or_default().to_string(),
            }
        }
        roxmltree::NodeType::Root => return,
    };

    let new_id = match parent {
        Some(parent_id) => doc.add_child(parent_id, node_data),
        None => doc.add_root(node_data),
    };

    for child in node.children() {
        build_tree(child, doc, Some(new_id));
    }
}
