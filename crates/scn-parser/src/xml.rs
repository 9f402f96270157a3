use std::collections::BTreeMap;

use roxmltree::{Document, Node, NodeType};
use scn_core::{ScenarioError, SourceLocation, SourceSpan};

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub root: XmlElementNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElementNode),
    Text(XmlTextNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlElementNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<XmlNode>,
    pub location: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlTextNode {
    pub value: String,
    pub location: SourceSpan,
}

impl XmlElementNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, treating an empty string as absent.
    pub fn non_empty_attr(&self, name: &str) -> Option<&str> {
        self.attr(name).filter(|value| !value.trim().is_empty())
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElementNode> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElementNode> {
        self.elements().find(|element| element.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElementNode> {
        self.elements().filter(move |element| element.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Follows a chain of first-match child names.
    pub fn descend(&self, path: &[&str]) -> Option<&XmlElementNode> {
        path.iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub fn first_element(&self) -> Option<&XmlElementNode> {
        self.elements().next()
    }

    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(text.value.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// `Name` property values under a `Properties` child, in document order.
    pub fn properties(&self) -> Vec<(&str, &str)> {
        self.child("Properties")
            .map(|properties| {
                properties
                    .children_named("Property")
                    .filter_map(|property| Some((property.attr("name")?, property.attr("value")?)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Stable identity for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "<{}> at {}:{}",
            self.name, self.location.start.line, self.location.start.column
        )
    }
}

pub fn parse_xml_document(source: &str) -> Result<XmlDocument, ScenarioError> {
    let document = Document::parse(source)
        .map_err(|error| ScenarioError::new("XML_PARSE_ERROR", error.to_string()))?;

    let Some(root) = document.root().children().find(|node| node.is_element()) else {
        return Err(ScenarioError::new(
            "XML_PARSE_ERROR",
            "XML document must contain a root element.",
        ));
    };

    Ok(XmlDocument {
        root: parse_element(&document, root),
    })
}

fn parse_element(document: &Document<'_>, node: Node<'_, '_>) -> XmlElementNode {
    let mut attributes = BTreeMap::new();
    for attribute in node.attributes() {
        attributes.insert(attribute.name().to_string(), attribute.value().to_string());
    }

    let mut children = Vec::new();
    for child in node.children() {
        match child.node_type() {
            NodeType::Element => children.push(XmlNode::Element(parse_element(document, child))),
            NodeType::Text => {
                let value = child.text().unwrap_or_default();
                if value.trim().is_empty() {
                    continue;
                }
                children.push(XmlNode::Text(XmlTextNode {
                    value: value.to_string(),
                    location: node_span(document, child.range().start, child.range().end),
                }));
            }
            _ => {}
        }
    }

    XmlElementNode {
        name: node.tag_name().name().to_string(),
        attributes,
        children,
        location: node_span(document, node.range().start, node.range().end),
    }
}

fn node_span(document: &Document<'_>, start: usize, end: usize) -> SourceSpan {
    let start_pos = document.text_pos_at(start);
    let end_pos = document.text_pos_at(end);
    SourceSpan {
        start: SourceLocation {
            line: start_pos.row as usize,
            column: start_pos.col as usize,
        },
        end: SourceLocation {
            line: end_pos.row as usize,
            column: end_pos.col as usize,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VEHICLE: &str = r#"<?xml version="1.0"?>
<OpenSCENARIO>
  <Entities>
    <ScenarioObject name="V1">
      <Vehicle name="Sedan" vehicleCategory="car">
        <Properties>
          <Property name="Behavior" value="UserDefine"/>
          <Property name="Aggress" value="0.5"/>
        </Properties>
      </Vehicle>
    </ScenarioObject>
    <ScenarioObject name="V2"/>
  </Entities>
</OpenSCENARIO>"#;

    #[test]
    fn parse_xml_document_builds_tree_without_whitespace_text() {
        let document = parse_xml_document(VEHICLE).expect("xml should parse");
        assert_eq!(document.root.name, "OpenSCENARIO");
        assert_eq!(document.root.children.len(), 1);
        let entities = document.root.child("Entities").expect("entities");
        assert_eq!(entities.children_named("ScenarioObject").count(), 2);
        assert!(entities.location.start.line >= 3);
    }

    #[test]
    fn accessors_return_options_along_paths() {
        let document = parse_xml_document(VEHICLE).expect("xml should parse");
        let vehicle = document
            .root
            .descend(&["Entities", "ScenarioObject", "Vehicle"])
            .expect("vehicle path");
        assert_eq!(vehicle.attr("name"), Some("Sedan"));
        assert_eq!(vehicle.attr("missing"), None);
        assert!(vehicle.has_child("Properties"));
        assert!(document.root.descend(&["Entities", "Nope"]).is_none());
        assert_eq!(vehicle.property("Aggress"), Some("0.5"));
        assert_eq!(vehicle.properties().len(), 2);
        assert!(vehicle.describe().starts_with("<Vehicle> at "));
    }

    #[test]
    fn non_empty_attr_skips_blank_values() {
        let document =
            parse_xml_document(r#"<Root a="" b=" x "/>"#).expect("xml should parse");
        assert_eq!(document.root.non_empty_attr("a"), None);
        assert_eq!(document.root.non_empty_attr("b"), Some(" x "));
    }

    #[test]
    fn text_joins_inline_content() {
        let document = parse_xml_document(r#"<CustomCommandAction type="Command">LaneChange:value=2</CustomCommandAction>"#)
            .expect("xml should parse");
        assert_eq!(document.root.text(), "LaneChange:value=2");
        assert!(matches!(document.root.children[0], XmlNode::Text(_)));
    }

    #[test]
    fn parse_xml_document_returns_parse_error_for_invalid_xml() {
        let error = parse_xml_document("<OpenSCENARIO>").expect_err("invalid xml should fail");
        assert_eq!(error.code, "XML_PARSE_ERROR");
    }

    #[test]
    fn parse_xml_document_returns_parse_error_when_root_element_is_missing() {
        let error = parse_xml_document("<?xml version=\"1.0\"?><!---->")
            .expect_err("missing root element should fail");
        assert_eq!(error.code, "XML_PARSE_ERROR");
    }
}
