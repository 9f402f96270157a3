use std::collections::BTreeMap;

use scn_core::{Diagnostics, LowerError, NumericText, Parameter, ParameterKind};
use scn_parser::XmlElementNode;
use tracing::warn;

pub const PARAMETER_SIGIL: char = '$';

/// Declared document parameters, resolved wherever a literal is expected.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    entries: BTreeMap<String, Parameter>,
    order: Vec<String>,
    sealed: bool,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_declarations(node: Option<&XmlElementNode>) -> Self {
        let mut table = Self::new();
        if let Some(node) = node {
            table.declare_all(node);
        }
        table
    }

    /// Reads every `ParameterDeclaration` child of `node`.
    pub fn declare_all(&mut self, node: &XmlElementNode) {
        for declaration in node.children_named("ParameterDeclaration") {
            let Some(name) = declaration.non_empty_attr("name") else {
                continue;
            };
            let kind = ParameterKind::from_authored(
                declaration.attr("parameterType").unwrap_or("string"),
            );
            self.declare(name, kind, declaration.attr("value").unwrap_or_default());
        }
    }

    /// Last write wins. Ignored once the table is sealed.
    pub fn declare(&mut self, name: &str, kind: ParameterKind, value: &str) {
        if self.sealed {
            warn!(parameter = name, "parameter table is sealed, declaration ignored");
            return;
        }
        let key = name.trim_start_matches(PARAMETER_SIGIL).to_string();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(
            key.clone(),
            Parameter {
                name: key,
                kind,
                value: value.to_string(),
            },
        );
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries.get(name.trim_start_matches(PARAMETER_SIGIL))
    }

    pub fn resolve(&self, token: &str) -> Result<String, LowerError> {
        let Some(name) = token.strip_prefix(PARAMETER_SIGIL) else {
            return Ok(token.to_string());
        };
        self.entries
            .get(name)
            .map(|parameter| parameter.value.clone())
            .ok_or_else(|| LowerError::UnresolvedParameter(token.to_string()))
    }

    /// Resolves `token`, keeping it literally when it is not declared.
    pub fn resolve_or_keep(&self, token: &str, diagnostics: &mut Diagnostics) -> String {
        match self.resolve(token) {
            Ok(value) => value,
            Err(failure) => {
                diagnostics.record(&failure);
                token.to_string()
            }
        }
    }

    pub fn resolve_number(&self, token: &str, diagnostics: &mut Diagnostics) -> NumericText {
        NumericText::parse(self.resolve_or_keep(token, diagnostics))
    }

    /// Resolved attribute, or `None` when the attribute is absent.
    pub fn attr(
        &self,
        node: &XmlElementNode,
        name: &str,
        diagnostics: &mut Diagnostics,
    ) -> Option<String> {
        node.attr(name)
            .map(|raw| self.resolve_or_keep(raw, diagnostics))
    }

    pub fn number_attr(
        &self,
        node: &XmlElementNode,
        name: &str,
        diagnostics: &mut Diagnostics,
    ) -> NumericText {
        NumericText::parse(self.attr(node, name, diagnostics).unwrap_or_default())
    }

    pub fn declared(&self) -> Vec<Parameter> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
