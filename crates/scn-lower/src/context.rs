use scn_core::{Diagnostics, DocumentDialect, NumericText};
use scn_parser::XmlElementNode;

use crate::catalog::{CatalogResolver, CatalogStore};
use crate::config::LoweringConfig;
use crate::ids::IdGenerator;
use crate::params::ParameterTable;
use crate::projection::ProjectionOracle;

/// State threaded through one lowering run.
pub struct LowerContext<'a> {
    pub config: &'a LoweringConfig,
    pub catalog: CatalogResolver<'a>,
    pub projection: &'a dyn ProjectionOracle,
    pub dialect: DocumentDialect,
    pub params: ParameterTable,
    pub ids: IdGenerator,
    pub diagnostics: Diagnostics,
}

impl<'a> LowerContext<'a> {
    pub fn new(
        config: &'a LoweringConfig,
        store: &'a dyn CatalogStore,
        projection: &'a dyn ProjectionOracle,
    ) -> Self {
        Self {
            config,
            catalog: CatalogResolver::new(store, config),
            projection,
            dialect: DocumentDialect::default(),
            params: ParameterTable::new(),
            ids: IdGenerator::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Parameter-resolved attribute.
    pub fn attr(&mut self, node: &XmlElementNode, name: &str) -> Option<String> {
        self.params.attr(node, name, &mut self.diagnostics)
    }

    pub fn attr_or(&mut self, node: &XmlElementNode, name: &str, fallback: &str) -> String {
        self.attr(node, name)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn number(&mut self, node: &XmlElementNode, name: &str) -> NumericText {
        self.params.number_attr(node, name, &mut self.diagnostics)
    }

    pub fn value(&mut self, node: &XmlElementNode, name: &str) -> f64 {
        self.number(node, name).value()
    }

    /// Resolves a bare token such as a property value.
    pub fn resolve(&mut self, token: &str) -> String {
        self.params.resolve_or_keep(token, &mut self.diagnostics)
    }

    pub fn warn(&mut self, code: &str, message: impl Into<String>) {
        self.diagnostics.warn(code, message);
    }
}
