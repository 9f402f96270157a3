use std::sync::Arc;

use scn_core::ScenarioError;
use scn_lower::{
    lower_document, CatalogStore, EmptyCatalog, LoweringConfig, LoweringOutput, PlanarProjection,
    ProjectionOracle,
};
use scn_parser::parse_xml_document;
use tracing::{error, info};

/// Checks a scenario source against its schema.
///
/// Only consulted once lowering has already failed for the whole document;
/// each finding is one human-readable line.
pub trait SchemaValidator {
    fn validate(&self, source: &str) -> Vec<String>;
}

#[derive(Clone, Default)]
pub struct LowerScenarioOptions {
    pub source: String,
    pub config: LoweringConfig,
    pub catalog: Option<Arc<dyn CatalogStore>>,
    pub projection: Option<Arc<dyn ProjectionOracle>>,
    pub validator: Option<Arc<dyn SchemaValidator>>,
}

impl LowerScenarioOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

pub fn lower_scenario_from_xml(
    options: LowerScenarioOptions,
) -> Result<LoweringOutput, ScenarioError> {
    let catalog = options
        .catalog
        .unwrap_or_else(|| Arc::new(EmptyCatalog) as Arc<dyn CatalogStore>);
    let projection = options
        .projection
        .unwrap_or_else(|| Arc::new(PlanarProjection::default()) as Arc<dyn ProjectionOracle>);

    let lowered = parse_xml_document(&options.source).and_then(|document| {
        lower_document(&document, &options.config, catalog.as_ref(), projection.as_ref())
    });
    match lowered {
        Ok(output) => {
            info!(
                events = output.scene.events.len(),
                diagnostics = output.diagnostics.len(),
                "scenario lowered"
            );
            Ok(output)
        }
        Err(failure) => Err(explain_failure(
            failure,
            &options.source,
            options.validator.as_deref(),
        )),
    }
}

fn explain_failure(
    mut failure: ScenarioError,
    source: &str,
    validator: Option<&dyn SchemaValidator>,
) -> ScenarioError {
    let Some(validator) = validator else {
        return failure;
    };
    let findings = validator.validate(source);
    if findings.is_empty() {
        return failure;
    }
    for finding in &findings {
        error!(code = %failure.code, "schema: {}", finding);
    }
    failure.message = format!("{} Schema findings: {}", failure.message, findings.join("; "));
    failure
}
