pub mod actions;
pub mod assembler;
pub mod catalog;
pub mod command;
pub mod conditions;
pub mod config;
pub mod context;
pub mod entities;
pub mod environment;
pub mod ids;
pub mod params;
pub mod placement;
pub mod projection;
pub mod signals;
pub mod tracks;

#[cfg(test)]
mod tests;

use scn_core::{Diagnostics, Scene, ScenarioError};
use scn_parser::XmlDocument;
use serde::{Deserialize, Serialize};
use tracing::{error, info_span};

pub use actions::{classify_action, ActionScope, ClassifiedAction, TrackFeed};
pub use assembler::{fixup_element_states, trigger_count_key, SceneAssembler};
pub use catalog::{
    CatalogEntry, CatalogKind, CatalogResolver, CatalogStore, EmptyCatalog, InMemoryCatalog,
};
pub use conditions::{classify_condition, classify_trigger, ConditionScope};
pub use config::LoweringConfig;
pub use context::LowerContext;
pub use ids::IdGenerator;
pub use params::ParameterTable;
pub use projection::{CachedProjection, LanePoint, PlanarProjection, ProjectionOracle};
pub use tracks::{TrackBook, TrackTrigger};

/// A lowered scene together with every recovered problem met on the way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoweringOutput {
    pub scene: Scene,
    pub diagnostics: Diagnostics,
}

/// Lowers a parsed scenario document into a [`Scene`].
///
/// Content problems degrade into diagnostics; only a document missing its
/// root or a required section fails.
pub fn lower_document(
    document: &XmlDocument,
    config: &LoweringConfig,
    catalog: &dyn CatalogStore,
    projection: &dyn ProjectionOracle,
) -> Result<LoweringOutput, ScenarioError> {
    let _span = info_span!("lower_document", root = %document.root.name).entered();
    let (scene, diagnostics) = SceneAssembler::new(config, catalog, projection)
        .assemble(document)
        .map_err(|failure| {
            error!(code = failure.code(), "document cannot be lowered: {}", failure);
            ScenarioError::from(failure)
        })?;
    Ok(LoweringOutput { scene, diagnostics })
}
