use std::path::PathBuf;

use scn_core::{Diagnostics, Scene};
use serde::Serialize;

#[derive(Debug, Clone)]
pub(crate) struct LoadedScenario {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) source: String,
}

/// What `--out` receives per scenario.
#[derive(Debug, Serialize)]
pub(crate) struct SceneFile<'a> {
    pub(crate) source: String,
    pub(crate) scene: &'a Scene,
    pub(crate) diagnostics: &'a Diagnostics,
}
