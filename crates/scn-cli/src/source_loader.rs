use std::fs;
use std::path::{Path, PathBuf};

use scn_core::ScenarioError;
use walkdir::WalkDir;

use crate::{map_cli_source_path, map_cli_source_read, map_cli_source_scan, LoadedScenario};

pub(crate) const SCENARIO_EXTENSION: &str = "xosc";

/// One file, or every scenario below a directory in path order.
pub(crate) fn load_scenarios(input: &str) -> Result<Vec<LoadedScenario>, ScenarioError> {
    let root = Path::new(input).canonicalize().map_err(map_cli_source_path)?;
    let paths = if root.is_dir() {
        scenario_paths_in(&root)?
    } else {
        vec![root]
    };
    if paths.is_empty() {
        return Err(ScenarioError::new(
            "CLI_SOURCE_EMPTY",
            format!("No .{} files found under {}.", SCENARIO_EXTENSION, input),
        ));
    }
    paths.into_iter().map(read_scenario).collect()
}

pub(crate) fn scenario_paths_in(root: &Path) -> Result<Vec<PathBuf>, ScenarioError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(map_cli_source_scan)?;
        let is_scenario = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|extension| extension == SCENARIO_EXTENSION);
        if is_scenario {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_scenario(path: PathBuf) -> Result<LoadedScenario, ScenarioError> {
    let source = fs::read_to_string(&path).map_err(map_cli_source_read)?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("scenario")
        .to_string();
    Ok(LoadedScenario { name, path, source })
}
