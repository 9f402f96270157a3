use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

pub fn fixtures_root() -> PathBuf {
    workspace_root().join("fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_root().join(name)
}

/// Every `.xosc` fixture, sorted by path.
pub fn scenario_fixtures() -> Vec<PathBuf> {
    let mut paths = WalkDir::new(fixtures_root())
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| is_scenario(path))
        .collect::<Vec<_>>();
    paths.sort();
    paths
}

fn is_scenario(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|extension| extension == "xosc")
}
