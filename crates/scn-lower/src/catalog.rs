use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use scn_core::{BoundingBox, Diagnostics, LowerError, Performance, ScenarioError};
use scn_parser::{parse_xml_document, XmlElementNode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LoweringConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Vehicle,
    Pedestrian,
    MiscObject,
    Ego,
}

impl CatalogKind {
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        match name {
            "VehicleCatalog" => Some(Self::Vehicle),
            "PedestrianCatalog" => Some(Self::Pedestrian),
            "MiscObjectCatalog" => Some(Self::MiscObject),
            "EgoCatalog" => Some(Self::Ego),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vehicle => "Vehicle",
            Self::Pedestrian => "Pedestrian",
            Self::MiscObject => "MiscObject",
            Self::Ego => "Ego",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub resolved_type: String,
    #[serde(default)]
    pub performance: Option<Performance>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Named templates the lowering pass may consult.
///
/// Only `lookup` is required; stores without catalogued document fragments
/// keep the default `None` answers.
pub trait CatalogStore {
    fn lookup(&self, kind: CatalogKind, name: &str, search_dir: Option<&str>) -> Option<CatalogEntry>;

    fn maneuver(&self, _name: &str) -> Option<XmlElementNode> {
        None
    }

    fn route(&self, _name: &str) -> Option<XmlElementNode> {
        None
    }

    fn trajectory(&self, _name: &str) -> Option<XmlElementNode> {
        None
    }

    fn environment(&self, _name: &str) -> Option<XmlElementNode> {
        None
    }
}

/// Store that never finds anything; every entity falls back to defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCatalog;

impl CatalogStore for EmptyCatalog {
    fn lookup(&self, _kind: CatalogKind, _name: &str, _search_dir: Option<&str>) -> Option<CatalogEntry> {
        None
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    vehicle: BTreeMap<String, CatalogEntry>,
    pedestrian: BTreeMap<String, CatalogEntry>,
    misc_object: BTreeMap<String, CatalogEntry>,
    ego: BTreeMap<String, CatalogEntry>,
    maneuvers: BTreeMap<String, String>,
    routes: BTreeMap<String, String>,
    trajectories: BTreeMap<String, String>,
    environments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: BTreeMap<CatalogKind, BTreeMap<String, CatalogEntry>>,
    maneuvers: BTreeMap<String, XmlElementNode>,
    routes: BTreeMap<String, XmlElementNode>,
    trajectories: BTreeMap<String, XmlElementNode>,
    environments: BTreeMap<String, XmlElementNode>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: CatalogKind, name: impl Into<String>, entry: CatalogEntry) {
        self.entries.entry(kind).or_default().insert(name.into(), entry);
    }

    pub fn insert_maneuver(&mut self, name: impl Into<String>, node: XmlElementNode) {
        self.maneuvers.insert(name.into(), node);
    }

    pub fn insert_route(&mut self, name: impl Into<String>, node: XmlElementNode) {
        self.routes.insert(name.into(), node);
    }

    pub fn insert_trajectory(&mut self, name: impl Into<String>, node: XmlElementNode) {
        self.trajectories.insert(name.into(), node);
    }

    pub fn insert_environment(&mut self, name: impl Into<String>, node: XmlElementNode) {
        self.environments.insert(name.into(), node);
    }

    /// Entries as JSON objects per kind; fragments as XML text per name.
    pub fn from_json_str(source: &str) -> Result<Self, ScenarioError> {
        let file: CatalogFile = serde_json::from_str(source)
            .map_err(|error| ScenarioError::new("CATALOG_INVALID", error.to_string()))?;
        let mut catalog = Self::new();
        for (kind, entries) in [
            (CatalogKind::Vehicle, file.vehicle),
            (CatalogKind::Pedestrian, file.pedestrian),
            (CatalogKind::MiscObject, file.misc_object),
            (CatalogKind::Ego, file.ego),
        ] {
            for (name, entry) in entries {
                catalog.insert(kind, name, entry);
            }
        }
        catalog.maneuvers = parse_fragments(file.maneuvers)?;
        catalog.routes = parse_fragments(file.routes)?;
        catalog.trajectories = parse_fragments(file.trajectories)?;
        catalog.environments = parse_fragments(file.environments)?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            ScenarioError::new(
                "CATALOG_INVALID",
                format!("Cannot read catalog {}: {}", path.display(), error),
            )
        })?;
        Self::from_json_str(&raw)
    }
}

fn parse_fragments(
    sources: BTreeMap<String, String>,
) -> Result<BTreeMap<String, XmlElementNode>, ScenarioError> {
    sources
        .into_iter()
        .map(|(name, xml)| Ok((name, parse_xml_document(&xml)?.root)))
        .collect()
}

impl CatalogStore for InMemoryCatalog {
    fn lookup(&self, kind: CatalogKind, name: &str, _search_dir: Option<&str>) -> Option<CatalogEntry> {
        self.entries.get(&kind)?.get(name).cloned()
    }

    fn maneuver(&self, name: &str) -> Option<XmlElementNode> {
        self.maneuvers.get(name).cloned()
    }

    fn route(&self, name: &str) -> Option<XmlElementNode> {
        self.routes.get(name).cloned()
    }

    fn trajectory(&self, name: &str) -> Option<XmlElementNode> {
        self.trajectories.get(name).cloned()
    }

    fn environment(&self, name: &str) -> Option<XmlElementNode> {
        self.environments.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub type_ref: String,
    pub entry: Option<CatalogEntry>,
}

/// Maps authored entity names onto simulator types.
pub struct CatalogResolver<'a> {
    store: &'a dyn CatalogStore,
    config: &'a LoweringConfig,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(store: &'a dyn CatalogStore, config: &'a LoweringConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &'a dyn CatalogStore {
        self.store
    }

    /// Store hit first, then built-in type names, then alias or default.
    pub fn resolve(&self, kind: CatalogKind, name: &str, diagnostics: &mut Diagnostics) -> Resolution {
        let search_dir = self.config.catalog_dir.as_deref();
        if let Some(entry) = self.store.lookup(kind, name, search_dir) {
            debug!(kind = kind.as_str(), name, resolved = %entry.resolved_type, "catalog hit");
            return Resolution {
                type_ref: entry.resolved_type.clone(),
                entry: Some(entry),
            };
        }
        if self.is_known_type(kind, name) {
            return Resolution {
                type_ref: name.to_string(),
                entry: None,
            };
        }

        diagnostics.record(&LowerError::CatalogMiss {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
        });
        let fallback = self.match_name(kind, name);
        let entry = self.store.lookup(kind, &fallback, search_dir);
        Resolution {
            type_ref: fallback,
            entry,
        }
    }

    /// Alias table lookup, else the per-kind default.
    pub fn match_name(&self, kind: CatalogKind, name: &str) -> String {
        let (aliases, default) = match kind {
            CatalogKind::Ego => (&self.config.aliases.ego, &self.config.defaults.ego),
            CatalogKind::Vehicle => (&self.config.aliases.vehicle, &self.config.defaults.vehicle),
            CatalogKind::MiscObject => (
                &self.config.aliases.misc_object,
                &self.config.defaults.misc_object,
            ),
            CatalogKind::Pedestrian => (
                &self.config.aliases.pedestrian,
                &self.config.defaults.pedestrian,
            ),
        };
        aliases.get(name).unwrap_or(default).clone()
    }

    pub fn is_known_type(&self, kind: CatalogKind, name: &str) -> bool {
        match kind {
            CatalogKind::Ego => self.config.is_ego_type(name),
            CatalogKind::Vehicle => self.config.is_vehicle_type(name),
            CatalogKind::Pedestrian => self.config.is_pedestrian_type(name),
            CatalogKind::MiscObject => false,
        }
    }

    pub fn is_pedestrian_type(&self, name: &str) -> bool {
        self.config.is_pedestrian_type(name)
    }
}
