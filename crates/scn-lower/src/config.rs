use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use scn_core::ScenarioError;
use serde::{Deserialize, Serialize};

const EGO_TYPES: &[&str] = &[
    "suv",
    "truck",
    "AIV_FullLoad_001",
    "AIV_Empty_001",
    "AIV_FullLoad_002",
    "AIV_Empty_002",
    "AIV_V5_FullLoad_001",
    "AIV_V5_Empty_001",
    "MPV_001",
    "MIFA_01",
    "MiningDumpTruck_001",
    "Truck_with_cargobox",
    "Truck_without_cargobox",
];

const VEHICLE_TYPES: &[&str] = &[
    "SUV",
    "Sedan",
    "Bus",
    "Truck",
    "Trunk",
    "Truck_1",
    "Trunk_1",
    "Sedan_001",
    "Sedan_002",
    "Sedan_003",
    "Sedan_004",
    "Sedan_005",
    "SUV_001",
    "SUV_002",
    "SUV_003",
    "SUV_004",
    "SUV_005",
    "Truck_002",
    "Truck_003",
    "Truck_004",
    "Bus_001",
    "Bus_002",
    "Bus_003",
    "Bus_004",
    "Bus_005",
    "Semi_Trailer_Truck_001",
    "Ambulance",
    "Ambulance_001",
    "AdminVehicle_01",
    "AdminVehicle_02",
    "AIV_FullLoad_001",
    "AIV_Empty_001",
    "AIV_FullLoad_002",
    "AIV_Empty_002",
    "AIV_V5_FullLoad_001",
    "MPV_001",
    "MPV_002",
    "MIFA_01",
    "MiningDumpTruck_001",
    "Truck_with_cargobox",
    "Truck_without_cargobox",
];

const PEDESTRIAN_TYPES: &[&str] = &[
    "human",
    "oldman",
    "child",
    "girl",
    "woman",
    "cat",
    "dog",
    "bike_001",
    "elecBike_001",
    "tricycle_001",
    "tricycle_002",
    "vendingCar_001",
    "moto_001",
    "moto_002",
    "Port_Crane_001",
    "Port_Crane_002",
    "Port_Crane_002_0_0",
    "Port_Crane_002_0_2",
    "Port_Crane_002_0_5",
    "Port_Crane_002_1_0",
    "Port_Crane_002_5_0",
    "Port_Crane_003",
    "Port_Crane_004",
    "Honda_CreaScoopy_AF55",
    "HarleyDavidson_VRod_2003",
    "Aprilia_SR50R_Euro4",
    "Suzuki_GSXR1000_2010",
    "Honda_Monkey125_2017",
    "Giant_EscapeR3_2018",
    "Giant_SCR2_2017",
    "Maruishi_Bicycle_26Inch",
    "Xidesheng_AD350_2020",
    "Woman002",
    "Woman003",
    "Woman004",
    "Woman005",
    "Woman006",
    "Woman007",
    "Man002",
    "Man003",
    "Man004",
    "Man005",
    "Man006",
    "Oldman002",
    "Oldman003",
    "Mobike_Classic2",
];

/// Authoring-name to simulator-type aliases, one table per catalog kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogAliases {
    pub ego: BTreeMap<String, String>,
    pub vehicle: BTreeMap<String, String>,
    pub misc_object: BTreeMap<String, String>,
    pub pedestrian: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDefaults {
    pub ego: String,
    pub vehicle: String,
    pub misc_object: String,
    pub pedestrian: String,
}

impl Default for CatalogDefaults {
    fn default() -> Self {
        Self {
            ego: "suv".to_string(),
            vehicle: "SUV".to_string(),
            misc_object: "Stob_001".to_string(),
            pedestrian: "human".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringConfig {
    /// Opaque search directory handed to the catalog store.
    pub catalog_dir: Option<String>,
    pub aliases: CatalogAliases,
    pub defaults: CatalogDefaults,
    pub ego_types: BTreeSet<String>,
    pub vehicle_types: BTreeSet<String>,
    pub pedestrian_types: BTreeSet<String>,
    pub default_vehicle_max_speed: f64,
    pub default_pedestrian_max_speed: f64,
    /// Tolerance reported for `DistanceCondition` reach targets.
    pub distance_point_radius: f64,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            catalog_dir: None,
            aliases: CatalogAliases::default(),
            defaults: CatalogDefaults::default(),
            ego_types: to_set(EGO_TYPES),
            vehicle_types: to_set(VEHICLE_TYPES),
            pedestrian_types: to_set(PEDESTRIAN_TYPES),
            default_vehicle_max_speed: 12.0,
            default_pedestrian_max_speed: 10.0,
            distance_point_radius: 20.0,
        }
    }
}

impl LoweringConfig {
    pub fn from_json_str(source: &str) -> Result<Self, ScenarioError> {
        serde_json::from_str(source)
            .map_err(|error| ScenarioError::new("CONFIG_INVALID", error.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            ScenarioError::new(
                "CONFIG_INVALID",
                format!("Cannot read config {}: {}", path.display(), error),
            )
        })?;
        Self::from_json_str(&raw)
    }

    pub fn is_ego_type(&self, name: &str) -> bool {
        contains_ignore_case(&self.ego_types, name)
    }

    pub fn is_vehicle_type(&self, name: &str) -> bool {
        contains_ignore_case(&self.vehicle_types, name)
    }

    /// Bicycles, motorbikes, animals and cranes are lowered as pedestrians.
    pub fn is_pedestrian_type(&self, name: &str) -> bool {
        self.pedestrian_types.contains(name)
    }
}

fn to_set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn contains_ignore_case(values: &BTreeSet<String>, name: &str) -> bool {
    values.iter().any(|value| value.eq_ignore_ascii_case(name))
}
