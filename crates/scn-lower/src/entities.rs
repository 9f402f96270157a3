use std::collections::BTreeMap;

use scn_core::{
    parse_number, BehaviorKind, BoundingBox, EgoProfile, EntityKind, EntityProfile,
    PedestrianProfile, Performance, ScenarioEntity, VehicleProfile,
};
use scn_parser::XmlElementNode;
use tracing::{debug, warn};

use crate::catalog::{CatalogEntry, CatalogKind, Resolution};
use crate::context::LowerContext;

const PEDESTRIAN_END_TIME: f64 = 1000.0;

/// Every entity of the document, owned by the assembler and looked up by
/// authored name.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    pub egos: BTreeMap<u32, ScenarioEntity>,
    pub vehicles: BTreeMap<u32, ScenarioEntity>,
    pub pedestrians: BTreeMap<u32, ScenarioEntity>,
    pub obstacles: BTreeMap<u32, ScenarioEntity>,
    index: BTreeMap<String, (EntityKind, u32)>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the name was already taken; the entity is still
    /// stored but lookups by name keep pointing at the first one.
    pub fn insert(&mut self, entity: ScenarioEntity) -> bool {
        let key = entity.display_name.to_lowercase();
        let kind = entity.kind();
        let fresh = !self.index.contains_key(&key);
        if fresh {
            self.index.insert(key, (kind, entity.id));
        }
        self.map_mut(kind).insert(entity.id, entity);
        fresh
    }

    pub fn map(&self, kind: EntityKind) -> &BTreeMap<u32, ScenarioEntity> {
        match kind {
            EntityKind::Ego => &self.egos,
            EntityKind::Vehicle => &self.vehicles,
            EntityKind::Pedestrian => &self.pedestrians,
            EntityKind::Obstacle => &self.obstacles,
        }
    }

    fn map_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<u32, ScenarioEntity> {
        match kind {
            EntityKind::Ego => &mut self.egos,
            EntityKind::Vehicle => &mut self.vehicles,
            EntityKind::Pedestrian => &mut self.pedestrians,
            EntityKind::Obstacle => &mut self.obstacles,
        }
    }

    pub fn find(&self, name: &str) -> Option<&ScenarioEntity> {
        let (kind, id) = self.index.get(&name.to_lowercase())?;
        self.map(*kind).get(id)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ScenarioEntity> {
        let (kind, id) = *self.index.get(&name.to_lowercase())?;
        self.map_mut(kind).get_mut(&id)
    }

    pub fn reference_tag(&self, name: &str) -> Option<String> {
        self.find(name).map(ScenarioEntity::reference_tag)
    }

    pub fn is_ego(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|entity| entity.kind() == EntityKind::Ego)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioEntity> {
        self.egos
            .values()
            .chain(self.vehicles.values())
            .chain(self.pedestrians.values())
            .chain(self.obstacles.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ScenarioEntity> {
        self.egos
            .values_mut()
            .chain(self.vehicles.values_mut())
            .chain(self.pedestrians.values_mut())
            .chain(self.obstacles.values_mut())
    }

    pub fn len(&self) -> usize {
        self.egos.len() + self.vehicles.len() + self.pedestrians.len() + self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a `ScenarioObject` declares its entity.
enum Declaration<'n> {
    Vehicle(&'n XmlElementNode),
    Pedestrian(&'n XmlElementNode),
    MiscObject(&'n XmlElementNode),
    Catalog {
        kind: CatalogKind,
        entry_name: String,
    },
}

/// Builds one entity from a `ScenarioObject` node.
///
/// Objects without a name or with an unsupported declaration are skipped
/// with a warning.
pub fn build_entity(ctx: &mut LowerContext<'_>, object: &XmlElementNode) -> Option<ScenarioEntity> {
    let Some(name) = ctx.attr(object, "name").filter(|name| !name.is_empty()) else {
        ctx.warn(
            "ENTITY_SKIPPED",
            format!("{} has no name", object.describe()),
        );
        return None;
    };

    let declaration = match declaration_of(ctx, object) {
        Some(declaration) => declaration,
        None => {
            warn!(entity = %name, "unsupported entity declaration");
            ctx.warn(
                "ENTITY_SKIPPED",
                format!("\"{}\" has no supported declaration", name),
            );
            return None;
        }
    };

    let entity = match declaration {
        Declaration::Vehicle(vehicle) if is_ego(ctx, &name, Some(vehicle)) => {
            build_ego(ctx, &name, object, Some(vehicle), None)
        }
        Declaration::Catalog {
            kind: CatalogKind::Vehicle | CatalogKind::Ego,
            entry_name,
        } if is_ego(ctx, &name, None) => build_ego(ctx, &name, object, None, Some(entry_name)),
        Declaration::Vehicle(vehicle) => {
            let type_name = ctx.attr_or(vehicle, "name", "");
            if is_pedestrian_like(ctx, &type_name) {
                build_pedestrian(ctx, &name, &type_name, Some(vehicle), BehaviorKind::UserDefined)
            } else {
                build_vehicle(ctx, &name, &type_name, Some(vehicle))
            }
        }
        Declaration::Pedestrian(pedestrian) => {
            let type_name = ctx
                .attr(pedestrian, "model")
                .filter(|model| !model.is_empty())
                .unwrap_or_else(|| ctx.attr_or(pedestrian, "name", ""));
            build_pedestrian(
                ctx,
                &name,
                &type_name,
                Some(pedestrian),
                BehaviorKind::TrajectoryFollow,
            )
        }
        Declaration::MiscObject(misc) => {
            let type_name = ctx.attr_or(misc, "name", "");
            build_obstacle(ctx, &name, &type_name, Some(misc))
        }
        Declaration::Catalog { kind, entry_name } => match kind {
            CatalogKind::Pedestrian => build_pedestrian(
                ctx,
                &name,
                &entry_name,
                None,
                BehaviorKind::TrajectoryFollow,
            ),
            CatalogKind::MiscObject => build_obstacle(ctx, &name, &entry_name, None),
            CatalogKind::Vehicle | CatalogKind::Ego if is_pedestrian_like(ctx, &entry_name) => {
                build_pedestrian(ctx, &name, &entry_name, None, BehaviorKind::UserDefined)
            }
            CatalogKind::Vehicle | CatalogKind::Ego => {
                build_vehicle(ctx, &name, &entry_name, None)
            }
        },
    };
    debug!(
        entity = %entity.display_name,
        tag = %entity.reference_tag(),
        type_ref = %entity.type_ref,
        "entity built"
    );
    Some(entity)
}

fn declaration_of<'n>(
    ctx: &mut LowerContext<'_>,
    object: &'n XmlElementNode,
) -> Option<Declaration<'n>> {
    if let Some(vehicle) = object.child("Vehicle") {
        return Some(Declaration::Vehicle(vehicle));
    }
    if let Some(pedestrian) = object.child("Pedestrian") {
        return Some(Declaration::Pedestrian(pedestrian));
    }
    if let Some(misc) = object.child("MiscObject") {
        return Some(Declaration::MiscObject(misc));
    }
    let reference = object.child("CatalogReference")?;
    let catalog_name = ctx.attr_or(reference, "catalogName", "");
    let entry_name = ctx.attr_or(reference, "entryName", "");
    let kind = CatalogKind::from_catalog_name(&catalog_name)?;
    Some(Declaration::Catalog { kind, entry_name })
}

fn is_ego(ctx: &mut LowerContext<'_>, name: &str, vehicle: Option<&XmlElementNode>) -> bool {
    if name == "Ego" || name == "ego" {
        return true;
    }
    let Some(vehicle) = vehicle else {
        return false;
    };
    vehicle
        .property("control")
        .map(|value| ctx.resolve(value))
        .is_some_and(|value| value == "external")
}

fn is_pedestrian_like(ctx: &LowerContext<'_>, type_name: &str) -> bool {
    ctx.config.is_pedestrian_type(type_name)
        || ctx
            .config
            .aliases
            .pedestrian
            .get(type_name)
            .is_some_and(|alias| ctx.config.is_pedestrian_type(alias))
}

fn properties(ctx: &mut LowerContext<'_>, node: Option<&XmlElementNode>) -> BTreeMap<String, String> {
    let Some(node) = node else {
        return BTreeMap::new();
    };
    node.properties()
        .into_iter()
        .map(|(key, value)| (key.to_string(), ctx.resolve(value)))
        .collect()
}

fn read_bounding_box(ctx: &mut LowerContext<'_>, node: Option<&XmlElementNode>) -> Option<BoundingBox> {
    let dimensions = node?.descend(&["BoundingBox", "Dimensions"])?;
    Some(BoundingBox {
        length: ctx.value(dimensions, "length"),
        width: ctx.value(dimensions, "width"),
        height: ctx.value(dimensions, "height"),
    })
}

fn read_performance(ctx: &mut LowerContext<'_>, node: Option<&XmlElementNode>) -> Option<Performance> {
    let performance = node?.child("Performance")?;
    Some(Performance {
        max_speed: ctx.value(performance, "maxSpeed"),
        max_acceleration: ctx.value(performance, "maxAcceleration"),
        max_deceleration: ctx.value(performance, "maxDeceleration"),
    })
}

fn behavior(
    ctx: &mut LowerContext<'_>,
    properties: &BTreeMap<String, String>,
    fallback: BehaviorKind,
) -> BehaviorKind {
    let Some(raw) = properties.get("Behavior") else {
        return fallback;
    };
    BehaviorKind::from_authored(raw).unwrap_or_else(|| {
        ctx.warn(
            "UNKNOWN_BEHAVIOR",
            format!("behavior \"{}\" is not supported, using {:?}", raw, fallback),
        );
        fallback
    })
}

fn optional_number(properties: &BTreeMap<String, String>, key: &str) -> Option<f64> {
    properties
        .get(key)
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_number(value))
}

fn entity_shell(
    id: u32,
    name: &str,
    resolution: &Resolution,
    bounding_box: BoundingBox,
    behavior_kind: BehaviorKind,
    profile: EntityProfile,
) -> ScenarioEntity {
    ScenarioEntity {
        id,
        display_name: name.to_string(),
        type_ref: resolution.type_ref.clone(),
        bounding_box,
        behavior_kind,
        placement: None,
        route_id: None,
        start_velocity: 0.0,
        max_velocity: 0.0,
        event_ids: Vec::new(),
        acc_track_id: None,
        merge_track_id: None,
        profile,
    }
}

fn entry_bounding_box(entry: Option<&CatalogEntry>) -> Option<BoundingBox> {
    entry.and_then(|entry| entry.bounding_box)
}

fn entry_performance(entry: Option<&CatalogEntry>) -> Option<Performance> {
    entry.and_then(|entry| entry.performance)
}

fn build_ego(
    ctx: &mut LowerContext<'_>,
    name: &str,
    object: &XmlElementNode,
    vehicle: Option<&XmlElementNode>,
    catalog_entry: Option<String>,
) -> ScenarioEntity {
    let type_name = match (&catalog_entry, vehicle) {
        (Some(entry_name), _) => entry_name.clone(),
        (None, Some(vehicle)) => ctx.attr_or(vehicle, "name", ""),
        (None, None) => String::new(),
    };
    let resolution = ctx
        .catalog
        .resolve(CatalogKind::Ego, &type_name, &mut ctx.diagnostics);
    let entry = resolution.entry.as_ref();
    let properties = properties(ctx, vehicle);

    let category = match vehicle {
        Some(vehicle) => ctx.attr_or(vehicle, "vehicleCategory", "car"),
        None if resolution.type_ref.eq_ignore_ascii_case("truck") => "combination".to_string(),
        None => "car".to_string(),
    };
    let performance = read_performance(ctx, vehicle)
        .or_else(|| entry_performance(entry))
        .unwrap_or_default();
    let bounding_box = read_bounding_box(ctx, vehicle)
        .or_else(|| entry_bounding_box(entry))
        .unwrap_or_else(BoundingBox::vehicle_default);
    let trajectory_enabled = properties
        .get("Behavior")
        .is_some_and(|value| value == "TrajectoryFollow");
    let controller_name = object
        .descend(&["ObjectController", "Controller"])
        .and_then(|controller| ctx.attr(controller, "name"))
        .filter(|controller| !controller.is_empty());

    let id = ctx.ids.next_entity(EntityKind::Ego);
    let profile = EgoProfile {
        group_name: format!("Ego_{:03}", id),
        category,
        performance,
        trajectory_enabled,
        sensor_group: properties.get("SensorGroup").cloned(),
        trajectory_tracking: properties.get("TrajectoryTracking").cloned(),
        controller_name,
        lateral_control: false,
        longitudinal_control: false,
    };
    let behavior_kind = if trajectory_enabled {
        BehaviorKind::TrajectoryFollow
    } else {
        BehaviorKind::UserDefined
    };
    let mut entity = entity_shell(
        id,
        name,
        &resolution,
        bounding_box,
        behavior_kind,
        EntityProfile::Ego(profile),
    );
    entity.max_velocity = if performance.max_speed > 0.0 {
        performance.max_speed
    } else {
        ctx.config.default_vehicle_max_speed
    };
    entity
}

fn build_vehicle(
    ctx: &mut LowerContext<'_>,
    name: &str,
    type_name: &str,
    vehicle: Option<&XmlElementNode>,
) -> ScenarioEntity {
    let resolution = ctx
        .catalog
        .resolve(CatalogKind::Vehicle, type_name, &mut ctx.diagnostics);
    let entry = resolution.entry.as_ref();
    let properties = properties(ctx, vehicle);

    let mut performance = read_performance(ctx, vehicle).unwrap_or_default();
    if let Some(catalogued) = entry_performance(entry) {
        performance = catalogued;
    }
    let bounding_box = read_bounding_box(ctx, vehicle)
        .or_else(|| entry_bounding_box(entry))
        .unwrap_or_else(BoundingBox::vehicle_default);
    let behavior_kind = behavior(ctx, &properties, BehaviorKind::UserDefined);

    let profile = VehicleProfile {
        performance,
        aggress: properties.get("Aggress").cloned(),
        follow: properties.get("Follow").cloned(),
        trajectory_angle: optional_number(&properties, "TrajectoryAngle"),
        trajectory_tracking: properties.get("TrajectoryTracking").cloned(),
        sensor_group: properties.get("SensorGroup").cloned(),
        obu_status: properties.get("ObuStatus").cloned(),
    };
    let id = ctx.ids.next_entity(EntityKind::Vehicle);
    let mut entity = entity_shell(
        id,
        name,
        &resolution,
        bounding_box,
        behavior_kind,
        EntityProfile::Vehicle(profile),
    );
    entity.max_velocity = if performance.max_speed > 0.0 {
        performance.max_speed
    } else {
        ctx.config.default_vehicle_max_speed
    };
    entity
}

fn build_pedestrian(
    ctx: &mut LowerContext<'_>,
    name: &str,
    type_name: &str,
    declaration: Option<&XmlElementNode>,
    default_behavior: BehaviorKind,
) -> ScenarioEntity {
    let resolution = ctx
        .catalog
        .resolve(CatalogKind::Pedestrian, type_name, &mut ctx.diagnostics);
    let entry = resolution.entry.as_ref();
    let properties = properties(ctx, declaration);

    let bounding_box = read_bounding_box(ctx, declaration)
        .or_else(|| entry_bounding_box(entry))
        .unwrap_or_else(BoundingBox::obstacle_default);
    let behavior_kind = behavior(ctx, &properties, default_behavior);
    let max_velocity = optional_number(&properties, "MaxV")
        .filter(|speed| *speed >= 0.0)
        .unwrap_or(ctx.config.default_pedestrian_max_speed);

    let profile = PedestrianProfile {
        start_time: 0.0,
        end_time: PEDESTRIAN_END_TIME,
        angle: optional_number(&properties, "Angle"),
        trajectory_tracking: properties.get("TrajectoryTracking").cloned(),
    };
    let id = ctx.ids.next_entity(EntityKind::Pedestrian);
    let mut entity = entity_shell(
        id,
        name,
        &resolution,
        bounding_box,
        behavior_kind,
        EntityProfile::Pedestrian(profile),
    );
    entity.start_velocity = optional_number(&properties, "StartV").unwrap_or(0.0);
    entity.max_velocity = max_velocity;
    entity
}

fn build_obstacle(
    ctx: &mut LowerContext<'_>,
    name: &str,
    type_name: &str,
    misc: Option<&XmlElementNode>,
) -> ScenarioEntity {
    let resolution = ctx
        .catalog
        .resolve(CatalogKind::MiscObject, type_name, &mut ctx.diagnostics);
    let bounding_box = read_bounding_box(ctx, misc)
        .or_else(|| entry_bounding_box(resolution.entry.as_ref()))
        .unwrap_or_else(BoundingBox::obstacle_default);
    let id = ctx.ids.next_entity(EntityKind::Obstacle);
    entity_shell(
        id,
        name,
        &resolution,
        bounding_box,
        BehaviorKind::UserDefined,
        EntityProfile::Obstacle,
    )
}
