use std::collections::BTreeMap;
use std::path::Path;

use scn_core::{
    ActionEffect, ActionKind, BehaviorKind, ConditionKind, Diagnostics, DocumentDialect,
    EntityKind, EntityProfile, EventMap, LowerError, Route, Scene, SceneEvent, SignalTimeline,
    TriggerCondition, WeatherFrame,
};
use scn_parser::{XmlDocument, XmlElementNode};
use tracing::{debug, info, info_span, warn};

use crate::actions::{classify_action, ActionScope};
use crate::catalog::CatalogStore;
use crate::conditions::{classify_trigger, ConditionScope};
use crate::config::LoweringConfig;
use crate::context::LowerContext;
use crate::entities::{build_entity, EntityRegistry};
use crate::environment::weather_frame;
use crate::placement::{attach_route, routing_plan, teleport, RoutePlan};
use crate::projection::ProjectionOracle;
use crate::signals::{apply_controller_action, build_signals};
use crate::tracks::{TrackBook, TrackTrigger};

pub const ROOT_ELEMENT: &str = "OpenSCENARIO";
const MAP_DIRECTORY: &str = "../hadmap";

/// Walks one document and owns every collection the scene is built from.
pub struct SceneAssembler<'a> {
    ctx: LowerContext<'a>,
    registry: EntityRegistry,
    routes: BTreeMap<u32, Route>,
    signals: BTreeMap<u32, SignalTimeline>,
    tracks: TrackBook,
    events: EventMap,
    ego_events: BTreeMap<u32, EventMap>,
    ego_planner_events: BTreeMap<u32, EventMap>,
    environment: BTreeMap<i64, WeatherFrame>,
    story_description: String,
    map_file: Option<String>,
}

/// Sections every document must carry.
struct Sections<'d> {
    header: &'d XmlElementNode,
    entities: &'d XmlElementNode,
    storyboard: &'d XmlElementNode,
    init: &'d XmlElementNode,
}

fn required_sections(document: &XmlDocument) -> Result<Sections<'_>, LowerError> {
    let root = &document.root;
    if root.name != ROOT_ELEMENT {
        return Err(LowerError::MalformedDocument(format!(
            "root element is <{}>, expected <{}>",
            root.name, ROOT_ELEMENT
        )));
    }
    let section = |name: &str| {
        root.child(name)
            .ok_or_else(|| LowerError::MalformedDocument(format!("missing <{}> section", name)))
    };
    let storyboard = section("Storyboard")?;
    let init = storyboard
        .child("Init")
        .ok_or_else(|| LowerError::MalformedDocument("missing <Init> in <Storyboard>".to_string()))?;
    Ok(Sections {
        header: section("FileHeader")?,
        entities: section("Entities")?,
        storyboard,
        init,
    })
}

impl<'a> SceneAssembler<'a> {
    pub fn new(
        config: &'a LoweringConfig,
        store: &'a dyn CatalogStore,
        projection: &'a dyn ProjectionOracle,
    ) -> Self {
        Self {
            ctx: LowerContext::new(config, store, projection),
            registry: EntityRegistry::new(),
            routes: BTreeMap::new(),
            signals: BTreeMap::new(),
            tracks: TrackBook::new(),
            events: EventMap::new(),
            ego_events: BTreeMap::new(),
            ego_planner_events: BTreeMap::new(),
            environment: BTreeMap::new(),
            story_description: String::new(),
            map_file: None,
        }
    }

    /// Lowers `document`; only a malformed document shape is an error.
    pub fn assemble(mut self, document: &XmlDocument) -> Result<(Scene, Diagnostics), LowerError> {
        let sections = required_sections(document)?;
        let root = &document.root;

        self.read_header(sections.header);
        if let Some(declarations) = root.child("ParameterDeclarations") {
            self.ctx.params.declare_all(declarations);
        }
        if let Some(network) = root.child("RoadNetwork") {
            self.read_road_network(network);
        }
        self.read_entities(sections.entities);
        self.run_init(sections.init);
        self.ctx.params.seal();

        for story in sections.storyboard.children_named("Story") {
            self.walk_story(story);
        }

        let mut scene = self.finish();
        fixup_element_states(&mut scene);
        info!(
            egos = scene.egos.len(),
            vehicles = scene.vehicles.len(),
            events = scene.events.len(),
            diagnostics = self.ctx.diagnostics.len(),
            "scene assembled"
        );
        Ok((scene, std::mem::take(&mut self.ctx.diagnostics)))
    }

    fn read_header(&mut self, header: &XmlElementNode) {
        let author = self.ctx.attr_or(header, "author", "");
        self.ctx.dialect = DocumentDialect::from_author(&author);
        self.story_description = self.ctx.attr_or(header, "description", "");
        info!(author = %author, dialect = ?self.ctx.dialect, "document header read");
    }

    fn read_road_network(&mut self, network: &XmlElementNode) {
        if let Some(logic) = network.child("LogicFile") {
            let path = self.ctx.attr_or(logic, "filepath", "");
            self.map_file = Path::new(&path)
                .file_name()
                .map(|name| format!("{}/{}", MAP_DIRECTORY, name.to_string_lossy()));
        }
        self.signals = build_signals(&mut self.ctx, network, &mut self.routes);
    }

    fn read_entities(&mut self, entities: &XmlElementNode) {
        for object in entities.children_named("ScenarioObject") {
            let Some(entity) = build_entity(&mut self.ctx, object) else {
                continue;
            };
            let name = entity.display_name.clone();
            if !self.registry.insert(entity) {
                self.ctx.warn(
                    "DUPLICATE_ENTITY",
                    format!("entity name \"{}\" is declared more than once", name),
                );
            }
        }
        debug!(entities = self.registry.len(), "entities registered");
    }

    fn run_init(&mut self, init: &XmlElementNode) {
        let Some(actions) = init.child("Actions") else {
            return;
        };
        for global in actions.children_named("GlobalAction") {
            if let Some(controller) = global.descend(&[
                "InfrastructureAction",
                "TrafficSignalAction",
                "TrafficSignalControllerAction",
            ]) {
                apply_controller_action(&mut self.ctx, &mut self.signals, controller);
            }
            if let Some(environment) = global.child("EnvironmentAction") {
                if let Some(frame) = weather_frame(&mut self.ctx, environment) {
                    self.environment.insert(frame.timestamp, frame);
                }
            }
        }

        for private in actions.children_named("Private") {
            let owner = self.ctx.attr_or(private, "entityRef", "");
            if self.registry.find(&owner).is_none() {
                self.ctx.warn(
                    "UNKNOWN_ENTITY",
                    format!("init actions for unknown entity \"{}\"", owner),
                );
                continue;
            }
            let mut routing = Vec::new();
            for action in private.children_named("PrivateAction") {
                if let Some(route) = action.child("RoutingAction") {
                    routing.push(route);
                } else {
                    self.init_action(&owner, action);
                }
            }
            // Routes may start from the placement set above.
            for route in routing {
                if let Some(plan) = routing_plan(&mut self.ctx, route, &self.registry, &owner) {
                    attach_route(&mut self.ctx, &mut self.registry, &mut self.routes, &owner, plan);
                }
            }
        }

        let unrouted = self
            .registry
            .iter()
            .filter(|entity| entity.route_id.is_none())
            .filter_map(|entity| {
                let placement = entity.placement.as_ref()?;
                Some((entity.display_name.clone(), RoutePlan::implicit(placement)))
            })
            .collect::<Vec<_>>();
        for (owner, plan) in unrouted {
            attach_route(&mut self.ctx, &mut self.registry, &mut self.routes, &owner, plan);
        }
    }

    fn init_action(&mut self, owner: &str, action: &XmlElementNode) {
        if let Some(teleport_action) = action.child("TeleportAction") {
            teleport(&mut self.ctx, &mut self.registry, owner, teleport_action);
            return;
        }
        if let Some(target) = action.descend(&[
            "LongitudinalAction",
            "SpeedAction",
            "SpeedActionTarget",
            "AbsoluteTargetSpeed",
        ]) {
            let speed = self.ctx.value(target, "value");
            if let Some(entity) = self.registry.find_mut(owner) {
                entity.start_velocity = speed;
                entity.max_velocity = entity.max_velocity.max(speed);
            }
            return;
        }
        if let Some(activate) = action.child("ActivateControllerAction") {
            let lateral = self.ctx.attr(activate, "lateral").as_deref() == Some("true");
            let longitudinal = self.ctx.attr(activate, "longitudinal").as_deref() == Some("true");
            match self.registry.find_mut(owner).map(|entity| &mut entity.profile) {
                Some(EntityProfile::Ego(profile)) => {
                    profile.lateral_control = lateral;
                    profile.longitudinal_control = longitudinal;
                }
                _ => self.ctx.warn(
                    "UNSUPPORTED_ACTION",
                    format!("controller activation at init only applies to egos, not \"{}\"", owner),
                ),
            }
            return;
        }
        self.ctx.warn(
            "UNSUPPORTED_ACTION",
            format!("{} is not supported at init for \"{}\"", action.describe(), owner),
        );
    }

    fn walk_story(&mut self, story: &XmlElementNode) {
        let story_name = self.ctx.attr_or(story, "name", "");
        let _span = info_span!("story", name = %story_name).entered();
        let overlay = story
            .child("ParameterDeclarations")
            .map(|declarations| {
                declarations
                    .children_named("ParameterDeclaration")
                    .filter_map(|declaration| {
                        let value = declaration.non_empty_attr("value")?;
                        Some((declaration.attr("name")?.to_string(), value.to_string()))
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        for act in story.children_named("Act") {
            for group in act.children_named("ManeuverGroup") {
                let actor = group
                    .child("Actors")
                    .and_then(|actors| actors.children_named("EntityRef").last())
                    .map(|entity_ref| self.ctx.attr_or(entity_ref, "entityRef", ""))
                    .unwrap_or_default();
                for maneuver in self.maneuvers_of(group) {
                    for event in maneuver.children_named("Event") {
                        self.lower_event(&actor, event, &overlay);
                    }
                }
            }
        }
    }

    /// Inline maneuvers followed by catalogued ones.
    fn maneuvers_of(&mut self, group: &XmlElementNode) -> Vec<XmlElementNode> {
        let mut maneuvers = group
            .children_named("Maneuver")
            .cloned()
            .collect::<Vec<_>>();
        for reference in group.children_named("CatalogReference") {
            let entry_name = self.ctx.attr_or(reference, "entryName", "");
            match self.ctx.catalog.store().maneuver(&entry_name) {
                Some(maneuver) => maneuvers.push(maneuver),
                None => self.ctx.diagnostics.record(&LowerError::CatalogMiss {
                    kind: "ManeuverCatalog".to_string(),
                    name: entry_name,
                }),
            }
        }
        maneuvers
    }

    fn lower_event(
        &mut self,
        actor: &str,
        event: &XmlElementNode,
        overlay: &BTreeMap<String, String>,
    ) {
        let name = self.ctx.attr_or(event, "name", "");
        let condition_scope = ConditionScope {
            actor,
            registry: &self.registry,
        };
        let mut conditions = match event.child("StartTrigger") {
            Some(trigger) => match classify_trigger(&mut self.ctx, trigger, condition_scope) {
                Ok(conditions) => conditions,
                Err(failure) => {
                    warn!(event = %name, actor, "event skipped");
                    self.ctx.diagnostics.record(&failure);
                    return;
                }
            },
            None => Vec::new(),
        };

        let is_ego = self.registry.is_ego(actor);
        for (index, condition) in conditions.iter_mut().enumerate() {
            let key = trigger_count_key(is_ego, actor, &name, index);
            let Some(raw) = overlay
                .get(&key)
                .or_else(|| overlay.get(key.trim_start_matches('$')))
            else {
                continue;
            };
            match raw.trim().parse::<u32>() {
                Ok(count) => condition.trigger_count = count,
                Err(_) => self.ctx.warn(
                    "INVALID_TRIGGER_COUNT",
                    format!("trigger count \"{}\" for {} is not a count", raw, key),
                ),
            }
        }

        let behavior = self
            .registry
            .find(actor)
            .map(|entity| entity.behavior_kind)
            .unwrap_or_default();
        let track_trigger = TrackTrigger::from_conditions(&conditions);
        let mut actions = Vec::new();
        for action in event.children_named("Action") {
            let scope = ActionScope {
                owner: actor,
                behavior,
                registry: &self.registry,
            };
            let mut classified = match classify_action(&mut self.ctx, action, scope) {
                Ok(Some(classified)) => classified,
                Ok(None) => continue,
                Err(failure) => {
                    self.ctx.diagnostics.record(&failure);
                    continue;
                }
            };
            if let Some(plan) = classified.route.take() {
                let attached = attach_route(
                    &mut self.ctx,
                    &mut self.registry,
                    &mut self.routes,
                    actor,
                    plan,
                );
                if let ActionKind::Reroute { route_id, .. } = &mut classified.effect.effect {
                    *route_id = attached;
                }
            }
            if let (Some(feed), Some(trigger)) = (&classified.feed, &track_trigger) {
                if let Some(entity) = self.registry.find_mut(actor) {
                    self.tracks.feed(&mut self.ctx.ids, entity, trigger, feed);
                }
            }
            actions.push(classified.effect);
        }

        if actions.is_empty() {
            debug!(event = %name, actor, "event has no scene actions");
            return;
        }
        self.store_event(actor, name, conditions, actions);
    }

    fn store_event(
        &mut self,
        actor: &str,
        name: String,
        conditions: Vec<TriggerCondition>,
        actions: Vec<ActionEffect>,
    ) {
        let mut event = SceneEvent {
            id: 0,
            name,
            owner: actor.to_string(),
            conditions,
            actions,
            is_user_defined: true,
        };

        let ego_id = self
            .registry
            .find(actor)
            .filter(|entity| entity.kind() == EntityKind::Ego)
            .map(|entity| entity.id);
        if let Some(ego_id) = ego_id {
            event.id = self.ctx.ids.next_ego_event(ego_id);
            self.ego_planner_events
                .entry(ego_id)
                .or_default()
                .insert(event.id, event.clone());
            self.ego_events
                .entry(ego_id)
                .or_default()
                .insert(event.id, event);
            return;
        }

        event.id = self.ctx.ids.next_free_event();
        match self.registry.find_mut(actor) {
            Some(entity) => match entity.kind() {
                EntityKind::Vehicle | EntityKind::Pedestrian => {
                    if !entity.event_ids.contains(&event.id) {
                        entity.event_ids.push(event.id);
                    }
                    if entity.kind() == EntityKind::Pedestrian {
                        entity.behavior_kind = BehaviorKind::TrajectoryFollow;
                    }
                }
                _ => {}
            },
            None => self.ctx.warn(
                "UNKNOWN_ENTITY",
                format!("event \"{}\" belongs to unknown entity \"{}\"", event.name, actor),
            ),
        }
        debug!(event = %event.name, id = event.id, actor, "free event stored");
        self.events.insert(event.id, event);
    }

    fn finish(&mut self) -> Scene {
        self.tracks.assign_defaults(self.registry.vehicles.values_mut());
        let tracks = std::mem::take(&mut self.tracks);
        let registry = std::mem::take(&mut self.registry);
        Scene {
            dialect: self.ctx.dialect,
            story_description: std::mem::take(&mut self.story_description),
            map_file: self.map_file.take(),
            parameters: self.ctx.params.declared(),
            egos: registry.egos,
            vehicles: registry.vehicles,
            pedestrians: registry.pedestrians,
            obstacles: registry.obstacles,
            routes: std::mem::take(&mut self.routes),
            signals: std::mem::take(&mut self.signals),
            acceleration_tracks: tracks.acceleration,
            merge_tracks: tracks.merge,
            velocity_tracks: tracks.velocity,
            pedestrian_velocity_tracks: tracks.pedestrian_velocity,
            events: std::mem::take(&mut self.events),
            ego_events: std::mem::take(&mut self.ego_events),
            ego_planner_events: std::mem::take(&mut self.ego_planner_events),
            environment: std::mem::take(&mut self.environment),
        }
    }
}

/// Story parameter that overrides how often a condition may fire.
pub fn trigger_count_key(is_ego: bool, actor: &str, event: &str, index: usize) -> String {
    if is_ego {
        format!("$ego_triggercount${}$Condition_{}", event, index)
    } else {
        format!("${}_triggercount${}$Condition_{}", actor, event, index)
    }
}

/// Numbers every action `eventIndex_actionIndex` and points element-state
/// conditions at those ids instead of authored action names.
///
/// Free events are numbered first; ego events then restart at event index
/// `0`. A name declared twice resolves to its last declaration.
pub fn fixup_element_states(scene: &mut Scene) {
    let mut table = BTreeMap::new();
    number_actions(scene.events.values_mut(), &mut table);
    rewrite_element_states(scene.events.values_mut(), &table);

    let mut ego_table = table.clone();
    number_actions(
        scene.ego_events.values_mut().flat_map(|events| events.values_mut()),
        &mut ego_table,
    );
    number_actions(
        scene
            .ego_planner_events
            .values_mut()
            .flat_map(|events| events.values_mut()),
        &mut BTreeMap::new(),
    );
    rewrite_element_states(
        scene
            .ego_events
            .values_mut()
            .chain(scene.ego_planner_events.values_mut())
            .flat_map(|events| events.values_mut()),
        &ego_table,
    );
}

fn number_actions<'e>(
    events: impl Iterator<Item = &'e mut SceneEvent>,
    table: &mut BTreeMap<String, String>,
) {
    for (event_index, event) in events.enumerate() {
        for (action_index, action) in event.actions.iter_mut().enumerate() {
            action.id = Some(action_index as u32);
            table.insert(
                action.name.clone(),
                format!("{}_{}", event_index, action_index),
            );
        }
    }
}

fn rewrite_element_states<'e>(
    events: impl Iterator<Item = &'e mut SceneEvent>,
    table: &BTreeMap<String, String>,
) {
    for event in events {
        for condition in &mut event.conditions {
            if let ConditionKind::ElementState { element_ref, .. } = &mut condition.trigger {
                if let Some(id) = table.get(element_ref.as_str()) {
                    *element_ref = id.clone();
                }
            }
        }
    }
}
