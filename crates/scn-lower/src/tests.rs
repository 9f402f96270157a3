use super::*;
use scn_core::{
    ActionKind, BehaviorKind, CommandChannel, CommandKind, ConditionKind, EndCondition,
    LaneChangeDirection, RouteKind, SceneEvent, TriggerKind,
};
use scn_parser::parse_xml_document;

const VEHICLE: &str = r#"<ScenarioObject name="V1"><Vehicle name="Sedan" vehicleCategory="car"/></ScenarioObject>"#;
const EGO: &str = r#"<ScenarioObject name="Ego"><Vehicle name="suv" vehicleCategory="car"/></ScenarioObject>"#;

fn scenario(author: &str, entities: &str, init: &str, stories: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OpenSCENARIO>
  <FileHeader author="{author}" description="unit scenario" revMajor="1" revMinor="0"/>
  <ParameterDeclarations>
    <ParameterDeclaration name="$speed" parameterType="double" value="12"/>
  </ParameterDeclarations>
  <RoadNetwork><LogicFile filepath="maps/straight.xodr"/></RoadNetwork>
  <Entities>{entities}</Entities>
  <Storyboard>
    <Init><Actions>{init}</Actions></Init>
    {stories}
  </Storyboard>
</OpenSCENARIO>"#
    )
}

fn story(actor: &str, events: &str) -> String {
    format!(
        r#"<Story name="story"><Act name="act"><ManeuverGroup name="group" maximumExecutionCount="1">
  <Actors selectTriggeringEntities="false"><EntityRef entityRef="{actor}"/></Actors>
  <Maneuver name="maneuver">{events}</Maneuver>
</ManeuverGroup></Act></Story>"#
    )
}

fn at_time(seconds: &str) -> String {
    format!(
        r#"<StartTrigger><ConditionGroup><Condition name="time" delay="0" conditionEdge="rising">
  <ByValueCondition><SimulationTimeCondition value="{seconds}" rule="greaterThan"/></ByValueCondition>
</Condition></ConditionGroup></StartTrigger>"#
    )
}

fn event(name: &str, actions: &str, trigger: &str) -> String {
    format!(r#"<Event name="{name}" priority="overwrite">{actions}{trigger}</Event>"#)
}

fn speed_action(name: &str, shape: &str, target: &str) -> String {
    format!(
        r#"<Action name="{name}"><PrivateAction><LongitudinalAction><SpeedAction>
  <SpeedActionDynamics dynamicsShape="{shape}" value="2" dynamicsDimension="rate"/>
  <SpeedActionTarget><AbsoluteTargetSpeed value="{target}"/></SpeedActionTarget>
</SpeedAction></LongitudinalAction></PrivateAction></Action>"#
    )
}

fn teleport(owner: &str, road: u32, lane: i32, s: f64) -> String {
    format!(
        r#"<Private entityRef="{owner}"><PrivateAction><TeleportAction><Position>
  <LanePosition roadId="{road}" laneId="{lane}" offset="0" s="{s}"/>
</Position></TeleportAction></PrivateAction></Private>"#
    )
}

fn lower(source: &str) -> LoweringOutput {
    let document = parse_xml_document(source).expect("scenario should parse");
    let config = LoweringConfig::default();
    let projection = PlanarProjection::default();
    lower_document(&document, &config, &EmptyCatalog, &projection).expect("scenario should lower")
}

fn only_event(output: &LoweringOutput) -> &SceneEvent {
    assert_eq!(output.scene.events.len(), 1);
    output.scene.events.values().next().expect("one event")
}

#[test]
fn step_speed_lowers_to_velocity_step() {
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        &teleport("V1", 1, -1, 10.0),
        &story("V1", &event("e0", &speed_action("a0", "step", "10"), &at_time("2"))),
    );
    let output = lower(&source);
    let event = only_event(&output);
    let effect = &event.actions[0];
    assert!(matches!(
        effect.effect,
        ActionKind::VelocityStep { ref value } if value.value() == 10.0
    ));
    assert_eq!(effect.end_condition, EndCondition::None);

    let vehicle = output.scene.vehicles.get(&1).expect("vehicle");
    assert_eq!(vehicle.event_ids, vec![event.id]);
    let track = output
        .scene
        .velocity_tracks
        .get("1")
        .expect("velocity track keyed by vehicle id");
    assert_eq!(track.profile_time(), "2,10");
}

#[test]
fn linear_speed_lowers_to_acceleration_ramp_with_own_track() {
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        &teleport("V1", 1, -1, 10.0),
        &story("V1", &event("e0", &speed_action("a0", "linear", "15"), &at_time("3"))),
    );
    let output = lower(&source);
    let effect = &only_event(&output).actions[0];
    assert!(matches!(
        effect.effect,
        ActionKind::AccelerationRamp { ref rate } if rate.value() == 2.0
    ));
    assert_eq!(effect.end_condition, EndCondition::Velocity { target: 15.0 });

    let vehicle = output.scene.vehicles.get(&1).expect("vehicle");
    assert_eq!(vehicle.acc_track_id.as_deref(), Some("2"));
    assert_eq!(vehicle.merge_track_id.as_deref(), Some("1"));
    let track = output.scene.acceleration_tracks.get("2").expect("own track");
    assert_eq!(track.profile_time(), "3,2,velocity,15");
    assert!(output.scene.acceleration_tracks.contains_key("1"));
    assert!(output.scene.merge_tracks.contains_key("1"));
}

#[test]
fn lane_change_direction_follows_document_dialect() {
    let action = r#"<Action name="lc"><PrivateAction><LateralAction><LaneChangeAction>
  <LaneChangeActionDynamics dynamicsShape="sinusoidal" value="4" dynamicsDimension="time"/>
  <LaneChangeTarget><RelativeTargetLane entityRef="V1" value="1"/></LaneChangeTarget>
</LaneChangeAction></LateralAction></PrivateAction></Action>"#;
    let lower_with = |author: &str| {
        let source = scenario(
            author,
            VEHICLE,
            &teleport("V1", 1, -1, 10.0),
            &story("V1", &event("e0", action, &at_time("1"))),
        );
        let output = lower(&source);
        only_event(&output).actions[0].effect.clone()
    };

    let current = lower_with("TAD Sim V2.0");
    assert!(matches!(
        current,
        ActionKind::LaneChange { direction: LaneChangeDirection::Left, ref offset, .. }
            if offset.raw() == "0"
    ));
    let legacy = lower_with("TAD Sim");
    assert!(matches!(
        legacy,
        ActionKind::LaneChange { direction: LaneChangeDirection::Right, ref offset, .. }
            if offset.raw() == "0"
    ));
}

#[test]
fn custom_command_text_is_parsed_into_kind_value_and_offset() {
    let action = r#"<Action name="cmd"><UserDefinedAction><CustomCommandAction type="Command">LaneChange:value=2,offset=1.5</CustomCommandAction></UserDefinedAction></Action>"#;
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        "",
        &story("V1", &event("e0", action, &at_time("1"))),
    );
    let output = lower(&source);
    match &only_event(&output).actions[0].effect {
        ActionKind::Command {
            channel,
            command,
            value,
            offset,
        } => {
            assert_eq!(*channel, CommandChannel::Command);
            assert_eq!(*command, CommandKind::LaneChange);
            assert_eq!(command.as_str(), "lane_change");
            assert_eq!(value, "2");
            assert_eq!(offset, "1.5");
        }
        other => panic!("expected a command, got {:?}", other),
    }
}

#[test]
fn element_state_references_are_rewritten_to_action_ids() {
    let element_state = |action: &str| {
        format!(
            r#"<StartTrigger><ConditionGroup><Condition name="after" delay="0" conditionEdge="rising">
  <ByValueCondition><StoryboardElementStateCondition storyboardElementType="action" storyboardElementRef="{action}" state="endTransition"/></ByValueCondition>
</Condition></ConditionGroup></StartTrigger>"#
        )
    };
    let events = [
        event(
            "first",
            &format!(
                "{}{}",
                speed_action("a0", "step", "5"),
                speed_action("a1", "step", "8")
            ),
            &at_time("1"),
        ),
        event("second", &speed_action("b0", "step", "9"), &at_time("4")),
        event("third", &speed_action("c0", "step", "3"), &element_state("a1")),
        event("fourth", &speed_action("d0", "step", "2"), &element_state("b0")),
    ]
    .concat();
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        &teleport("V1", 1, -1, 10.0),
        &story("V1", &events),
    );
    let output = lower(&source);
    let events = &output.scene.events;
    assert_eq!(events.len(), 4);

    let element_ref = |event: &SceneEvent| match &event.conditions[0].trigger {
        ConditionKind::ElementState { element_ref, .. } => element_ref.clone(),
        other => panic!("expected element state, got {:?}", other),
    };
    assert_eq!(element_ref(&events[&2]), "0_1");
    assert_eq!(element_ref(&events[&3]), "1_0");
    assert_eq!(events[&0].actions[1].id, Some(1));
    assert_eq!(events[&2].actions[0].id, Some(0));
}

#[test]
fn element_state_with_unknown_action_keeps_authored_name() {
    let trigger = r#"<StartTrigger><ConditionGroup><Condition name="after" delay="0" conditionEdge="rising">
  <ByValueCondition><StoryboardElementStateCondition storyboardElementType="action" storyboardElementRef="missing" state="endTransition"/></ByValueCondition>
</Condition></ConditionGroup></StartTrigger>"#;
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        "",
        &story("V1", &event("e0", &speed_action("a0", "step", "5"), trigger)),
    );
    let output = lower(&source);
    assert!(matches!(
        &only_event(&output).conditions[0].trigger,
        ConditionKind::ElementState { element_ref, .. } if element_ref == "missing"
    ));
}

#[test]
fn unsupported_trigger_skips_only_its_event() {
    let broken = r#"<StartTrigger><ConditionGroup><Condition name="odd" delay="0" conditionEdge="rising">
  <ByValueCondition><UserDefinedValueCondition name="x" value="1" rule="equalTo"/></ByValueCondition>
</Condition></ConditionGroup></StartTrigger>"#;
    let events = [
        event("kept", &speed_action("a0", "step", "5"), &at_time("1")),
        event("skipped", &speed_action("a1", "step", "6"), broken),
        event("also_kept", &speed_action("a2", "step", "7"), &at_time("5")),
    ]
    .concat();
    let source = scenario("TAD Sim V2.0", VEHICLE, "", &story("V1", &events));
    let output = lower(&source);
    let names = output
        .scene
        .events
        .values()
        .map(|event| event.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["kept", "also_kept"]);
    assert!(output.diagnostics.has_code("UNSUPPORTED_TRIGGER"));
}

#[test]
fn ego_events_are_numbered_per_ego_and_mirrored() {
    let entities = format!("{}{}", EGO, VEHICLE);
    let stories = format!(
        "{}{}",
        story(
            "Ego",
            &[
                event("ego_first", &speed_action("ea", "step", "5"), &at_time("1")),
                event("ego_second", &speed_action("eb", "step", "6"), &at_time("2")),
            ]
            .concat()
        ),
        story("V1", &event("free", &speed_action("va", "step", "7"), &at_time("3")))
    );
    let source = scenario("TAD Sim V2.0", &entities, "", &stories);
    let output = lower(&source);
    let scene = &output.scene;

    let ego_events = scene.ego_events.get(&1).expect("ego events");
    assert_eq!(ego_events.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(scene.ego_planner_events.get(&1), Some(ego_events));
    assert_eq!(scene.events.len(), 1);

    // No event lives in both the free map and an ego map.
    for ego_event in scene.all_ego_events() {
        assert!(scene
            .events
            .values()
            .all(|free| free.name != ego_event.name));
    }
    assert!(scene.egos.get(&1).expect("ego").event_ids.is_empty());
}

#[test]
fn trigger_count_is_overridden_by_story_parameter() {
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        "",
        &story("V1", &event("e0", &speed_action("a0", "step", "5"), &at_time("1"))).replace(
            r#"<Story name="story">"#,
            r#"<Story name="story"><ParameterDeclarations><ParameterDeclaration name="$V1_triggercount$e0$Condition_0" parameterType="int" value="3"/></ParameterDeclarations>"#,
        ),
    );
    let output = lower(&source);
    assert_eq!(only_event(&output).conditions[0].trigger_count, 3);
    assert_eq!(
        trigger_count_key(true, "Ego", "brake", 1),
        "$ego_triggercount$brake$Condition_1"
    );
}

#[test]
fn init_actions_place_entities_and_give_implicit_routes() {
    let init = format!(
        "{}{}",
        teleport("V1", 1, -1, 25.0),
        r#"<Private entityRef="V1"><PrivateAction><LongitudinalAction><SpeedAction>
  <SpeedActionDynamics dynamicsShape="step" value="0" dynamicsDimension="time"/>
  <SpeedActionTarget><AbsoluteTargetSpeed value="$speed"/></SpeedActionTarget>
</SpeedAction></LongitudinalAction></PrivateAction></Private>"#
    );
    let source = scenario("TAD Sim V2.0", VEHICLE, &init, "");
    let output = lower(&source);
    let scene = &output.scene;
    let vehicle = scene.vehicles.get(&1).expect("vehicle");
    let placement = vehicle.placement.as_ref().expect("placed");
    assert_eq!(placement.road_id, Some(1));
    assert_eq!(placement.lane_id, -1);
    assert_eq!(vehicle.start_velocity, 12.0);
    assert!(vehicle.max_velocity >= 12.0);

    let route_id = vehicle.route_id.expect("implicit route");
    assert_eq!(scene.routes[&route_id].kind, RouteKind::Implicit);
    assert_eq!(scene.routes[&route_id].owner, "V1");
    assert_eq!(scene.map_file.as_deref(), Some("../hadmap/straight.xodr"));
    assert_eq!(scene.story_description, "unit scenario");
    assert!(scene.parameters.iter().any(|parameter| parameter.name == "speed"));
}

#[test]
fn autonomous_traffic_keeps_events_without_tracks() {
    let entities = r#"<ScenarioObject name="V1"><Vehicle name="Sedan" vehicleCategory="car">
  <Properties><Property name="Behavior" value="TrafficVehicle"/></Properties>
</Vehicle></ScenarioObject>"#;
    let source = scenario(
        "TAD Sim V2.0",
        entities,
        "",
        &story("V1", &event("e0", &speed_action("a0", "linear", "15"), &at_time("3"))),
    );
    let output = lower(&source);
    let vehicle = output.scene.vehicles.get(&1).expect("vehicle");
    assert_eq!(vehicle.behavior_kind, BehaviorKind::TrafficAutonomous);
    assert_eq!(output.scene.events.len(), 1);
    assert_eq!(vehicle.acc_track_id.as_deref(), Some("1"));
    assert_eq!(output.scene.acceleration_tracks.len(), 1);
}

#[test]
fn tracks_stay_sorted_across_out_of_order_events() {
    let events = ["7", "2", "5", "2"]
        .iter()
        .enumerate()
        .map(|(index, time)| {
            event(
                &format!("e{}", index),
                &speed_action(&format!("a{}", index), "linear", &format!("{}", 10 + index)),
                &at_time(time),
            )
        })
        .collect::<String>();
    let source = scenario("TAD Sim V2.0", VEHICLE, "", &story("V1", &events));
    let output = lower(&source);
    let track = output.scene.acceleration_tracks.get("2").expect("own track");
    assert!(track.is_sorted());
    assert_eq!(track.nodes.len(), 3);
    assert!(track
        .nodes
        .iter()
        .all(|node| node.trigger_kind == TriggerKind::TimeAbsolute));
}

#[test]
fn entity_ids_increase_in_declaration_order() {
    let entities = (0..4)
        .map(|index| {
            format!(
                r#"<ScenarioObject name="V{index}"><Vehicle name="Sedan" vehicleCategory="car"/></ScenarioObject>"#
            )
        })
        .collect::<String>();
    let source = scenario("TAD Sim V2.0", &entities, "", "");
    let output = lower(&source);
    let ids = output
        .scene
        .vehicles
        .values()
        .map(|vehicle| (vehicle.id, vehicle.display_name.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        ids,
        vec![
            (1, "V0".to_string()),
            (2, "V1".to_string()),
            (3, "V2".to_string()),
            (4, "V3".to_string())
        ]
    );
}

#[test]
fn missing_required_section_fails_the_document() {
    let document = parse_xml_document(
        r#"<OpenSCENARIO><FileHeader author="x"/><Entities/></OpenSCENARIO>"#,
    )
    .expect("xml should parse");
    let config = LoweringConfig::default();
    let projection = PlanarProjection::default();
    let error = lower_document(&document, &config, &EmptyCatalog, &projection)
        .expect_err("storyboard is required");
    assert_eq!(error.code, "MALFORMED_DOCUMENT");

    let wrong_root = parse_xml_document("<Scenario/>").expect("xml should parse");
    let error = lower_document(&wrong_root, &config, &EmptyCatalog, &projection)
        .expect_err("root must be OpenSCENARIO");
    assert!(error.message.contains("OpenSCENARIO"));
}

#[test]
fn catalog_maneuvers_are_inlined_and_misses_reported() {
    let mut catalog = InMemoryCatalog::new();
    let maneuver = parse_xml_document(&format!(
        r#"<Maneuver name="brake">{}</Maneuver>"#,
        event("catalogued", &speed_action("a0", "step", "0"), &at_time("6"))
    ))
    .expect("xml should parse")
    .root;
    catalog.insert_maneuver("brake", maneuver);

    let groups = r#"<Story name="story"><Act name="act"><ManeuverGroup name="group" maximumExecutionCount="1">
  <Actors selectTriggeringEntities="false"><EntityRef entityRef="V1"/></Actors>
  <CatalogReference catalogName="ManeuverCatalog" entryName="brake"/>
  <CatalogReference catalogName="ManeuverCatalog" entryName="swerve"/>
</ManeuverGroup></Act></Story>"#;
    let source = scenario("TAD Sim V2.0", VEHICLE, "", groups);
    let document = parse_xml_document(&source).expect("scenario should parse");
    let config = LoweringConfig::default();
    let projection = PlanarProjection::default();
    let output = lower_document(&document, &config, &catalog, &projection)
        .expect("scenario should lower");
    assert_eq!(only_event(&output).name, "catalogued");
    assert!(output.diagnostics.has_code("CATALOG_MISS"));
}

#[test]
fn parameter_resolution_is_idempotent() {
    let mut params = ParameterTable::new();
    params.declare("gap", scn_core::ParameterKind::Double, "2.5");
    let mut diagnostics = scn_core::Diagnostics::new();
    let first = params.resolve_or_keep("$gap", &mut diagnostics);
    let second = params.resolve_or_keep("$gap", &mut diagnostics);
    assert_eq!(first, "2.5");
    assert_eq!(first, second);
    assert!(diagnostics.is_empty());
}

#[test]
fn unknown_command_drops_only_that_action() {
    let actions = format!(
        "{}{}",
        r#"<Action name="a0"><UserDefinedAction><CustomCommandAction type="Command">Teleport:value=1</CustomCommandAction></UserDefinedAction></Action>"#,
        speed_action("a1", "step", "8")
    );
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        "",
        &story("V1", &event("e0", &actions, &at_time("1"))),
    );
    let output = lower(&source);
    let names = only_event(&output)
        .actions
        .iter()
        .map(|action| action.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a1"]);
    assert!(output.diagnostics.has_code("UNKNOWN_COMMAND"));
}

#[test]
fn reroute_of_placed_entity_keeps_its_implicit_route() {
    let reroute = r#"<Action name="r0"><PrivateAction><RoutingAction><AssignRouteAction><Route name="detour" closed="false">
  <Waypoint routeStrategy="shortest"><Position><LanePosition roadId="1" laneId="-1" s="30" offset="0"/></Position></Waypoint>
  <Waypoint routeStrategy="shortest"><Position><LanePosition roadId="1" laneId="-1" s="90" offset="0"/></Position></Waypoint>
</Route></AssignRouteAction></RoutingAction></PrivateAction></Action>"#;
    let source = scenario(
        "TAD Sim V2.0",
        VEHICLE,
        &teleport("V1", 1, -1, 10.0),
        &story("V1", &event("e0", reroute, &at_time("2"))),
    );
    let output = lower(&source);
    let scene = &output.scene;
    assert_eq!(scene.routes.len(), 1);
    let vehicle = scene.vehicles.get(&1).expect("vehicle");
    let route_id = vehicle.route_id.expect("implicit route");
    assert_eq!(scene.routes[&route_id].kind, RouteKind::Implicit);
    assert!(matches!(
        only_event(&output).actions[0].effect,
        ActionKind::Reroute { route_id: None, .. }
    ));
    assert!(output.diagnostics.has_code("ROUTE_IGNORED"));
}
