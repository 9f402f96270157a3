use scn_core::{
    BoundaryEdge, CompareRule, ConditionKind, DistanceMode, GeoPoint, LowerError, PositionTarget,
    SpeedType, TriggerCondition,
};
use scn_parser::XmlElementNode;
use tracing::{debug, warn};

use crate::context::LowerContext;
use crate::entities::EntityRegistry;
use crate::placement::resolve_position;

pub const SPEED_UNIT: &str = "m_s";

/// What a condition is classified against.
#[derive(Clone, Copy)]
pub struct ConditionScope<'s> {
    /// Authored name of the entity owning the event.
    pub actor: &'s str,
    pub registry: &'s EntityRegistry,
}

/// The populated branch of a `Condition` node.
enum TriggerBranch<'n> {
    SimulationTime(&'n XmlElementNode),
    LaneAttach(&'n XmlElementNode),
    ElementState(&'n XmlElementNode),
    TimeToCollision(&'n XmlElementNode),
    RelativeDistance(&'n XmlElementNode),
    DistanceToPoint(&'n XmlElementNode),
    ReachPosition(&'n XmlElementNode),
    Speed(&'n XmlElementNode),
    RelativeSpeed(&'n XmlElementNode),
    TimeHeadway(&'n XmlElementNode),
}

fn branch_of(condition: &XmlElementNode) -> Option<TriggerBranch<'_>> {
    let by_value = condition.child("ByValueCondition");
    let by_entity = condition.descend(&["ByEntityCondition", "EntityCondition"]);
    let value = |name: &str| by_value.and_then(|node| node.child(name));
    let entity = |name: &str| by_entity.and_then(|node| node.child(name));

    value("SimulationTimeCondition")
        .map(TriggerBranch::SimulationTime)
        .or_else(|| value("ParameterCondition").map(TriggerBranch::LaneAttach))
        .or_else(|| value("StoryboardElementStateCondition").map(TriggerBranch::ElementState))
        .or_else(|| entity("TimeToCollisionCondition").map(TriggerBranch::TimeToCollision))
        .or_else(|| entity("RelativeDistanceCondition").map(TriggerBranch::RelativeDistance))
        .or_else(|| entity("DistanceCondition").map(TriggerBranch::DistanceToPoint))
        .or_else(|| entity("ReachPositionCondition").map(TriggerBranch::ReachPosition))
        .or_else(|| entity("SpeedCondition").map(TriggerBranch::Speed))
        .or_else(|| entity("RelativeSpeedCondition").map(TriggerBranch::RelativeSpeed))
        .or_else(|| entity("TimeHeadwayCondition").map(TriggerBranch::TimeHeadway))
}

/// Flattens every `ConditionGroup` of a trigger into one list.
///
/// Any condition without a supported branch fails the whole trigger.
pub fn classify_trigger(
    ctx: &mut LowerContext<'_>,
    trigger: &XmlElementNode,
    scope: ConditionScope<'_>,
) -> Result<Vec<TriggerCondition>, LowerError> {
    trigger
        .children_named("ConditionGroup")
        .flat_map(|group| group.children_named("Condition"))
        .map(|condition| classify_condition(ctx, condition, scope))
        .collect()
}

pub fn classify_condition(
    ctx: &mut LowerContext<'_>,
    condition: &XmlElementNode,
    scope: ConditionScope<'_>,
) -> Result<TriggerCondition, LowerError> {
    let name = ctx.attr_or(condition, "name", "");
    let Some(branch) = branch_of(condition) else {
        warn!(condition = %name, node = %condition.describe(), "unsupported trigger");
        return Err(LowerError::UnsupportedTrigger(name));
    };
    let source = condition
        .descend(&["ByEntityCondition", "TriggeringEntities", "EntityRef"])
        .map(|entity_ref| ctx.attr_or(entity_ref, "entityRef", ""));

    let trigger = match branch {
        TriggerBranch::SimulationTime(node) => ConditionKind::SimulationTime {
            rule: compare_rule(ctx, node),
            value: ctx.number(node, "value"),
        },
        TriggerBranch::LaneAttach(node) => {
            let encoded = ctx.attr_or(node, "value", "");
            let parts = encoded.split(';').collect::<Vec<_>>();
            let [road, section, lane] = parts.as_slice() else {
                return Err(LowerError::UnsupportedTrigger(name));
            };
            ConditionKind::LaneAttach {
                parameter_ref: ctx.attr_or(node, "parameterRef", ""),
                rule: compare_rule(ctx, node),
                road: road.to_string(),
                section: section.to_string(),
                lane: lane.to_string(),
            }
        }
        TriggerBranch::ElementState(node) => ConditionKind::ElementState {
            element_type: ctx.attr_or(node, "storyboardElementType", ""),
            element_ref: ctx.attr_or(node, "storyboardElementRef", ""),
            state: ctx.attr_or(node, "state", ""),
        },
        TriggerBranch::TimeToCollision(node) => {
            let target = node
                .descend(&["TimeToCollisionConditionTarget", "EntityRef"])
                .map(|entity_ref| ctx.attr_or(entity_ref, "entityRef", ""))
                .ok_or_else(|| LowerError::UnsupportedTrigger(name.clone()))?;
            let distance_mode = match ctx.attr(node, "alongRoute").as_deref() {
                Some("false") => DistanceMode::Euclidean,
                _ => DistanceMode::LaneProjection,
            };
            ConditionKind::TimeToCollision {
                source: entity_tag(ctx, scope, source.as_deref()),
                target: entity_tag(ctx, scope, Some(&target)),
                rule: compare_rule(ctx, node),
                value: ctx.number(node, "value"),
                distance_mode,
            }
        }
        TriggerBranch::RelativeDistance(node) => {
            let target = ctx.attr_or(node, "entityRef", "");
            let distance_mode = match ctx.attr(node, "relativeDistanceType").as_deref() {
                Some("cartesianDistance") => DistanceMode::Euclidean,
                _ => DistanceMode::LaneProjection,
            };
            ConditionKind::RelativeDistance {
                source: entity_tag(ctx, scope, source.as_deref()),
                target: entity_tag(ctx, scope, Some(&target)),
                rule: compare_rule(ctx, node),
                value: ctx.number(node, "value"),
                distance_mode,
            }
        }
        TriggerBranch::DistanceToPoint(node) => {
            let distance = ctx.number(node, "value");
            let position = node
                .child("Position")
                .and_then(|position| resolve_position(ctx, position, scope.registry))
                .ok_or_else(|| LowerError::UnsupportedTrigger(name.clone()))?;
            let lane_id = position.lane.map(|lane| lane.lane_id).unwrap_or_default();
            let point = match ctx
                .projection
                .project_forward(position.lon, position.lat, lane_id, distance.value())
            {
                Some(point) => GeoPoint {
                    alt: position.alt,
                    ..point
                },
                None => {
                    ctx.warn(
                        "POSITION_UNRESOLVED",
                        format!("cannot project condition \"{}\" along its lane", name),
                    );
                    GeoPoint {
                        lon: position.lon,
                        lat: position.lat,
                        alt: position.alt,
                    }
                }
            };
            ConditionKind::DistanceToPoint {
                source: entity_tag(ctx, scope, source.as_deref()),
                point,
                distance,
                radius: ctx.config.distance_point_radius,
            }
        }
        TriggerBranch::ReachPosition(node) => {
            let tolerance = ctx.value(node, "tolerance");
            let position = reach_target(ctx, node, tolerance)
                .ok_or_else(|| LowerError::UnsupportedTrigger(name.clone()))?;
            ConditionKind::ReachPosition {
                source: entity_tag(ctx, scope, source.as_deref()),
                position,
            }
        }
        TriggerBranch::Speed(node) | TriggerBranch::RelativeSpeed(node) => {
            let speed_type = if node.name == "SpeedCondition" {
                SpeedType::Absolute
            } else {
                SpeedType::Relative
            };
            ConditionKind::Speed {
                source: lower_first(scope.actor),
                target: source.clone(),
                speed_type,
                rule: compare_rule(ctx, node),
                value: ctx.number(node, "value"),
                unit: SPEED_UNIT.to_string(),
            }
        }
        TriggerBranch::TimeHeadway(node) => {
            let target = ctx.attr_or(node, "entityRef", "");
            ConditionKind::TimeHeadway {
                source: entity_tag(ctx, scope, source.as_deref()),
                target: entity_tag(ctx, scope, Some(&target)),
                rule: compare_rule(ctx, node),
                value: ctx.number(node, "value"),
            }
        }
    };

    debug!(condition = %name, kind = trigger.type_name(), "condition classified");
    Ok(TriggerCondition {
        delay: ctx.value(condition, "delay"),
        boundary_edge: BoundaryEdge::from_authored(ctx.attr(condition, "conditionEdge").as_deref()),
        trigger_count: 1,
        trigger,
        name,
    })
}

fn reach_target(
    ctx: &mut LowerContext<'_>,
    node: &XmlElementNode,
    tolerance: f64,
) -> Option<PositionTarget> {
    let position = node.child("Position")?;
    if let Some(world) = position.child("WorldPosition") {
        return Some(PositionTarget::World {
            point: GeoPoint {
                lon: ctx.value(world, "x"),
                lat: ctx.value(world, "y"),
                alt: ctx.value(world, "z"),
            },
            tolerance,
        });
    }
    let lane = position.child("LanePosition")?;
    Some(PositionTarget::Lane {
        road_id: ctx.attr_or(lane, "roadId", ""),
        lane_id: ctx.attr_or(lane, "laneId", ""),
        s: ctx.value(lane, "s"),
        offset: ctx.value(lane, "offset"),
        tolerance,
    })
}

/// Normalized comparison operator of a condition node.
pub fn compare_rule(ctx: &mut LowerContext<'_>, node: &XmlElementNode) -> CompareRule {
    let raw = ctx.attr_or(node, "rule", "");
    match raw.as_str() {
        "equalTo" => CompareRule::Eq,
        "lessThan" => CompareRule::Lt,
        "greaterThan" => CompareRule::Gt,
        "lessOrEqual" => CompareRule::Lte,
        "greaterOrEqual" => CompareRule::Gte,
        _ => {
            ctx.warn(
                "UNKNOWN_RULE",
                format!("rule \"{}\" on {} treated as equalTo", raw, node.describe()),
            );
            CompareRule::Eq
        }
    }
}

/// `ego_1`, `v_3`, ... for known entities; the authored name otherwise.
fn entity_tag(ctx: &mut LowerContext<'_>, scope: ConditionScope<'_>, name: Option<&str>) -> String {
    let name = name.unwrap_or(scope.actor);
    match scope.registry.reference_tag(name) {
        Some(tag) => tag,
        None => {
            ctx.warn(
                "UNKNOWN_ENTITY",
                format!("condition refers to unknown entity \"{}\"", name),
            );
            name.to_string()
        }
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EmptyCatalog;
    use crate::config::LoweringConfig;
    use crate::entities::build_entity;
    use crate::projection::PlanarProjection;
    use scn_parser::parse_xml_document;

    fn node(xml: &str) -> XmlElementNode {
        parse_xml_document(xml).expect("xml should parse").root
    }

    fn registry(ctx: &mut LowerContext<'_>) -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        for xml in [
            r#"<ScenarioObject name="Ego"><Vehicle name="suv"/></ScenarioObject>"#,
            r#"<ScenarioObject name="V1"><Vehicle name="Sedan"/></ScenarioObject>"#,
        ] {
            let entity = build_entity(ctx, &node(xml)).expect("entity");
            registry.insert(entity);
        }
        registry
    }

    fn entity_condition(inner: &str) -> String {
        format!(
            r#"<Condition name="c" delay="0.5" conditionEdge="rising"><ByEntityCondition>
                <TriggeringEntities triggeringEntitiesRule="any"><EntityRef entityRef="V1"/></TriggeringEntities>
                <EntityCondition>{}</EntityCondition>
            </ByEntityCondition></Condition>"#,
            inner
        )
    }

    #[test]
    fn simulation_time_condition_keeps_rule_value_and_edge() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(r#"<Condition name="t" delay="0" conditionEdge="rising"><ByValueCondition><SimulationTimeCondition value="3" rule="greaterThan"/></ByValueCondition></Condition>"#),
            scope,
        )
        .expect("supported");
        assert_eq!(condition.boundary_edge, BoundaryEdge::Rising);
        assert_eq!(condition.trigger_count, 1);
        assert!(matches!(
            condition.trigger,
            ConditionKind::SimulationTime { rule: CompareRule::Gt, ref value } if value.value() == 3.0
        ));
    }

    #[test]
    fn ttc_condition_tags_entities_and_derives_distance_mode() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(&entity_condition(
                r#"<TimeToCollisionCondition value="4.5" rule="lessThan" alongRoute="false" freespace="false">
                    <TimeToCollisionConditionTarget><EntityRef entityRef="Ego"/></TimeToCollisionConditionTarget>
                </TimeToCollisionCondition>"#,
            )),
            scope,
        )
        .expect("supported");
        assert_eq!(condition.delay, 0.5);
        let ConditionKind::TimeToCollision {
            source,
            target,
            rule,
            distance_mode,
            ..
        } = condition.trigger
        else {
            panic!("expected ttc");
        };
        assert_eq!(source, "v_1");
        assert_eq!(target, "ego_1");
        assert_eq!(rule, CompareRule::Lt);
        assert_eq!(distance_mode, DistanceMode::Euclidean);
    }

    #[test]
    fn first_populated_branch_wins() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(&entity_condition(
                r#"<TimeHeadwayCondition entityRef="Ego" value="2" rule="lessThan"/>
                   <RelativeDistanceCondition entityRef="Ego" value="10" rule="lessThan" relativeDistanceType="cartesianDistance"/>"#,
            )),
            scope,
        )
        .expect("supported");
        assert!(matches!(
            condition.trigger,
            ConditionKind::RelativeDistance {
                distance_mode: DistanceMode::Euclidean,
                ..
            }
        ));
    }

    #[test]
    fn speed_condition_records_actor_source_and_unit() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "Ego",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(&entity_condition(r#"<SpeedCondition value="$Limit" rule="greaterOrEqual"/>"#)),
            scope,
        )
        .expect("supported");
        let ConditionKind::Speed {
            source,
            target,
            speed_type,
            rule,
            value,
            unit,
        } = condition.trigger
        else {
            panic!("expected speed");
        };
        assert_eq!(source, "ego");
        assert_eq!(target.as_deref(), Some("V1"));
        assert_eq!(speed_type, SpeedType::Absolute);
        assert_eq!(rule, CompareRule::Gte);
        assert_eq!(value.raw(), "$Limit");
        assert_eq!(value.value(), 0.0);
        assert_eq!(unit, "m_s");
        assert!(ctx.diagnostics.has_code("UNRESOLVED_PARAMETER"));
    }

    #[test]
    fn lane_attach_requires_a_triple() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "Ego",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(r#"<Condition name="attach"><ByValueCondition><ParameterCondition parameterRef="lane" value="3;0;-1" rule="equalTo"/></ByValueCondition></Condition>"#),
            scope,
        )
        .expect("supported");
        assert!(matches!(
            condition.trigger,
            ConditionKind::LaneAttach { ref road, ref lane, .. } if road == "3" && lane == "-1"
        ));
        let error = classify_condition(
            &mut ctx,
            &node(r#"<Condition name="bad"><ByValueCondition><ParameterCondition parameterRef="lane" value="3;0" rule="equalTo"/></ByValueCondition></Condition>"#),
            scope,
        )
        .expect_err("two parts");
        assert_eq!(error, LowerError::UnsupportedTrigger("bad".to_string()));
    }

    #[test]
    fn distance_condition_projects_point_along_lane() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(&entity_condition(
                r#"<DistanceCondition value="30" freespace="false" rule="lessThan"><Position><WorldPosition x="100" y="-1.75"/></Position></DistanceCondition>"#,
            )),
            scope,
        )
        .expect("supported");
        let ConditionKind::DistanceToPoint { point, radius, .. } = condition.trigger else {
            panic!("expected distance to point");
        };
        assert_eq!(radius, 20.0);
        let (x, _) = ctx
            .projection
            .lonlat_to_local(point.lon, point.lat)
            .expect("local");
        assert!((x - 130.0).abs() < 1e-6);
    }

    #[test]
    fn reach_lane_position_keeps_authored_ids() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let condition = classify_condition(
            &mut ctx,
            &node(&entity_condition(
                r#"<ReachPositionCondition tolerance="2"><Position><LanePosition roadId="7" laneId="-1" s="12" offset="0.3"/></Position></ReachPositionCondition>"#,
            )),
            scope,
        )
        .expect("supported");
        assert_eq!(condition.trigger.type_name(), "reach_abs_lane");
        assert!(matches!(
            condition.trigger,
            ConditionKind::ReachPosition {
                position: PositionTarget::Lane { ref road_id, tolerance, .. },
                ..
            } if road_id == "7" && tolerance == 2.0
        ));
    }

    #[test]
    fn empty_condition_is_unsupported_and_fails_the_trigger() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let trigger = node(
            r#"<StartTrigger>
                <ConditionGroup><Condition name="ok"><ByValueCondition><SimulationTimeCondition value="1" rule="greaterThan"/></ByValueCondition></Condition></ConditionGroup>
                <ConditionGroup><Condition name="empty"><ByValueCondition/></Condition></ConditionGroup>
            </StartTrigger>"#,
        );
        let error = classify_trigger(&mut ctx, &trigger, scope).expect_err("unsupported");
        assert_eq!(error.code(), "UNSUPPORTED_TRIGGER");
    }

    #[test]
    fn condition_groups_are_flattened_in_order() {
        let config = LoweringConfig::default();
        let projection = PlanarProjection::default();
        let mut ctx = LowerContext::new(&config, &EmptyCatalog, &projection);
        let registry = registry(&mut ctx);
        let scope = ConditionScope {
            actor: "V1",
            registry: &registry,
        };
        let trigger = node(
            r#"<StartTrigger>
                <ConditionGroup><Condition name="a"><ByValueCondition><SimulationTimeCondition value="1" rule="greaterThan"/></ByValueCondition></Condition></ConditionGroup>
                <ConditionGroup><Condition name="b"><ByValueCondition><SimulationTimeCondition value="2" rule="bogus"/></ByValueCondition></Condition></ConditionGroup>
            </StartTrigger>"#,
        );
        let conditions = classify_trigger(&mut ctx, &trigger, scope).expect("supported");
        let names = conditions
            .iter()
            .map(|condition| condition.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
        assert!(ctx.diagnostics.has_code("UNKNOWN_RULE"));
    }
}
