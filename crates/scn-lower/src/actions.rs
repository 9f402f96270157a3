use scn_core::{
    AccStopKind, ActionEffect, ActionKind, ActuatorOverrides, AssistSlots, BehaviorKind,
    ControllerMode, DocumentDialect, DynamicConstraints, EndCondition, LaneChangeDirection,
    LowerError, NumericText,
};
use scn_parser::XmlElementNode;
use tracing::debug;

use crate::command::{command_channel, parse_command};
use crate::context::LowerContext;
use crate::entities::EntityRegistry;
use crate::placement::{routing_plan, RoutePlan};

/// Speed target meaning "keep accelerating".
const NO_SPEED_LIMIT: f64 = -1.0;

/// The entity an action is classified for.
#[derive(Clone, Copy)]
pub struct ActionScope<'s> {
    pub owner: &'s str,
    /// Autonomous traffic keeps its scene effects but feeds no timelines.
    pub behavior: BehaviorKind,
    pub registry: &'s EntityRegistry,
}

/// Timeline input an action contributes on top of its scene effect.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackFeed {
    Acceleration {
        rate: f64,
        stop_kind: AccStopKind,
        stop_value: f64,
    },
    Merge {
        target_lane: i64,
        /// Lateral offset, when the change stays within a lane.
        offset: Option<f64>,
        duration: f64,
    },
    Velocity {
        target: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedAction {
    pub effect: ActionEffect,
    pub feed: Option<TrackFeed>,
    /// Waypoints a routing action asks the assembler to attach.
    pub route: Option<RoutePlan>,
}

impl ClassifiedAction {
    fn new(name: String, effect: ActionKind, end_condition: EndCondition) -> Self {
        Self {
            effect: ActionEffect {
                name,
                id: None,
                effect,
                end_condition,
            },
            feed: None,
            route: None,
        }
    }

    fn feeding(mut self, feed: TrackFeed) -> Self {
        self.feed = Some(feed);
        self
    }
}

/// Classifies one story `Action` node.
///
/// `Ok(None)` means the action has no scene effect; a warning explains why.
/// An unknown custom command kind fails with `UnknownCommand`.
pub fn classify_action(
    ctx: &mut LowerContext<'_>,
    action: &XmlElementNode,
    scope: ActionScope<'_>,
) -> Result<Option<ClassifiedAction>, LowerError> {
    let name = ctx.attr_or(action, "name", "");
    if let Some(user_defined) = action.descend(&["UserDefinedAction", "CustomCommandAction"]) {
        return custom_command(ctx, name, user_defined).map(Some);
    }
    let Some(private) = action.child("PrivateAction") else {
        ctx.warn(
            "UNSUPPORTED_ACTION",
            format!("action \"{}\" has no private or user-defined branch", name),
        );
        return Ok(None);
    };

    let classified = if let Some(speed) = private.descend(&["LongitudinalAction", "SpeedAction"]) {
        speed_action(ctx, name, speed)
    } else if let Some(lane_change) = private.descend(&["LateralAction", "LaneChangeAction"]) {
        Some(lane_change_action(ctx, name, lane_change))
    } else if let Some(distance) = private.descend(&["LateralAction", "LateralDistanceAction"]) {
        Some(lateral_distance_action(ctx, name, distance))
    } else if let Some(activate) = private.child("ActivateControllerAction") {
        activate_controller(ctx, name, activate)
    } else if let Some(controller) = private.child("ControllerAction") {
        controller_action(ctx, name, controller)
    } else if let Some(routing) = private.child("RoutingAction") {
        routing_plan(ctx, routing, scope.registry, scope.owner).map(|plan| {
            let mut classified = ClassifiedAction::new(
                name,
                ActionKind::Reroute {
                    route_id: None,
                    route_kind: plan.kind,
                },
                EndCondition::None,
            );
            classified.route = Some(plan);
            classified
        })
    } else {
        ctx.warn(
            "UNSUPPORTED_ACTION",
            format!("action \"{}\" of {} is not supported", name, scope.owner),
        );
        None
    };

    Ok(classified.map(|mut classified| {
        if !scope.behavior.feeds_tracks() {
            classified.feed = None;
        }
        debug!(
            action = %classified.effect.name,
            owner = scope.owner,
            feeds_track = classified.feed.is_some(),
            "action classified"
        );
        classified
    }))
}

fn speed_action(
    ctx: &mut LowerContext<'_>,
    name: String,
    speed: &XmlElementNode,
) -> Option<ClassifiedAction> {
    let dynamics = speed.child("SpeedActionDynamics");
    let shape = dynamics
        .map(|dynamics| ctx.attr_or(dynamics, "dynamicsShape", ""))
        .unwrap_or_default();
    let rate = dynamics
        .map(|dynamics| ctx.number(dynamics, "value"))
        .unwrap_or_else(NumericText::zero);
    let target = speed.child("SpeedActionTarget");

    if let Some(absolute) = target.and_then(|target| target.child("AbsoluteTargetSpeed")) {
        let value = ctx.number(absolute, "value");
        return match shape.as_str() {
            "linear" | "sinusoidal" => {
                let (end_condition, stop_kind, stop_value) = if value.value() == NO_SPEED_LIMIT {
                    (EndCondition::None, AccStopKind::None, 0.0)
                } else {
                    (
                        EndCondition::Velocity {
                            target: value.value(),
                        },
                        AccStopKind::Velocity,
                        value.value(),
                    )
                };
                let feed = TrackFeed::Acceleration {
                    rate: rate.value(),
                    stop_kind,
                    stop_value,
                };
                Some(
                    ClassifiedAction::new(name, ActionKind::AccelerationRamp { rate }, end_condition)
                        .feeding(feed),
                )
            }
            "step" => {
                let feed = TrackFeed::Velocity {
                    target: value.value(),
                };
                Some(
                    ClassifiedAction::new(name, ActionKind::VelocityStep { value }, EndCondition::None)
                        .feeding(feed),
                )
            }
            other => {
                ctx.warn(
                    "UNSUPPORTED_ACTION",
                    format!("speed action \"{}\" has unsupported shape \"{}\"", name, other),
                );
                None
            }
        };
    }

    if let Some(relative) = target.and_then(|target| target.child("RelativeTargetSpeed")) {
        if shape != "linear" {
            ctx.warn(
                "UNSUPPORTED_ACTION",
                format!("relative speed action \"{}\" has unsupported shape \"{}\"", name, shape),
            );
            return None;
        }
        let delta = ctx.value(relative, "value");
        if rate.value() == 0.0 {
            ctx.warn(
                "UNSUPPORTED_ACTION",
                format!("relative speed action \"{}\" has a zero ramp rate", name),
            );
            return None;
        }
        let seconds = delta / rate.value();
        let feed = TrackFeed::Acceleration {
            rate: rate.value(),
            stop_kind: AccStopKind::Time,
            stop_value: seconds,
        };
        return Some(
            ClassifiedAction::new(
                name,
                ActionKind::AccelerationRamp { rate },
                EndCondition::Time { seconds },
            )
            .feeding(feed),
        );
    }

    ctx.warn(
        "UNSUPPORTED_ACTION",
        format!("speed action \"{}\" has no target", name),
    );
    None
}

/// Direction of a lane change from its target lane and lateral offset.
///
/// Legacy documents count positive lanes and offsets towards the right;
/// every other dialect counts them towards the left.
pub fn lane_change_direction(
    dialect: DocumentDialect,
    target_lane: f64,
    offset: f64,
) -> LaneChangeDirection {
    let towards_left = |value: f64| {
        if dialect.uses_legacy_lane_signs() {
            value < 0.0
        } else {
            value > 0.0
        }
    };
    if target_lane != 0.0 {
        if towards_left(target_lane) {
            LaneChangeDirection::Left
        } else {
            LaneChangeDirection::Right
        }
    } else if offset == 0.0 {
        LaneChangeDirection::None
    } else if towards_left(offset) {
        LaneChangeDirection::LeftInLane
    } else {
        LaneChangeDirection::RightInLane
    }
}

fn lane_change_action(
    ctx: &mut LowerContext<'_>,
    name: String,
    lane_change: &XmlElementNode,
) -> ClassifiedAction {
    let target_lane = lane_change
        .child("LaneChangeTarget")
        .and_then(|target| {
            target
                .child("RelativeTargetLane")
                .or_else(|| target.child("AbsoluteTargetLane"))
        })
        .map(|lane| ctx.number(lane, "value"))
        .unwrap_or_else(NumericText::zero);
    let duration = lane_change
        .child("LaneChangeActionDynamics")
        .map(|dynamics| ctx.number(dynamics, "value"))
        .unwrap_or_else(NumericText::zero);
    let authored_offset = ctx
        .attr(lane_change, "targetLaneOffset")
        .filter(|offset| !offset.trim().is_empty());
    let raw_offset = NumericText::parse(authored_offset.clone().unwrap_or_default());

    let direction = lane_change_direction(ctx.dialect, target_lane.value(), raw_offset.value());
    let offset = match (direction, authored_offset.as_deref()) {
        (_, None) => NumericText::parse("0"),
        // Legacy in-lane moves to the left are written with a leading minus.
        (LaneChangeDirection::LeftInLane, Some(text)) if ctx.dialect.uses_legacy_lane_signs() => {
            NumericText::parse(text.trim().trim_start_matches('-'))
        }
        (_, Some(_)) => raw_offset.clone(),
    };

    let feed = TrackFeed::Merge {
        target_lane: target_lane.value() as i64,
        offset: authored_offset.map(|_| raw_offset.value()),
        duration: duration.value(),
    };
    ClassifiedAction::new(
        name,
        ActionKind::LaneChange {
            direction,
            target_lane,
            duration,
            offset,
        },
        EndCondition::None,
    )
    .feeding(feed)
}

fn lateral_distance_action(
    ctx: &mut LowerContext<'_>,
    name: String,
    distance: &XmlElementNode,
) -> ClassifiedAction {
    let constraints = distance.child("DynamicConstraints").map(|limits| {
        let mut read = |attribute: &str| {
            limits
                .attr(attribute)
                .map(|_| ctx.number(limits, attribute))
        };
        DynamicConstraints {
            max_acceleration: read("maxAcceleration"),
            max_deceleration: read("maxDeceleration"),
            max_speed: read("maxSpeed"),
        }
    });
    ClassifiedAction::new(
        name,
        ActionKind::LateralDistanceKeep {
            target: ctx.attr_or(distance, "entityRef", ""),
            distance: ctx.number(distance, "distance"),
            continuous: ctx.attr(distance, "continuous").as_deref() == Some("true"),
            constraints,
        },
        EndCondition::None,
    )
}

fn activate_controller(
    ctx: &mut LowerContext<'_>,
    name: String,
    activate: &XmlElementNode,
) -> Option<ClassifiedAction> {
    let lateral = ctx.attr(activate, "lateral");
    let longitudinal = ctx.attr(activate, "longitudinal");
    if lateral.is_none() && longitudinal.is_none() {
        ctx.warn(
            "UNSUPPORTED_ACTION",
            format!("controller activation \"{}\" names no axis", name),
        );
        return None;
    }
    let mode = ControllerMode::from_flags(
        lateral.as_deref() == Some("true"),
        longitudinal.as_deref() == Some("true"),
    );
    Some(ClassifiedAction::new(
        name,
        ActionKind::ControllerActivate { mode },
        EndCondition::None,
    ))
}

fn controller_action(
    ctx: &mut LowerContext<'_>,
    name: String,
    controller: &XmlElementNode,
) -> Option<ClassifiedAction> {
    let assigned = controller.descend(&["AssignControllerAction", "Controller"]);
    let controller_name = assigned
        .map(|node| ctx.attr_or(node, "name", ""))
        .unwrap_or_default();

    if let Some(assigned) = assigned.filter(|_| !controller_name.is_empty() && controller_name != "none") {
        let mut slots = AssistSlots::default();
        for (key, value) in assigned.properties() {
            let value = Some(ctx.resolve(value));
            match key {
                "resume_sw" => slots.resume_sw = value,
                "cancel_sw" => slots.cancel_sw = value,
                "speed_inc_sw" => slots.speed_inc_sw = value,
                "speed_dec_sw" => slots.speed_dec_sw = value,
                "set_timegap" => slots.set_timegap = value,
                "set_speed" => slots.set_speed = value,
                _ => {}
            }
        }
        return Some(ClassifiedAction::new(
            name,
            ActionKind::ControllerAssign {
                controller: controller_name,
                slots,
            },
            EndCondition::None,
        ));
    }

    let Some(overrides) = controller.child("OverrideControllerValueAction") else {
        ctx.warn(
            "UNSUPPORTED_ACTION",
            format!("controller action \"{}\" neither assigns nor overrides", name),
        );
        return None;
    };
    let mut pair = |actuator: &str, value_attr: &str| match overrides.child(actuator) {
        Some(node) => format!(
            "{};{}",
            ctx.attr_or(node, "active", "false"),
            ctx.attr_or(node, value_attr, "0")
        ),
        None => "false;0".to_string(),
    };
    let overrides = ActuatorOverrides {
        throttle: pair("Throttle", "value"),
        brake: pair("Brake", "value"),
        clutch: pair("Clutch", "value"),
        parking_brake: pair("ParkingBrake", "value"),
        steering_wheel: pair("SteeringWheel", "value"),
        gear: pair("Gear", "number"),
    };
    Some(ClassifiedAction::new(
        name,
        ActionKind::ControllerOverride { overrides },
        EndCondition::None,
    ))
}

fn custom_command(
    ctx: &mut LowerContext<'_>,
    name: String,
    command: &XmlElementNode,
) -> Result<ClassifiedAction, LowerError> {
    let channel_name = ctx.attr_or(command, "type", "");
    let channel = command_channel(&channel_name)
        .ok_or_else(|| LowerError::UnknownCommand(channel_name.clone()))?;
    let text = ctx.resolve(command.text().trim());
    let parsed = parse_command(channel, &text)?;
    Ok(ClassifiedAction::new(
        name,
        ActionKind::Command {
            channel,
            command: parsed.kind,
            value: parsed.value,
            offset: parsed.offset,
        },
        EndCondition::None,
    ))
}
