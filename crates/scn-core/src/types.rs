use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{format_number, NumericText};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn synthetic() -> Self {
        Self {
            start: SourceLocation { line: 1, column: 1 },
            end: SourceLocation { line: 1, column: 1 },
        }
    }
}

/// Authoring-tool family of a document, fixed by the file header author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentDialect {
    TadSimLegacy,
    TadSimV2,
    TadSimV22,
    #[default]
    Other,
}

impl DocumentDialect {
    pub fn from_author(author: &str) -> Self {
        match author.trim() {
            "TAD Sim" | "VIRES OpenDRIVE Scenario Editor 2.1.0.495" => Self::TadSimLegacy,
            "TAD Sim V2.0" | "TAD Sim V2.1" => Self::TadSimV2,
            "TAD Sim V2.2" => Self::TadSimV22,
            _ => Self::Other,
        }
    }

    /// Legacy documents count positive target lanes towards the right.
    pub fn uses_legacy_lane_signs(self) -> bool {
        matches!(self, Self::TadSimLegacy)
    }

    /// V2.0 writes world positions as lon/lat already.
    pub fn authors_geographic_world_positions(self) -> bool {
        matches!(self, Self::TadSimV2)
    }

    pub fn trajectory_angle_from_heading(self) -> bool {
        matches!(self, Self::TadSimV22)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Double,
    Int,
    Boolean,
}

impl ParameterKind {
    pub fn from_authored(raw: &str) -> Self {
        match raw.trim() {
            "double" => Self::Double,
            "int" | "integer" | "unsignedInt" | "unsignedShort" => Self::Int,
            "boolean" | "bool" => Self::Boolean,
            _ => Self::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ego,
    Vehicle,
    Pedestrian,
    Obstacle,
}

impl EntityKind {
    /// Prefix of the element tag conditions use to point at an entity.
    pub fn reference_prefix(self) -> &'static str {
        match self {
            Self::Ego => "ego_",
            Self::Vehicle => "v_",
            Self::Pedestrian => "p_",
            Self::Obstacle => "o_",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    #[default]
    UserDefined,
    TrafficAutonomous,
    TrajectoryFollow,
    ArterialTraffic,
}

impl BehaviorKind {
    pub fn from_authored(raw: &str) -> Option<Self> {
        match raw.trim() {
            "UserDefine" => Some(Self::UserDefined),
            "TrafficVehicle" => Some(Self::TrafficAutonomous),
            "TrajectoryFollow" => Some(Self::TrajectoryFollow),
            "TrafficVehicleArterial" => Some(Self::ArterialTraffic),
            _ => None,
        }
    }

    /// Autonomous traffic ignores scripted acceleration/merge/velocity timelines.
    pub fn feeds_tracks(self) -> bool {
        matches!(self, Self::UserDefined | Self::TrajectoryFollow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn vehicle_default() -> Self {
        Self {
            length: 4.76,
            width: 2.05,
            height: 1.44,
        }
    }

    pub fn obstacle_default() -> Self {
        Self {
            length: 0.75,
            width: 0.75,
            height: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub max_deceleration: f64,
}

/// Initial pose of an entity, in both geographic and lane coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
    /// Radians, as authored.
    pub heading: f64,
    pub road_id: Option<u64>,
    pub lane_id: i64,
    pub start_shift: f64,
    pub offset: f64,
    /// Degrees in `[0, 360)`.
    pub start_angle: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EgoProfile {
    pub group_name: String,
    pub category: String,
    pub performance: Performance,
    pub trajectory_enabled: bool,
    pub sensor_group: Option<String>,
    pub trajectory_tracking: Option<String>,
    pub controller_name: Option<String>,
    pub lateral_control: bool,
    pub longitudinal_control: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub performance: Performance,
    pub aggress: Option<String>,
    pub follow: Option<String>,
    pub trajectory_angle: Option<f64>,
    pub trajectory_tracking: Option<String>,
    pub sensor_group: Option<String>,
    pub obu_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PedestrianProfile {
    pub start_time: f64,
    pub end_time: f64,
    pub angle: Option<f64>,
    pub trajectory_tracking: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityProfile {
    Ego(EgoProfile),
    Vehicle(VehicleProfile),
    Pedestrian(PedestrianProfile),
    Obstacle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEntity {
    pub id: u32,
    pub display_name: String,
    pub type_ref: String,
    pub bounding_box: BoundingBox,
    pub behavior_kind: BehaviorKind,
    pub placement: Option<Placement>,
    pub route_id: Option<u32>,
    pub start_velocity: f64,
    pub max_velocity: f64,
    pub event_ids: Vec<u32>,
    pub acc_track_id: Option<String>,
    pub merge_track_id: Option<String>,
    pub profile: EntityProfile,
}

impl ScenarioEntity {
    pub fn kind(&self) -> EntityKind {
        match self.profile {
            EntityProfile::Ego(_) => EntityKind::Ego,
            EntityProfile::Vehicle(_) => EntityKind::Vehicle,
            EntityProfile::Pedestrian(_) => EntityKind::Pedestrian,
            EntityProfile::Obstacle => EntityKind::Obstacle,
        }
    }

    /// Tag used by conditions (`ego_1`, `v_3`, ...).
    pub fn reference_tag(&self) -> String {
        format!("{}{}", self.kind().reference_prefix(), self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
    pub heading: f64,
    pub road_id: Option<u64>,
    pub lane_id: Option<i64>,
    pub shift: Option<f64>,
    pub offset: Option<f64>,
}

impl Waypoint {
    pub fn summary(&self) -> String {
        format!("{:.8},{:.8},{}", self.lon, self.lat, format_number(self.alt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Implicit,
    Assigned,
    Trajectory,
    AcquirePosition,
    /// Approach route a signal controller is configured with.
    SignalApproach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: u32,
    pub owner: String,
    pub kind: RouteKind,
    pub start: String,
    pub end: Option<String>,
    pub mids: String,
    pub path: Vec<Waypoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryEdge {
    Rising,
    Falling,
    RisingOrFalling,
    #[default]
    None,
}

impl BoundaryEdge {
    pub fn from_authored(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("rising") => Self::Rising,
            Some("falling") => Self::Falling,
            Some("risingOrFalling") => Self::RisingOrFalling,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareRule {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl CompareRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Lte => "lte",
            Self::Gte => "gte",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMode {
    #[default]
    None,
    LaneProjection,
    Euclidean,
}

impl DistanceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LaneProjection => "laneprojection",
            Self::Euclidean => "euclideandistance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionTarget {
    World {
        point: GeoPoint,
        tolerance: f64,
    },
    Lane {
        road_id: String,
        lane_id: String,
        s: f64,
        offset: f64,
        tolerance: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionKind {
    SimulationTime {
        rule: CompareRule,
        value: NumericText,
    },
    LaneAttach {
        parameter_ref: String,
        rule: CompareRule,
        road: String,
        section: String,
        lane: String,
    },
    ElementState {
        element_type: String,
        element_ref: String,
        state: String,
    },
    TimeToCollision {
        source: String,
        target: String,
        rule: CompareRule,
        value: NumericText,
        distance_mode: DistanceMode,
    },
    RelativeDistance {
        source: String,
        target: String,
        rule: CompareRule,
        value: NumericText,
        distance_mode: DistanceMode,
    },
    DistanceToPoint {
        source: String,
        point: GeoPoint,
        distance: NumericText,
        radius: f64,
    },
    ReachPosition {
        source: String,
        position: PositionTarget,
    },
    Speed {
        source: String,
        target: Option<String>,
        speed_type: SpeedType,
        rule: CompareRule,
        value: NumericText,
        unit: String,
    },
    TimeHeadway {
        source: String,
        target: String,
        rule: CompareRule,
        value: NumericText,
    },
}

impl ConditionKind {
    /// Simulator-facing name of the condition type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimulationTime { .. } => "time_trigger",
            Self::LaneAttach { .. } => "ego_attach_laneid_custom",
            Self::ElementState { .. } => "element_state",
            Self::TimeToCollision { .. } => "ttc_trigger",
            Self::RelativeDistance { .. } => "distance_trigger",
            Self::DistanceToPoint { .. } => "reach_abs_position",
            Self::ReachPosition {
                position: PositionTarget::World { .. },
                ..
            } => "reach_abs_position",
            Self::ReachPosition { .. } => "reach_abs_lane",
            Self::Speed { .. } => "velocity_trigger",
            Self::TimeHeadway { .. } => "timeheadway_trigger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub name: String,
    pub delay: f64,
    pub boundary_edge: BoundaryEdge,
    pub trigger_count: u32,
    pub trigger: ConditionKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndCondition {
    #[default]
    None,
    Time {
        seconds: f64,
    },
    Velocity {
        target: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneChangeDirection {
    Left,
    Right,
    LeftInLane,
    RightInLane,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicConstraints {
    pub max_acceleration: Option<NumericText>,
    pub max_deceleration: Option<NumericText>,
    pub max_speed: Option<NumericText>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    Off,
    Lateral,
    Longitudinal,
    Autopilot,
}

impl ControllerMode {
    pub fn from_flags(lateral: bool, longitudinal: bool) -> Self {
        match (lateral, longitudinal) {
            (false, false) => Self::Off,
            (true, false) => Self::Lateral,
            (false, true) => Self::Longitudinal,
            (true, true) => Self::Autopilot,
        }
    }
}

/// Driver-assist switches an assigned controller exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistSlots {
    pub resume_sw: Option<String>,
    pub cancel_sw: Option<String>,
    pub speed_inc_sw: Option<String>,
    pub speed_dec_sw: Option<String>,
    pub set_timegap: Option<String>,
    pub set_speed: Option<String>,
}

/// Manual actuator overrides, each encoded `"active;value"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorOverrides {
    pub throttle: String,
    pub brake: String,
    pub clutch: String,
    pub parking_brake: String,
    pub steering_wheel: String,
    pub gear: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandChannel {
    Command,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    LaneChange,
    Overtaking,
    PullOver,
    EmergencyStop,
    LateralSpeedToLeft,
    LateralSpeedToRight,
    LateralAccelToLeft,
    LateralAccelToRight,
    #[serde(rename = "userdefine")]
    UserDefine,
    EmergencyBrake,
    VehicleLostControl,
    HandsOnSteeringwheel,
    EyesOnRoad,
    Lidar,
    Radar,
    Ultrasonic,
    Camera,
    Gnss,
    Imu,
    Localization,
    Beam,
    BrakeLight,
    HazardLight,
    LeftTurnLight,
    RightTurnLight,
    DriverSeatbelt,
    PassengerSeatbelt,
    DriverDoor,
    PassengerDoor,
    Hood,
    Trunk,
    #[serde(rename = "parkingbrake")]
    ParkingBrake,
    Wiper,
    Gear,
    Key,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LaneChange => "lane_change",
            Self::Overtaking => "overtaking",
            Self::PullOver => "pull_over",
            Self::EmergencyStop => "emergency_stop",
            Self::LateralSpeedToLeft => "lateral_speed_to_left",
            Self::LateralSpeedToRight => "lateral_speed_to_right",
            Self::LateralAccelToLeft => "lateral_accel_to_left",
            Self::LateralAccelToRight => "lateral_accel_to_right",
            Self::UserDefine => "userdefine",
            Self::EmergencyBrake => "emergency_brake",
            Self::VehicleLostControl => "vehicle_lost_control",
            Self::HandsOnSteeringwheel => "hands_on_steeringwheel",
            Self::EyesOnRoad => "eyes_on_road",
            Self::Lidar => "lidar",
            Self::Radar => "radar",
            Self::Ultrasonic => "ultrasonic",
            Self::Camera => "camera",
            Self::Gnss => "gnss",
            Self::Imu => "imu",
            Self::Localization => "localization",
            Self::Beam => "beam",
            Self::BrakeLight => "brake_light",
            Self::HazardLight => "hazard_light",
            Self::LeftTurnLight => "left_turn_light",
            Self::RightTurnLight => "right_turn_light",
            Self::DriverSeatbelt => "driver_seatbelt",
            Self::PassengerSeatbelt => "passenger_seatbelt",
            Self::DriverDoor => "driver_door",
            Self::PassengerDoor => "passenger_door",
            Self::Hood => "hood",
            Self::Trunk => "trunk",
            Self::ParkingBrake => "parkingbrake",
            Self::Wiper => "wiper",
            Self::Gear => "gear",
            Self::Key => "key",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    AccelerationRamp {
        rate: NumericText,
    },
    VelocityStep {
        value: NumericText,
    },
    LaneChange {
        direction: LaneChangeDirection,
        target_lane: NumericText,
        duration: NumericText,
        offset: NumericText,
    },
    LateralDistanceKeep {
        target: String,
        distance: NumericText,
        continuous: bool,
        constraints: Option<DynamicConstraints>,
    },
    ControllerActivate {
        mode: ControllerMode,
    },
    ControllerAssign {
        controller: String,
        slots: AssistSlots,
    },
    ControllerOverride {
        overrides: ActuatorOverrides,
    },
    Command {
        channel: CommandChannel,
        command: CommandKind,
        value: String,
        offset: String,
    },
    Reroute {
        route_id: Option<u32>,
        route_kind: RouteKind,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEffect {
    pub name: String,
    /// Position within the owning event, filled in by the fixup pass.
    pub id: Option<u32>,
    pub effect: ActionKind,
    pub end_condition: EndCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEvent {
    pub id: u32,
    pub name: String,
    pub owner: String,
    pub conditions: Vec<TriggerCondition>,
    pub actions: Vec<ActionEffect>,
    pub is_user_defined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    TimeAbsolute,
    TimeRelative,
    PositionRelative,
    PositionAbsolute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackNode<P> {
    pub trigger_value: f64,
    pub trigger_kind: TriggerKind,
    pub distance_mode: DistanceMode,
    pub count: u32,
    pub payload: P,
}

/// Compact per-node text the simulator consumes.
pub trait TrackPayload {
    fn encode(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccStopKind {
    None,
    Time,
    Velocity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccelerationPayload {
    pub acceleration: f64,
    pub stop_kind: AccStopKind,
    pub stop_value: f64,
}

impl TrackPayload for AccelerationPayload {
    fn encode(&self) -> String {
        let stop = match self.stop_kind {
            AccStopKind::None => "none",
            AccStopKind::Time => "time",
            AccStopKind::Velocity => "velocity",
        };
        format!(
            "{},{},{}",
            format_number(self.acceleration),
            stop,
            format_number(self.stop_value)
        )
    }
}

/// `direction` is positive towards the left, negative towards the right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePayload {
    pub direction: i64,
    pub duration: f64,
    pub offset: f64,
}

impl TrackPayload for MergePayload {
    fn encode(&self) -> String {
        format!(
            "{},{},{}",
            self.direction,
            format_number(self.duration),
            format_number(self.offset)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityPayload {
    pub velocity: f64,
}

impl TrackPayload for VelocityPayload {
    fn encode(&self) -> String {
        format_number(self.velocity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PedestrianVelocityPayload {
    pub velocity: f64,
    pub direction: f64,
}

impl TrackPayload for PedestrianVelocityPayload {
    fn encode(&self) -> String {
        format!(
            "{},{}",
            format_number(self.direction),
            format_number(self.velocity)
        )
    }
}

const TRIGGER_VALUE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEventTrack<P> {
    pub id: String,
    pub nodes: Vec<TrackNode<P>>,
}

impl<P> TimedEventTrack<P> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    /// Inserts keeping `(trigger_value, trigger_kind)` order.
    ///
    /// A node whose kind matches an existing node with the same trigger value
    /// is a duplicate and is dropped; returns whether the node was kept.
    pub fn insert(&mut self, node: TrackNode<P>) -> bool {
        let duplicate = self.nodes.iter().any(|existing| {
            existing.trigger_kind == node.trigger_kind
                && (existing.trigger_value - node.trigger_value).abs() < TRIGGER_VALUE_EPSILON
        });
        if duplicate {
            return false;
        }
        let position = self.nodes.partition_point(|existing| {
            existing.trigger_value < node.trigger_value
                || (existing.trigger_value <= node.trigger_value
                    && existing.trigger_kind <= node.trigger_kind)
        });
        self.nodes.insert(position, node);
        true
    }

    pub fn is_sorted(&self) -> bool {
        self.nodes
            .windows(2)
            .all(|pair| pair[0].trigger_value <= pair[1].trigger_value)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<P: TrackPayload> TimedEventTrack<P> {
    /// `t,payload;...` over simulation-time nodes.
    pub fn profile_time(&self) -> String {
        self.nodes
            .iter()
            .filter(|node| node.trigger_kind == TriggerKind::TimeAbsolute)
            .map(|node| format!("{},{}", format_number(node.trigger_value), node.payload.encode()))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// `ttc|egoDistance mode value,payload count;...` over relative nodes.
    pub fn profile_event(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| {
                let trigger = match node.trigger_kind {
                    TriggerKind::TimeAbsolute => return None,
                    TriggerKind::TimeRelative => "ttc",
                    TriggerKind::PositionRelative | TriggerKind::PositionAbsolute => "egoDistance",
                };
                Some(format!(
                    "{} {} {},{} {}",
                    trigger,
                    node.distance_mode.as_str(),
                    format_number(node.trigger_value),
                    node.payload.encode(),
                    node.count
                ))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

pub type AccelerationTrack = TimedEventTrack<AccelerationPayload>;
pub type MergeTrack = TimedEventTrack<MergePayload>;
pub type VelocityTrack = TimedEventTrack<VelocityPayload>;
pub type PedestrianVelocityTrack = TimedEventTrack<PedestrianVelocityPayload>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalPhases {
    pub red: f64,
    pub green: f64,
    pub yellow: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTimeline {
    pub id: u32,
    pub controller: String,
    pub phases: SignalPhases,
    pub plan: String,
    pub start_time: String,
    pub route_id: Option<u32>,
    pub junction_id: Option<String>,
    pub lane_offset: Option<String>,
    pub phase: Option<String>,
    pub phase_number: Option<String>,
    pub status: Option<String>,
    pub lanes: Option<String>,
    pub signal_heads: Vec<String>,
    /// Parameter-encoded controller description, split into key/value pairs.
    pub compact: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherFrame {
    pub timestamp: i64,
    pub date_time: String,
    pub visual_range_km: f64,
    pub precipitation_type: String,
    pub precipitation_intensity: f64,
    pub cloud_state: String,
    pub wind_speed: f64,
    pub temperature_c: f64,
}

pub type EventMap = BTreeMap<u32, SceneEvent>;

/// Normalized result of lowering one scenario document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub dialect: DocumentDialect,
    pub story_description: String,
    pub map_file: Option<String>,
    pub parameters: Vec<Parameter>,
    pub egos: BTreeMap<u32, ScenarioEntity>,
    pub vehicles: BTreeMap<u32, ScenarioEntity>,
    pub pedestrians: BTreeMap<u32, ScenarioEntity>,
    pub obstacles: BTreeMap<u32, ScenarioEntity>,
    pub routes: BTreeMap<u32, Route>,
    pub signals: BTreeMap<u32, SignalTimeline>,
    pub acceleration_tracks: BTreeMap<String, AccelerationTrack>,
    pub merge_tracks: BTreeMap<String, MergeTrack>,
    pub velocity_tracks: BTreeMap<String, VelocityTrack>,
    pub pedestrian_velocity_tracks: BTreeMap<String, PedestrianVelocityTrack>,
    pub events: EventMap,
    /// Keyed by ego id.
    pub ego_events: BTreeMap<u32, EventMap>,
    /// Planner-visible mirror of `ego_events`, keyed the same way.
    pub ego_planner_events: BTreeMap<u32, EventMap>,
    pub environment: BTreeMap<i64, WeatherFrame>,
}

impl Scene {
    pub fn entity_maps(&self) -> [&BTreeMap<u32, ScenarioEntity>; 4] {
        [&self.egos, &self.vehicles, &self.pedestrians, &self.obstacles]
    }

    pub fn find_entity(&self, display_name: &str) -> Option<&ScenarioEntity> {
        self.entity_maps()
            .into_iter()
            .flat_map(|entities| entities.values())
            .find(|entity| entity.display_name == display_name)
    }

    pub fn all_ego_events(&self) -> impl Iterator<Item = &SceneEvent> {
        self.ego_events.values().flat_map(|events| events.values())
    }
}
