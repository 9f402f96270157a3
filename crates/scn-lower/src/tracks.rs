use std::collections::BTreeMap;

use scn_core::{
    AccStopKind, AccelerationPayload, AccelerationTrack, ConditionKind, DistanceMode, EntityKind,
    MergePayload, MergeTrack, PedestrianVelocityPayload, PedestrianVelocityTrack, ScenarioEntity,
    TrackNode, TriggerCondition, TriggerKind, VelocityPayload, VelocityTrack,
};
use tracing::debug;

use crate::actions::TrackFeed;
use crate::ids::{IdGenerator, DEFAULT_TRACK_ID};

/// Stop value of a ramp that names no end of its own.
pub const DEFAULT_ACC_STOP: f64 = 3.0;

const MERGE_LEFT: i64 = 1;
const MERGE_RIGHT: i64 = -1;
const IDLE_PEDESTRIAN_SPEED: f64 = 1e-3;

/// When a track node fires, taken from the event's start conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTrigger {
    pub value: f64,
    pub kind: TriggerKind,
    pub distance_mode: DistanceMode,
}

impl TrackTrigger {
    /// The last timing condition of the list decides; conditions that carry
    /// no timing (speed, state, ...) are skipped.
    pub fn from_conditions(conditions: &[TriggerCondition]) -> Option<Self> {
        conditions
            .iter()
            .rev()
            .find_map(|condition| match &condition.trigger {
                ConditionKind::SimulationTime { value, .. } => Some(Self {
                    value: value.value(),
                    kind: TriggerKind::TimeAbsolute,
                    distance_mode: DistanceMode::None,
                }),
                ConditionKind::TimeToCollision {
                    value,
                    distance_mode,
                    ..
                } => Some(Self {
                    value: value.value(),
                    kind: TriggerKind::TimeRelative,
                    distance_mode: *distance_mode,
                }),
                ConditionKind::RelativeDistance {
                    value,
                    distance_mode,
                    ..
                } => Some(Self {
                    value: value.value(),
                    kind: TriggerKind::PositionRelative,
                    distance_mode: *distance_mode,
                }),
                ConditionKind::DistanceToPoint { distance, .. } => Some(Self {
                    value: distance.value(),
                    kind: TriggerKind::PositionAbsolute,
                    distance_mode: DistanceMode::None,
                }),
                _ => None,
            })
    }

    fn node<P>(&self, payload: P) -> TrackNode<P> {
        TrackNode {
            trigger_value: self.value,
            trigger_kind: self.kind,
            distance_mode: self.distance_mode,
            count: 1,
            payload,
        }
    }
}

/// Every timeline of a scene, keyed by track id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackBook {
    pub acceleration: BTreeMap<String, AccelerationTrack>,
    pub merge: BTreeMap<String, MergeTrack>,
    pub velocity: BTreeMap<String, VelocityTrack>,
    pub pedestrian_velocity: BTreeMap<String, PedestrianVelocityTrack>,
}

impl Default for TrackBook {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackBook {
    /// Starts with the empty default acceleration and merge tracks.
    pub fn new() -> Self {
        let mut acceleration = BTreeMap::new();
        acceleration.insert(
            DEFAULT_TRACK_ID.to_string(),
            AccelerationTrack::new(DEFAULT_TRACK_ID),
        );
        let mut merge = BTreeMap::new();
        merge.insert(DEFAULT_TRACK_ID.to_string(), MergeTrack::new(DEFAULT_TRACK_ID));
        Self {
            acceleration,
            merge,
            velocity: BTreeMap::new(),
            pedestrian_velocity: BTreeMap::new(),
        }
    }

    /// Adds one node for `entity`, creating its track on first use.
    ///
    /// Returns whether a node was stored. Egos and obstacles have no
    /// timelines; duplicate nodes are dropped by the track itself.
    pub fn feed(
        &mut self,
        ids: &mut IdGenerator,
        entity: &mut ScenarioEntity,
        trigger: &TrackTrigger,
        feed: &TrackFeed,
    ) -> bool {
        let stored = match (entity.kind(), feed) {
            (
                EntityKind::Vehicle,
                TrackFeed::Acceleration {
                    rate,
                    stop_kind,
                    stop_value,
                },
            ) => {
                let payload = match stop_kind {
                    AccStopKind::None => AccelerationPayload {
                        acceleration: *rate,
                        stop_kind: AccStopKind::Time,
                        stop_value: DEFAULT_ACC_STOP,
                    },
                    _ => AccelerationPayload {
                        acceleration: *rate,
                        stop_kind: *stop_kind,
                        stop_value: *stop_value,
                    },
                };
                let id = own_track(&mut entity.acc_track_id, || ids.next_acc_track());
                self.acceleration
                    .entry(id.clone())
                    .or_insert_with(|| AccelerationTrack::new(id))
                    .insert(trigger.node(payload))
            }
            (
                EntityKind::Vehicle,
                TrackFeed::Merge {
                    target_lane,
                    offset,
                    duration,
                },
            ) => {
                let payload = match offset {
                    Some(offset) => MergePayload {
                        direction: if *offset < 0.0 { MERGE_RIGHT } else { MERGE_LEFT },
                        duration: *duration,
                        offset: offset.abs(),
                    },
                    None => MergePayload {
                        direction: *target_lane,
                        duration: *duration,
                        offset: 0.0,
                    },
                };
                let id = own_track(&mut entity.merge_track_id, || ids.next_merge_track());
                self.merge
                    .entry(id.clone())
                    .or_insert_with(|| MergeTrack::new(id))
                    .insert(trigger.node(payload))
            }
            (EntityKind::Vehicle, TrackFeed::Velocity { target }) => {
                let id = entity.id.to_string();
                self.velocity
                    .entry(id.clone())
                    .or_insert_with(|| VelocityTrack::new(id))
                    .insert(trigger.node(VelocityPayload { velocity: *target }))
            }
            (EntityKind::Pedestrian, TrackFeed::Velocity { target }) => {
                if trigger.value < IDLE_PEDESTRIAN_SPEED && *target < IDLE_PEDESTRIAN_SPEED {
                    return false;
                }
                let direction = entity
                    .placement
                    .as_ref()
                    .map(|placement| placement.start_angle)
                    .unwrap_or_default();
                let id = entity.id.to_string();
                self.pedestrian_velocity
                    .entry(id.clone())
                    .or_insert_with(|| PedestrianVelocityTrack::new(id))
                    .insert(trigger.node(PedestrianVelocityPayload {
                        velocity: *target,
                        direction,
                    }))
            }
            _ => false,
        };
        if stored {
            debug!(
                entity = %entity.display_name,
                trigger = trigger.value,
                "track node stored"
            );
        }
        stored
    }

    /// Points every vehicle without its own timeline at the default tracks.
    pub fn assign_defaults<'e>(&self, vehicles: impl Iterator<Item = &'e mut ScenarioEntity>) {
        for vehicle in vehicles {
            vehicle
                .acc_track_id
                .get_or_insert_with(|| DEFAULT_TRACK_ID.to_string());
            vehicle
                .merge_track_id
                .get_or_insert_with(|| DEFAULT_TRACK_ID.to_string());
        }
    }
}

fn own_track(slot: &mut Option<String>, allocate: impl FnOnce() -> String) -> String {
    match slot {
        Some(id) if id != DEFAULT_TRACK_ID => id.clone(),
        _ => {
            let id = allocate();
            *slot = Some(id.clone());
            id
        }
    }
}
