use std::collections::BTreeMap;

use scn_core::EntityKind;

/// Track id every scene carries for entities without their own timeline.
pub const DEFAULT_TRACK_ID: &str = "1";

/// Counters for every generated id, owned by one lowering run.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    entities: BTreeMap<EntityKind, u32>,
    routes: u32,
    signals: u32,
    acc_tracks: u32,
    merge_tracks: u32,
    free_events: u32,
    ego_events: BTreeMap<u32, u32>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-based, per kind.
    pub fn next_entity(&mut self, kind: EntityKind) -> u32 {
        let counter = self.entities.entry(kind).or_insert(0);
        *counter += 1;
        *counter
    }

    /// 0-based, shared by every route in the document.
    pub fn next_route(&mut self) -> u32 {
        let id = self.routes;
        self.routes += 1;
        id
    }

    pub fn next_signal(&mut self) -> u32 {
        self.signals += 1;
        self.signals
    }

    /// Starts at `2`; `1` is the default track.
    pub fn next_acc_track(&mut self) -> String {
        self.acc_tracks += 1;
        (self.acc_tracks + 1).to_string()
    }

    pub fn next_merge_track(&mut self) -> String {
        self.merge_tracks += 1;
        (self.merge_tracks + 1).to_string()
    }

    pub fn next_free_event(&mut self) -> u32 {
        let id = self.free_events;
        self.free_events += 1;
        id
    }

    pub fn next_ego_event(&mut self, ego_id: u32) -> u32 {
        let counter = self.ego_events.entry(ego_id).or_insert(0);
        let id = *counter;
        *counter += 1;
        id
    }
}
