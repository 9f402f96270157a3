use std::collections::BTreeMap;

use scn_core::{
    BehaviorKind, EntityProfile, LowerError, Placement, Route, RouteKind, ScenarioEntity, Waypoint,
};
use scn_parser::XmlElementNode;
use tracing::{debug, warn};

use crate::catalog::CatalogStore;
use crate::context::LowerContext;
use crate::entities::EntityRegistry;
use crate::projection::LanePoint;

/// A document position in geographic and, when on the map, lane coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPosition {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
    /// Radians.
    pub heading: f64,
    pub lane: Option<LanePoint>,
}

impl ResolvedPosition {
    fn from_lane(point: LanePoint, heading: Option<f64>) -> Self {
        Self {
            lon: point.lon,
            lat: point.lat,
            alt: point.alt,
            heading: heading.unwrap_or(point.yaw),
            lane: Some(point),
        }
    }

    pub fn waypoint(&self) -> Waypoint {
        Waypoint {
            lon: self.lon,
            lat: self.lat,
            alt: self.alt,
            heading: self.heading,
            road_id: self.lane.map(|lane| lane.road_id),
            lane_id: self.lane.map(|lane| lane.lane_id),
            shift: self.lane.map(|lane| lane.shift),
            offset: self.lane.map(|lane| lane.offset),
        }
    }

    pub fn placement(&self, start_angle: f64) -> Placement {
        Placement {
            lon: self.lon,
            lat: self.lat,
            alt: self.alt,
            heading: self.heading,
            road_id: self.lane.map(|lane| lane.road_id),
            lane_id: self.lane.map(|lane| lane.lane_id).unwrap_or_default(),
            start_shift: self.lane.map(|lane| lane.shift).unwrap_or_default(),
            offset: self.lane.map(|lane| lane.offset).unwrap_or_default(),
            start_angle: normalize_degrees(start_angle),
        }
    }
}

pub fn normalize_degrees(angle: f64) -> f64 {
    let normalized = angle.rem_euclid(360.0);
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Resolves the single populated child of a `Position` node.
pub fn resolve_position(
    ctx: &mut LowerContext<'_>,
    position: &XmlElementNode,
    anchors: &EntityRegistry,
) -> Option<ResolvedPosition> {
    let Some(shape) = position.first_element() else {
        ctx.warn(
            "POSITION_UNRESOLVED",
            format!("{} is empty", position.describe()),
        );
        return None;
    };
    let resolved = match shape.name.as_str() {
        "WorldPosition" => world_position(ctx, shape),
        "RelativeWorldPosition" => relative_world_position(ctx, shape, anchors),
        "LanePosition" => {
            let road_id = ctx.value(shape, "roadId") as u64;
            let lane_id = ctx.value(shape, "laneId") as i64;
            let s = ctx.value(shape, "s");
            let offset = ctx.value(shape, "offset");
            let heading = shape
                .child("Orientation")
                .filter(|orientation| orientation.attr("h").is_some())
                .map(|orientation| ctx.value(orientation, "h"));
            ctx.projection
                .lonlat_from_lane(road_id, lane_id, s, offset)
                .map(|point| ResolvedPosition::from_lane(point, heading))
        }
        "RelativeLanePosition" => {
            let anchor = anchor_placement(ctx, shape, anchors)?;
            let lane_id = anchor.lane_id + ctx.value(shape, "dLane") as i64;
            let s = anchor.start_shift + ctx.value(shape, "ds");
            let offset = if shape.attr("offset").is_some() {
                anchor.offset + ctx.value(shape, "offset")
            } else {
                0.0
            };
            ctx.projection
                .lonlat_from_lane(anchor.road_id.unwrap_or_default(), lane_id, s, offset)
                .map(|point| ResolvedPosition::from_lane(point, None))
        }
        "RoadPosition" => {
            let road_id = ctx.value(shape, "roadId") as u64;
            let s = ctx.value(shape, "s");
            let t = ctx.value(shape, "t");
            ctx.projection
                .lonlat_from_road(road_id, s, t)
                .map(|point| ResolvedPosition::from_lane(point, None))
        }
        "RelativeRoadPosition" => {
            let anchor = anchor_placement(ctx, shape, anchors)?;
            let s = anchor.start_shift + ctx.value(shape, "ds");
            let t = anchor.offset + ctx.value(shape, "dt");
            ctx.projection
                .lonlat_from_lane(anchor.road_id.unwrap_or_default(), anchor.lane_id, s, t)
                .map(|point| ResolvedPosition::from_lane(point, None))
        }
        other => {
            ctx.warn(
                "POSITION_UNRESOLVED",
                format!("position kind \"{}\" is not supported", other),
            );
            return None;
        }
    };
    if resolved.is_none() {
        warn!(position = %shape.describe(), "position is off the road network");
        ctx.warn(
            "POSITION_UNRESOLVED",
            format!("{} is off the road network", shape.describe()),
        );
    }
    resolved
}

fn world_position(ctx: &mut LowerContext<'_>, shape: &XmlElementNode) -> Option<ResolvedPosition> {
    let x = ctx.value(shape, "x");
    let y = ctx.value(shape, "y");
    let z = ctx.value(shape, "z");
    let heading = ctx.value(shape, "h");
    let (lon, lat) = if ctx.dialect.authors_geographic_world_positions() {
        (x, y)
    } else {
        match ctx.projection.local_to_lonlat(x, y, z) {
            Some(point) => (point.lon, point.lat),
            None => (x, y),
        }
    };
    Some(ResolvedPosition {
        lon,
        lat,
        alt: z,
        heading,
        lane: ctx.projection.road_from_lonlat(lon, lat),
    })
}

fn relative_world_position(
    ctx: &mut LowerContext<'_>,
    shape: &XmlElementNode,
    anchors: &EntityRegistry,
) -> Option<ResolvedPosition> {
    let anchor = anchor_placement(ctx, shape, anchors)?;
    let (x, y) = ctx.projection.lonlat_to_local(anchor.lon, anchor.lat)?;
    let alt = anchor.alt + ctx.value(shape, "dz");
    let dx = ctx.value(shape, "dx");
    let dy = ctx.value(shape, "dy");
    let point = ctx.projection.local_to_lonlat(x + dx, y + dy, alt)?;
    Some(ResolvedPosition {
        lon: point.lon,
        lat: point.lat,
        alt,
        heading: 0.0,
        lane: ctx.projection.road_from_lonlat(point.lon, point.lat),
    })
}

fn anchor_placement(
    ctx: &mut LowerContext<'_>,
    shape: &XmlElementNode,
    anchors: &EntityRegistry,
) -> Option<Placement> {
    let name = ctx.attr_or(shape, "entityRef", "");
    let placement = anchors
        .find(&name)
        .and_then(|entity| entity.placement.clone());
    if placement.is_none() {
        ctx.warn(
            "POSITION_UNRESOLVED",
            format!("relative position refers to unplaced entity \"{}\"", name),
        );
    }
    placement
}

/// Start angle an entity is placed with, in degrees.
pub fn start_angle(ctx: &LowerContext<'_>, entity: &ScenarioEntity, heading: f64) -> f64 {
    let authored = match &entity.profile {
        EntityProfile::Vehicle(profile) => profile.trajectory_angle,
        EntityProfile::Pedestrian(profile) => profile.angle,
        _ => None,
    };
    match authored {
        Some(angle)
            if entity.behavior_kind == BehaviorKind::TrajectoryFollow
                && !ctx.dialect.trajectory_angle_from_heading() =>
        {
            angle
        }
        _ => heading.to_degrees(),
    }
}

/// Places `owner` at the position of a `TeleportAction`.
pub fn teleport(
    ctx: &mut LowerContext<'_>,
    registry: &mut EntityRegistry,
    owner: &str,
    action: &XmlElementNode,
) {
    let Some(position) = action.child("Position") else {
        ctx.warn(
            "POSITION_UNRESOLVED",
            format!("{} has no Position", action.describe()),
        );
        return;
    };
    let Some(resolved) = resolve_position(ctx, position, registry) else {
        return;
    };
    let Some(entity) = registry.find(owner) else {
        ctx.warn("UNKNOWN_ENTITY", format!("teleport of unknown entity \"{}\"", owner));
        return;
    };
    let angle = start_angle(ctx, entity, resolved.heading);
    let placement = resolved.placement(angle);
    if let Some(entity) = registry.find_mut(owner) {
        debug!(entity = owner, lane = placement.lane_id, "entity placed");
        entity.placement = Some(placement);
    }
}

/// Waypoints a routing action asks for, before they become a `Route`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub kind: RouteKind,
    pub points: Vec<ResolvedPosition>,
}

impl RoutePlan {
    pub fn implicit(placement: &Placement) -> Self {
        Self {
            kind: RouteKind::Implicit,
            points: vec![ResolvedPosition {
                lon: placement.lon,
                lat: placement.lat,
                alt: placement.alt,
                heading: placement.heading,
                lane: placement.road_id.map(|road_id| LanePoint {
                    lon: placement.lon,
                    lat: placement.lat,
                    alt: placement.alt,
                    road_id,
                    lane_id: placement.lane_id,
                    shift: placement.start_shift,
                    offset: placement.offset,
                    yaw: placement.heading,
                }),
            }],
        }
    }
}

/// Reads the waypoints of a `RoutingAction` node.
pub fn routing_plan(
    ctx: &mut LowerContext<'_>,
    routing: &XmlElementNode,
    anchors: &EntityRegistry,
    owner: &str,
) -> Option<RoutePlan> {
    if let Some(assign) = routing.child("AssignRouteAction") {
        let route = match assign.child("Route") {
            Some(route) => Some(route.clone()),
            None => catalogued(ctx, assign, |store, name| store.route(name)),
        }?;
        let points = route
            .children_named("Waypoint")
            .filter_map(|waypoint| waypoint.child("Position"))
            .filter_map(|position| resolve_position(ctx, position, anchors))
            .collect::<Vec<_>>();
        return Some(RoutePlan {
            kind: RouteKind::Assigned,
            points,
        });
    }

    if let Some(follow) = routing.child("FollowTrajectoryAction") {
        let inline = follow
            .child("Trajectory")
            .or_else(|| follow.descend(&["TrajectoryRef", "Trajectory"]))
            .cloned();
        let trajectory = match inline {
            Some(trajectory) => Some(trajectory),
            None => {
                let holder = follow.child("TrajectoryRef").unwrap_or(follow);
                catalogued(ctx, holder, |store, name| store.trajectory(name))
            }
        }?;
        let points = trajectory
            .descend(&["Shape", "Polyline"])
            .map(|polyline| {
                polyline
                    .children_named("Vertex")
                    .filter_map(|vertex| vertex.child("Position"))
                    .filter_map(|position| resolve_position(ctx, position, anchors))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        return Some(RoutePlan {
            kind: RouteKind::Trajectory,
            points,
        });
    }

    if let Some(acquire) = routing.child("AcquirePositionAction") {
        let mut points = Vec::new();
        if let Some(origin) = anchors.find(owner).and_then(|entity| entity.placement.as_ref()) {
            points.extend(RoutePlan::implicit(origin).points);
        }
        if let Some(position) = acquire.child("Position") {
            points.extend(resolve_position(ctx, position, anchors));
        }
        return Some(RoutePlan {
            kind: RouteKind::AcquirePosition,
            points,
        });
    }

    ctx.warn(
        "UNSUPPORTED_ACTION",
        format!("{} has no supported routing branch", routing.describe()),
    );
    None
}

fn catalogued(
    ctx: &mut LowerContext<'_>,
    holder: &XmlElementNode,
    fetch: impl Fn(&dyn CatalogStore, &str) -> Option<XmlElementNode>,
) -> Option<XmlElementNode> {
    let reference = holder.child("CatalogReference")?;
    let entry_name = ctx.attr_or(reference, "entryName", "");
    let fragment = fetch(ctx.catalog.store(), &entry_name);
    if fragment.is_none() {
        ctx.diagnostics.record(&LowerError::CatalogMiss {
            kind: reference.attr("catalogName").unwrap_or("Route").to_string(),
            name: entry_name,
        });
    }
    fragment
}

/// Turns a plan into a stored route owned by `owner`.
///
/// An empty plan is rejected and an owner that already holds a route keeps
/// it; both return `None`.
pub fn attach_route(
    ctx: &mut LowerContext<'_>,
    registry: &mut EntityRegistry,
    routes: &mut BTreeMap<u32, Route>,
    owner: &str,
    plan: RoutePlan,
) -> Option<u32> {
    if plan.points.is_empty() {
        ctx.diagnostics
            .record(&LowerError::EmptyRoute(owner.to_string()));
        return None;
    }
    let Some(entity) = registry.find_mut(owner) else {
        ctx.warn("UNKNOWN_ENTITY", format!("route for unknown entity \"{}\"", owner));
        return None;
    };
    if let Some(existing) = entity.route_id {
        warn!(entity = owner, route = existing, "entity already holds a route");
        ctx.warn(
            "ROUTE_IGNORED",
            format!("\"{}\" already holds route {}", owner, existing),
        );
        return None;
    }

    let id = ctx.ids.next_route();
    entity.route_id = Some(id);
    let path = plan
        .points
        .iter()
        .map(ResolvedPosition::waypoint)
        .collect::<Vec<_>>();
    let start = path[0].summary();
    let end = (path.len() > 1).then(|| path[path.len() - 1].summary());
    let mids = if path.len() > 2 {
        path[1..path.len() - 1]
            .iter()
            .map(Waypoint::summary)
            .collect::<Vec<_>>()
            .join(";")
    } else {
        String::new()
    };
    routes.insert(
        id,
        Route {
            id,
            owner: owner.to_string(),
            kind: plan.kind,
            start,
            end,
            mids,
            path,
        },
    );
    Some(id)
}
