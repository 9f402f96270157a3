use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use scn_core::GeoPoint;

/// A geographic point together with its road/lane coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LanePoint {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
    pub road_id: u64,
    pub lane_id: i64,
    /// Longitudinal position along the road.
    pub shift: f64,
    /// Lateral distance from the lane center.
    pub offset: f64,
    pub yaw: f64,
}

/// Coordinate conversions the lowering pass needs from the road network.
///
/// Every call answers `None` when the input is off the map; callers keep the
/// raw coordinates and continue.
pub trait ProjectionOracle {
    fn lonlat_from_road(&self, road_id: u64, s: f64, t: f64) -> Option<LanePoint>;

    fn lonlat_from_lane(&self, road_id: u64, lane_id: i64, s: f64, t: f64) -> Option<LanePoint>;

    fn road_from_lonlat(&self, lon: f64, lat: f64) -> Option<LanePoint>;

    fn local_to_lonlat(&self, x: f64, y: f64, z: f64) -> Option<GeoPoint>;

    fn lonlat_to_local(&self, lon: f64, lat: f64) -> Option<(f64, f64)>;

    fn project_forward(&self, lon: f64, lat: f64, lane_id: i64, distance: f64) -> Option<GeoPoint>;
}

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Flat-earth road network: road `n` is a straight line along local `x`,
/// `road_spacing * (n - 1)` metres north of the origin, with lanes of equal
/// width on both sides. Negative lanes drive towards `+x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarProjection {
    pub origin_lon: f64,
    pub origin_lat: f64,
    pub lane_width: f64,
    pub road_spacing: f64,
    pub road_length: f64,
}

impl Default for PlanarProjection {
    fn default() -> Self {
        Self {
            origin_lon: 113.0,
            origin_lat: 28.0,
            lane_width: 3.5,
            road_spacing: 100.0,
            road_length: 10_000.0,
        }
    }
}

impl PlanarProjection {
    fn lon_scale(&self) -> f64 {
        METERS_PER_DEGREE * self.origin_lat.to_radians().cos()
    }

    fn road_y(&self, road_id: u64) -> f64 {
        (road_id.saturating_sub(1)) as f64 * self.road_spacing
    }

    fn lane_center(&self, lane_id: i64) -> f64 {
        let magnitude = (lane_id.unsigned_abs() as f64 - 0.5) * self.lane_width;
        if lane_id < 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn lane_at(&self, t: f64) -> i64 {
        let index = (t.abs() / self.lane_width).floor() as i64 + 1;
        if t < 0.0 {
            -index
        } else {
            index
        }
    }

    fn on_road(&self, road_id: u64, s: f64, t: f64) -> bool {
        road_id > 0
            && (0.0..=self.road_length).contains(&s)
            && t.abs() < self.road_spacing / 2.0
    }

    fn point(&self, road_id: u64, s: f64, t: f64) -> LanePoint {
        let lane_id = self.lane_at(t);
        let (lon, lat) = self.to_lonlat(s, self.road_y(road_id) + t);
        LanePoint {
            lon,
            lat,
            alt: 0.0,
            road_id,
            lane_id,
            shift: s,
            offset: t - self.lane_center(lane_id),
            yaw: if lane_id < 0 { 0.0 } else { std::f64::consts::PI },
        }
    }

    fn to_lonlat(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.origin_lon + x / self.lon_scale(),
            self.origin_lat + y / METERS_PER_DEGREE,
        )
    }

    fn to_local(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (lon - self.origin_lon) * self.lon_scale(),
            (lat - self.origin_lat) * METERS_PER_DEGREE,
        )
    }
}

impl ProjectionOracle for PlanarProjection {
    fn lonlat_from_road(&self, road_id: u64, s: f64, t: f64) -> Option<LanePoint> {
        self.on_road(road_id, s, t).then(|| self.point(road_id, s, t))
    }

    fn lonlat_from_lane(&self, road_id: u64, lane_id: i64, s: f64, t: f64) -> Option<LanePoint> {
        if lane_id == 0 {
            return None;
        }
        self.lonlat_from_road(road_id, s, self.lane_center(lane_id) + t)
    }

    fn road_from_lonlat(&self, lon: f64, lat: f64) -> Option<LanePoint> {
        let (x, y) = self.to_local(lon, lat);
        let index = (y / self.road_spacing).round();
        if index < 0.0 {
            return None;
        }
        let road_id = index as u64 + 1;
        let t = y - self.road_y(road_id);
        self.lonlat_from_road(road_id, x, t)
    }

    fn local_to_lonlat(&self, x: f64, y: f64, z: f64) -> Option<GeoPoint> {
        let (lon, lat) = self.to_lonlat(x, y);
        Some(GeoPoint { lon, lat, alt: z })
    }

    fn lonlat_to_local(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        Some(self.to_local(lon, lat))
    }

    fn project_forward(&self, lon: f64, lat: f64, lane_id: i64, distance: f64) -> Option<GeoPoint> {
        let start = self.road_from_lonlat(lon, lat)?;
        let lane = if lane_id == 0 { start.lane_id } else { lane_id };
        let s = if lane < 0 {
            start.shift + distance
        } else {
            start.shift - distance
        };
        let target = self.lonlat_from_lane(start.road_id, lane, s, start.offset)?;
        Some(GeoPoint {
            lon: target.lon,
            lat: target.lat,
            alt: target.alt,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Query {
    Road(u64, u64, u64),
    Lane(u64, i64, u64, u64),
    LonLat(u64, u64),
    Local(u64, u64, u64),
    ToLocal(u64, u64),
    Forward(u64, u64, i64, u64),
}

/// Memoizes every answer of the wrapped oracle by exact input bits.
#[derive(Debug)]
pub struct CachedProjection<P> {
    inner: P,
    lane_points: RefCell<HashMap<Query, Option<LanePoint>>>,
    geo_points: RefCell<HashMap<Query, Option<GeoPoint>>>,
    locals: RefCell<HashMap<Query, Option<(f64, f64)>>>,
    hits: Cell<usize>,
}

impl<P: ProjectionOracle> CachedProjection<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            lane_points: RefCell::new(HashMap::new()),
            geo_points: RefCell::new(HashMap::new()),
            locals: RefCell::new(HashMap::new()),
            hits: Cell::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn memo<T: Copy>(
        &self,
        cache: &RefCell<HashMap<Query, Option<T>>>,
        query: Query,
        compute: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        if let Some(answer) = cache.borrow().get(&query) {
            self.hits.set(self.hits.get() + 1);
            return *answer;
        }
        let answer = compute();
        cache.borrow_mut().insert(query, answer);
        answer
    }
}

impl<P: ProjectionOracle> ProjectionOracle for CachedProjection<P> {
    fn lonlat_from_road(&self, road_id: u64, s: f64, t: f64) -> Option<LanePoint> {
        self.memo(
            &self.lane_points,
            Query::Road(road_id, s.to_bits(), t.to_bits()),
            || self.inner.lonlat_from_road(road_id, s, t),
        )
    }

    fn lonlat_from_lane(&self, road_id: u64, lane_id: i64, s: f64, t: f64) -> Option<LanePoint> {
        self.memo(
            &self.lane_points,
            Query::Lane(road_id, lane_id, s.to_bits(), t.to_bits()),
            || self.inner.lonlat_from_lane(road_id, lane_id, s, t),
        )
    }

    fn road_from_lonlat(&self, lon: f64, lat: f64) -> Option<LanePoint> {
        self.memo(
            &self.lane_points,
            Query::LonLat(lon.to_bits(), lat.to_bits()),
            || self.inner.road_from_lonlat(lon, lat),
        )
    }

    fn local_to_lonlat(&self, x: f64, y: f64, z: f64) -> Option<GeoPoint> {
        self.memo(
            &self.geo_points,
            Query::Local(x.to_bits(), y.to_bits(), z.to_bits()),
            || self.inner.local_to_lonlat(x, y, z),
        )
    }

    fn lonlat_to_local(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        self.memo(
            &self.locals,
            Query::ToLocal(lon.to_bits(), lat.to_bits()),
            || self.inner.lonlat_to_local(lon, lat),
        )
    }

    fn project_forward(&self, lon: f64, lat: f64, lane_id: i64, distance: f64) -> Option<GeoPoint> {
        self.memo(
            &self.geo_points,
            Query::Forward(lon.to_bits(), lat.to_bits(), lane_id, distance.to_bits()),
            || self.inner.project_forward(lon, lat, lane_id, distance),
        )
    }
}
