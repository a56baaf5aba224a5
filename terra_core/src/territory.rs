//! The territory geometry engine.
//!
//! Closed-loop detection and captured area work on the sphere through
//! [`geodesy`](crate::geodesy). Unions are planar (x = lng, y = lat), which
//! is accurate at the scale of a single territory, and use `geo`'s boolean
//! operations so overlapping boundaries are merged rather than concatenated.

use std::collections::HashMap;

use geo::{Area, BooleanOps, Coord, Intersects, Line, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use terra_env::{GeoPoint, OwnerId};
use tracing::debug;

use crate::geodesy;

/// Planar area (deg²) below which a ring encloses nothing, far under 1 mm².
const MIN_PLANAR_AREA: f64 = 1e-15;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Thresholds for [`TerritoryEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritoryConfig {
    /// First-to-last distance that closes a path (default: 50 m)
    pub closure_distance_m: f64,

    /// Closure threshold for the best-loop search (default: 30 m)
    pub loop_threshold_m: f64,

    /// Loops at or below this area are GPS noise (default: 100 m²)
    pub min_loop_area_m2: f64,

    /// Paths shorter than this are not searched (default: 10)
    pub min_loop_points: usize,

    /// Minimum index span of a loop candidate (default: 5)
    pub min_loop_span: usize,
}

impl Default for TerritoryConfig {
    fn default() -> Self {
        Self {
            closure_distance_m: 50.0,
            loop_threshold_m: 30.0,
            min_loop_area_m2: 100.0,
            min_loop_points: 10,
            min_loop_span: 5,
        }
    }
}

/// Why a ring cannot take part in a union.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TerritoryError {
    #[error("Ring has {0} distinct points, need at least 3")]
    TooFewPoints(usize),

    #[error("Ring contains non-finite or out-of-range coordinates")]
    InvalidCoordinates,

    #[error("Ring intersects itself")]
    SelfIntersecting,

    #[error("Ring encloses no area")]
    ZeroArea,
}

// ============================================================================
// TERRITORY TYPES
// ============================================================================

/// A claimed region: closed exterior ring plus any holes left by a union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryPolygon {
    /// Closed ring (first == last)
    pub exterior: Vec<GeoPoint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<GeoPoint>>,
}

impl TerritoryPolygon {
    /// Wraps a ring, closing it if needed.
    pub fn from_ring(ring: &[GeoPoint]) -> Self {
        Self {
            exterior: close_ring(ring),
            holes: Vec::new(),
        }
    }

    /// Spherical area in m², holes subtracted.
    pub fn area_m2(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| geodesy::polygon_area(h)).sum();
        (geodesy::polygon_area(&self.exterior) - holes).max(0.0)
    }
}

/// Territories grouped by owner, as produced for a "view all territories" screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerritorySet {
    by_owner: HashMap<OwnerId, Vec<TerritoryPolygon>>,
}

impl TerritorySet {
    pub fn get(&self, owner: &OwnerId) -> Option<&[TerritoryPolygon]> {
        self.by_owner.get(owner).map(Vec::as_slice)
    }

    pub fn owners(&self) -> impl Iterator<Item = &OwnerId> {
        self.by_owner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OwnerId, &Vec<TerritoryPolygon>)> {
        self.by_owner.iter()
    }

    /// Number of owners.
    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }

    pub fn total_area_m2(&self, owner: &OwnerId) -> f64 {
        self.get(owner)
            .map(|polys| polys.iter().map(TerritoryPolygon::area_m2).sum())
            .unwrap_or(0.0)
    }

    pub fn into_inner(self) -> HashMap<OwnerId, Vec<TerritoryPolygon>> {
        self.by_owner
    }
}

/// The best loop inside a path, as inclusive indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopCapture {
    pub start: usize,
    pub end: usize,
    pub area_m2: f64,
}

impl LoopCapture {
    /// The loop's points within the path it was found in.
    pub fn points<'a>(&self, path: &'a [GeoPoint]) -> &'a [GeoPoint] {
        &path[self.start..=self.end]
    }
}

// ============================================================================
// TERRITORY ENGINE
// ============================================================================

/// Stateless geometry over path and ring snapshots.
#[derive(Debug, Clone, Default)]
pub struct TerritoryEngine {
    config: TerritoryConfig,
}

impl TerritoryEngine {
    pub fn new(config: TerritoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TerritoryConfig {
        &self.config
    }

    /// True when a path of at least 3 points ends near where it started.
    pub fn is_closed_loop(&self, points: &[GeoPoint]) -> bool {
        match (points.first(), points.last()) {
            (Some(&first), Some(&last)) if points.len() >= 3 => {
                geodesy::distance(first, last) <= self.config.closure_distance_m
            }
            _ => false,
        }
    }

    /// Enclosed area of a closed path, 0 otherwise.
    pub fn captured_area(&self, points: &[GeoPoint]) -> f64 {
        if !self.is_closed_loop(points) {
            return 0.0;
        }
        geodesy::polygon_area(&close_ring(points))
    }

    /// Searches a path for the largest enclosed loop.
    ///
    /// Every pair `(i, j)` with `j >= i + min_loop_span` whose points lie
    /// within `threshold_m` of each other is a candidate. A candidate closes
    /// either before the walk first leaves the neighbourhood of `points[i]`,
    /// or at the first point of its first return; later returns would count
    /// the enclosed region once per lap and are skipped. The largest area
    /// above the noise floor wins, earliest first on ties.
    pub fn find_largest_loop(&self, points: &[GeoPoint], threshold_m: f64) -> Option<LoopCapture> {
        if points.len() < self.config.min_loop_points {
            return None;
        }

        let mut best: Option<LoopCapture> = None;

        for i in 0..points.len() {
            let origin = points[i];
            let mut departed = false;

            for j in (i + 1)..points.len() {
                let inside = geodesy::distance(origin, points[j]) < threshold_m;

                let first_return = match (inside, departed) {
                    (false, false) => {
                        departed = true;
                        continue;
                    }
                    (false, true) => continue,
                    (true, false) => false,
                    (true, true) => true,
                };

                if j >= i + self.config.min_loop_span {
                    let area_m2 = geodesy::polygon_area(&points[i..=j]);
                    let improves = best.map_or(true, |b| area_m2 > b.area_m2);
                    if area_m2 > self.config.min_loop_area_m2 && improves {
                        best = Some(LoopCapture { start: i, end: j, area_m2 });
                    }
                }

                if first_return {
                    break;
                }
            }
        }

        best
    }

    /// [`find_largest_loop`](Self::find_largest_loop) with the configured threshold.
    pub fn find_largest_loop_default(&self, points: &[GeoPoint]) -> Option<LoopCapture> {
        self.find_largest_loop(points, self.config.loop_threshold_m)
    }

    /// Unions rings into a canonical non-overlapping set.
    ///
    /// Invalid rings are skipped; the result holds one polygon per disjoint
    /// region.
    pub fn unify_territories(&self, rings: &[Vec<GeoPoint>]) -> Vec<TerritoryPolygon> {
        let polygons: Vec<Polygon<f64>> = rings
            .iter()
            .enumerate()
            .filter_map(|(index, ring)| match to_planar(ring) {
                Ok(polygon) => Some(polygon),
                Err(reason) => {
                    debug!(index, %reason, "skipping territory ring");
                    None
                }
            })
            .collect();

        let mut polygons = polygons.into_iter();
        let Some(first) = polygons.next() else {
            return Vec::new();
        };

        let merged = polygons.fold(MultiPolygon::new(vec![first]), |acc, polygon| {
            acc.union(&MultiPolygon::new(vec![polygon]))
        });

        merged.0.iter().map(from_planar).collect()
    }

    /// Union ring of two territories when they overlap.
    ///
    /// `None` unless the two share positive area and the union is a single
    /// polygon, so neither claim can be dropped.
    pub fn merge_if_overlapping(&self, existing: &[GeoPoint], new: &[GeoPoint]) -> Option<Vec<GeoPoint>> {
        let a = to_planar(existing).ok()?;
        let b = to_planar(new).ok()?;
        // Touching at a point or along an edge is not an overlap
        if !a.intersects(&b) || a.intersection(&b).unsigned_area() <= 0.0 {
            return None;
        }

        let mut union = a.union(&b).0;
        if union.len() != 1 {
            return None;
        }
        union.pop().map(|p| ring_from_planar(p.exterior()))
    }

    /// Per-owner union of stored territory rings.
    pub fn territory_set(&self, owned_rings: &[(OwnerId, Vec<GeoPoint>)]) -> TerritorySet {
        let mut grouped: HashMap<OwnerId, Vec<Vec<GeoPoint>>> = HashMap::new();
        for (owner, ring) in owned_rings {
            grouped.entry(*owner).or_default().push(ring.clone());
        }

        let by_owner = grouped
            .into_iter()
            .map(|(owner, rings)| (owner, self.unify_territories(&rings)))
            .filter(|(_, polygons)| !polygons.is_empty())
            .collect();

        TerritorySet { by_owner }
    }
}

// ========== Ring helpers ==========

/// Returns the ring with its first point repeated at the end.
pub fn close_ring(ring: &[GeoPoint]) -> Vec<GeoPoint> {
    let mut closed = ring.to_vec();
    if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
        if first != last {
            closed.push(first);
        }
    }
    closed
}

/// Validates a ring and converts it to a planar polygon.
fn to_planar(ring: &[GeoPoint]) -> Result<Polygon<f64>, TerritoryError> {
    if ring.iter().any(|p| !p.is_valid()) {
        return Err(TerritoryError::InvalidCoordinates);
    }

    // Open ring without repeated vertices
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.len());
    for p in ring {
        let c = Coord { x: p.lng, y: p.lat };
        if coords.last() != Some(&c) {
            coords.push(c);
        }
    }
    while coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }

    let distinct = coords
        .iter()
        .enumerate()
        .filter(|(k, c)| !coords[..*k].contains(c))
        .count();
    if distinct < 3 {
        return Err(TerritoryError::TooFewPoints(distinct));
    }

    if is_self_intersecting(&coords) {
        return Err(TerritoryError::SelfIntersecting);
    }

    let polygon = Polygon::new(LineString::from(coords), vec![]);
    if polygon.unsigned_area() < MIN_PLANAR_AREA {
        return Err(TerritoryError::ZeroArea);
    }
    Ok(polygon)
}

/// Non-adjacent edges of an open ring touching or crossing.
fn is_self_intersecting(coords: &[Coord<f64>]) -> bool {
    let n = coords.len();
    let edges: Vec<Line<f64>> = (0..n)
        .map(|k| Line::new(coords[k], coords[(k + 1) % n]))
        .collect();

    for a in 0..n {
        for b in (a + 2)..n {
            // First and last edge share the closing vertex
            if a == 0 && b == n - 1 {
                continue;
            }
            if edges[a].intersects(&edges[b]) {
                return true;
            }
        }
    }
    false
}

fn ring_from_planar(line: &LineString<f64>) -> Vec<GeoPoint> {
    close_ring(&line.coords().map(|c| GeoPoint::new(c.y, c.x)).collect::<Vec<_>>())
}

fn from_planar(polygon: &Polygon<f64>) -> TerritoryPolygon {
    TerritoryPolygon {
        exterior: ring_from_planar(polygon.exterior()),
        holes: polygon.interiors().iter().map(ring_from_planar).collect(),
    }
}
