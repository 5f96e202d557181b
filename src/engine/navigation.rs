// Tile-graph pathfinding over the sphere surface.
//
// Layer 1: NavigationGraph: static traversability + weighted edges per tile.
// Layer 2: A* queries and waypoint simplification on top of it.
//
// Built once from terrain at startup and never mutated afterwards. Units are
// kept apart by separation steering and the collision grid, not baked here.

use glam::Vec3;

use super::sphere::{SphericalPos, safe_sin_phi, wrap_pi};
use super::world::{ClusterId, SurfaceWorld, TileId};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Cost of stepping onto an ordinary tile.
pub const BASE_EDGE_COST: f32 = 1.0;
/// Cost of stepping onto a tile that touches elevated terrain.
pub const CLEARANCE_EDGE_COST: f32 = 1.5;

const EPSILON: f32 = 1e-6;

// ============================================================================
// NAVIGATION GRAPH
// ============================================================================

/// One directed edge of the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavEdge {
    pub target: TileId,
    pub cost: f32,
}

/// Static traversability and connectivity of the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationGraph {
    /// True if agents may stand on this tile (not elevated, not polar).
    traversable: Vec<bool>,
    /// Outgoing edges per tile. Empty for non-traversable tiles.
    edges: Vec<Vec<NavEdge>>,
    /// Unit-sphere positions, for the A* heuristic.
    units: Vec<Vec3>,
    /// Cached angular coordinates per tile.
    spherical: Vec<SphericalPos>,
    /// Representative tile per zone, `None` only for empty zones.
    cluster_centers: Vec<Option<TileId>>,
    /// Longest chord spanned by any edge. Scales the heuristic so one unit
    /// of straight-line distance never outweighs one hop.
    max_edge_chord: f32,
    traversable_count: usize,
    edge_count: usize,
    cliff_count: usize,
}

impl NavigationGraph {
    /// Build the graph from the terrain collaborator.
    pub fn build(world: &dyn SurfaceWorld) -> Self {
        let n = world.tile_count();
        let units: Vec<Vec3> = (0..n).map(|t| world.tile_center(t).normalize_or_zero()).collect();
        let spherical: Vec<SphericalPos> = units.iter().map(|u| SphericalPos::from_vec(*u)).collect();

        let traversable: Vec<bool> = (0..n)
            .map(|t| !world.is_elevated(t) && !world.is_polar(t))
            .collect();

        // One pass: traversable tiles with at least one elevated neighbour.
        let cliff_adjacent: Vec<bool> = (0..n)
            .map(|t| traversable[t] && world.tile_neighbors(t).iter().any(|&nb| world.is_elevated(nb)))
            .collect();

        let mut edges = vec![Vec::new(); n];
        let mut max_edge_chord = 0.0f32;
        let mut edge_count = 0;
        for t in (0..n).filter(|&t| traversable[t]) {
            for &nb in world.tile_neighbors(t) {
                if nb == t || !traversable[nb] {
                    continue;
                }
                let cost = if cliff_adjacent[nb] { CLEARANCE_EDGE_COST } else { BASE_EDGE_COST };
                edges[t].push(NavEdge { target: nb, cost });
                max_edge_chord = max_edge_chord.max(units[t].distance(units[nb]));
                edge_count += 1;
            }
        }

        let mut graph = Self {
            traversable_count: traversable.iter().filter(|t| **t).count(),
            cliff_count: cliff_adjacent.iter().filter(|c| **c).count(),
            traversable,
            edges,
            units,
            spherical,
            cluster_centers: Vec::new(),
            max_edge_chord,
            edge_count,
        };
        graph.cluster_centers = (0..world.cluster_count())
            .map(|c| graph.compute_cluster_center(world, ClusterId(c as u32)))
            .collect();

        log::info!(
            "navigation graph: {} of {} tiles traversable, {} edges, {} cliff-adjacent",
            graph.traversable_count,
            n,
            graph.edge_count,
            graph.cliff_count
        );
        graph
    }

    /// Member tile nearest the zone centroid, preferring traversable members,
    /// then the globally nearest traversable tile, then any member.
    fn compute_cluster_center(&self, world: &dyn SurfaceWorld, cluster: ClusterId) -> Option<TileId> {
        let members = world.cluster_tiles(cluster);
        let first = *members.first()?;
        let centroid: Vec3 = members.iter().map(|&t| self.units[t]).sum::<Vec3>();
        let centroid = centroid.normalize_or_zero();
        if centroid == Vec3::ZERO {
            return Some(first);
        }
        nearest_to(&self.units, centroid, members.iter().copied().filter(|&t| self.traversable[t]))
            .or_else(|| nearest_to(&self.units, centroid, self.traversable_tiles()))
            .or(Some(first))
    }

    pub fn tile_count(&self) -> usize {
        self.traversable.len()
    }

    pub fn traversable_count(&self) -> usize {
        self.traversable_count
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    #[inline]
    pub fn is_traversable(&self, tile: TileId) -> bool {
        self.traversable.get(tile).copied().unwrap_or(false)
    }

    /// Traversable tile indices in ascending order.
    pub fn traversable_tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        self.traversable.iter().enumerate().filter(|(_, t)| **t).map(|(i, _)| i)
    }

    #[inline]
    pub fn edges(&self, tile: TileId) -> &[NavEdge] {
        self.edges.get(tile).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn tile_position(&self, tile: TileId) -> SphericalPos {
        self.spherical[tile]
    }

    pub fn cluster_center(&self, cluster: ClusterId) -> Option<TileId> {
        self.cluster_centers.get(cluster.index()).copied().flatten()
    }

    /// Nearest traversable tile to a surface point, by straight-line distance.
    pub fn nearest_traversable(&self, pos: SphericalPos) -> Option<TileId> {
        nearest_to(&self.units, pos.to_unit(), self.traversable_tiles())
    }

    /// Resolve the tile an agent should plan from: the tile under it when
    /// traversable, otherwise the nearest traversable tile.
    pub fn start_tile(&self, world: &dyn SurfaceWorld, pos: SphericalPos) -> Option<TileId> {
        match world.tile_at(pos) {
            Some(t) if self.is_traversable(t) => Some(t),
            _ => self.nearest_traversable(pos),
        }
    }

    /// Straight-line lower bound on the remaining cost from `from` to `to`.
    pub fn heuristic(&self, from: TileId, to: TileId) -> f32 {
        if self.max_edge_chord <= EPSILON {
            return 0.0;
        }
        self.units[from].distance(self.units[to]) / self.max_edge_chord * BASE_EDGE_COST
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Weighted shortest path from `from` to `to`, both inclusive.
    ///
    /// `None` when either end is not traversable or no route exists; callers
    /// treat that as "objective unreachable for now".
    pub fn find_path(&self, from: TileId, to: TileId) -> Option<Vec<TileId>> {
        if !self.is_traversable(from) || !self.is_traversable(to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        let n = self.traversable.len();
        let mut g_score = vec![f32::INFINITY; n];
        let mut came_from: Vec<Option<TileId>> = vec![None; n];
        let mut closed = vec![false; n];
        let mut in_open = vec![false; n];
        // Array-backed open set: a few thousand nodes at most, so a linear
        // scan for the best f-score beats heap bookkeeping. The first best
        // entry wins, i.e. ties go to insertion order.
        let mut open: Vec<(TileId, f32)> = Vec::new();

        g_score[from] = 0.0;
        open.push((from, self.heuristic(from, to)));
        in_open[from] = true;

        while !open.is_empty() {
            let mut best = 0;
            for (i, entry) in open.iter().enumerate().skip(1) {
                if entry.1 < open[best].1 {
                    best = i;
                }
            }
            let (current, _) = open.remove(best);
            in_open[current] = false;

            if current == to {
                return Some(reconstruct(&came_from, current));
            }
            closed[current] = true;

            for edge in &self.edges[current] {
                if closed[edge.target] {
                    continue;
                }
                let tentative = g_score[current] + edge.cost;
                if tentative >= g_score[edge.target] {
                    continue;
                }
                g_score[edge.target] = tentative;
                came_from[edge.target] = Some(current);
                let f = tentative + self.heuristic(edge.target, to);
                if in_open[edge.target] {
                    if let Some(entry) = open.iter_mut().find(|e| e.0 == edge.target) {
                        entry.1 = f;
                    }
                } else {
                    open.push((edge.target, f));
                    in_open[edge.target] = true;
                }
            }
        }
        None
    }

    /// Summed edge cost along a path, `None` if consecutive tiles are not
    /// linked by an edge.
    pub fn path_cost(&self, path: &[TileId]) -> Option<f32> {
        path.windows(2).try_fold(0.0, |acc, pair| {
            self.edges(pair[0])
                .iter()
                .find(|e| e.target == pair[1])
                .map(|e| acc + e.cost)
        })
    }

    /// Route-aware distance between two tiles, or `None` if unreachable.
    pub fn path_distance(&self, from: TileId, to: TileId) -> Option<f32> {
        self.find_path(from, to).and_then(|p| self.path_cost(&p))
    }

    /// Convert a tile path into steering waypoints, keeping only the ends and
    /// turns sharper than `turn_threshold` radians.
    pub fn path_to_waypoints(&self, path: &[TileId], turn_threshold: f32) -> Vec<SphericalPos> {
        let points: Vec<SphericalPos> = path.iter().map(|&t| self.spherical[t]).collect();
        simplify_waypoints(&points, turn_threshold)
    }
}

// ============================================================================
// PATH HELPERS
// ============================================================================

/// Tile among `tiles` whose unit position lies closest to `target`.
fn nearest_to(units: &[Vec3], target: Vec3, tiles: impl Iterator<Item = TileId>) -> Option<TileId> {
    tiles.max_by(|a, b| target.dot(units[*a]).total_cmp(&target.dot(units[*b])))
}

fn reconstruct(came_from: &[Option<TileId>], goal: TileId) -> Vec<TileId> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(prev) = came_from[current] {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

/// Local (north-ish, east-ish) step from `a` to `b` in theta/phi space,
/// with longitude wrapped and scaled by latitude.
fn segment(a: &SphericalPos, b: &SphericalPos) -> (f32, f32) {
    let d_theta = wrap_pi(b.theta - a.theta) * safe_sin_phi(a.phi);
    let d_phi = b.phi - a.phi;
    (-d_phi, d_theta)
}

fn turn_angle(prev: &SphericalPos, here: &SphericalPos, next: &SphericalPos) -> Option<f32> {
    let (n1, e1) = segment(prev, here);
    let (n2, e2) = segment(here, next);
    if (n1 == 0.0 && e1 == 0.0) || (n2 == 0.0 && e2 == 0.0) {
        return None;
    }
    Some(wrap_pi(e2.atan2(n2) - e1.atan2(n1)).abs())
}

/// Drop interior points whose turn angle does not exceed `turn_threshold`.
///
/// Passes repeat until nothing more is removed, so the result is a fixed
/// point: simplifying it again returns it unchanged.
pub fn simplify_waypoints(points: &[SphericalPos], turn_threshold: f32) -> Vec<SphericalPos> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut current = points.to_vec();
    loop {
        let next = simplify_pass(&current, turn_threshold);
        if next.len() == current.len() {
            return next;
        }
        current = next;
    }
}

fn simplify_pass(points: &[SphericalPos], turn_threshold: f32) -> Vec<SphericalPos> {
    let last = points.len() - 1;
    let mut out = Vec::with_capacity(points.len());
    out.push(points[0]);
    for i in 1..last {
        // Duplicates and zero-length segments carry no direction and go.
        if turn_angle(&points[i - 1], &points[i], &points[i + 1])
            .is_some_and(|angle| angle > turn_threshold)
        {
            out.push(points[i]);
        }
    }
    out.push(points[last]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hexsphere::HexSphere;
    use proptest::prelude::*;
    use std::cmp::Ordering;
    use std::collections::BinaryHeap;
    use std::f32::consts::PI;

    /// Tiles spread on a Fibonacci lattice with explicit adjacency.
    fn world_from_edges(n: usize, links: &[(usize, usize)], elevated: &[usize]) -> HexSphere {
        let positions: Vec<Vec3> = (0..n)
            .map(|i| {
                let y = 0.8 - 1.6 * (i as f32 + 0.5) / n as f32;
                let r = (1.0 - y * y).sqrt();
                let a = 2.399_963 * i as f32;
                Vec3::new(r * a.cos(), y, r * a.sin())
            })
            .collect();
        let mut neighbors = vec![Vec::new(); n];
        for &(a, b) in links {
            if a != b {
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        let mut elev = vec![false; n];
        for &e in elevated {
            elev[e] = true;
        }
        HexSphere::from_parts(10.0, positions, neighbors, elev, vec![false; n], vec![(0..n).collect()]).unwrap()
    }

    #[derive(PartialEq)]
    struct Entry(f32, TileId);
    impl Eq for Entry {}
    impl Ord for Entry {
        fn cmp(&self, other: &Self) -> Ordering {
            other.0.total_cmp(&self.0)
        }
    }
    impl PartialOrd for Entry {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    /// Reference shortest costs from `src` to every tile.
    fn dijkstra(graph: &NavigationGraph, src: TileId) -> Vec<f32> {
        let mut dist = vec![f32::INFINITY; graph.tile_count()];
        if !graph.is_traversable(src) {
            return dist;
        }
        dist[src] = 0.0;
        let mut heap = BinaryHeap::new();
        heap.push(Entry(0.0, src));
        while let Some(Entry(d, t)) = heap.pop() {
            if d > dist[t] {
                continue;
            }
            for e in graph.edges(t) {
                let nd = d + e.cost;
                if nd < dist[e.target] {
                    dist[e.target] = nd;
                    heap.push(Entry(nd, e.target));
                }
            }
        }
        dist
    }

    #[test]
    fn isolated_tile_has_no_edges_and_no_path() {
        // Tile 0 touches only elevated tiles 1 and 2.
        let w = world_from_edges(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)], &[1, 2]);
        let g = NavigationGraph::build(&w);
        assert!(g.is_traversable(0));
        assert!(g.edges(0).is_empty());
        assert_eq!(g.find_path(0, 3), None);
        assert_eq!(g.find_path(0, 4), None);
    }

    #[test]
    fn same_tile_path_is_single_tile() {
        let w = world_from_edges(3, &[(0, 1), (1, 2)], &[]);
        let g = NavigationGraph::build(&w);
        assert_eq!(g.find_path(1, 1), Some(vec![1]));
    }

    #[test]
    fn non_traversable_endpoint_has_no_path() {
        let w = world_from_edges(3, &[(0, 1), (1, 2)], &[2]);
        let g = NavigationGraph::build(&w);
        assert_eq!(g.find_path(0, 2), None);
        assert_eq!(g.find_path(2, 2), None);
    }

    #[test]
    fn cliff_adjacent_targets_cost_more() {
        // 0-1-2 with 1 touching elevated 3.
        let w = world_from_edges(4, &[(0, 1), (1, 2), (1, 3)], &[3]);
        let g = NavigationGraph::build(&w);
        let to_one = g.edges(0).iter().find(|e| e.target == 1).unwrap();
        let to_two = g.edges(1).iter().find(|e| e.target == 2).unwrap();
        assert_eq!(to_one.cost, CLEARANCE_EDGE_COST);
        assert_eq!(to_two.cost, BASE_EDGE_COST);
    }

    #[test]
    fn avoids_cliff_when_detour_is_cheaper() {
        // Direct 0-1-2 where 1 hugs a cliff (cost 1.5 + 1) versus 0-3-2 (1 + 1).
        let w = world_from_edges(5, &[(0, 1), (1, 2), (0, 3), (3, 2), (1, 4)], &[4]);
        let g = NavigationGraph::build(&w);
        assert_eq!(g.find_path(0, 2), Some(vec![0, 3, 2]));
    }

    #[test]
    fn building_twice_is_identical() {
        let w = world_from_edges(8, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6), (6, 7), (2, 6)], &[4]);
        assert_eq!(NavigationGraph::build(&w), NavigationGraph::build(&w));
    }

    #[test]
    fn zone_without_traversable_tiles_falls_back_to_global_nearest() {
        let positions = vec![Vec3::X, Vec3::new(1.0, 0.1, 0.0), Vec3::Z];
        let w = HexSphere::from_parts(
            1.0,
            positions,
            vec![vec![1], vec![0, 2], vec![1]],
            vec![true, true, false],
            vec![false; 3],
            vec![vec![0, 1], vec![2]],
        )
        .unwrap();
        let g = NavigationGraph::build(&w);
        assert_eq!(g.cluster_center(ClusterId(0)), Some(2));
        assert_eq!(g.cluster_center(ClusterId(1)), Some(2));
    }

    #[test]
    fn zone_center_survives_a_world_without_traversable_tiles() {
        let w = HexSphere::from_parts(
            1.0,
            vec![Vec3::X, Vec3::Z],
            vec![vec![1], vec![0]],
            vec![true, true],
            vec![false; 2],
            vec![vec![1, 0]],
        )
        .unwrap();
        let g = NavigationGraph::build(&w);
        assert_eq!(g.cluster_center(ClusterId(0)), Some(1));
    }

    #[test]
    fn straight_line_keeps_only_endpoints() {
        let pts: Vec<SphericalPos> = (0..6).map(|i| SphericalPos::new(0.1 * i as f32, PI / 2.0)).collect();
        let out = simplify_waypoints(&pts, 15f32.to_radians());
        assert_eq!(out, vec![pts[0], pts[5]]);
    }

    #[test]
    fn right_angle_turn_is_kept() {
        let pts = vec![
            SphericalPos::new(0.0, PI / 2.0),
            SphericalPos::new(0.1, PI / 2.0),
            SphericalPos::new(0.2, PI / 2.0),
            SphericalPos::new(0.2, PI / 2.0 - 0.1),
            SphericalPos::new(0.2, PI / 2.0 - 0.2),
        ];
        let out = simplify_waypoints(&pts, 15f32.to_radians());
        assert_eq!(out, vec![pts[0], pts[2], pts[4]]);
    }

    #[test]
    fn degenerate_paths_pass_through() {
        let w = world_from_edges(2, &[(0, 1)], &[]);
        let g = NavigationGraph::build(&w);
        assert!(g.path_to_waypoints(&[], 0.2).is_empty());
        assert_eq!(g.path_to_waypoints(&[1], 0.2), vec![g.tile_position(1)]);
        assert_eq!(g.path_to_waypoints(&[0, 1], 0.2).len(), 2);
    }

    fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<usize>)> {
        (4usize..16).prop_flat_map(|n| {
            (
                Just(n),
                proptest::collection::vec((0..n, 0..n), 0..n * 3),
                proptest::collection::vec(0..n, 0..n / 3),
            )
        })
    }

    proptest! {
        #[test]
        fn astar_matches_dijkstra((n, links, elevated) in arb_graph()) {
            let w = world_from_edges(n, &links, &elevated);
            let g = NavigationGraph::build(&w);
            for src in 0..n {
                let reference = dijkstra(&g, src);
                for dst in 0..n {
                    match g.find_path(src, dst) {
                        Some(path) => {
                            prop_assert_eq!(path[0], src);
                            prop_assert_eq!(*path.last().unwrap(), dst);
                            let cost = g.path_cost(&path).unwrap();
                            prop_assert!((cost - reference[dst]).abs() < 1e-4,
                                "{} -> {}: astar {} dijkstra {}", src, dst, cost, reference[dst]);
                        }
                        None => prop_assert!(!g.is_traversable(dst) || reference[dst].is_infinite()),
                    }
                }
            }
        }

        #[test]
        fn heuristic_never_overestimates((n, links, elevated) in arb_graph()) {
            let w = world_from_edges(n, &links, &elevated);
            let g = NavigationGraph::build(&w);
            for src in g.traversable_tiles() {
                let reference = dijkstra(&g, src);
                for dst in g.traversable_tiles() {
                    if reference[dst].is_finite() {
                        prop_assert!(g.heuristic(src, dst) <= reference[dst] + 1e-4);
                    }
                }
            }
        }

        #[test]
        fn simplification_is_idempotent(
            raw in proptest::collection::vec((0.0f32..6.28, 0.3f32..2.8), 0..24),
            threshold_deg in 1.0f32..60.0,
        ) {
            let pts: Vec<SphericalPos> = raw.iter().map(|(t, p)| SphericalPos::new(*t, *p)).collect();
            let threshold = threshold_deg.to_radians();
            let once = simplify_waypoints(&pts, threshold);
            let twice = simplify_waypoints(&once, threshold);
            prop_assert_eq!(once, twice);
        }
    }
}
