// In-memory tessellated sphere implementing `SurfaceWorld`.
//
// Tiles are placed on a Fibonacci lattice, which gives near-uniform spacing
// and mostly six neighbours per tile, i.e. the hexagonal look of the real
// world mesh without needing its geometry. Used by the demo binary and by
// tests; `from_parts` accepts arbitrary synthetic topologies.

use glam::Vec3;
use rand::Rng;
use std::f32::consts::PI;

use super::error::{SimError, SimResult};
use super::sphere::SphericalPos;
use super::world::{ClusterId, Faction, SurfaceWorld, TerritoryState, TileId};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Capture tics required per tile of a zone.
pub const TICS_PER_TILE: u32 = 10;

const GOLDEN_ANGLE: f32 = 2.399_963_2;

/// Generation parameters for [`HexSphere::generate`].
#[derive(Debug, Clone, Copy)]
pub struct HexSphereParams {
    pub radius: f32,
    pub tile_count: usize,
    pub cluster_count: usize,
    /// Approximate share of non-polar tiles raised as impassable terrain.
    pub elevated_fraction: f32,
    /// Tiles within this phi of a pole are flagged polar.
    pub polar_margin: f32,
    /// Nearest tiles linked as neighbours before symmetrising.
    pub neighbor_count: usize,
}

impl Default for HexSphereParams {
    fn default() -> Self {
        Self {
            radius: super::config::SPHERE_RADIUS,
            tile_count: 2562,
            cluster_count: 48,
            elevated_fraction: 0.12,
            polar_margin: 0.2,
            neighbor_count: 6,
        }
    }
}

// ============================================================================
// TILE LOOKUP
// ============================================================================

/// Latitude/longitude buckets of tile indices for position -> tile queries.
struct TileLookup {
    phi_bins: usize,
    theta_bins: usize,
    bins: Vec<Vec<TileId>>,
}

impl TileLookup {
    fn new(spherical: &[SphericalPos]) -> Self {
        let n = spherical.len().max(1) as f32;
        let spacing = (4.0 * PI / n).sqrt();
        let phi_bins = ((PI / (2.0 * spacing)).floor() as usize).clamp(1, 90);
        let theta_bins = phi_bins * 2;
        let mut lookup = Self { phi_bins, theta_bins, bins: vec![Vec::new(); phi_bins * theta_bins] };
        for (tile, pos) in spherical.iter().enumerate() {
            let (r, c) = lookup.bin_of(pos);
            lookup.bins[r * theta_bins + c].push(tile);
        }
        lookup
    }

    fn bin_of(&self, pos: &SphericalPos) -> (usize, usize) {
        let r = ((pos.phi / PI) * self.phi_bins as f32) as usize;
        let c = ((pos.theta / std::f32::consts::TAU) * self.theta_bins as f32) as usize;
        (r.min(self.phi_bins - 1), c.min(self.theta_bins - 1))
    }

    /// Candidate tiles around `pos`. Rows touching a pole are scanned whole,
    /// other rows widen their column window as longitude bins shrink.
    fn candidates(&self, pos: &SphericalPos, out: &mut Vec<TileId>) {
        let (row, col) = self.bin_of(pos);
        let lo = row.saturating_sub(1);
        let hi = (row + 1).min(self.phi_bins - 1);
        for r in lo..=hi {
            if r == 0 || r == self.phi_bins - 1 {
                for c in 0..self.theta_bins {
                    out.extend_from_slice(&self.bins[r * self.theta_bins + c]);
                }
                continue;
            }
            let row_phi = (r as f32 + 0.5) / self.phi_bins as f32 * PI;
            let span = (1.0 / row_phi.sin().max(0.1)).ceil() as i64;
            if span * 2 + 1 >= self.theta_bins as i64 {
                for c in 0..self.theta_bins {
                    out.extend_from_slice(&self.bins[r * self.theta_bins + c]);
                }
                continue;
            }
            for dc in -span..=span {
                let c = (col as i64 + dc).rem_euclid(self.theta_bins as i64) as usize;
                out.extend_from_slice(&self.bins[r * self.theta_bins + c]);
            }
        }
    }
}

// ============================================================================
// HEX SPHERE
// ============================================================================

pub struct HexSphere {
    radius: f32,
    positions: Vec<Vec3>,
    neighbors: Vec<Vec<TileId>>,
    elevated: Vec<bool>,
    polar: Vec<bool>,
    clusters: Vec<Vec<TileId>>,
    tile_cluster: Vec<Option<ClusterId>>,
    territory: Vec<TerritoryState>,
    lookup: TileLookup,
}

impl HexSphere {
    /// Build a world from explicit data. Positions are projected onto the
    /// sphere of `radius`; every tile must have one neighbour list, one
    /// elevation flag and one polar flag.
    pub fn from_parts(
        radius: f32,
        positions: Vec<Vec3>,
        neighbors: Vec<Vec<TileId>>,
        elevated: Vec<bool>,
        polar: Vec<bool>,
        clusters: Vec<Vec<TileId>>,
    ) -> SimResult<Self> {
        let n = positions.len();
        if n == 0 {
            return Err(SimError::EmptyWorld);
        }
        if !(radius.is_finite() && radius > 0.0) {
            return Err(SimError::InvalidConfig { field: "radius", reason: "must be positive and finite" });
        }
        for len in [neighbors.len(), elevated.len(), polar.len()] {
            if len != n {
                return Err(SimError::LengthMismatch { expected: n, actual: len });
            }
        }
        for (tile, list) in neighbors.iter().enumerate() {
            if let Some(&bad) = list.iter().find(|&&nb| nb >= n) {
                return Err(SimError::InvalidTopology { tile, neighbor: bad });
            }
        }
        let mut tile_cluster = vec![None; n];
        for (ci, members) in clusters.iter().enumerate() {
            for &tile in members {
                if tile >= n {
                    return Err(SimError::LengthMismatch { expected: n, actual: tile + 1 });
                }
                tile_cluster[tile] = Some(ClusterId(ci as u32));
            }
        }

        let positions: Vec<Vec3> = positions
            .into_iter()
            .map(|p| p.normalize_or_zero() * radius)
            .collect();
        let spherical: Vec<SphericalPos> = positions.iter().map(|p| SphericalPos::from_vec(*p)).collect();
        let territory = clusters
            .iter()
            .map(|members| TerritoryState {
                owner: None,
                tics: [0; 3],
                capacity: (members.len() as u32 * TICS_PER_TILE).max(1),
            })
            .collect();

        Ok(Self {
            radius,
            lookup: TileLookup::new(&spherical),
            positions,
            neighbors,
            elevated,
            polar,
            clusters,
            tile_cluster,
            territory,
        })
    }

    /// Generate a random world.
    pub fn generate(params: HexSphereParams, rng: &mut impl Rng) -> SimResult<Self> {
        let n = params.tile_count;
        if n == 0 {
            return Err(SimError::EmptyWorld);
        }
        let units = fibonacci_lattice(n);
        let neighbors = nearest_neighbors(&units, params.neighbor_count);

        let polar: Vec<bool> = units
            .iter()
            .map(|u| {
                let phi = u.y.clamp(-1.0, 1.0).acos();
                phi < params.polar_margin || phi > PI - params.polar_margin
            })
            .collect();

        // Elevation grows in small blobs around random seeds.
        let mut elevated = vec![false; n];
        let open: Vec<TileId> = (0..n).filter(|t| !polar[*t]).collect();
        let blob = params.neighbor_count.max(1) + 1;
        let seeds = ((open.len() as f32 * params.elevated_fraction) / blob as f32).round() as usize;
        for _ in 0..seeds {
            if open.is_empty() {
                break;
            }
            let seed = open[rng.gen_range(0..open.len())];
            elevated[seed] = true;
            for &nb in &neighbors[seed] {
                if !polar[nb] && rng.gen_bool(0.7) {
                    elevated[nb] = true;
                }
            }
        }

        // Zones: nearest of evenly spread seed tiles.
        let k = params.cluster_count.clamp(1, n);
        let seed_tiles: Vec<TileId> = (0..k).map(|i| (i * n + n / (2 * k)) / k).collect();
        let mut clusters = vec![Vec::new(); k];
        for (tile, u) in units.iter().enumerate() {
            let best = seed_tiles
                .iter()
                .enumerate()
                .max_by(|a, b| u.dot(units[*a.1]).total_cmp(&u.dot(units[*b.1])))
                .map(|(ci, _)| ci)
                .unwrap_or(0);
            clusters[best].push(tile);
        }

        let world = Self::from_parts(params.radius, units, neighbors, elevated, polar, clusters)?;
        log::info!(
            "generated sphere: {} tiles, {} zones, {} elevated",
            world.tile_count(),
            world.cluster_count(),
            world.elevated.iter().filter(|e| **e).count()
        );
        Ok(world)
    }

    pub fn set_elevated(&mut self, tile: TileId, elevated: bool) {
        if let Some(e) = self.elevated.get_mut(tile) {
            *e = elevated;
        }
    }

    pub fn set_territory(&mut self, cluster: ClusterId, state: TerritoryState) {
        if let Some(t) = self.territory.get_mut(cluster.index()) {
            *t = state;
        }
    }

    /// Toy territory model: `faction` spends `amount` tics on a zone. Rival
    /// tics drain first; once none remain the faction accrues until it owns
    /// the zone outright.
    pub fn accrue_capture(&mut self, cluster: ClusterId, faction: Faction, amount: u32) {
        let Some(state) = self.territory.get_mut(cluster.index()) else {
            return;
        };
        let me = faction.index();
        let rival = (0..3)
            .filter(|&i| i != me && state.tics[i] > 0)
            .max_by_key(|&i| state.tics[i]);
        match rival {
            Some(r) => {
                state.tics[r] = state.tics[r].saturating_sub(amount);
                if state.tics[r] == 0 && state.owner.is_some_and(|o| o.index() == r) {
                    state.owner = None;
                }
            }
            None => {
                state.tics[me] = (state.tics[me] + amount).min(state.capacity);
                if state.tics[me] >= state.capacity {
                    state.owner = Some(faction);
                }
            }
        }
    }
}

impl SurfaceWorld for HexSphere {
    fn radius(&self) -> f32 {
        self.radius
    }

    fn tile_count(&self) -> usize {
        self.positions.len()
    }

    fn tile_center(&self, tile: TileId) -> Vec3 {
        self.positions[tile]
    }

    fn tile_neighbors(&self, tile: TileId) -> &[TileId] {
        &self.neighbors[tile]
    }

    fn is_elevated(&self, tile: TileId) -> bool {
        self.elevated[tile]
    }

    fn is_polar(&self, tile: TileId) -> bool {
        self.polar[tile]
    }

    fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn cluster_tiles(&self, cluster: ClusterId) -> &[TileId] {
        self.clusters.get(cluster.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn cluster_of(&self, tile: TileId) -> Option<ClusterId> {
        self.tile_cluster.get(tile).copied().flatten()
    }

    fn tile_at(&self, pos: SphericalPos) -> Option<TileId> {
        if !pos.is_finite() {
            return None;
        }
        let unit = pos.to_unit();
        let mut candidates = Vec::new();
        self.lookup.candidates(&pos, &mut candidates);
        if candidates.is_empty() {
            candidates.extend(0..self.positions.len());
        }
        candidates
            .into_iter()
            .max_by(|a, b| unit.dot(self.positions[*a]).total_cmp(&unit.dot(self.positions[*b])))
    }

    fn territory(&self, cluster: ClusterId) -> TerritoryState {
        self.territory.get(cluster.index()).copied().unwrap_or_default()
    }
}

// ============================================================================
// GENERATION HELPERS
// ============================================================================

fn fibonacci_lattice(n: usize) -> Vec<Vec3> {
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let a = GOLDEN_ANGLE * i as f32;
            Vec3::new(r * a.cos(), y, r * a.sin())
        })
        .collect()
}

/// Symmetric k-nearest adjacency.
fn nearest_neighbors(units: &[Vec3], k: usize) -> Vec<Vec<TileId>> {
    let n = units.len();
    let mut adjacency = vec![Vec::new(); n];
    if n < 2 || k == 0 {
        return adjacency;
    }
    let k = k.min(n - 1);
    let mut scratch: Vec<(f32, TileId)> = Vec::with_capacity(n);
    for i in 0..n {
        scratch.clear();
        scratch.extend(
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (units[i].distance_squared(units[j]), j)),
        );
        scratch.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
        for &(_, j) in &scratch[..k] {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }
    adjacency
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_world() -> HexSphere {
        let params = HexSphereParams { tile_count: 400, cluster_count: 8, ..Default::default() };
        HexSphere::generate(params, &mut StdRng::seed_from_u64(7)).unwrap()
    }

    #[test]
    fn adjacency_is_symmetric() {
        let w = small_world();
        for t in 0..w.tile_count() {
            for &nb in w.tile_neighbors(t) {
                assert!(w.tile_neighbors(nb).contains(&t));
            }
        }
    }

    #[test]
    fn tile_at_finds_the_tile_itself() {
        let w = small_world();
        for t in (0..w.tile_count()).step_by(13) {
            let pos = SphericalPos::from_vec(w.tile_center(t));
            assert_eq!(w.tile_at(pos), Some(t));
        }
    }

    #[test]
    fn every_tile_belongs_to_a_zone() {
        let w = small_world();
        assert!((0..w.tile_count()).all(|t| w.cluster_of(t).is_some()));
        let total: usize = (0..w.cluster_count())
            .map(|c| w.cluster_tiles(ClusterId(c as u32)).len())
            .sum();
        assert_eq!(total, w.tile_count());
    }

    #[test]
    fn polar_tiles_are_never_elevated() {
        let w = small_world();
        assert!((0..w.tile_count()).all(|t| !(w.is_polar(t) && w.is_elevated(t))));
    }

    #[test]
    fn from_parts_rejects_dangling_neighbor() {
        let err = HexSphere::from_parts(
            1.0,
            vec![Vec3::X, Vec3::Y],
            vec![vec![1], vec![5]],
            vec![false; 2],
            vec![false; 2],
            vec![],
        );
        assert!(matches!(err, Err(SimError::InvalidTopology { tile: 1, neighbor: 5 })));
    }

    #[test]
    fn capture_drains_rivals_then_takes_ownership() {
        let mut w = small_world();
        let c = ClusterId(0);
        let cap = w.territory(c).capacity;
        w.set_territory(c, TerritoryState { owner: None, tics: [0, 5, 0], capacity: cap });
        w.accrue_capture(c, Faction::Rust, 5);
        assert_eq!(w.territory(c).tics, [0, 0, 0]);
        w.accrue_capture(c, Faction::Rust, cap);
        assert_eq!(w.territory(c).owner, Some(Faction::Rust));
    }
}
