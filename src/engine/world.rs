// Contract with the terrain/territory collaborator.
//
// The core never owns terrain or territory bookkeeping. It reads them through
// `SurfaceWorld`, which `HexSphere` implements for the demo and tests.

use bevy_ecs::prelude::*;
use glam::Vec3;

use super::sphere::SphericalPos;

/// Index of a surface tile.
pub type TileId = usize;

/// Identifier of a capturable zone (cluster of tiles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl ClusterId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The three competing sides.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Faction {
    Rust,
    Cobalt,
    Viridian,
}

impl Faction {
    pub const ALL: [Faction; 3] = [Faction::Rust, Faction::Cobalt, Faction::Viridian];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Faction::Rust => 0,
            Faction::Cobalt => 1,
            Faction::Viridian => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Faction::Rust => "rust",
            Faction::Cobalt => "cobalt",
            Faction::Viridian => "viridian",
        }
    }
}

/// Live ownership counters of one zone, as reported by the territory system.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TerritoryState {
    pub owner: Option<Faction>,
    /// Capture tics accumulated per faction, indexed by `Faction::index`.
    pub tics: [u32; 3],
    /// Tics needed to fully own the zone.
    pub capacity: u32,
}

impl TerritoryState {
    pub fn tics_of(&self, faction: Faction) -> u32 {
        self.tics[faction.index()]
    }

    pub fn total_tics(&self) -> u32 {
        self.tics.iter().sum()
    }

    /// Highest tic count held by any faction other than `faction`.
    pub fn max_rival_tics(&self, faction: Faction) -> u32 {
        Faction::ALL
            .iter()
            .filter(|f| **f != faction)
            .map(|f| self.tics_of(*f))
            .max()
            .unwrap_or(0)
    }
}

/// Everything the core reads from the terrain and territory collaborators.
pub trait SurfaceWorld {
    fn radius(&self) -> f32;

    fn tile_count(&self) -> usize;

    /// World-space centre of a tile, on the sphere surface.
    fn tile_center(&self, tile: TileId) -> Vec3;

    fn tile_neighbors(&self, tile: TileId) -> &[TileId];

    fn is_elevated(&self, tile: TileId) -> bool;

    fn is_polar(&self, tile: TileId) -> bool;

    fn cluster_count(&self) -> usize;

    fn cluster_tiles(&self, cluster: ClusterId) -> &[TileId];

    fn cluster_of(&self, tile: TileId) -> Option<ClusterId>;

    /// Tile containing a surface point, if any.
    fn tile_at(&self, pos: SphericalPos) -> Option<TileId>;

    fn territory(&self, cluster: ClusterId) -> TerritoryState;

    /// True if the surface point lies on elevated terrain.
    fn is_blocked(&self, pos: SphericalPos) -> bool {
        self.tile_at(pos).is_some_and(|t| self.is_elevated(t))
    }

    /// Zone containing a surface point, if any.
    fn cluster_at(&self, pos: SphericalPos) -> Option<ClusterId> {
        self.tile_at(pos).and_then(|t| self.cluster_of(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rival_tics_ignore_own_faction() {
        let t = TerritoryState { owner: None, tics: [50, 10, 30], capacity: 100 };
        assert_eq!(t.max_rival_tics(Faction::Rust), 30);
        assert_eq!(t.max_rival_tics(Faction::Viridian), 50);
        assert_eq!(t.total_tics(), 90);
    }
}
