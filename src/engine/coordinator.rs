// Per-faction strategic coordinator.
//
// On a fixed interval each coordinator scores every capturable zone and
// hands its available bots objectives for the best ones. Candidate bots are
// narrowed with cheap great-circle distance first; only the survivors pay
// for a real path query.

use bevy_ecs::entity::Entity;
use rand::Rng;
use std::collections::{HashMap, HashSet};

use super::components::{AiState, Objective};
use super::config::SimConfig;
use super::navigation::NavigationGraph;
use super::sphere::SphericalPos;
use super::world::{ClusterId, Faction, SurfaceWorld, TerritoryState, TileId};

// ============================================================================
// PRIORITY TIERS
// ============================================================================

/// Nobody holds or is capturing the zone.
pub const UNCLAIMED_PRIORITY: f32 = 100.0;
/// We are capturing it; progress adds up to `CAPTURING_PROGRESS_BONUS`.
pub const CAPTURING_PRIORITY: f32 = 70.0;
pub const CAPTURING_PROGRESS_BONUS: f32 = 25.0;
/// Another faction is part-way through capturing an unowned zone.
pub const RIVAL_CAPTURING_PRIORITY: f32 = 50.0;
pub const ENEMY_HELD_PRIORITY: f32 = 40.0;
/// Added when our position on a zone improved since the last tick.
pub const GAINING_BONUS: f32 = 15.0;
/// Our own zone with rival tics on it.
pub const CONTESTED_PRIORITY: f32 = 55.0;
pub const CONTESTED_PRESSURE_BONUS: f32 = 30.0;
pub const SECURED_PRIORITY: f32 = 5.0;

/// Size bonus is this over the square root of the zone's tile count.
const SIZE_BONUS_SCALE: f32 = 30.0;
const ENEMY_PRESENCE_PENALTY: f32 = 8.0;
const SCORE_JITTER: f32 = 3.0;

/// How attractive a zone's capture state is to `faction`, before size,
/// enemy presence and jitter are applied.
pub fn capture_priority(territory: &TerritoryState, faction: Faction, gaining: bool) -> f32 {
    let capacity = territory.capacity.max(1) as f32;
    let mine = territory.tics_of(faction);
    let rival = territory.max_rival_tics(faction);
    let gain = if gaining { GAINING_BONUS } else { 0.0 };
    match territory.owner {
        Some(owner) if owner == faction => {
            if rival > 0 {
                CONTESTED_PRIORITY + CONTESTED_PRESSURE_BONUS * (rival as f32 / capacity).min(1.0)
            } else {
                SECURED_PRIORITY
            }
        }
        Some(_) => ENEMY_HELD_PRIORITY + gain,
        None if territory.total_tics() == 0 => UNCLAIMED_PRIORITY,
        None if mine > 0 => CAPTURING_PRIORITY + CAPTURING_PROGRESS_BONUS * (mine as f32 / capacity).min(1.0),
        None => RIVAL_CAPTURING_PRIORITY + gain,
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// What a coordinator needs to know about one agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorAgent {
    pub id: Entity,
    pub faction: Faction,
    pub pos: SphericalPos,
    pub state: AiState,
    pub objective: Option<ClusterId>,
    /// Zone the agent is refusing after giving up on it.
    pub refused: Option<ClusterId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneScore {
    pub cluster: ClusterId,
    pub score: f32,
    pub tiles: usize,
    pub center: TileId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub agent: Entity,
    pub objective: Objective,
}

pub struct FactionCoordinator {
    faction: Faction,
    /// Seconds until the next tick.
    timer: f32,
    /// Own agents per objective zone after the last tick.
    assigned: HashMap<ClusterId, usize>,
    /// (own tics, strongest rival tics) per zone at the last tick.
    last_tics: HashMap<ClusterId, (u32, u32)>,
    ticks: u64,
}

impl FactionCoordinator {
    /// Coordinators are staggered by a third of the interval per faction so
    /// their ticks never land on the same frame.
    pub fn new(faction: Faction, cfg: &SimConfig) -> Self {
        Self {
            faction,
            timer: cfg.coordinator_interval * faction.index() as f32 / 3.0,
            assigned: HashMap::new(),
            last_tics: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn faction(&self) -> Faction {
        self.faction
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn assignment_counts(&self) -> &HashMap<ClusterId, usize> {
        &self.assigned
    }

    /// Agents per zone sent there by every coordinator except `faction`'s,
    /// as of their last ticks.
    pub fn enemy_presence(coordinators: &[FactionCoordinator], faction: Faction) -> HashMap<ClusterId, usize> {
        let mut counts = HashMap::new();
        for other in coordinators.iter().filter(|c| c.faction != faction) {
            for (&cluster, &n) in &other.assigned {
                *counts.entry(cluster).or_insert(0) += n;
            }
        }
        counts
    }

    /// Advance the interval timer. True when a tick is due this frame.
    pub fn update(&mut self, dt: f32, cfg: &SimConfig) -> bool {
        self.timer -= dt;
        if self.timer > 0.0 {
            return false;
        }
        self.timer += cfg.coordinator_interval;
        if self.timer <= 0.0 {
            // Long frame: skip missed ticks rather than bursting them.
            self.timer = cfg.coordinator_interval;
        }
        true
    }

    /// Whether bots may be sent to `cluster` at all.
    pub fn is_cluster_reachable(
        world: &dyn SurfaceWorld,
        nav: &NavigationGraph,
        cluster: ClusterId,
        cfg: &SimConfig,
    ) -> bool {
        let Some(center) = nav.cluster_center(cluster) else {
            return false;
        };
        if !nav.is_traversable(center) || world.is_polar(center) {
            return false;
        }
        let phi = nav.tile_position(center).phi;
        if phi < cfg.polar_dead_zone || phi > std::f32::consts::PI - cfg.polar_dead_zone {
            return false;
        }
        !nav.edges(center).is_empty()
    }

    // ========================================================================
    // SCORING
    // ========================================================================

    /// Score every reachable zone, drop those below the minimum and sort the
    /// rest best first.
    pub fn score_zones(
        &mut self,
        world: &dyn SurfaceWorld,
        nav: &NavigationGraph,
        enemy_counts: &HashMap<ClusterId, usize>,
        cfg: &SimConfig,
        rng: &mut impl Rng,
    ) -> Vec<ZoneScore> {
        let mut zones = Vec::new();
        for c in 0..world.cluster_count() {
            let cluster = ClusterId(c as u32);
            if !Self::is_cluster_reachable(world, nav, cluster, cfg) {
                continue;
            }
            let Some(center) = nav.cluster_center(cluster) else {
                continue;
            };
            let territory = world.territory(cluster);
            let now = (territory.tics_of(self.faction), territory.max_rival_tics(self.faction));
            let gaining = self
                .last_tics
                .insert(cluster, now)
                .is_some_and(|(mine, rival)| now.0 > mine || now.1 < rival);

            let tiles = world.cluster_tiles(cluster).len();
            let enemies = enemy_counts.get(&cluster).copied().unwrap_or(0);
            let score = capture_priority(&territory, self.faction, gaining)
                + SIZE_BONUS_SCALE / (tiles.max(1) as f32).sqrt()
                - ENEMY_PRESENCE_PENALTY * enemies as f32
                + rng.gen_range(0.0..SCORE_JITTER);
            if score >= cfg.min_zone_score {
                zones.push(ZoneScore { cluster, score, tiles, center });
            }
        }
        zones.sort_by(|a, b| b.score.total_cmp(&a.score));
        zones
    }

    // ========================================================================
    // ASSIGNMENT
    // ========================================================================

    /// Pick agents for the top zones. `agents` may include every faction;
    /// only this coordinator's are considered. Agents capturing a zone we
    /// already own stay where they are.
    pub fn assign(
        &mut self,
        zones: &[ZoneScore],
        agents: &[CoordinatorAgent],
        world: &dyn SurfaceWorld,
        nav: &NavigationGraph,
        cfg: &SimConfig,
    ) -> Vec<Assignment> {
        let faction = self.faction;
        let engaged = |a: &CoordinatorAgent| {
            a.state == AiState::Capturing && a.objective.is_some_and(|c| world.territory(c).owner == Some(faction))
        };
        let own: Vec<&CoordinatorAgent> = agents.iter().filter(|a| a.faction == faction).collect();
        let available = own.iter().filter(|a| !engaged(a)).count();
        let selected: Vec<&ZoneScore> = zones.iter().take(cfg.max_zones_per_tick.min(available)).collect();
        let selected_ids: HashSet<ClusterId> = selected.iter().map(|z| z.cluster).collect();

        // Agents already bound for a selected zone stay there.
        let mut pool: Vec<&CoordinatorAgent> = own
            .iter()
            .copied()
            .filter(|a| !engaged(a))
            .filter(|a| a.objective.is_none_or(|c| !selected_ids.contains(&c)))
            .collect();

        let mut assignments = Vec::new();
        for zone in selected {
            if pool.is_empty() {
                break;
            }
            let need = cfg.min_agents_per_zone.max(zone.tiles / cfg.tiles_per_agent);
            let already = own.iter().filter(|a| a.objective == Some(zone.cluster)).count();
            let remaining = need.saturating_sub(already);
            if remaining == 0 {
                continue;
            }

            let center_pos = nav.tile_position(zone.center);
            let mut candidates: Vec<(f32, usize)> = pool
                .iter()
                .enumerate()
                .filter(|(_, a)| a.refused != Some(zone.cluster))
                .map(|(i, a)| (a.pos.angular_distance(&center_pos), i))
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
            candidates.truncate(remaining * cfg.prefilter_multiplier);

            let mut refined: Vec<(f32, usize)> = candidates
                .into_iter()
                .filter_map(|(_, i)| {
                    let from = nav.start_tile(world, pool[i].pos)?;
                    nav.path_distance(from, zone.center).map(|d| (d, i))
                })
                .collect();
            refined.sort_by(|a, b| a.0.total_cmp(&b.0));
            refined.truncate(remaining);

            let objective = Objective { cluster: zone.cluster, tile: zone.center, target: center_pos };
            let mut picked: Vec<usize> = refined.into_iter().map(|(_, i)| i).collect();
            for &i in &picked {
                assignments.push(Assignment { agent: pool[i].id, objective });
            }
            // Remove highest indices first so the rest stay valid.
            picked.sort_unstable_by(|a, b| b.cmp(a));
            for i in picked {
                pool.swap_remove(i);
            }
        }

        self.assigned.clear();
        for a in &own {
            let assigned = assignments.iter().find(|x| x.agent == a.id).map(|x| x.objective.cluster);
            if let Some(cluster) = assigned.or(a.objective) {
                *self.assigned.entry(cluster).or_insert(0) += 1;
            }
        }
        assignments
    }

    /// Score and assign in one go. `enemy_counts` comes from the other
    /// coordinators, see [`FactionCoordinator::enemy_presence`].
    pub fn tick(
        &mut self,
        world: &dyn SurfaceWorld,
        nav: &NavigationGraph,
        agents: &[CoordinatorAgent],
        enemy_counts: &HashMap<ClusterId, usize>,
        cfg: &SimConfig,
        rng: &mut impl Rng,
    ) -> Vec<Assignment> {
        let zones = self.score_zones(world, nav, enemy_counts, cfg, rng);
        let assignments = self.assign(&zones, agents, world, nav, cfg);
        self.ticks += 1;
        log::debug!(
            "{} coordinator tick {}: {} zones scored, {} assignments",
            self.faction.name(),
            self.ticks,
            zones.len(),
            assignments.len()
        );
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hexsphere::{HexSphere, HexSphereParams};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f32::consts::PI;

    fn world() -> (HexSphere, NavigationGraph) {
        let params = HexSphereParams { tile_count: 642, cluster_count: 16, elevated_fraction: 0.0, ..Default::default() };
        let w = HexSphere::generate(params, &mut StdRng::seed_from_u64(21)).unwrap();
        let nav = NavigationGraph::build(&w);
        (w, nav)
    }

    fn agent(n: u32, faction: Faction, theta: f32) -> CoordinatorAgent {
        CoordinatorAgent {
            id: Entity::from_raw(n),
            faction,
            pos: SphericalPos::new(theta, PI / 2.0),
            state: AiState::Idle,
            objective: None,
            refused: None,
        }
    }

    #[test]
    fn fresh_zone_sits_in_the_top_tier() {
        let fresh = TerritoryState { owner: None, tics: [0, 0, 0], capacity: 100 };
        let p = capture_priority(&fresh, Faction::Rust, false);
        assert_eq!(p, UNCLAIMED_PRIORITY);

        let others = [
            TerritoryState { owner: None, tics: [99, 0, 0], capacity: 100 },
            TerritoryState { owner: None, tics: [0, 60, 0], capacity: 100 },
            TerritoryState { owner: Some(Faction::Cobalt), tics: [0, 100, 0], capacity: 100 },
            TerritoryState { owner: Some(Faction::Rust), tics: [100, 0, 0], capacity: 100 },
            TerritoryState { owner: Some(Faction::Rust), tics: [60, 40, 0], capacity: 100 },
        ];
        for t in others {
            for gaining in [false, true] {
                assert!(capture_priority(&t, Faction::Rust, gaining) < p, "{t:?}");
            }
        }
    }

    #[test]
    fn capture_progress_raises_priority() {
        let a = TerritoryState { owner: None, tics: [10, 0, 0], capacity: 100 };
        let b = TerritoryState { owner: None, tics: [80, 0, 0], capacity: 100 };
        assert!(capture_priority(&b, Faction::Rust, false) > capture_priority(&a, Faction::Rust, false));
    }

    #[test]
    fn secured_zone_is_low_unless_contested() {
        let secured = TerritoryState { owner: Some(Faction::Rust), tics: [100, 0, 0], capacity: 100 };
        let contested = TerritoryState { owner: Some(Faction::Rust), tics: [100, 0, 30], capacity: 100 };
        assert_eq!(capture_priority(&secured, Faction::Rust, false), SECURED_PRIORITY);
        assert!(capture_priority(&contested, Faction::Rust, false) > ENEMY_HELD_PRIORITY);
    }

    #[test]
    fn polar_dead_zone_centers_are_never_targets() {
        let (w, nav) = world();
        let cfg = SimConfig { polar_dead_zone: 1.0, ..SimConfig::default() };
        let mut dead = HashSet::new();
        for c in 0..w.cluster_count() {
            let cluster = ClusterId(c as u32);
            let Some(center) = nav.cluster_center(cluster) else { continue };
            let phi = nav.tile_position(center).phi;
            if phi < cfg.polar_dead_zone || phi > PI - cfg.polar_dead_zone {
                dead.insert(cluster);
                assert!(!FactionCoordinator::is_cluster_reachable(&w, &nav, cluster, &cfg));
            }
        }
        assert!(!dead.is_empty());

        let agents: Vec<CoordinatorAgent> = (0..40).map(|i| agent(i, Faction::Rust, i as f32 * 0.15)).collect();
        let mut coord = FactionCoordinator::new(Faction::Rust, &cfg);
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..5 {
            for a in coord.tick(&w, &nav, &agents, &HashMap::new(), &cfg, &mut rng) {
                assert!(!dead.contains(&a.objective.cluster));
            }
        }
    }

    #[test]
    fn zone_without_exits_is_unreachable() {
        let (mut w, _) = world();
        let cfg = SimConfig::default();
        let nav = NavigationGraph::build(&w);
        let cluster = (0..w.cluster_count())
            .map(|c| ClusterId(c as u32))
            .find(|c| FactionCoordinator::is_cluster_reachable(&w, &nav, *c, &cfg))
            .unwrap();
        let center = nav.cluster_center(cluster).unwrap();
        for nb in w.tile_neighbors(center).to_vec() {
            w.set_elevated(nb, true);
        }
        let nav = NavigationGraph::build(&w);
        assert!(!FactionCoordinator::is_cluster_reachable(&w, &nav, cluster, &cfg));
    }

    fn reachable_zones(w: &HexSphere, nav: &NavigationGraph, cfg: &SimConfig) -> Vec<ClusterId> {
        (0..w.cluster_count())
            .map(|c| ClusterId(c as u32))
            .filter(|c| FactionCoordinator::is_cluster_reachable(w, nav, *c, cfg))
            .collect()
    }

    #[test]
    fn assigns_nearest_agents_and_skips_others() {
        let (mut w, nav) = world();
        let cfg = SimConfig::default();
        let owned = reachable_zones(&w, &nav, &cfg)[0];
        w.set_territory(owned, TerritoryState { owner: Some(Faction::Rust), tics: [100, 0, 0], capacity: 100 });
        let mut rng = StdRng::seed_from_u64(9);
        let mut coord = FactionCoordinator::new(Faction::Rust, &cfg);
        let mut agents: Vec<CoordinatorAgent> = (0..12).map(|i| agent(i, Faction::Rust, i as f32 * 0.5)).collect();
        agents.push(agent(100, Faction::Cobalt, 0.0));
        agents[0].state = AiState::Capturing;
        agents[0].objective = Some(owned);

        let assignments = coord.tick(&w, &nav, &agents, &HashMap::new(), &cfg, &mut rng);
        assert!(!assignments.is_empty());
        let ids: HashSet<Entity> = assignments.iter().map(|a| a.agent).collect();
        assert_eq!(ids.len(), assignments.len(), "one objective per agent per tick");
        assert!(!ids.contains(&Entity::from_raw(100)));
        assert!(!ids.contains(&Entity::from_raw(0)));
        let total: usize = coord.assignment_counts().values().sum();
        assert_eq!(total, assignments.len() + 1);
    }

    #[test]
    fn capturing_an_unowned_zone_does_not_pin_an_agent() {
        let (mut w, nav) = world();
        let cfg = SimConfig::default();
        let reachable = reachable_zones(&w, &nav, &cfg);
        let (slow, best) = (reachable[0], reachable[1]);
        let center = nav.cluster_center(best).unwrap();
        let zones = [ZoneScore { cluster: best, score: 100.0, tiles: 1, center }];

        let mut capturer = agent(1, Faction::Rust, 0.0);
        capturer.pos = nav.tile_position(center);
        capturer.state = AiState::Capturing;
        capturer.objective = Some(slow);

        let mut coord = FactionCoordinator::new(Faction::Rust, &cfg);
        let assignments = coord.assign(&zones, &[capturer], &w, &nav, &cfg);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].agent, capturer.id);
        assert_eq!(assignments[0].objective.cluster, best);

        w.set_territory(slow, TerritoryState { owner: Some(Faction::Rust), tics: [100, 0, 0], capacity: 100 });
        assert!(coord.assign(&zones, &[capturer], &w, &nav, &cfg).is_empty());
    }

    #[test]
    fn enemy_presence_comes_from_other_coordinators() {
        let (w, nav) = world();
        let cfg = SimConfig::default();
        let mut coords: Vec<FactionCoordinator> =
            Faction::ALL.iter().map(|f| FactionCoordinator::new(*f, &cfg)).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let cobalt: Vec<CoordinatorAgent> = (0..10).map(|i| agent(i, Faction::Cobalt, i as f32 * 0.6)).collect();
        let sent = coords[Faction::Cobalt.index()].tick(&w, &nav, &cobalt, &HashMap::new(), &cfg, &mut rng);
        assert!(!sent.is_empty());

        let seen = FactionCoordinator::enemy_presence(&coords, Faction::Rust);
        assert_eq!(&seen, coords[Faction::Cobalt.index()].assignment_counts());
        assert!(FactionCoordinator::enemy_presence(&coords, Faction::Cobalt).is_empty());

        // Same draws, so the only difference is the presence penalty.
        let (zone, n) = seen.iter().map(|(c, n)| (*c, *n)).next().unwrap();
        let quiet = FactionCoordinator::new(Faction::Rust, &cfg)
            .score_zones(&w, &nav, &HashMap::new(), &cfg, &mut StdRng::seed_from_u64(1));
        let crowded =
            FactionCoordinator::new(Faction::Rust, &cfg).score_zones(&w, &nav, &seen, &cfg, &mut StdRng::seed_from_u64(1));
        let score = |zones: &[ZoneScore]| zones.iter().find(|z| z.cluster == zone).map(|z| z.score);
        let (Some(a), Some(b)) = (score(&quiet), score(&crowded)) else {
            panic!("zone {zone:?} dropped from scoring");
        };
        assert!((a - b - ENEMY_PRESENCE_PENALTY * n as f32).abs() < 1e-3);
    }

    #[test]
    fn refusing_agent_is_not_sent_back() {
        let (w, nav) = world();
        let cfg = SimConfig { max_zones_per_tick: 1, ..SimConfig::default() };
        let mut coord = FactionCoordinator::new(Faction::Rust, &cfg);
        let zone = (0..w.cluster_count())
            .map(|c| ClusterId(c as u32))
            .find(|c| FactionCoordinator::is_cluster_reachable(&w, &nav, *c, &cfg))
            .unwrap();
        let center = nav.cluster_center(zone).unwrap();
        let zones = [ZoneScore { cluster: zone, score: 100.0, tiles: 1, center }];
        let pos = nav.tile_position(center);
        let mut stubborn = agent(1, Faction::Rust, pos.theta);
        stubborn.pos = pos;
        stubborn.refused = Some(zone);
        let assignments = coord.assign(&zones, &[stubborn, agent(2, Faction::Rust, 4.0)], &w, &nav, &cfg);
        assert!(assignments.iter().all(|a| a.agent != stubborn.id));
    }

    #[test]
    fn ticks_are_staggered_per_faction() {
        let cfg = SimConfig::default();
        let mut coords: Vec<FactionCoordinator> = Faction::ALL.iter().map(|f| FactionCoordinator::new(*f, &cfg)).collect();
        let dt = 0.05;
        let mut first_tick = [None; 3];
        for frame in 0..100 {
            for (i, c) in coords.iter_mut().enumerate() {
                if c.update(dt, &cfg) && first_tick[i].is_none() {
                    first_tick[i] = Some(frame);
                }
            }
        }
        let [a, b, c] = first_tick.map(Option::unwrap);
        assert!(a < b && b < c);
    }
}
