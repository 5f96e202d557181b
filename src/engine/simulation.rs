// The simulation core: owns the agent world and every service, and runs one
// frame at a time in a fixed phase order.
//
//   1. faction coordinators (each on its own interval)
//   2. snapshot of previous-frame agent state
//   3. batched bot state transitions
//   4. per-bot input synthesis, then physics
//   5. spatial grid sync and collision resolution
//   6. death fade bookkeeping

use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::f32::consts::PI;

use super::bot::BotContext;
use super::components::*;
use super::config::SimConfig;
use super::coordinator::FactionCoordinator;
use super::error::{SimError, SimResult};
use super::navigation::NavigationGraph;
use super::spatial::{CollisionEvent, Correction, SpatialCollisionGrid};
use super::sphere::{SphericalPos, wrap_pi};
use super::systems;
use super::world::{ClusterId, Faction, SurfaceWorld};

/// Frames longer than this are clamped before integration.
const MAX_FRAME_DT: f32 = 0.25;

// ============================================================================
// FRAME OUTPUT
// ============================================================================

/// Everything the outer layers need to hear about after one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// Cooldown-gated contact events for particle emission.
    pub collisions: Vec<CollisionEvent>,
    /// Dead agents whose fade finished this frame.
    pub faded: Vec<Entity>,
    /// Objectives handed out by coordinators this frame.
    pub assignments: usize,
    /// Bots that gave up on a zone this frame.
    pub abandoned: Vec<(Entity, ClusterId)>,
    /// Correction applied to the local player, to be echoed by its controller.
    pub player_correction: Option<Correction>,
}

/// Render-facing state of one agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentView {
    pub id: Entity,
    pub faction: Option<Faction>,
    pub position: SphericalPos,
    pub world_position: Vec3,
    pub heading: f32,
    pub speed: f32,
    pub pitch: f32,
    pub roll: f32,
    pub ai_state: Option<AiState>,
    pub is_dead: bool,
    /// Within LOD range of the local player.
    pub near_player: bool,
}

/// Player state pushed in by the human-controlled entity each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub pos: SphericalPos,
    pub heading: f32,
    pub speed: f32,
    pub alive: bool,
}

// ============================================================================
// SIMULATION
// ============================================================================

pub struct Simulation {
    world: World,
    nav: NavigationGraph,
    grid: SpatialCollisionGrid,
    coordinators: Vec<FactionCoordinator>,
    cfg: SimConfig,
    rng: StdRng,
    frame: u64,
    player: Option<Entity>,
    next_slot: u32,
}

impl Simulation {
    /// Build every service from the terrain collaborator.
    pub fn new(surface: &dyn SurfaceWorld, cfg: SimConfig, seed: u64) -> SimResult<Self> {
        if surface.tile_count() == 0 {
            return Err(SimError::EmptyWorld);
        }
        let mut cfg = cfg;
        if (cfg.sphere_radius - surface.radius()).abs() > 1e-3 {
            log::warn!(
                "config radius {} differs from world radius {}, using the world's",
                cfg.sphere_radius,
                surface.radius()
            );
            cfg.sphere_radius = surface.radius();
        }
        cfg.validate()?;

        let nav = NavigationGraph::build(surface);
        let coordinators = Faction::ALL.iter().map(|f| FactionCoordinator::new(*f, &cfg)).collect();
        log::info!(
            "simulation ready: {} traversable tiles, {} zones, {}x{} collision grid",
            nav.traversable_count(),
            surface.cluster_count(),
            cfg.grid_phi_cells,
            cfg.grid_theta_cells
        );
        Ok(Self {
            world: World::new(),
            grid: SpatialCollisionGrid::from_config(&cfg),
            nav,
            coordinators,
            cfg,
            rng: StdRng::seed_from_u64(seed),
            frame: 0,
            player: None,
            next_slot: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn nav(&self) -> &NavigationGraph {
        &self.nav
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn player(&self) -> Option<Entity> {
        self.player
    }

    pub fn coordinator(&self, faction: Faction) -> &FactionCoordinator {
        &self.coordinators[faction.index()]
    }

    pub fn bot_count(&mut self) -> usize {
        self.world.query::<&BotBrain>().iter(&self.world).count()
    }

    pub fn body(&self, id: Entity) -> Option<&SurfaceBody> {
        self.world.get::<SurfaceBody>(id)
    }

    pub fn brain(&self, id: Entity) -> Option<&BotBrain> {
        self.world.get::<BotBrain>(id)
    }

    pub fn vitals(&self, id: Entity) -> Option<&Vitals> {
        self.world.get::<Vitals>(id)
    }

    /// Combat-side access to health fields. The core never interprets `hp`
    /// or `damage_state`, it only carries them.
    pub fn vitals_mut(&mut self, id: Entity) -> Option<Mut<'_, Vitals>> {
        self.world.get_mut::<Vitals>(id)
    }

    // ========================================================================
    // POPULATION
    // ========================================================================

    pub fn spawn_bot(&mut self, faction: Faction, pos: SphericalPos, heading: f32) -> Entity {
        let personality = Personality::random(&mut self.rng);
        let slot = self.next_slot % self.cfg.ai_batches.max(1);
        self.next_slot = self.next_slot.wrapping_add(1);
        let heading = wrap_pi(heading);
        let id = self
            .world
            .spawn((
                SurfaceBody::at(pos, heading),
                faction,
                Vitals::default(),
                BotBrain::new(personality, slot, heading),
            ))
            .id();
        log::debug!("spawned {} bot {id:?} at ({:.2}, {:.2})", faction.name(), pos.theta, pos.phi);
        id
    }

    /// Remove an agent entirely. False if it did not exist.
    pub fn despawn(&mut self, id: Entity) -> bool {
        self.grid.remove_agent(id);
        if self.player == Some(id) {
            self.player = None;
        }
        self.world.despawn(id)
    }

    /// Mark an agent dead. It stops thinking and moving, and starts fading.
    pub fn kill(&mut self, id: Entity) -> bool {
        let Some(mut vitals) = self.world.get_mut::<Vitals>(id) else {
            return false;
        };
        vitals.hp = 0.0;
        vitals.is_dead = true;
        vitals.fade = 0.0;
        vitals.fade_reported = false;
        if let Some(mut body) = self.world.get_mut::<SurfaceBody>(id) {
            body.speed = 0.0;
            body.input.clear();
        }
        true
    }

    /// Bring a dead (or live) agent back at `pos` with fresh state.
    pub fn respawn(&mut self, id: Entity, pos: SphericalPos, heading: f32) -> bool {
        let heading = wrap_pi(heading);
        let Some(mut vitals) = self.world.get_mut::<Vitals>(id) else {
            return false;
        };
        *vitals = Vitals::default();
        if let Some(mut body) = self.world.get_mut::<SurfaceBody>(id) {
            *body = SurfaceBody::at(pos, heading);
        }
        if let Some(mut brain) = self.world.get_mut::<BotBrain>(id) {
            brain.reset(heading);
        }
        true
    }

    /// Push the human-controlled entity's current state in, spawning it on
    /// first use.
    pub fn sync_player(&mut self, snapshot: PlayerSnapshot) -> Entity {
        let id = match self.player {
            Some(id) if self.world.get::<LocalPlayer>(id).is_some() => id,
            _ => {
                let id = self.world.spawn((SurfaceBody::default(), Vitals::default(), LocalPlayer)).id();
                self.player = Some(id);
                id
            }
        };
        if let Some(mut body) = self.world.get_mut::<SurfaceBody>(id) {
            body.pos = snapshot.pos;
            body.heading = snapshot.heading;
            body.speed = snapshot.speed;
        }
        if let Some(mut vitals) = self.world.get_mut::<Vitals>(id) {
            if vitals.is_dead && snapshot.alive {
                vitals.fade = 0.0;
                vitals.fade_reported = false;
            }
            vitals.is_dead = !snapshot.alive;
        }
        id
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// Run one frame.
    pub fn step(&mut self, surface: &dyn SurfaceWorld, dt: f32) -> FrameReport {
        let mut report = FrameReport { frame: self.frame, ..Default::default() };
        if !dt.is_finite() || dt <= 0.0 {
            log::warn!("skipping frame {} with bad dt {dt}", self.frame);
            return report;
        }
        let dt = dt.min(MAX_FRAME_DT);
        let cfg = self.cfg;

        // 1. strategy
        let mut agents = None;
        for i in 0..self.coordinators.len() {
            if !self.coordinators[i].update(dt, &cfg) {
                continue;
            }
            let faction = self.coordinators[i].faction();
            let enemy_counts = FactionCoordinator::enemy_presence(&self.coordinators, faction);
            let agents = agents.get_or_insert_with(|| systems::coordinator_agents_system(&mut self.world));
            let assignments =
                self.coordinators[i].tick(surface, &self.nav, agents, &enemy_counts, &cfg, &mut self.rng);
            for a in &assignments {
                if let Some(mut brain) = self.world.get_mut::<BotBrain>(a.agent) {
                    brain.assign(a.objective);
                }
                if let Some(view) = agents.iter_mut().find(|v| v.id == a.agent) {
                    view.objective = Some(a.objective.cluster);
                }
            }
            report.assignments += assignments.len();
        }

        // 2. previous-frame view of everyone
        let neighbors = systems::snapshot_system(&mut self.world);

        // 3. batched transitions
        systems::bot_transition_system(&mut self.world, surface, self.frame, &cfg);

        // 4. input synthesis, then motion
        let ctx = BotContext { world: surface, nav: &self.nav, cfg: &cfg, neighbors: &neighbors };
        for (id, think) in systems::bot_think_system(&mut self.world, &ctx, dt, &mut self.rng) {
            if let Some(cluster) = think.abandoned {
                report.abandoned.push((id, cluster));
            }
        }
        let blocked = systems::bot_physics_system(&mut self.world, surface, dt, &cfg);

        // 5. collisions, after everyone has moved
        let bodies = systems::collision_bodies_system(&mut self.world);
        let outcome = self.grid.step(&bodies, dt, |p| surface.is_blocked(p));
        systems::apply_corrections_system(&mut self.world, &outcome.corrections);
        report.player_correction = outcome.corrections.iter().find(|c| Some(c.id) == self.player).copied();
        report.collisions = outcome.events;

        // 6. death bookkeeping
        report.faded = systems::fade_system(&mut self.world, dt, &cfg);

        log::trace!(
            "frame {}: {} pairs, {} overlaps, {} blocked moves",
            self.frame,
            outcome.pairs_checked,
            outcome.overlaps,
            blocked
        );
        self.frame += 1;
        report
    }

    /// Per-agent state for the renderer.
    pub fn render_views(&mut self) -> Vec<AgentView> {
        let radius = self.cfg.sphere_radius;
        let lod = self.cfg.lod_radius;
        let player_pos = self.player.and_then(|p| self.world.get::<SurfaceBody>(p)).map(|b| b.pos);
        let mut query =
            self.world.query::<(Entity, &SurfaceBody, Option<&Faction>, Option<&BotBrain>, Option<&Vitals>)>();
        query
            .iter(&self.world)
            .map(|(id, body, faction, brain, vitals)| AgentView {
                id,
                faction: faction.copied(),
                position: body.pos,
                world_position: body.pos.to_world(radius),
                heading: body.heading,
                speed: body.speed,
                pitch: body.lean.pitch,
                roll: body.lean.roll,
                ai_state: brain.map(|b| b.state),
                is_dead: vitals.is_some_and(|v| v.is_dead),
                near_player: player_pos.is_some_and(|p| p.angular_distance(&body.pos) * radius <= lod),
            })
            .collect()
    }

    /// Spawn `per_faction` bots per faction on random traversable tiles,
    /// each faction starting in its own longitude band.
    pub fn populate(&mut self, per_faction: usize) -> Vec<Entity> {
        let tiles: Vec<_> = self.nav.traversable_tiles().collect();
        let mut spawned = Vec::new();
        if tiles.is_empty() {
            log::warn!("no traversable tiles to spawn on");
            return spawned;
        }
        for faction in Faction::ALL {
            let band = faction.index() as f32 * 2.0 * PI / 3.0;
            let home: Vec<_> = tiles
                .iter()
                .copied()
                .filter(|t| wrap_pi(self.nav.tile_position(*t).theta - band).abs() < PI / 3.0)
                .collect();
            let pool = if home.is_empty() { &tiles } else { &home };
            for _ in 0..per_faction {
                let tile = pool[self.rng.gen_range(0..pool.len())];
                let heading = self.rng.gen_range(-PI..PI);
                let pos = self.nav.tile_position(tile);
                spawned.push(self.spawn_bot(faction, pos, heading));
            }
        }
        log::info!("populated {} bots", spawned.len());
        spawned
    }
}
