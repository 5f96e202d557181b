// ECS systems for the per-frame agent update.
// Each one runs a query over the world; `Simulation::step` calls them in
// frame-phase order.

use bevy_ecs::prelude::*;
use rand::Rng;

use super::bot::{BotContext, ThinkReport, TransitionInput};
use super::components::*;
use super::config::SimConfig;
use super::coordinator::CoordinatorAgent;
use super::physics;
use super::spatial::{CollisionBody, Correction};
use super::steering::NeighborSnapshot;
use super::world::{Faction, SurfaceWorld};

/// Previous-frame state of every agent and the player, taken before anyone
/// moves so no bot sees a neighbour's current-frame position.
pub fn snapshot_system(world: &mut World) -> Vec<NeighborSnapshot> {
    let mut query = world.query::<(Entity, &SurfaceBody, Option<&Vitals>)>();
    query
        .iter(world)
        .map(|(id, body, vitals)| NeighborSnapshot {
            id,
            pos: body.pos,
            alive: vitals.is_none_or(|v| !v.is_dead),
        })
        .collect()
}

/// Live bots as seen by the faction coordinators.
pub fn coordinator_agents_system(world: &mut World) -> Vec<CoordinatorAgent> {
    let mut query = world.query_filtered::<(Entity, &SurfaceBody, &BotBrain, &Faction, &Vitals), Without<LocalPlayer>>();
    query
        .iter(world)
        .filter(|(_, _, _, _, vitals)| !vitals.is_dead)
        .map(|(id, body, brain, faction, _)| CoordinatorAgent {
            id,
            faction: *faction,
            pos: body.pos,
            state: brain.state,
            objective: brain.objective.map(|o| o.cluster),
            refused: brain.refused_zone(),
        })
        .collect()
}

/// Batched high-level state transitions. Returns how many bots changed state.
pub fn bot_transition_system(world: &mut World, surface: &dyn SurfaceWorld, frame: u64, cfg: &SimConfig) -> usize {
    let mut query = world.query::<(&SurfaceBody, &mut BotBrain, &Faction, &Vitals)>();
    let mut changed = 0;
    for (body, mut brain, faction, vitals) in query.iter_mut(world) {
        if vitals.is_dead || !brain.in_batch(frame, cfg.ai_batches) {
            continue;
        }
        let input = TransitionInput {
            pos: body.pos,
            faction: *faction,
            here: surface.cluster_at(body.pos),
            objective_territory: brain.objective.map(|o| surface.territory(o.cluster)),
            cfg,
        };
        if brain.transition(&input).is_some() {
            changed += 1;
        }
    }
    changed
}

/// Per-frame input synthesis for every live bot.
pub fn bot_think_system(
    world: &mut World,
    ctx: &BotContext,
    dt: f32,
    rng: &mut impl Rng,
) -> Vec<(Entity, ThinkReport)> {
    let mut query = world.query::<(Entity, &mut SurfaceBody, &mut BotBrain, &Vitals)>();
    let mut reports = Vec::new();
    for (id, mut body, mut brain, vitals) in query.iter_mut(world) {
        if vitals.is_dead {
            continue;
        }
        let report = brain.think(id, &mut body, ctx, dt, rng);
        if report != ThinkReport::default() {
            reports.push((id, report));
        }
    }
    reports
}

/// Integrate every live bot. The player is moved by its own controller and
/// only synced in.
pub fn bot_physics_system(world: &mut World, surface: &dyn SurfaceWorld, dt: f32, cfg: &SimConfig) -> usize {
    let mut query = world.query_filtered::<(&mut SurfaceBody, &mut BotBrain, &Vitals), Without<LocalPlayer>>();
    let mut blocked = 0;
    for (mut body, mut brain, vitals) in query.iter_mut(world) {
        if vitals.is_dead {
            continue;
        }
        let outcome = physics::step_body(&mut body, surface, dt, cfg);
        brain.note_move(&outcome, &body, cfg);
        if outcome.blocked {
            blocked += 1;
        }
    }
    blocked
}

/// Collision view of every agent; dead ones are inactive.
pub fn collision_bodies_system(world: &mut World) -> Vec<CollisionBody> {
    let mut query = world.query::<(Entity, &SurfaceBody, Option<&Vitals>, Has<LocalPlayer>)>();
    query
        .iter(world)
        .map(|(id, body, vitals, local)| CollisionBody {
            id,
            pos: body.pos,
            speed: body.speed,
            active: vitals.is_none_or(|v| !v.is_dead),
            local,
        })
        .collect()
}

/// Write collision corrections back onto bodies.
pub fn apply_corrections_system(world: &mut World, corrections: &[Correction]) {
    for c in corrections {
        if let Some(mut body) = world.get_mut::<SurfaceBody>(c.id) {
            body.pos = c.pos;
            body.speed *= c.speed_factor;
        }
    }
}

/// Advance the death fade of dead bots. Returns bots whose fade finished
/// this frame; each is reported once. The player belongs to its own
/// controller and is never reported.
pub fn fade_system(world: &mut World, dt: f32, cfg: &SimConfig) -> Vec<Entity> {
    let mut query = world.query_filtered::<(Entity, &mut Vitals), Without<LocalPlayer>>();
    let mut faded = Vec::new();
    for (id, mut vitals) in query.iter_mut(world) {
        if !vitals.is_dead {
            continue;
        }
        vitals.fade = (vitals.fade + dt / cfg.death_fade_time).min(1.0);
        if vitals.fade >= 1.0 && !vitals.fade_reported {
            vitals.fade_reported = true;
            faded.push(id);
        }
    }
    faded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sphere::SphericalPos;

    #[test]
    fn fade_reports_once() {
        let cfg = SimConfig::default();
        let mut world = World::new();
        let dead = world.spawn((SurfaceBody::default(), Vitals { is_dead: true, ..Default::default() })).id();
        world.spawn((SurfaceBody::default(), Vitals::default()));

        let mut reported = Vec::new();
        for _ in 0..100 {
            reported.extend(fade_system(&mut world, 0.05, &cfg));
        }
        assert_eq!(reported, vec![dead]);
        assert_eq!(world.get::<Vitals>(dead).map(|v| v.fade), Some(1.0));
    }

    #[test]
    fn dead_player_is_not_faded() {
        let cfg = SimConfig::default();
        let mut world = World::new();
        let player = world.spawn((SurfaceBody::default(), Vitals { is_dead: true, ..Default::default() }, LocalPlayer)).id();
        for _ in 0..100 {
            assert!(fade_system(&mut world, 0.05, &cfg).is_empty());
        }
        assert_eq!(world.get::<Vitals>(player).map(|v| v.fade), Some(0.0));
    }

    #[test]
    fn dead_agents_are_inactive_for_collision() {
        let mut world = World::new();
        world.spawn((SurfaceBody::default(), Vitals { is_dead: true, ..Default::default() }));
        world.spawn((SurfaceBody::default(), LocalPlayer));
        let bodies = collision_bodies_system(&mut world);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies.iter().filter(|b| b.active).count(), 1);
        assert!(bodies.iter().any(|b| b.local && b.active));
    }

    #[test]
    fn corrections_land_on_bodies() {
        let mut world = World::new();
        let id = world.spawn(SurfaceBody { speed: 2.0, ..Default::default() }).id();
        let pos = SphericalPos::new(1.0, 1.0);
        apply_corrections_system(&mut world, &[Correction { id, pos, speed_factor: 0.5 }]);
        let body = world.get::<SurfaceBody>(id).unwrap();
        assert_eq!(body.pos, pos);
        assert_eq!(body.speed, 1.0);
    }
}
