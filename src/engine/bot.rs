// Bot behaviour: the high-level state machine and per-frame input synthesis.
//
// State transitions run batched (a bot re-evaluates its state once every
// `ai_batches` frames) through a dispatch table indexed by `AiState`.
// `think` runs every frame for every live bot and only ever writes the
// bot's virtual keys; motion happens later in `physics::step_body`.

use bevy_ecs::entity::Entity;
use rand::Rng;
use std::f32::consts::PI;

use super::components::{AiState, BotBrain, FailedObjective, Objective, PathPlan, StuckMonitor, SurfaceBody};
use super::config::SimConfig;
use super::navigation::NavigationGraph;
use super::physics::MoveOutcome;
use super::sphere::{SphericalPos, approach_angle, wrap_pi};
use super::steering::{self, NeighborSnapshot, SteeringInput, Throttle};
use super::world::{ClusterId, Faction, SurfaceWorld, TerritoryState};

/// Half-width of the random spread around a reversed heading.
const ESCAPE_SPREAD: f32 = 0.6;
/// Random wander nudge half-width (rad).
const WANDER_NUDGE: f32 = 0.5;
/// Cruise share while drifting inside a zone being captured.
const CAPTURE_CRUISE: f32 = 0.3;
/// Cruise share while wandering.
const WANDER_CRUISE: f32 = 0.6;

/// Read-only world state a bot needs to think.
pub struct BotContext<'a> {
    pub world: &'a dyn SurfaceWorld,
    pub nav: &'a NavigationGraph,
    pub cfg: &'a SimConfig,
    /// Previous-frame snapshots of every agent and the player.
    pub neighbors: &'a [NeighborSnapshot],
}

/// Inputs to one batched state transition.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInput<'a> {
    pub pos: SphericalPos,
    pub faction: Faction,
    /// Zone under the bot, if any.
    pub here: Option<ClusterId>,
    /// Territory of the bot's objective zone, if it has one.
    pub objective_territory: Option<TerritoryState>,
    pub cfg: &'a SimConfig,
}

/// Notable things that happened while a bot thought this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThinkReport {
    pub stuck: bool,
    pub replanned: bool,
    /// Zone given up on this frame.
    pub abandoned: Option<ClusterId>,
}

// ============================================================================
// TRANSITIONS
// ============================================================================

type Transition = fn(&mut BotBrain, &TransitionInput) -> Option<AiState>;

/// Indexed by `AiState::index()`.
const TRANSITIONS: [Transition; 4] = [idle_transition, moving_transition, capturing_transition, wandering_transition];

fn arrived(objective: &Objective, input: &TransitionInput) -> bool {
    input.here == Some(objective.cluster)
        || input.pos.angular_distance(&objective.target) * input.cfg.sphere_radius <= input.cfg.arrival_radius
}

fn idle_transition(brain: &mut BotBrain, input: &TransitionInput) -> Option<AiState> {
    if brain.objective.is_some() {
        Some(AiState::Moving)
    } else if brain.state_timer >= input.cfg.idle_dwell * brain.personality.idle_dwell_scale {
        Some(AiState::Wandering)
    } else {
        None
    }
}

fn moving_transition(brain: &mut BotBrain, input: &TransitionInput) -> Option<AiState> {
    match brain.objective {
        None => {
            brain.plan = None;
            Some(AiState::Idle)
        }
        Some(objective) if arrived(&objective, input) => {
            brain.plan = None;
            Some(AiState::Capturing)
        }
        Some(_) => None,
    }
}

fn capturing_transition(brain: &mut BotBrain, input: &TransitionInput) -> Option<AiState> {
    let Some(objective) = brain.objective else {
        return Some(AiState::Idle);
    };
    if input.objective_territory.is_some_and(|t| t.owner == Some(input.faction)) {
        log::debug!("zone {} secured for {}", objective.cluster.0, input.faction.name());
        brain.objective = None;
        brain.replan_count = 0;
        return Some(AiState::Idle);
    }
    // Reassigned elsewhere.
    if !arrived(&objective, input) {
        return Some(AiState::Moving);
    }
    None
}

fn wandering_transition(brain: &mut BotBrain, input: &TransitionInput) -> Option<AiState> {
    if brain.objective.is_some() && brain.last_threat < input.cfg.threat_low {
        Some(AiState::Moving)
    } else if brain.state_timer >= input.cfg.wander_duration * brain.personality.wander_duration_scale {
        Some(AiState::Idle)
    } else {
        None
    }
}

// ============================================================================
// BOT BRAIN
// ============================================================================

impl BotBrain {
    pub fn enter(&mut self, state: AiState) {
        if self.state != state {
            log::trace!("bot state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.state_timer = 0.0;
        self.stuck = StuckMonitor::default();
    }

    /// Run this bot's state transition. Returns the new state on change.
    pub fn transition(&mut self, input: &TransitionInput) -> Option<AiState> {
        let next = TRANSITIONS[self.state.index()](self, input)?;
        self.enter(next);
        Some(next)
    }

    /// Whether this bot re-evaluates its state on `frame`.
    #[inline]
    pub fn in_batch(&self, frame: u64, batches: u32) -> bool {
        frame % batches.max(1) as u64 == (self.ai_slot % batches.max(1)) as u64
    }

    /// Hand the bot a new objective. Plans are refreshed lazily by `think`.
    pub fn assign(&mut self, objective: Objective) {
        if self.objective.map(|o| o.cluster) != Some(objective.cluster) {
            self.replan_count = 0;
        }
        self.objective = Some(objective);
    }

    /// Zone the bot is refusing after giving up on it, while the cooldown runs.
    pub fn refused_zone(&self) -> Option<ClusterId> {
        self.failed_objective.filter(|f| f.remaining > 0.0).map(|f| f.cluster)
    }

    /// Give up on the current objective and drift off along `escape_heading`.
    pub fn abandon_objective(&mut self, escape_heading: f32, cfg: &SimConfig) -> Option<ClusterId> {
        let cluster = self.objective.take().map(|o| o.cluster);
        if let Some(cluster) = cluster {
            self.failed_objective = Some(FailedObjective { cluster, remaining: cfg.failed_objective_cooldown });
        }
        self.plan = None;
        self.replan_count = 0;
        self.wander_heading = wrap_pi(escape_heading);
        self.avoidance_cooldown = cfg.avoidance_cooldown;
        self.enter(AiState::Wandering);
        cluster
    }

    /// Forget everything but personality and batch slot, e.g. on respawn.
    pub fn reset(&mut self, heading: f32) {
        *self = BotBrain::new(self.personality, self.ai_slot, heading);
    }

    fn tick_timers(&mut self, dt: f32) {
        self.state_timer += dt;
        self.avoidance_cooldown = (self.avoidance_cooldown - dt).max(0.0);
        self.wander_nudge_timer -= dt;
        if let Some(failed) = &mut self.failed_objective {
            failed.remaining -= dt;
        }
        if self.failed_objective.is_some_and(|f| f.remaining <= 0.0) {
            self.failed_objective = None;
        }
    }

    /// Plan a route to the objective. `false` when no route exists.
    fn request_plan(&mut self, pos: SphericalPos, ctx: &BotContext) -> bool {
        let Some(objective) = self.objective else {
            return false;
        };
        let path = ctx
            .nav
            .start_tile(ctx.world, pos)
            .zip(ctx.nav.is_traversable(objective.tile).then_some(objective.tile))
            .and_then(|(from, to)| ctx.nav.find_path(from, to));
        let Some(tiles) = path else {
            log::debug!("no route to zone {}", objective.cluster.0);
            return false;
        };
        let waypoints = ctx.nav.path_to_waypoints(&tiles, ctx.cfg.waypoint_turn_threshold);
        // The first waypoint is the tile the bot already stands on.
        let cursor = usize::from(waypoints.len() > 1);
        self.plan = Some(PathPlan { cluster: objective.cluster, tiles, waypoints, cursor });
        true
    }

    fn advance_cursor(&mut self, pos: SphericalPos, cfg: &SimConfig) {
        let Some(plan) = &mut self.plan else {
            return;
        };
        while !plan.is_final_waypoint() {
            let Some(wp) = plan.current_waypoint() else {
                break;
            };
            if pos.angular_distance(&wp) * cfg.sphere_radius > cfg.waypoint_reach {
                break;
            }
            plan.cursor += 1;
        }
    }

    /// Sample progress. Returns true when a stuck event fires.
    fn update_stuck(&mut self, pos: SphericalPos, dt: f32, cfg: &SimConfig) -> bool {
        if self.state == AiState::Idle {
            self.stuck = StuckMonitor::default();
            return false;
        }
        let Some(sample) = self.stuck.sample_pos else {
            self.stuck.sample_pos = Some(pos);
            self.stuck.timer = 0.0;
            return false;
        };
        self.stuck.timer += dt;
        if self.stuck.timer < cfg.stuck_check_interval {
            return false;
        }
        let moved = sample.angular_distance(&pos) * cfg.sphere_radius;
        let expected = cfg.max_speed * cfg.stuck_check_interval * cfg.stuck_progress_ratio;
        if moved < expected {
            self.stuck.no_progress += 1;
        } else {
            self.stuck.no_progress = 0;
        }
        self.stuck.sample_pos = Some(pos);
        self.stuck.timer = 0.0;
        if self.stuck.no_progress >= cfg.stuck_threshold {
            self.stuck.no_progress = 0;
            return true;
        }
        false
    }

    fn recover_from_stuck(&mut self, heading: f32, cfg: &SimConfig, rng: &mut impl Rng, report: &mut ThinkReport) {
        report.stuck = true;
        log::trace!("stuck in {:?}, replans so far {}", self.state, self.replan_count);
        self.avoidance_cooldown = cfg.avoidance_cooldown;
        let escape = heading + PI + rng.gen_range(-ESCAPE_SPREAD..ESCAPE_SPREAD);
        match self.state {
            AiState::Moving => {
                self.plan = None;
                self.replan_count += 1;
                if self.replan_count > cfg.replan_cap {
                    report.abandoned = self.abandon_objective(escape, cfg);
                    log::debug!("stuck past replan cap, abandoning {:?}", report.abandoned);
                } else {
                    report.replanned = true;
                    self.wander_heading = wrap_pi(escape);
                }
            }
            AiState::Wandering | AiState::Capturing => {
                self.wander_heading = wrap_pi(escape);
            }
            AiState::Idle => {}
        }
    }

    /// Per-frame decision making. Writes `body.input` and nothing else on
    /// the body.
    pub fn think(
        &mut self,
        me: Entity,
        body: &mut SurfaceBody,
        ctx: &BotContext,
        dt: f32,
        rng: &mut impl Rng,
    ) -> ThinkReport {
        let cfg = ctx.cfg;
        let mut report = ThinkReport::default();
        self.tick_timers(dt);

        if self.update_stuck(body.pos, dt, cfg) {
            self.recover_from_stuck(body.heading, cfg, rng, &mut report);
        }

        if self.state == AiState::Moving && self.objective.is_some() {
            let stale = match (&self.plan, &self.objective) {
                (Some(plan), Some(obj)) => plan.cluster != obj.cluster,
                _ => true,
            };
            if stale && !self.request_plan(body.pos, ctx) {
                let escape = body.heading + rng.gen_range(-PI..PI);
                report.abandoned = self.abandon_objective(escape, cfg);
            }
            self.advance_cursor(body.pos, cfg);
        }

        if self.state == AiState::Idle {
            body.input.clear();
            self.last_threat = 0.0;
            return report;
        }

        let (goal, cruise) = self.goal_and_cruise(body.pos, cfg, rng);
        let goal_bearing = goal.map(|g| body.pos.bearing_to(&g));
        if let Some(bearing) = goal_bearing {
            if self.avoidance_cooldown <= 0.0 {
                self.wander_heading = approach_angle(self.wander_heading, bearing, self.personality.seek_rate * dt);
            }
        }

        let input = SteeringInput {
            heading: body.heading,
            speed: body.speed,
            seek_heading: self.wander_heading,
            goal_bearing,
            separation: steering::separation_force(me, body.pos, ctx.neighbors, cfg),
            terrain: steering::terrain_threat(ctx.world, body.pos, body.heading, cfg),
            agents: steering::agent_threat(me, body.pos, body.heading, ctx.neighbors, cfg),
            cruise,
            caution: self.personality.caution,
        };
        let decision = steering::decide(&input, cfg);
        if decision.evasive {
            self.avoidance_cooldown = cfg.avoidance_cooldown;
            self.wander_heading = decision.heading;
        }
        self.last_threat = decision.threat;
        steering::apply_decision(&mut body.input, body.heading, body.speed, &decision, cfg);
        if matches!(decision.throttle, Throttle::Brake) {
            log::trace!("bot {me:?} braking, threat {:.2}", decision.threat);
        }
        report
    }

    /// Point to steer at this frame and the share of top speed to cruise at.
    fn goal_and_cruise(&mut self, pos: SphericalPos, cfg: &SimConfig, rng: &mut impl Rng) -> (Option<SphericalPos>, f32) {
        let cruise = self.personality.cruise_fraction;
        match self.state {
            AiState::Moving => {
                let waypoint = self.plan.as_ref().and_then(PathPlan::current_waypoint);
                let goal = waypoint.or(self.objective.map(|o| o.target));
                let near_end = self.plan.as_ref().is_none_or(PathPlan::is_final_waypoint)
                    && goal.is_some_and(|g| pos.angular_distance(&g) * cfg.sphere_radius < cfg.arrival_radius * 2.0);
                (goal, if near_end { cruise * 0.5 } else { cruise })
            }
            AiState::Capturing => {
                let target = self.objective.map(|o| o.target);
                match target {
                    Some(t) if pos.angular_distance(&t) * cfg.sphere_radius > cfg.arrival_radius => {
                        (Some(t), cruise * 0.5)
                    }
                    _ => {
                        self.nudge_wander(rng);
                        (None, CAPTURE_CRUISE)
                    }
                }
            }
            AiState::Wandering => {
                self.nudge_wander(rng);
                (None, cruise * WANDER_CRUISE)
            }
            AiState::Idle => (None, 0.0),
        }
    }

    fn nudge_wander(&mut self, rng: &mut impl Rng) {
        if self.wander_nudge_timer <= 0.0 {
            self.wander_heading = wrap_pi(self.wander_heading + rng.gen_range(-WANDER_NUDGE..WANDER_NUDGE));
            self.wander_nudge_timer = rng.gen_range(1.0..3.0);
        }
    }

    /// React to the physics result of this frame's move.
    pub fn note_move(&mut self, outcome: &MoveOutcome, body: &SurfaceBody, cfg: &SimConfig) {
        if outcome.blocked || outcome.reversed {
            self.avoidance_cooldown = cfg.avoidance_cooldown;
            self.wander_heading = body.heading;
        }
    }
}
