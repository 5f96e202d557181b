// Local steering for bots.
//
// Desired heading comes from three layers, in priority order:
//   1. separation from nearby agents (always blended in)
//   2. seeking toward the next waypoint / objective
//   3. a forward-cone threat probe that overrides both when it fires
// The result is turned into virtual key presses, never into a direct
// heading or speed write.

use bevy_ecs::entity::Entity;
use glam::Vec2;
use std::f32::consts::FRAC_PI_2;

use super::config::SimConfig;
use super::input::{ControlKey, InputState};
use super::sphere::{SphericalPos, heading_vec, vec_heading, wrap_pi};
use super::world::SurfaceWorld;

/// Heading error below which no turn key is pressed.
const TURN_DEADBAND: f32 = 0.05;
/// Heading errors above this make a fast bot lift off the throttle.
const SHARP_TURN: f32 = 1.4;
/// Agents are a softer obstacle than cliffs.
const AGENT_THREAT_SCALE: f32 = 0.8;
/// Extra half-angle allowed beyond the outermost probe for agent threats.
const AGENT_CONE_MARGIN: f32 = 0.2;

// ============================================================================
// INPUTS
// ============================================================================

/// Previous-frame state of another agent (or the player).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborSnapshot {
    pub id: Entity,
    pub pos: SphericalPos,
    pub alive: bool,
}

/// Strength and side of an obstacle ahead.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Threat {
    /// 0..1
    pub level: f32,
    /// Positive when the obstacle mass sits to the right of the heading.
    pub side: f32,
}

impl Threat {
    pub fn combine(self, other: Threat) -> Threat {
        Threat { level: (self.level + other.level).min(1.0), side: self.side + other.side }
    }
}

/// Sum of quadratically weighted push-aways from agents within
/// `separation_radius`, as a (north, east) vector. Its length never exceeds
/// `separation_strength * separation_cap`.
pub fn separation_force(me: Entity, pos: SphericalPos, neighbors: &[NeighborSnapshot], cfg: &SimConfig) -> Vec2 {
    let radius = cfg.to_angle(cfg.separation_radius);
    let mut force = Vec2::ZERO;
    for n in neighbors.iter().filter(|n| n.id != me && n.alive) {
        let d = pos.angular_distance(&n.pos);
        if d >= radius || d < 1e-6 || !d.is_finite() {
            continue;
        }
        let w = ((radius - d) / radius).powi(2);
        force -= heading_vec(pos.bearing_to(&n.pos)) * w;
    }
    let force = force * cfg.separation_strength;
    let cap = cfg.separation_strength * cfg.separation_cap;
    if !force.is_finite() {
        return Vec2::ZERO;
    }
    force.clamp_length_max(cap)
}

/// Probe a cone of rays ahead for elevated terrain.
pub fn terrain_threat(world: &dyn SurfaceWorld, pos: SphericalPos, heading: f32, cfg: &SimConfig) -> Threat {
    let rings = cfg.probe_distances.len() as f32;
    let mut threat = Threat::default();
    for (i, distance) in cfg.probe_distances.iter().enumerate() {
        let proximity = 1.0 - i as f32 / rings;
        for angle in cfg.probe_angles {
            let probe = pos.offset(heading + angle, cfg.to_angle(*distance));
            if !world.is_blocked(probe) {
                continue;
            }
            let t = proximity * angle.cos().max(0.0);
            threat.level = threat.level.max(t);
            threat.side += angle.signum() * t;
        }
    }
    threat
}

/// Same cone test against nearby agents.
pub fn agent_threat(
    me: Entity,
    pos: SphericalPos,
    heading: f32,
    neighbors: &[NeighborSnapshot],
    cfg: &SimConfig,
) -> Threat {
    let reach = cfg.probe_distances.iter().copied().fold(0.0f32, f32::max);
    let cone = cfg.probe_angles.iter().map(|a| a.abs()).fold(0.0f32, f32::max) + AGENT_CONE_MARGIN;
    let mut threat = Threat::default();
    for n in neighbors.iter().filter(|n| n.id != me && n.alive) {
        let d = pos.angular_distance(&n.pos) * cfg.sphere_radius;
        if d >= reach || !d.is_finite() {
            continue;
        }
        let rel = wrap_pi(pos.bearing_to(&n.pos) - heading);
        if rel.abs() >= cone {
            continue;
        }
        let t = (1.0 - d / reach) * (1.0 - rel.abs() / cone) * AGENT_THREAT_SCALE;
        threat.level = threat.level.max(t);
        threat.side += rel.signum() * t;
    }
    threat
}

/// Of the two headings perpendicular to the current one, the one that
/// points closer to the goal.
pub fn wall_follow_heading(heading: f32, goal_bearing: f32) -> f32 {
    let left = wrap_pi(heading - FRAC_PI_2);
    let right = wrap_pi(heading + FRAC_PI_2);
    if wrap_pi(left - goal_bearing).abs() <= wrap_pi(right - goal_bearing).abs() {
        left
    } else {
        right
    }
}

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Throttle {
    /// Accelerate while below this share of top speed.
    Accelerate(f32),
    Coast,
    Brake,
}

/// Everything a bot feeds into one steering decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringInput {
    pub heading: f32,
    pub speed: f32,
    /// Heading the bot wants absent obstacles (already blended toward goal).
    pub seek_heading: f32,
    /// Bearing to the goal, when there is one.
    pub goal_bearing: Option<f32>,
    pub separation: Vec2,
    pub terrain: Threat,
    pub agents: Threat,
    /// Share of top speed to cruise at.
    pub cruise: f32,
    pub caution: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringDecision {
    pub heading: f32,
    pub throttle: Throttle,
    /// Combined, caution-scaled threat.
    pub threat: f32,
    /// True when the threat override took control.
    pub evasive: bool,
}

pub fn decide(input: &SteeringInput, cfg: &SimConfig) -> SteeringDecision {
    let blended = heading_vec(input.seek_heading) + input.separation;
    let mut heading = if blended.length_squared() > 1e-8 {
        vec_heading(blended)
    } else {
        input.seek_heading
    };

    let combined = input.terrain.combine(input.agents);
    let threat = (combined.level * input.caution).clamp(0.0, 1.0);
    let mut throttle = Throttle::Accelerate(input.cruise);
    let mut evasive = false;

    if threat >= cfg.threat_high {
        evasive = true;
        // Obstacles right -> turn left, and vice versa; dead ahead -> right.
        let side = if combined.side > 0.0 { 1.0 } else { -1.0 };
        heading = match input.goal_bearing {
            Some(goal) if input.terrain.level >= input.agents.level => wall_follow_heading(input.heading, goal),
            _ => wrap_pi(input.heading - side * FRAC_PI_2),
        };
        throttle = if input.speed > 0.5 * cfg.max_speed {
            Throttle::Brake
        } else {
            Throttle::Accelerate(0.35)
        };
    } else if threat >= cfg.threat_medium {
        throttle = Throttle::Coast;
    } else if threat >= cfg.threat_low {
        throttle = Throttle::Accelerate(input.cruise * 0.5);
    }

    SteeringDecision { heading, throttle, threat, evasive }
}

/// Express a decision as held keys.
pub fn apply_decision(input: &mut InputState, heading: f32, speed: f32, decision: &SteeringDecision, cfg: &SimConfig) {
    input.clear();
    let error = wrap_pi(decision.heading - heading);
    if error > TURN_DEADBAND {
        input.press(ControlKey::TurnRight);
    } else if error < -TURN_DEADBAND {
        input.press(ControlKey::TurnLeft);
    }
    match decision.throttle {
        Throttle::Accelerate(limit) => {
            let sharp = error.abs() > SHARP_TURN && speed > 0.5 * cfg.max_speed;
            if speed < limit * cfg.max_speed && !sharp {
                input.press(ControlKey::Accelerate);
            }
        }
        Throttle::Coast => {}
        Throttle::Brake => input.press(ControlKey::Brake),
    }
}
