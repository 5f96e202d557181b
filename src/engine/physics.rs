// Single-body motion on the sphere surface.
//
// Bots and the player share this path: held keys become speed and heading
// changes, which are integrated into spherical-coordinate deltas and then
// checked against terrain with an oriented footprint.

use glam::Vec2;
use std::f32::consts::{FRAC_PI_2, PI};

use super::components::{LeanSpring, SurfaceBody};
use super::config::SimConfig;
use super::input::ControlKey;
use super::sphere::{SphericalPos, heading_vec, safe_sin_phi, wrap_pi, wrap_theta};
use super::world::SurfaceWorld;

/// Heading change forced when repeated bounces trap a body against a wall.
const BOUNCE_REVERSAL: f32 = 0.75 * PI;
/// Axis deltas below this are treated as no movement on that axis.
const AXIS_EPSILON: f32 = 1e-7;

const LEAN_STIFFNESS: f32 = 30.0;
const LEAN_DAMPING: f32 = 8.0;
const PITCH_PER_ACCEL: f32 = 0.02;
const ROLL_PER_TURN: f32 = 0.03;
const MAX_LEAN: f32 = 0.35;
/// Longest spring sub-step; larger frames are split.
const LEAN_MAX_STEP: f32 = 1.0 / 60.0;

/// What happened to a body during one integration step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveOutcome {
    /// The move was fully rejected and reverted.
    pub blocked: bool,
    /// Only one axis of the move was kept.
    pub slid: bool,
    /// Repeated bounces forced a heading reversal.
    pub reversed: bool,
}

// ============================================================================
// CONTROLS
// ============================================================================

/// Turn rate for the given speed, tighter when slow.
pub fn turn_rate_at(speed: f32, cfg: &SimConfig) -> f32 {
    let t = (speed.abs() / cfg.max_speed).clamp(0.0, 1.0);
    cfg.turn_rate_low_speed + (cfg.turn_rate_high_speed - cfg.turn_rate_low_speed) * t
}

/// Apply held keys to speed and heading. Returns the longitudinal
/// acceleration this frame.
pub fn apply_controls(body: &mut SurfaceBody, dt: f32, cfg: &SimConfig) -> f32 {
    let before = body.speed;
    let accelerate = body.input.is_key_held(ControlKey::Accelerate);
    let brake = body.input.is_key_held(ControlKey::Brake);

    if accelerate && !brake {
        let rate = if body.speed < 0.0 { cfg.braking } else { cfg.acceleration };
        body.speed += rate * dt;
    } else if brake && !accelerate {
        if body.speed > 0.0 {
            body.speed = (body.speed - cfg.braking * dt).max(0.0);
        } else {
            body.speed -= cfg.acceleration * dt;
        }
    } else {
        let drop = cfg.coast_friction * dt;
        body.speed = if body.speed.abs() <= drop { 0.0 } else { body.speed - drop * body.speed.signum() };
    }
    body.speed = body.speed.clamp(-cfg.max_speed * cfg.reverse_ratio, cfg.max_speed);

    body.turn_rate = body.input.turn_axis() * turn_rate_at(body.speed, cfg);
    body.heading = wrap_pi(body.heading + body.turn_rate * dt);

    if dt > 0.0 { (body.speed - before) / dt } else { 0.0 }
}

// ============================================================================
// INTEGRATION
// ============================================================================

/// Number of blocked probes among the footprint centre and its four corners.
pub fn footprint_blocked(world: &dyn SurfaceWorld, pos: SphericalPos, heading: f32, cfg: &SimConfig) -> u32 {
    let forward = heading_vec(heading);
    let right = heading_vec(heading + FRAC_PI_2);
    let l = cfg.footprint_half_length;
    let w = cfg.footprint_half_width;
    let corners = [
        Vec2::ZERO,
        forward * l + right * w,
        forward * l - right * w,
        -forward * l + right * w,
        -forward * l - right * w,
    ];
    corners
        .iter()
        .filter(|c| world.is_blocked(pos.displaced(**c, cfg.sphere_radius)))
        .count() as u32
}

/// Advance `body.pos` by its speed and heading over `dt`, resolving terrain.
pub fn integrate(body: &mut SurfaceBody, world: &dyn SurfaceWorld, dt: f32, cfg: &SimConfig) -> MoveOutcome {
    let mut outcome = MoveOutcome::default();
    body.bounce.since_last += dt;

    let travel = heading_vec(body.heading) * body.speed * dt;
    let r = cfg.sphere_radius;
    let phi = body.pos.phi;
    let mut dphi = -travel.x / r;
    let dtheta = travel.y / (r * safe_sin_phi(phi));

    // Soft push away from either pole, strongest at the hard limit.
    if phi < cfg.pole_soft_margin {
        dphi += cfg.pole_repulsion * dt * (1.0 - phi / cfg.pole_soft_margin);
    } else if phi > PI - cfg.pole_soft_margin {
        dphi -= cfg.pole_repulsion * dt * (1.0 - (PI - phi) / cfg.pole_soft_margin);
    }

    let new_phi = (phi + dphi).clamp(cfg.pole_hard_margin, PI - cfg.pole_hard_margin);
    let new_theta = wrap_theta(body.pos.theta + dtheta);
    if !(new_phi.is_finite() && new_theta.is_finite()) {
        body.speed = 0.0;
        outcome.blocked = true;
        return outcome;
    }
    let full = SphericalPos { theta: new_theta, phi: new_phi };

    let heading = body.heading;
    let before = footprint_blocked(world, body.pos, heading, cfg);
    let accepts = |candidate: SphericalPos| {
        let after = footprint_blocked(world, candidate, heading, cfg);
        after == 0 || after < before
    };

    if accepts(full) {
        body.pos = full;
        return outcome;
    }

    let mut slides = Vec::with_capacity(2);
    if (new_phi - phi).abs() > AXIS_EPSILON {
        slides.push(SphericalPos { theta: body.pos.theta, phi: new_phi });
    }
    if dtheta.abs() > AXIS_EPSILON {
        slides.push(SphericalPos { theta: new_theta, phi });
    }
    if let Some(slide) = slides.into_iter().find(|s| accepts(*s)) {
        body.pos = slide;
        body.speed *= cfg.slide_speed_factor;
        outcome.slid = true;
        log::trace!("wall slide to ({:.3}, {:.3})", slide.theta, slide.phi);
        return outcome;
    }

    body.speed *= cfg.blocked_speed_decay;
    outcome.blocked = true;
    if body.bounce.since_last <= cfg.bounce_window {
        body.bounce.count += 1;
    } else {
        body.bounce.count = 1;
    }
    body.bounce.since_last = 0.0;
    if body.bounce.count >= cfg.bounce_limit {
        body.heading = wrap_pi(body.heading + BOUNCE_REVERSAL);
        body.bounce.count = 0;
        outcome.reversed = true;
        log::trace!("bounce limit reached, reversing heading to {:.2}", body.heading);
    }
    outcome
}

/// Spring the visual pitch/roll toward targets set by acceleration and
/// cornering. Nothing in the simulation reads the result.
pub fn update_lean(lean: &mut LeanSpring, accel: f32, turn_rate: f32, speed: f32, dt: f32) {
    if !dt.is_finite() || dt <= 0.0 {
        return;
    }
    let target_pitch = (-accel * PITCH_PER_ACCEL).clamp(-MAX_LEAN, MAX_LEAN);
    let target_roll = (turn_rate * speed * ROLL_PER_TURN).clamp(-MAX_LEAN, MAX_LEAN);

    let steps = (dt / LEAN_MAX_STEP).ceil().max(1.0);
    let h = dt / steps;
    for _ in 0..steps as u32 {
        lean.pitch_vel += ((target_pitch - lean.pitch) * LEAN_STIFFNESS - lean.pitch_vel * LEAN_DAMPING) * h;
        lean.roll_vel += ((target_roll - lean.roll) * LEAN_STIFFNESS - lean.roll_vel * LEAN_DAMPING) * h;
        lean.pitch += lean.pitch_vel * h;
        lean.roll += lean.roll_vel * h;
    }
    if lean.pitch.abs() > MAX_LEAN {
        lean.pitch = lean.pitch.clamp(-MAX_LEAN, MAX_LEAN);
        lean.pitch_vel = 0.0;
    }
    if lean.roll.abs() > MAX_LEAN {
        lean.roll = lean.roll.clamp(-MAX_LEAN, MAX_LEAN);
        lean.roll_vel = 0.0;
    }
}

/// Controls, integration and lean for one body in one frame.
pub fn step_body(body: &mut SurfaceBody, world: &dyn SurfaceWorld, dt: f32, cfg: &SimConfig) -> MoveOutcome {
    let accel = apply_controls(body, dt, cfg);
    let outcome = integrate(body, world, dt, cfg);
    let (turn_rate, speed) = (body.turn_rate, body.speed);
    update_lean(&mut body.lean, accel, turn_rate, speed, dt);
    outcome
}
