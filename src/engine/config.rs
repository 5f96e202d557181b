// Static simulation tuning.
//
// Every number here is set once at startup. Distances are world units on a
// sphere of SPHERE_RADIUS unless the name says otherwise; angles are radians.

use super::error::{SimError, SimResult};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const SPHERE_RADIUS: f32 = 100.0;

// -- Spatial grid / collision ------------------------------------------------

/// Latitude rows of the collision grid.
pub const GRID_PHI_CELLS: u32 = 32;
/// Longitude columns of the collision grid.
pub const GRID_THETA_CELLS: u32 = 64;
/// Per-agent collision radius. Two agents overlap below twice this.
pub const COLLISION_RADIUS: f32 = 1.6;
/// Share of the penetration depth removed from the local agent per contact.
pub const LOCAL_CORRECTION_FRACTION: f32 = 0.5;
/// Speed multiplier applied to the local agent on contact.
pub const COLLISION_SPEED_DAMPING: f32 = 0.85;
/// Corrections implying a larger angular jump than this are rejected.
pub const MAX_CORRECTION_ANGLE: f32 = 0.05;
/// Minimum seconds between two effect bursts for the same pair.
pub const EFFECT_COOLDOWN: f32 = 0.35;

// -- Steering ----------------------------------------------------------------

pub const SEPARATION_RADIUS: f32 = 6.0;
pub const SEPARATION_STRENGTH: f32 = 1.2;
/// Separation output never exceeds `SEPARATION_STRENGTH * SEPARATION_CAP`.
pub const SEPARATION_CAP: f32 = 2.0;
/// Forward probe distances, nearest first.
pub const PROBE_DISTANCES: [f32; 3] = [3.0, 6.0, 9.0];
/// Forward probe angular offsets relative to the heading.
pub const PROBE_ANGLES: [f32; 5] = [-0.7, -0.35, 0.0, 0.35, 0.7];
/// Threat at or above this slows acceleration.
pub const THREAT_LOW: f32 = 0.2;
/// Threat at or above this stops throttling entirely.
pub const THREAT_MEDIUM: f32 = 0.45;
/// Threat at or above this forces a hard heading change.
pub const THREAT_HIGH: f32 = 0.7;

// -- Motion ------------------------------------------------------------------

pub const MAX_SPEED: f32 = 6.0;
/// Reverse top speed as a fraction of MAX_SPEED.
pub const REVERSE_RATIO: f32 = 0.5;
pub const ACCELERATION: f32 = 4.0;
pub const BRAKING: f32 = 9.0;
pub const COAST_FRICTION: f32 = 2.0;
/// Turn rate at standstill (rad/s).
pub const TURN_RATE_LOW_SPEED: f32 = 2.4;
/// Turn rate at top speed (rad/s).
pub const TURN_RATE_HIGH_SPEED: f32 = 1.1;
pub const FOOTPRINT_HALF_LENGTH: f32 = 1.4;
pub const FOOTPRINT_HALF_WIDTH: f32 = 1.0;
/// Soft pole repulsion starts this close (in phi) to either pole.
pub const POLE_SOFT_MARGIN: f32 = 0.25;
/// Hard phi clamp distance from either pole.
pub const POLE_HARD_MARGIN: f32 = 0.12;
/// Peak pole repulsion in rad/s.
pub const POLE_REPULSION: f32 = 0.08;
/// Speed multiplier kept after a successful wall slide.
pub const SLIDE_SPEED_FACTOR: f32 = 0.85;
/// Speed multiplier after a fully blocked move.
pub const BLOCKED_SPEED_DECAY: f32 = 0.3;
/// Bounces inside this window count toward the oscillation breaker.
pub const BOUNCE_WINDOW: f32 = 1.5;
pub const BOUNCE_LIMIT: u32 = 3;

// -- Strategy ----------------------------------------------------------------

pub const COORDINATOR_INTERVAL: f32 = 2.0;
pub const MAX_ZONES_PER_TICK: usize = 8;
pub const MIN_AGENTS_PER_ZONE: usize = 3;
/// One extra agent is wanted per this many tiles in a zone.
pub const TILES_PER_AGENT: usize = 10;
/// Straight-distance prefilter keeps this many candidates per needed agent.
pub const PREFILTER_MULTIPLIER: usize = 3;
pub const MIN_ZONE_SCORE: f32 = 10.0;
/// Zones whose centre lies within this phi of a pole are never targeted.
pub const POLAR_DEAD_ZONE: f32 = 0.3;
/// Seconds a bot refuses a zone it had to give up on.
pub const FAILED_OBJECTIVE_COOLDOWN: f32 = 10.0;

// -- Agent behaviour ---------------------------------------------------------

pub const STUCK_CHECK_INTERVAL: f32 = 0.75;
pub const STUCK_THRESHOLD: u32 = 3;
/// Fraction of max-speed travel that counts as progress per stuck check.
pub const STUCK_PROGRESS_RATIO: f32 = 0.2;
pub const REPLAN_CAP: u32 = 3;
pub const AVOIDANCE_COOLDOWN: f32 = 1.0;
/// Waypoint simplification keeps turns sharper than this (15 degrees).
pub const WAYPOINT_TURN_THRESHOLD: f32 = 15.0 * std::f32::consts::PI / 180.0;
pub const WAYPOINT_REACH: f32 = 5.0;
pub const ARRIVAL_RADIUS: f32 = 4.0;
pub const IDLE_DWELL: f32 = 2.0;
pub const WANDER_DURATION: f32 = 6.0;
/// Agents re-evaluate their high-level state once every this many frames.
pub const AI_BATCHES: u32 = 4;
pub const DEATH_FADE_TIME: f32 = 2.0;
/// Agents within this distance of the local player are flagged as near.
pub const LOD_RADIUS: f32 = 40.0;

// ============================================================================
// SIM CONFIG
// ============================================================================

/// The full configuration surface. `Default` uses the constants above.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub sphere_radius: f32,

    pub grid_phi_cells: u32,
    pub grid_theta_cells: u32,
    pub collision_radius: f32,
    pub local_correction_fraction: f32,
    pub collision_speed_damping: f32,
    pub max_correction_angle: f32,
    pub effect_cooldown: f32,

    pub separation_radius: f32,
    pub separation_strength: f32,
    pub separation_cap: f32,
    pub probe_distances: [f32; 3],
    pub probe_angles: [f32; 5],
    pub threat_low: f32,
    pub threat_medium: f32,
    pub threat_high: f32,

    pub max_speed: f32,
    pub reverse_ratio: f32,
    pub acceleration: f32,
    pub braking: f32,
    pub coast_friction: f32,
    pub turn_rate_low_speed: f32,
    pub turn_rate_high_speed: f32,
    pub footprint_half_length: f32,
    pub footprint_half_width: f32,
    pub pole_soft_margin: f32,
    pub pole_hard_margin: f32,
    pub pole_repulsion: f32,
    pub slide_speed_factor: f32,
    pub blocked_speed_decay: f32,
    pub bounce_window: f32,
    pub bounce_limit: u32,

    pub coordinator_interval: f32,
    pub max_zones_per_tick: usize,
    pub min_agents_per_zone: usize,
    pub tiles_per_agent: usize,
    pub prefilter_multiplier: usize,
    pub min_zone_score: f32,
    pub polar_dead_zone: f32,
    pub failed_objective_cooldown: f32,

    pub stuck_check_interval: f32,
    pub stuck_threshold: u32,
    pub stuck_progress_ratio: f32,
    pub replan_cap: u32,
    pub avoidance_cooldown: f32,
    pub waypoint_turn_threshold: f32,
    pub waypoint_reach: f32,
    pub arrival_radius: f32,
    pub idle_dwell: f32,
    pub wander_duration: f32,
    pub ai_batches: u32,
    pub death_fade_time: f32,
    pub lod_radius: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sphere_radius: SPHERE_RADIUS,

            grid_phi_cells: GRID_PHI_CELLS,
            grid_theta_cells: GRID_THETA_CELLS,
            collision_radius: COLLISION_RADIUS,
            local_correction_fraction: LOCAL_CORRECTION_FRACTION,
            collision_speed_damping: COLLISION_SPEED_DAMPING,
            max_correction_angle: MAX_CORRECTION_ANGLE,
            effect_cooldown: EFFECT_COOLDOWN,

            separation_radius: SEPARATION_RADIUS,
            separation_strength: SEPARATION_STRENGTH,
            separation_cap: SEPARATION_CAP,
            probe_distances: PROBE_DISTANCES,
            probe_angles: PROBE_ANGLES,
            threat_low: THREAT_LOW,
            threat_medium: THREAT_MEDIUM,
            threat_high: THREAT_HIGH,

            max_speed: MAX_SPEED,
            reverse_ratio: REVERSE_RATIO,
            acceleration: ACCELERATION,
            braking: BRAKING,
            coast_friction: COAST_FRICTION,
            turn_rate_low_speed: TURN_RATE_LOW_SPEED,
            turn_rate_high_speed: TURN_RATE_HIGH_SPEED,
            footprint_half_length: FOOTPRINT_HALF_LENGTH,
            footprint_half_width: FOOTPRINT_HALF_WIDTH,
            pole_soft_margin: POLE_SOFT_MARGIN,
            pole_hard_margin: POLE_HARD_MARGIN,
            pole_repulsion: POLE_REPULSION,
            slide_speed_factor: SLIDE_SPEED_FACTOR,
            blocked_speed_decay: BLOCKED_SPEED_DECAY,
            bounce_window: BOUNCE_WINDOW,
            bounce_limit: BOUNCE_LIMIT,

            coordinator_interval: COORDINATOR_INTERVAL,
            max_zones_per_tick: MAX_ZONES_PER_TICK,
            min_agents_per_zone: MIN_AGENTS_PER_ZONE,
            tiles_per_agent: TILES_PER_AGENT,
            prefilter_multiplier: PREFILTER_MULTIPLIER,
            min_zone_score: MIN_ZONE_SCORE,
            polar_dead_zone: POLAR_DEAD_ZONE,
            failed_objective_cooldown: FAILED_OBJECTIVE_COOLDOWN,

            stuck_check_interval: STUCK_CHECK_INTERVAL,
            stuck_threshold: STUCK_THRESHOLD,
            stuck_progress_ratio: STUCK_PROGRESS_RATIO,
            replan_cap: REPLAN_CAP,
            avoidance_cooldown: AVOIDANCE_COOLDOWN,
            waypoint_turn_threshold: WAYPOINT_TURN_THRESHOLD,
            waypoint_reach: WAYPOINT_REACH,
            arrival_radius: ARRIVAL_RADIUS,
            idle_dwell: IDLE_DWELL,
            wander_duration: WANDER_DURATION,
            ai_batches: AI_BATCHES,
            death_fade_time: DEATH_FADE_TIME,
            lod_radius: LOD_RADIUS,
        }
    }
}

fn positive(field: &'static str, value: f32) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidConfig { field, reason: "must be positive and finite" })
    }
}

fn unit_interval(field: &'static str, value: f32) -> SimResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::InvalidConfig { field, reason: "must lie in [0, 1]" })
    }
}

fn nonzero(field: &'static str, value: usize) -> SimResult<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(SimError::InvalidConfig { field, reason: "must be at least 1" })
    }
}

impl SimConfig {
    /// Angular equivalent of a world-space distance on this sphere.
    #[inline]
    pub fn to_angle(&self, distance: f32) -> f32 {
        distance / self.sphere_radius
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> SimResult<()> {
        positive("sphere_radius", self.sphere_radius)?;
        nonzero("grid_phi_cells", self.grid_phi_cells as usize)?;
        nonzero("grid_theta_cells", self.grid_theta_cells as usize)?;
        positive("collision_radius", self.collision_radius)?;
        unit_interval("local_correction_fraction", self.local_correction_fraction)?;
        unit_interval("collision_speed_damping", self.collision_speed_damping)?;
        positive("max_correction_angle", self.max_correction_angle)?;
        positive("effect_cooldown", self.effect_cooldown)?;

        positive("separation_radius", self.separation_radius)?;
        positive("separation_strength", self.separation_strength)?;
        positive("separation_cap", self.separation_cap)?;
        for d in self.probe_distances {
            positive("probe_distances", d)?;
        }
        if !(self.threat_low <= self.threat_medium && self.threat_medium <= self.threat_high) {
            return Err(SimError::InvalidConfig {
                field: "threat_low/medium/high",
                reason: "must be ascending",
            });
        }
        unit_interval("threat_high", self.threat_high)?;

        positive("max_speed", self.max_speed)?;
        unit_interval("reverse_ratio", self.reverse_ratio)?;
        positive("acceleration", self.acceleration)?;
        positive("braking", self.braking)?;
        positive("coast_friction", self.coast_friction)?;
        positive("turn_rate_low_speed", self.turn_rate_low_speed)?;
        positive("turn_rate_high_speed", self.turn_rate_high_speed)?;
        positive("footprint_half_length", self.footprint_half_length)?;
        positive("footprint_half_width", self.footprint_half_width)?;
        positive("pole_soft_margin", self.pole_soft_margin)?;
        positive("pole_hard_margin", self.pole_hard_margin)?;
        if self.pole_hard_margin >= self.pole_soft_margin {
            return Err(SimError::InvalidConfig {
                field: "pole_hard_margin",
                reason: "must be smaller than pole_soft_margin",
            });
        }
        unit_interval("slide_speed_factor", self.slide_speed_factor)?;
        unit_interval("blocked_speed_decay", self.blocked_speed_decay)?;
        positive("bounce_window", self.bounce_window)?;

        positive("coordinator_interval", self.coordinator_interval)?;
        nonzero("max_zones_per_tick", self.max_zones_per_tick)?;
        nonzero("min_agents_per_zone", self.min_agents_per_zone)?;
        nonzero("tiles_per_agent", self.tiles_per_agent)?;
        nonzero("prefilter_multiplier", self.prefilter_multiplier)?;

        positive("stuck_check_interval", self.stuck_check_interval)?;
        nonzero("stuck_threshold", self.stuck_threshold as usize)?;
        unit_interval("stuck_progress_ratio", self.stuck_progress_ratio)?;
        positive("waypoint_turn_threshold", self.waypoint_turn_threshold)?;
        positive("waypoint_reach", self.waypoint_reach)?;
        positive("arrival_radius", self.arrival_radius)?;
        nonzero("ai_batches", self.ai_batches as usize)?;
        positive("death_fade_time", self.death_fade_time)?;
        Ok(())
    }
}
