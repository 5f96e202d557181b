// ECS components for surface agents.
// Every bot carries all of these with every field populated; optional
// state is modelled with `Option`, never by leaving fields out.

use bevy_ecs::prelude::*;
use rand::Rng;

use super::input::InputState;
use super::sphere::SphericalPos;
use super::world::{ClusterId, TileId};

/// Position and motion of an entity on the sphere surface.
#[derive(Component, Debug, Clone, Default)]
pub struct SurfaceBody {
    pub pos: SphericalPos,
    /// Bearing in the local tangent plane, 0 = north.
    pub heading: f32,
    /// Signed speed in world units per second; negative is reversing.
    pub speed: f32,
    pub input: InputState,
    /// Visual-only suspension state. Never read by AI or physics.
    pub lean: LeanSpring,
    pub bounce: BounceTracker,
    /// Turn rate applied last frame (rad/s), feeds the lean spring.
    pub turn_rate: f32,
}

impl SurfaceBody {
    pub fn at(pos: SphericalPos, heading: f32) -> Self {
        Self { pos, heading, ..Default::default() }
    }
}

/// Pitch/roll spring driven by acceleration and cornering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeanSpring {
    pub pitch: f32,
    pub roll: f32,
    pub pitch_vel: f32,
    pub roll_vel: f32,
}

/// Recent blocked-move history, used to break wall oscillation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BounceTracker {
    pub count: u32,
    pub since_last: f32,
}

/// Health and death state owned by the combat and spawn collaborators.
/// The core only reads `is_dead` and advances `fade`.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Vitals {
    pub hp: f32,
    pub is_dead: bool,
    pub damage_state: u8,
    /// 0 when alive, rises to 1 while a dead agent fades out.
    pub fade: f32,
    pub fade_reported: bool,
}

impl Default for Vitals {
    fn default() -> Self {
        Self { hp: 100.0, is_dead: false, damage_state: 0, fade: 0.0, fade_reported: false }
    }
}

/// Marks the entity driven by the local human player.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct LocalPlayer;

// ============================================================================
// BOT AI DATA
// ============================================================================

/// High-level bot behaviour state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AiState {
    #[default]
    Idle,
    Moving,
    Capturing,
    Wandering,
}

impl AiState {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            AiState::Idle => 0,
            AiState::Moving => 1,
            AiState::Capturing => 2,
            AiState::Wandering => 3,
        }
    }
}

/// A zone assigned by the faction coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objective {
    pub cluster: ClusterId,
    /// Representative tile of the zone.
    pub tile: TileId,
    pub target: SphericalPos,
}

/// A planned route, replaced wholesale on replan.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPlan {
    pub cluster: ClusterId,
    pub tiles: Vec<TileId>,
    pub waypoints: Vec<SphericalPos>,
    /// Index of the waypoint currently steered toward.
    pub cursor: usize,
}

impl PathPlan {
    pub fn current_waypoint(&self) -> Option<SphericalPos> {
        self.waypoints.get(self.cursor).copied()
    }

    pub fn is_final_waypoint(&self) -> bool {
        self.cursor + 1 >= self.waypoints.len()
    }
}

/// Progress sampling for stuck detection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StuckMonitor {
    pub sample_pos: Option<SphericalPos>,
    pub timer: f32,
    /// Consecutive samples without enough progress.
    pub no_progress: u32,
}

/// A zone the bot gave up on, refused until `remaining` runs out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailedObjective {
    pub cluster: ClusterId,
    pub remaining: f32,
}

/// Per-bot behavioural variation, rolled once at spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Personality {
    pub idle_dwell_scale: f32,
    pub wander_duration_scale: f32,
    /// How fast the wander heading is pulled toward the goal (rad/s).
    pub seek_rate: f32,
    /// Share of top speed used when cruising.
    pub cruise_fraction: f32,
    /// Multiplier on perceived threat.
    pub caution: f32,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            idle_dwell_scale: 1.0,
            wander_duration_scale: 1.0,
            seek_rate: 2.5,
            cruise_fraction: 0.85,
            caution: 1.0,
        }
    }
}

impl Personality {
    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            idle_dwell_scale: rng.gen_range(0.5..1.5),
            wander_duration_scale: rng.gen_range(0.6..1.6),
            seek_rate: rng.gen_range(1.5..3.5),
            cruise_fraction: rng.gen_range(0.7..1.0),
            caution: rng.gen_range(0.8..1.2),
        }
    }
}

/// AI state of one bot. Behaviour lives in `bot.rs`.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct BotBrain {
    pub state: AiState,
    /// Seconds spent in the current state.
    pub state_timer: f32,
    pub objective: Option<Objective>,
    pub plan: Option<PathPlan>,
    /// Heading the bot is drifting along, blended toward goals over time.
    pub wander_heading: f32,
    pub wander_nudge_timer: f32,
    /// While positive, target seeking is suppressed.
    pub avoidance_cooldown: f32,
    pub stuck: StuckMonitor,
    pub replan_count: u32,
    pub failed_objective: Option<FailedObjective>,
    pub personality: Personality,
    /// Round-robin batch this bot's state transitions run in.
    pub ai_slot: u32,
    /// Combined threat seen last frame.
    pub last_threat: f32,
}

impl BotBrain {
    pub fn new(personality: Personality, ai_slot: u32, heading: f32) -> Self {
        Self {
            state: AiState::Idle,
            state_timer: 0.0,
            objective: None,
            plan: None,
            wander_heading: heading,
            wander_nudge_timer: 0.0,
            avoidance_cooldown: 0.0,
            stuck: StuckMonitor::default(),
            replan_count: 0,
            failed_objective: None,
            personality,
            ai_slot,
            last_threat: 0.0,
        }
    }
}

impl Default for BotBrain {
    fn default() -> Self {
        Self::new(Personality::default(), 0, 0.0)
    }
}
