// Spatial hash over (phi, theta) cells plus collision detection/response.
//
// This is a prediction layer for feel, not authoritative physics: only the
// locally controlled entity gets a positional correction. Every other
// overlapping pair only produces cosmetic collision events; an outside
// authority owns their positions.
//
// Membership is updated incrementally: an agent moves between cell sets
// only when its cell key changes.

use bevy_ecs::entity::Entity;
use glam::Vec3;
use std::collections::{HashMap, HashSet};
use std::f32::consts::{PI, TAU};

use super::config::SimConfig;
use super::sphere::{SphericalPos, tangent_basis};

const EPSILON: f32 = 1e-6;
/// Passes removing push components that close on a contact.
const PROJECTION_PASSES: usize = 2;
/// Halvings tried before a push is given up.
const BACKOFF_STEPS: usize = 5;

// ============================================================================
// TYPES
// ============================================================================

/// Grid cell address: latitude row, longitude column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub phi: u32,
    pub theta: u32,
}

/// Collision-relevant view of one entity for this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBody {
    pub id: Entity,
    pub pos: SphericalPos,
    pub speed: f32,
    /// Inactive bodies (dead, parked) are dropped from the grid.
    pub active: bool,
    /// The locally controlled entity receives positional corrections.
    pub local: bool,
}

/// A cosmetic contact for the effects layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub a: Entity,
    pub b: Entity,
    /// Contact midpoint on the sphere surface, world space.
    pub world_point: Vec3,
    /// 0..1, scaled by combined speed.
    pub intensity: f32,
}

/// Corrected state for a locally controlled body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub id: Entity,
    pub pos: SphericalPos,
    /// Multiply the body's speed by this.
    pub speed_factor: f32,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CollisionOutcome {
    pub corrections: Vec<Correction>,
    pub events: Vec<CollisionEvent>,
    pub pairs_checked: usize,
    pub overlaps: usize,
    /// Corrections thrown away by the safety guards.
    pub rejected: usize,
}

/// The slice of `SimConfig` the grid needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionSettings {
    pub sphere_radius: f32,
    pub phi_cells: u32,
    pub theta_cells: u32,
    pub collision_radius: f32,
    pub correction_fraction: f32,
    pub speed_damping: f32,
    pub max_correction_angle: f32,
    pub effect_cooldown: f32,
    pub max_speed: f32,
}

impl From<&SimConfig> for CollisionSettings {
    fn from(cfg: &SimConfig) -> Self {
        Self {
            sphere_radius: cfg.sphere_radius,
            phi_cells: cfg.grid_phi_cells.max(1),
            theta_cells: cfg.grid_theta_cells.max(1),
            collision_radius: cfg.collision_radius,
            correction_fraction: cfg.local_correction_fraction,
            speed_damping: cfg.collision_speed_damping,
            max_correction_angle: cfg.max_correction_angle,
            effect_cooldown: cfg.effect_cooldown,
            max_speed: cfg.max_speed,
        }
    }
}

// ============================================================================
// SPATIAL COLLISION GRID
// ============================================================================

pub struct SpatialCollisionGrid {
    settings: CollisionSettings,
    cells: HashMap<CellKey, HashSet<Entity>>,
    membership: HashMap<Entity, CellKey>,
    /// Remaining effect cooldown per unordered pair.
    effect_cooldowns: HashMap<(Entity, Entity), f32>,
}

impl SpatialCollisionGrid {
    pub fn new(settings: CollisionSettings) -> Self {
        Self {
            settings,
            cells: HashMap::new(),
            membership: HashMap::new(),
            effect_cooldowns: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &SimConfig) -> Self {
        Self::new(CollisionSettings::from(cfg))
    }

    /// Number of indexed agents.
    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn cell_key(&self, pos: SphericalPos) -> CellKey {
        let s = &self.settings;
        let phi = ((pos.phi / PI) * s.phi_cells as f32).floor().max(0.0) as u32;
        let theta = ((pos.theta / TAU) * s.theta_cells as f32).floor().max(0.0) as u32;
        CellKey { phi: phi.min(s.phi_cells - 1), theta: theta.min(s.theta_cells - 1) }
    }

    pub fn cell_of(&self, id: Entity) -> Option<CellKey> {
        self.membership.get(&id).copied()
    }

    pub fn members(&self, key: CellKey) -> impl Iterator<Item = Entity> + '_ {
        self.cells.get(&key).into_iter().flat_map(|set| set.iter().copied())
    }

    /// Index `id` at `pos`. Returns true if its cell changed.
    pub fn update_agent(&mut self, id: Entity, pos: SphericalPos) -> bool {
        let key = self.cell_key(pos);
        if self.membership.get(&id) == Some(&key) {
            return false;
        }
        self.remove_agent(id);
        self.cells.entry(key).or_default().insert(id);
        self.membership.insert(id, key);
        true
    }

    pub fn remove_agent(&mut self, id: Entity) {
        if let Some(old) = self.membership.remove(&id) {
            if let Some(set) = self.cells.get_mut(&old) {
                set.remove(&id);
                if set.is_empty() {
                    self.cells.remove(&old);
                }
            }
        }
    }

    /// Every cell that can hold a contact for an agent in `key`: the cell and
    /// its neighbours. Longitude columns narrow by sin(phi) toward the poles,
    /// so rows there span more columns. Longitude wraps at the seam; a row
    /// past either pole continues on the far side of that pole.
    pub fn neighbor_keys(&self, key: CellKey) -> Vec<CellKey> {
        let rows = self.settings.phi_cells as i64;
        let cols = self.settings.theta_cells as i64;
        let row_height = self.settings.sphere_radius * PI / rows as f32;
        let contact = self.settings.collision_radius * 2.0;
        let row_span = span_for(contact, row_height, rows);

        let mut keys = Vec::with_capacity(9);
        for dp in -row_span..=row_span {
            let mut p = key.phi as i64 + dp;
            let mut shift = 0;
            if p < 0 {
                p = -p - 1;
                shift = cols / 2;
            } else if p >= rows {
                p = 2 * rows - p - 1;
                shift = cols / 2;
            }
            let p = p.clamp(0, rows - 1);
            let span = self.column_span(p);
            if span * 2 + 1 >= cols {
                keys.extend((0..cols).map(|t| CellKey { phi: p as u32, theta: t as u32 }));
                continue;
            }
            for dt in -span..=span {
                let t = (key.theta as i64 + dt + shift).rem_euclid(cols);
                keys.push(CellKey { phi: p as u32, theta: t as u32 });
            }
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Columns either side to search in `row`, from its narrowest edge.
    fn column_span(&self, row: i64) -> i64 {
        let s = &self.settings;
        let cols = s.theta_cells as i64;
        let height = PI / s.phi_cells as f32;
        let edge = (row as f32 * height).min(PI - (row + 1) as f32 * height).max(0.0);
        let width = s.sphere_radius * edge.sin() * TAU / s.theta_cells as f32;
        span_for(s.collision_radius * 2.0, width, cols)
    }

    /// Append every agent in `id`'s cell neighbourhood except `id` itself.
    pub fn candidates(&self, id: Entity, out: &mut Vec<Entity>) {
        let Some(key) = self.cell_of(id) else {
            return;
        };
        for k in self.neighbor_keys(key) {
            out.extend(self.members(k).filter(|&other| other != id));
        }
    }

    /// Bring membership in line with this frame's bodies: index active ones,
    /// drop inactive ones and anything no longer present.
    pub fn sync(&mut self, bodies: &[CollisionBody]) {
        let mut seen = HashSet::with_capacity(bodies.len());
        for body in bodies {
            if body.active && body.pos.is_finite() {
                self.update_agent(body.id, body.pos);
                seen.insert(body.id);
            } else {
                self.remove_agent(body.id);
            }
        }
        let stale: Vec<Entity> = self.membership.keys().filter(|id| !seen.contains(id)).copied().collect();
        for id in stale {
            self.remove_agent(id);
        }
    }

    // ========================================================================
    // DETECTION + RESPONSE
    // ========================================================================

    /// Run one frame: re-index, detect overlapping pairs, correct the local
    /// body and emit cooldown-gated contact events.
    ///
    /// `is_blocked` reports impassable terrain; corrections landing there are
    /// rejected.
    pub fn step(
        &mut self,
        bodies: &[CollisionBody],
        dt: f32,
        is_blocked: impl Fn(SphericalPos) -> bool,
    ) -> CollisionOutcome {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.effect_cooldowns.retain(|_, remaining| {
            *remaining -= dt;
            *remaining > 0.0
        });
        self.sync(bodies);

        let index: HashMap<Entity, usize> = bodies
            .iter()
            .enumerate()
            .filter(|(_, b)| b.active && b.pos.is_finite())
            .map(|(i, b)| (b.id, i))
            .collect();

        // Contacts of each local body, resolved together once detection is done.
        let mut pushes: HashMap<Entity, LocalPush> = bodies
            .iter()
            .filter(|b| b.local && index.contains_key(&b.id))
            .map(|b| (b.id, LocalPush::default()))
            .collect();

        let mut outcome = CollisionOutcome::default();
        let mut checked: HashSet<(Entity, Entity)> = HashSet::new();
        let mut scratch = Vec::new();
        let radius = self.settings.sphere_radius;
        let contact = self.settings.collision_radius * 2.0;

        for body in bodies.iter().filter(|b| index.contains_key(&b.id)) {
            scratch.clear();
            self.candidates(body.id, &mut scratch);
            for &other_id in &scratch {
                let pair = ordered(body.id, other_id);
                if !checked.insert(pair) {
                    continue;
                }
                let Some(&other_idx) = index.get(&other_id) else {
                    continue;
                };
                let other = &bodies[other_idx];
                outcome.pairs_checked += 1;

                let wa = body.pos.to_world(radius);
                let wb = other.pos.to_world(radius);
                let dist = wa.distance(wb);
                if !dist.is_finite() || dist >= contact {
                    continue;
                }
                outcome.overlaps += 1;
                let penetration = contact - dist;

                if !self.effect_cooldowns.contains_key(&pair) {
                    let mid = (wa + wb) * 0.5;
                    let world_point = if mid.length_squared() > EPSILON {
                        mid.normalize() * radius
                    } else {
                        wa
                    };
                    let combined = body.speed.abs() + other.speed.abs();
                    let intensity = (combined / (2.0 * self.settings.max_speed)).clamp(0.1, 1.0);
                    outcome.events.push(CollisionEvent { a: pair.0, b: pair.1, world_point, intensity });
                    self.effect_cooldowns.insert(pair, self.settings.effect_cooldown);
                }

                // Share the push when both sides are local.
                let share = if body.local && other.local { 0.5 } else { 1.0 };
                for (me, them) in [(body, other), (other, body)] {
                    let Some(push) = pushes.get_mut(&me.id) else {
                        continue;
                    };
                    let tie_sign = if me.id < them.id { 1.0 } else { -1.0 };
                    let away = away_from(me.pos, them.pos, tie_sign);
                    let shift = self.settings.correction_fraction * penetration * share / radius;
                    push.push += away * shift;
                    push.contacts.push((them.pos, away));
                }
            }
        }

        for body in bodies.iter().filter(|b| b.local) {
            let Some(push) = pushes.get(&body.id) else {
                continue;
            };
            if push.contacts.is_empty() {
                continue;
            }
            match self.resolve(body.pos, push, &is_blocked) {
                Some(pos) => {
                    self.update_agent(body.id, pos);
                    outcome.corrections.push(Correction {
                        id: body.id,
                        pos,
                        speed_factor: self.settings.speed_damping,
                    });
                }
                None => {
                    outcome.rejected += 1;
                    log::warn!("rejected collision correction for {:?}", body.id);
                }
            }
        }
        outcome
    }

    /// Apply the summed push of one local body.
    ///
    /// Any part of the push that closes on one of the contacts is removed
    /// first, then the step is halved until no contact gets nearer. A body
    /// pinned from opposite sides keeps its position. Results that are
    /// non-finite, jump too far or land on blocked terrain are `None`.
    fn resolve(
        &self,
        me: SphericalPos,
        push: &LocalPush,
        is_blocked: &impl Fn(SphericalPos) -> bool,
    ) -> Option<SphericalPos> {
        let mu = me.to_unit();
        let mut v = push.push;
        for _ in 0..PROJECTION_PASSES {
            for &(_, away) in &push.contacts {
                let closing = -v.dot(away);
                if closing > 0.0 {
                    v += away * closing;
                }
            }
        }
        let angle = v.length();
        if !angle.is_finite() {
            return None;
        }
        if angle <= EPSILON {
            return Some(me);
        }
        let dir = v / angle;
        let mut step = angle;
        for _ in 0..BACKOFF_STEPS {
            let corrected = SphericalPos::from_vec(mu * step.cos() + dir * step.sin());
            if !corrected.is_finite() {
                return None;
            }
            if self.keeps_clear(me, corrected, &push.contacts) {
                if me.angular_distance(&corrected) > self.settings.max_correction_angle || is_blocked(corrected) {
                    return None;
                }
                return Some(corrected);
            }
            step *= 0.5;
        }
        Some(me)
    }

    /// True if no contact is nearer to `after` than it was to `before`.
    fn keeps_clear(&self, before: SphericalPos, after: SphericalPos, contacts: &[(SphericalPos, Vec3)]) -> bool {
        let radius = self.settings.sphere_radius;
        let (wb, wa) = (before.to_world(radius), after.to_world(radius));
        contacts.iter().all(|(them, _)| {
            let wt = them.to_world(radius);
            wa.distance(wt) >= wb.distance(wt)
        })
    }
}

/// Summed push and contact list for one local body.
#[derive(Debug, Default)]
struct LocalPush {
    /// Tangent at the body, length in radians.
    push: Vec3,
    /// Each contact's position and the unit tangent pointing away from it.
    contacts: Vec<(SphericalPos, Vec3)>,
}

/// Unit tangent at `me` pointing directly away from `them`.
///
/// Coincident positions have no separation direction; the push then falls
/// back to the local east axis, signed by `tie_sign`.
fn away_from(me: SphericalPos, them: SphericalPos, tie_sign: f32) -> Vec3 {
    let mu = me.to_unit();
    let away = mu - them.to_unit();
    let tangent = away - mu * away.dot(mu);
    if tangent.length_squared() > EPSILON * EPSILON {
        tangent.normalize()
    } else {
        let (_, east) = tangent_basis(&me);
        east * tie_sign
    }
}

/// Cells needed either side to cover `reach` with cells `width` wide.
fn span_for(reach: f32, width: f32, cells: i64) -> i64 {
    if width.is_nan() || width <= EPSILON {
        return cells;
    }
    ((reach / width).ceil() as i64).clamp(1, cells)
}

fn ordered(a: Entity, b: Entity) -> (Entity, Entity) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use std::f32::consts::FRAC_PI_2;

    fn grid() -> SpatialCollisionGrid {
        SpatialCollisionGrid::from_config(&SimConfig::default())
    }

    fn body(n: u32, pos: SphericalPos, local: bool) -> CollisionBody {
        CollisionBody { id: Entity::from_raw(n), pos, speed: 0.0, active: true, local }
    }

    fn separation(a: SphericalPos, b: SphericalPos) -> f32 {
        a.to_world(SimConfig::default().sphere_radius).distance(b.to_world(SimConfig::default().sphere_radius))
    }

    #[test]
    fn membership_moves_only_on_key_change() {
        let mut g = grid();
        let id = Entity::from_raw(1);
        assert!(g.update_agent(id, SphericalPos::new(0.01, 1.0)));
        assert!(!g.update_agent(id, SphericalPos::new(0.02, 1.0)));
        assert!(g.update_agent(id, SphericalPos::new(3.0, 1.0)));
        let total: usize = g.cells.values().map(HashSet::len).sum();
        assert_eq!(total, 1);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn neighborhood_wraps_longitude_seam() {
        let g = grid();
        let keys = g.neighbor_keys(CellKey { phi: 10, theta: 0 });
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&CellKey { phi: 10, theta: 63 }));
    }

    #[test]
    fn neighborhood_crosses_the_pole() {
        let g = grid();
        let keys = g.neighbor_keys(CellKey { phi: 0, theta: 5 });
        assert!(keys.contains(&CellKey { phi: 0, theta: 37 }));
        assert!(keys.iter().all(|k| k.phi <= 1));
    }

    #[test]
    fn seam_neighbors_are_candidates() {
        let mut g = grid();
        let a = body(1, SphericalPos::new(0.001, 1.5), false);
        let b = body(2, SphericalPos::new(TAU - 0.001, 1.5), false);
        g.sync(&[a, b]);
        let mut out = Vec::new();
        g.candidates(a.id, &mut out);
        assert_eq!(out, vec![b.id]);
    }

    #[test]
    fn coincident_agents_end_up_apart() {
        let mut g = grid();
        let pos = SphericalPos::new(1.0, 1.2);
        let out = g.step(&[body(1, pos, true), body(2, pos, false)], 0.016, |_| false);
        assert_eq!(out.corrections.len(), 1);
        let fixed = out.corrections[0];
        assert!(separation(fixed.pos, pos) > 0.0);
        assert!(fixed.speed_factor < 1.0);
    }

    #[test]
    fn remote_pairs_get_effects_but_no_correction() {
        let mut g = grid();
        let a = body(1, SphericalPos::new(1.0, 1.2), false);
        let b = body(2, SphericalPos::new(1.01, 1.2), false);
        let out = g.step(&[a, b], 0.016, |_| false);
        assert_eq!(out.overlaps, 1);
        assert!(out.corrections.is_empty());
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn effects_respect_cooldown() {
        let mut g = grid();
        let a = body(1, SphericalPos::new(1.0, 1.2), false);
        let b = body(2, SphericalPos::new(1.01, 1.2), false);
        assert_eq!(g.step(&[a, b], 0.016, |_| false).events.len(), 1);
        assert_eq!(g.step(&[a, b], 0.016, |_| false).events.len(), 0);
        let out = g.step(&[a, b], SimConfig::default().effect_cooldown, |_| false);
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn correction_into_blocked_terrain_is_rejected() {
        let mut g = grid();
        let pos = SphericalPos::new(1.0, 1.2);
        let out = g.step(&[body(1, pos, true), body(2, pos, false)], 0.016, |_| true);
        assert!(out.corrections.is_empty());
        assert_eq!(out.rejected, 1);
    }

    #[test]
    fn non_finite_bodies_are_skipped() {
        let mut g = grid();
        let bad = body(1, SphericalPos { theta: f32::NAN, phi: 1.0 }, true);
        let ok = body(2, SphericalPos::new(1.0, 1.2), false);
        let out = g.step(&[bad, ok], 0.016, |_| false);
        assert_eq!(out.pairs_checked, 0);
        assert!(out.corrections.is_empty());
        assert_eq!(g.cell_of(bad.id), None);
    }

    #[test]
    fn inactive_and_missing_bodies_leave_the_grid() {
        let mut g = grid();
        let a = body(1, SphericalPos::new(1.0, 1.2), false);
        let b = body(2, SphericalPos::new(2.0, 1.2), false);
        g.sync(&[a, b]);
        assert_eq!(g.len(), 2);
        g.sync(&[CollisionBody { active: false, ..a }]);
        assert!(g.is_empty());
    }

    #[test]
    fn event_intensity_scales_with_speed() {
        let mut g = grid();
        let fast = SimConfig::default().max_speed;
        let a = CollisionBody { speed: fast, ..body(1, SphericalPos::new(1.0, 1.2), false) };
        let b = CollisionBody { speed: fast, ..body(2, SphericalPos::new(1.01, 1.2), false) };
        let out = g.step(&[a, b], 0.016, |_| false);
        assert_abs_diff_eq!(out.events[0].intensity, 1.0);
    }

    #[test]
    fn near_pole_contacts_across_narrow_columns_are_found() {
        let mut g = grid();
        // At phi 0.2 a column is about 2 units wide; these two sit two
        // columns apart but inside contact distance.
        let a = body(1, SphericalPos::new(0.097, 0.2), false);
        let b = body(2, SphericalPos::new(0.247, 0.2), false);
        assert_eq!(g.cell_key(b.pos).theta - g.cell_key(a.pos).theta, 2);
        assert!(separation(a.pos, b.pos) < SimConfig::default().collision_radius * 2.0);
        let out = g.step(&[a, b], 0.016, |_| false);
        assert_eq!(out.overlaps, 1);
    }

    #[test]
    fn local_body_between_two_contacts_gets_no_closer_to_either() {
        let cfg = SimConfig::default();
        let me = SphericalPos::new(1.0, 1.5);
        let east = me.offset(FRAC_PI_2, 1.0 / cfg.sphere_radius);
        let west = me.offset(-FRAC_PI_2, 3.0 / cfg.sphere_radius);
        let mut g = grid();
        let out = g.step(&[body(1, me, true), body(2, east, false), body(3, west, false)], 0.016, |_| false);
        assert_eq!(out.overlaps, 2);
        let after = out.corrections.first().map_or(me, |c| c.pos);
        assert!(separation(after, east) >= separation(me, east));
        assert!(separation(after, west) >= separation(me, west));
    }

    #[test]
    fn local_body_is_pushed_clear_of_two_contacts_on_one_side() {
        let cfg = SimConfig::default();
        let me = SphericalPos::new(1.0, 1.5);
        let east = me.offset(FRAC_PI_2, 1.0 / cfg.sphere_radius);
        let north = me.offset(0.0, 2.0 / cfg.sphere_radius);
        let mut g = grid();
        let out = g.step(&[body(1, me, true), body(2, east, false), body(3, north, false)], 0.016, |_| false);
        let fixed = out.corrections.first().copied().unwrap();
        assert!(separation(fixed.pos, east) > separation(me, east));
        assert!(separation(fixed.pos, north) > separation(me, north));
    }

    proptest! {
        #[test]
        fn local_correction_never_worsens_overlap(
            theta in 0.2f32..6.0,
            phi in 0.4f32..2.7,
            others in prop::collection::vec((-3.1f32..3.1, 0.0f32..3.1), 1..=4),
        ) {
            let cfg = SimConfig::default();
            let me = SphericalPos::new(theta, phi);
            let mut bodies = vec![body(1, me, true)];
            for (i, (bearing, gap)) in others.iter().enumerate() {
                bodies.push(body(i as u32 + 2, me.offset(*bearing, *gap / cfg.sphere_radius), false));
            }
            let mut g = grid();
            let out = g.step(&bodies, 0.016, |_| false);
            let after = out.corrections.first().map_or(me, |c| c.pos);
            for them in &bodies[1..] {
                prop_assert!(separation(after, them.pos) + 1e-4 >= separation(me, them.pos));
            }
        }
    }
}
