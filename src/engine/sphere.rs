// Spherical surface math shared by every subsystem.
//
// Coordinate convention (Y-up, matching glam's default camera setup):
//   theta: longitude in [0, TAU), measured from +X toward +Z
//   phi:   polar angle in [0, PI], 0 at the north pole (+Y)
//
// Headings are bearings in the local tangent plane: 0 = north
// (decreasing phi), PI/2 = east (increasing theta).

use glam::{Vec2, Vec3};
use std::f32::consts::{PI, TAU};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Floor applied to `sin(phi)` before dividing by it near the poles.
pub const MIN_SIN_PHI: f32 = 1e-3;

const EPSILON: f32 = 1e-6;

// ============================================================================
// SPHERICAL POSITION
// ============================================================================

/// A point on the sphere surface in angular coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SphericalPos {
    pub theta: f32,
    pub phi: f32,
}

impl SphericalPos {
    pub fn new(theta: f32, phi: f32) -> Self {
        Self { theta: wrap_theta(theta), phi: phi.clamp(0.0, PI) }
    }

    /// Convert any non-zero vector to the surface point in its direction.
    /// A zero vector maps to the north pole.
    pub fn from_vec(v: Vec3) -> Self {
        let len = v.length();
        if len < EPSILON || !len.is_finite() {
            return Self { theta: 0.0, phi: 0.0 };
        }
        let phi = (v.y / len).clamp(-1.0, 1.0).acos();
        let theta = wrap_theta(v.z.atan2(v.x));
        Self { theta, phi }
    }

    /// Unit direction from the sphere centre.
    pub fn to_unit(&self) -> Vec3 {
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        let (sin_theta, cos_theta) = self.theta.sin_cos();
        Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta)
    }

    /// World-space position on a sphere of `radius`.
    pub fn to_world(&self, radius: f32) -> Vec3 {
        self.to_unit() * radius
    }

    pub fn is_finite(&self) -> bool {
        self.theta.is_finite() && self.phi.is_finite()
    }

    /// Great-circle angle to `other` in radians.
    pub fn angular_distance(&self, other: &SphericalPos) -> f32 {
        angle_between(self.to_unit(), other.to_unit())
    }

    /// Bearing (heading) from `self` toward `other`.
    pub fn bearing_to(&self, other: &SphericalPos) -> f32 {
        let (north, east) = tangent_basis(self);
        let d = other.to_unit() - self.to_unit();
        let n = d.dot(north);
        let e = d.dot(east);
        if n.abs() < EPSILON && e.abs() < EPSILON {
            return 0.0;
        }
        e.atan2(n)
    }

    /// Travel `angle` radians along the great circle leaving at `heading`.
    pub fn offset(&self, heading: f32, angle: f32) -> SphericalPos {
        let p = self.to_unit();
        let t = tangent_dir(self, heading);
        let (s, c) = angle.sin_cos();
        SphericalPos::from_vec(p * c + t * s)
    }

    /// Displace by a local tangent vector expressed in (north, east) world
    /// units on a sphere of `radius`.
    pub fn displaced(&self, north_east: Vec2, radius: f32) -> SphericalPos {
        let (north, east) = tangent_basis(self);
        let p = self.to_unit();
        SphericalPos::from_vec(p + (north * north_east.x + east * north_east.y) / radius)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Wrap a longitude into [0, TAU).
pub fn wrap_theta(theta: f32) -> f32 {
    let t = theta.rem_euclid(TAU);
    // rem_euclid can return TAU itself for tiny negative inputs.
    if t >= TAU { 0.0 } else { t }
}

/// Wrap an angle difference into [-PI, PI).
pub fn wrap_pi(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// `sin(phi)` floored away from zero so it can be used as a divisor.
pub fn safe_sin_phi(phi: f32) -> f32 {
    phi.sin().max(MIN_SIN_PHI)
}

/// Angle between two vectors, robust for nearly parallel inputs.
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let cross = a.cross(b).length();
    let dot = a.dot(b);
    cross.atan2(dot)
}

/// Unit (north, east) tangent vectors at `pos`.
///
/// East is undefined exactly at a pole; there the basis falls back to the
/// longitude direction `theta` would have, which keeps it continuous for
/// positions clamped near the pole.
pub fn tangent_basis(pos: &SphericalPos) -> (Vec3, Vec3) {
    let (sin_phi, cos_phi) = pos.phi.sin_cos();
    let (sin_theta, cos_theta) = pos.theta.sin_cos();
    let north = Vec3::new(-cos_phi * cos_theta, sin_phi, -cos_phi * sin_theta);
    let east = Vec3::new(-sin_theta, 0.0, cos_theta);
    (north.normalize_or_zero(), east)
}

/// Unit tangent vector pointing along `heading` at `pos`.
pub fn tangent_dir(pos: &SphericalPos, heading: f32) -> Vec3 {
    let (north, east) = tangent_basis(pos);
    let (s, c) = heading.sin_cos();
    north * c + east * s
}

/// Rotate `from` toward `to` by at most `max_step` radians.
pub fn approach_angle(from: f32, to: f32, max_step: f32) -> f32 {
    let diff = wrap_pi(to - from);
    if diff.abs() <= max_step {
        wrap_pi(to)
    } else {
        wrap_pi(from + max_step * diff.signum())
    }
}

/// Heading as a 2D (north, east) unit vector.
pub fn heading_vec(heading: f32) -> Vec2 {
    let (s, c) = heading.sin_cos();
    Vec2::new(c, s)
}

/// Inverse of [`heading_vec`].
pub fn vec_heading(v: Vec2) -> f32 {
    v.y.atan2(v.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn unit_round_trip() {
        let p = SphericalPos::new(1.2, 0.7);
        let q = SphericalPos::from_vec(p.to_unit() * 37.0);
        assert_abs_diff_eq!(p.theta, q.theta, epsilon = 1e-5);
        assert_abs_diff_eq!(p.phi, q.phi, epsilon = 1e-5);
    }

    #[test]
    fn wrap_theta_stays_in_range() {
        for t in [-7.0, -0.0001, 0.0, 3.0, TAU, 20.0] {
            let w = wrap_theta(t);
            assert!((0.0..TAU).contains(&w), "{t} -> {w}");
        }
    }

    #[test]
    fn bearing_north_and_east() {
        let p = SphericalPos::new(0.5, PI / 2.0);
        let north = SphericalPos::new(0.5, PI / 2.0 - 0.1);
        let east = SphericalPos::new(0.6, PI / 2.0);
        assert_abs_diff_eq!(p.bearing_to(&north), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(p.bearing_to(&east), PI / 2.0, epsilon = 1e-4);
    }

    #[test]
    fn offset_travels_requested_angle() {
        let p = SphericalPos::new(2.0, 1.1);
        let q = p.offset(0.8, 0.05);
        assert_abs_diff_eq!(p.angular_distance(&q), 0.05, epsilon = 1e-4);
        assert_abs_diff_eq!(wrap_pi(p.bearing_to(&q) - 0.8), 0.0, epsilon = 1e-2);
    }

    #[test]
    fn safe_sin_phi_never_zero() {
        assert!(safe_sin_phi(0.0) >= MIN_SIN_PHI);
        assert!(safe_sin_phi(PI) >= MIN_SIN_PHI);
    }

    #[test]
    fn approach_angle_takes_short_way_round() {
        let h = approach_angle(PI - 0.1, -PI + 0.1, 0.05);
        assert_abs_diff_eq!(wrap_pi(h - (PI - 0.05)), 0.0, epsilon = 1e-5);
    }
}
