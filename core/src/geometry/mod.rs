//! 2D geometry utilities shared across the drawing core.
//!
//! Pure functions over points and similarity transforms; no drawing
//! state lives here.

use nalgebra as na;

pub type Point2 = na::Point2<f64>;
pub type Vector2 = na::Vector2<f64>;

/// Translation + rotation + uniform scale, the placement of an
/// instance inside a host drawing.
pub type Transform2 = na::Similarity2<f64>;

/// Tolerance for floating-point comparisons
pub const EPSILON: f64 = 1e-9;

/// Proximity radius for hit-testing handles and curve bodies, in
/// drawing units. A pointer within this distance of a handle "covers"
/// it; the same radius triggers implicit merges and on-curve
/// constraints.
pub const HANDLE_RADIUS: f64 = 3.0;

/// Distance between two 2D points.
#[inline]
pub fn distance(a: Point2, b: Point2) -> f64 {
    na::distance(&a, &b)
}

/// Midpoint between two 2D points.
#[inline]
pub fn midpoint(a: Point2, b: Point2) -> Point2 {
    na::center(&a, &b)
}

/// Distance from `p` to the segment `a`-`b`.
///
/// A segment degenerate to a point yields the plain point distance, so
/// this never divides by zero.
pub fn point_segment_distance(p: Point2, a: Point2, b: Point2) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < EPSILON * EPSILON {
        return distance(p, a);
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    distance(p, a + ab * t)
}

/// Build the placement transform for an instance: map master
/// coordinates so that `center` (the master's center) lands on `pos`,
/// scaled by `scale` and rotated by `angle` radians.
pub fn placement(pos: Point2, scale: f64, angle: f64, center: Point2) -> Transform2 {
    let rotation = na::UnitComplex::new(angle);
    let translation = pos.coords - rotation * center.coords * scale;
    Transform2::from_parts(na::Translation2::from(translation), rotation, scale)
}

/// A transform that scales by `mult` about the fixed point `q`.
pub fn scaling_about(q: Point2, mult: f64) -> Transform2 {
    let translation = q.coords - q.coords * mult;
    Transform2::from_parts(
        na::Translation2::from(translation),
        na::UnitComplex::identity(),
        mult,
    )
}

/// A transform that rotates by `angle` radians about the fixed point `q`.
pub fn rotation_about(q: Point2, angle: f64) -> Transform2 {
    let rotation = na::UnitComplex::new(angle);
    let translation = q.coords - rotation * q.coords;
    Transform2::from_parts(na::Translation2::from(translation), rotation, 1.0)
}
