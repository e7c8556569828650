use super::types::{HandleId, ThingId};
use crate::geometry::{Point2, Transform2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed relation over handles (or a handle and captured data, or an
/// instance). Error evaluation lives in [`super::solver`] because it
/// needs the owning sheet and, for instance constraints, the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Two points coincide.
    PointsEqual { p1: HandleId, p2: HandleId },
    /// Segment a-b is axis-aligned, whichever axis is already closer.
    HorizontalOrVertical { a: HandleId, b: HandleId },
    /// a and b stay at the captured distance.
    FixedDistance { a: HandleId, b: HandleId, distance: f64 },
    /// Segment a1-b1 and segment a2-b2 have equal length.
    EqualDistance {
        a1: HandleId,
        b1: HandleId,
        a2: HandleId,
        b2: HandleId,
    },
    /// p lies on the segment a-b.
    PointOnLine {
        p: HandleId,
        a: HandleId,
        b: HandleId,
    },
    /// p lies on the circle through a centered at c. The angular span
    /// between a and b is deliberately ignored, matching hit-testing.
    PointOnArc {
        p: HandleId,
        a: HandleId,
        b: HandleId,
        c: HandleId,
    },
    /// h is pinned to the captured position.
    FixedPoint { h: HandleId, target: [f64; 2] },
    /// Marks h as carrying a load for an external physics pass. The
    /// scalar is opaque here and contributes no geometric error.
    Weight { h: HandleId, load: f64 },
    /// The instance's uniform scale stays at the target ratio.
    Size { instance: ThingId, ratio: f64 },
    /// Ties an instance-side attacher to the image of the master's
    /// attacher under the instance transform. `master_point` is a
    /// handle of the master sheet, not of the host.
    PointInstance {
        master_point: HandleId,
        instance: ThingId,
        instance_point: HandleId,
    },
}

/// Deduplication key: type tag plus order-normalized operand ids.
/// Handle ids are sorted so argument order and repeated insertion
/// cannot produce two signatures for one logical relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    tag: &'static str,
    handles: Vec<u64>,
    things: Vec<u64>,
}

impl Constraint {
    pub fn tag(&self) -> &'static str {
        match self {
            Constraint::PointsEqual { .. } => "points_equal",
            Constraint::HorizontalOrVertical { .. } => "horizontal_or_vertical",
            Constraint::FixedDistance { .. } => "fixed_distance",
            Constraint::EqualDistance { .. } => "equal_distance",
            Constraint::PointOnLine { .. } => "point_on_line",
            Constraint::PointOnArc { .. } => "point_on_arc",
            Constraint::FixedPoint { .. } => "fixed_point",
            Constraint::Weight { .. } => "weight",
            Constraint::Size { .. } => "size",
            Constraint::PointInstance { .. } => "point_instance",
        }
    }

    pub fn signature(&self) -> Signature {
        let mut handles: Vec<u64> = self.signature_handles().iter().map(|h| h.0).collect();
        handles.sort_unstable();
        let things = match self {
            Constraint::Size { instance, .. } | Constraint::PointInstance { instance, .. } => {
                vec![instance.0]
            }
            _ => Vec::new(),
        };
        Signature {
            tag: self.tag(),
            handles,
            things,
        }
    }

    /// Every handle operand, including (for PointInstance) the foreign
    /// master-side handle. Used for signatures only.
    fn signature_handles(&self) -> Vec<HandleId> {
        match *self {
            Constraint::PointsEqual { p1, p2 } => vec![p1, p2],
            Constraint::HorizontalOrVertical { a, b } => vec![a, b],
            Constraint::FixedDistance { a, b, .. } => vec![a, b],
            Constraint::EqualDistance { a1, b1, a2, b2 } => vec![a1, b1, a2, b2],
            Constraint::PointOnLine { p, a, b } => vec![p, a, b],
            Constraint::PointOnArc { p, a, b, c } => vec![p, a, b, c],
            Constraint::FixedPoint { h, .. } => vec![h],
            Constraint::Weight { h, .. } => vec![h],
            Constraint::Size { .. } => Vec::new(),
            Constraint::PointInstance {
                master_point,
                instance_point,
                ..
            } => vec![master_point, instance_point],
        }
    }

    /// Handle operands living on the owning sheet — the ones structural
    /// edits may rewrite. Excludes PointInstance's master-side handle.
    pub fn host_handles(&self) -> Vec<HandleId> {
        match *self {
            Constraint::PointInstance { instance_point, .. } => vec![instance_point],
            Constraint::Size { .. } => Vec::new(),
            _ => self.signature_handles(),
        }
    }

    pub fn things(&self) -> Vec<ThingId> {
        match self {
            Constraint::Size { instance, .. } | Constraint::PointInstance { instance, .. } => {
                vec![*instance]
            }
            _ => Vec::new(),
        }
    }

    /// Rewrite this constraint under a handle mapping from a structural
    /// edit. `Some(new)` substitutes, `None` in the map means the
    /// handle was removed with no survivor. Returns `None` when the
    /// constraint fails to remap or degenerates (operands collapse).
    pub fn replace_handles(
        &self,
        map: &HashMap<HandleId, Option<HandleId>>,
    ) -> Option<Constraint> {
        let sub = |h: HandleId| -> Option<HandleId> {
            match map.get(&h) {
                None => Some(h),
                Some(Some(new)) => Some(*new),
                Some(None) => None,
            }
        };
        match *self {
            Constraint::PointsEqual { p1, p2 } => {
                let (p1, p2) = (sub(p1)?, sub(p2)?);
                (p1 != p2).then_some(Constraint::PointsEqual { p1, p2 })
            }
            Constraint::HorizontalOrVertical { a, b } => {
                let (a, b) = (sub(a)?, sub(b)?);
                (a != b).then_some(Constraint::HorizontalOrVertical { a, b })
            }
            Constraint::FixedDistance { a, b, distance } => {
                let (a, b) = (sub(a)?, sub(b)?);
                (a != b).then_some(Constraint::FixedDistance { a, b, distance })
            }
            Constraint::EqualDistance { a1, b1, a2, b2 } => {
                let (a1, b1, a2, b2) = (sub(a1)?, sub(b1)?, sub(a2)?, sub(b2)?);
                // Both segments collapsing onto each other says nothing
                let degenerate = (a1 == a2 && b1 == b2) || (a1 == b2 && b1 == a2);
                (!degenerate).then_some(Constraint::EqualDistance { a1, b1, a2, b2 })
            }
            Constraint::PointOnLine { p, a, b } => {
                let (p, a, b) = (sub(p)?, sub(a)?, sub(b)?);
                (p != a && p != b && a != b).then_some(Constraint::PointOnLine { p, a, b })
            }
            Constraint::PointOnArc { p, a, b, c } => {
                let (p, a, b, c) = (sub(p)?, sub(a)?, sub(b)?, sub(c)?);
                (p != a && p != b).then_some(Constraint::PointOnArc { p, a, b, c })
            }
            Constraint::FixedPoint { h, target } => {
                Some(Constraint::FixedPoint { h: sub(h)?, target })
            }
            Constraint::Weight { h, load } => Some(Constraint::Weight { h: sub(h)?, load }),
            Constraint::Size { instance, ratio } => Some(Constraint::Size { instance, ratio }),
            Constraint::PointInstance {
                master_point,
                instance,
                instance_point,
            } => Some(Constraint::PointInstance {
                master_point,
                instance,
                instance_point: sub(instance_point)?,
            }),
        }
    }

    /// Map a master's constraint into a host sheet during inlining.
    /// `handles` and `things` are the master-to-host correspondences
    /// built while copying geometry; `transform` is the dissolved
    /// instance's placement and `scale` its uniform scale. Captured
    /// numeric state is transformed along with the geometry so the
    /// copy is exactly satisfied at the moment of inlining. Constraints
    /// whose operands were not copied are dropped.
    pub fn map_into(
        &self,
        things: &HashMap<ThingId, ThingId>,
        handles: &HashMap<HandleId, HandleId>,
        transform: &Transform2,
        scale: f64,
    ) -> Option<Constraint> {
        let sub = |h: HandleId| handles.get(&h).copied();
        match *self {
            Constraint::PointsEqual { p1, p2 } => Some(Constraint::PointsEqual {
                p1: sub(p1)?,
                p2: sub(p2)?,
            }),
            Constraint::HorizontalOrVertical { a, b } => {
                Some(Constraint::HorizontalOrVertical {
                    a: sub(a)?,
                    b: sub(b)?,
                })
            }
            Constraint::FixedDistance { a, b, distance } => Some(Constraint::FixedDistance {
                a: sub(a)?,
                b: sub(b)?,
                distance: distance * scale,
            }),
            Constraint::EqualDistance { a1, b1, a2, b2 } => Some(Constraint::EqualDistance {
                a1: sub(a1)?,
                b1: sub(b1)?,
                a2: sub(a2)?,
                b2: sub(b2)?,
            }),
            Constraint::PointOnLine { p, a, b } => Some(Constraint::PointOnLine {
                p: sub(p)?,
                a: sub(a)?,
                b: sub(b)?,
            }),
            Constraint::PointOnArc { p, a, b, c } => Some(Constraint::PointOnArc {
                p: sub(p)?,
                a: sub(a)?,
                b: sub(b)?,
                c: sub(c)?,
            }),
            Constraint::FixedPoint { h, target } => {
                let mapped = transform * Point2::new(target[0], target[1]);
                Some(Constraint::FixedPoint {
                    h: sub(h)?,
                    target: [mapped.x, mapped.y],
                })
            }
            Constraint::Weight { h, load } => Some(Constraint::Weight { h: sub(h)?, load }),
            Constraint::Size { instance, ratio } => Some(Constraint::Size {
                instance: *things.get(&instance)?,
                ratio: ratio * scale,
            }),
            Constraint::PointInstance {
                master_point,
                instance,
                instance_point,
            } => Some(Constraint::PointInstance {
                // The master-side handle lives on the nested instance's
                // own master sheet; it survives inlining untouched.
                master_point,
                instance: *things.get(&instance)?,
                instance_point: sub(instance_point)?,
            }),
        }
    }
}
