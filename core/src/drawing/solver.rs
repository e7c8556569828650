use super::constraint::Constraint;
use super::document::Document;
use super::sheet::Sheet;
use super::types::{HandleId, ThingId};
use crate::geometry::{self, Point2};
use crate::variables::VarId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Hysteresis threshold: a tentative move must beat the current error
/// by at least this much to be committed. Keeps the solver from
/// hunting around a settled optimum on float jitter.
pub const MIN_IMPROVEMENT: f64 = 0.05;

/// Probe step for the coordinate-descent solver, in drawing units.
const STEP: f64 = 1.0;

/// An order-preserving collection of constraints with no two sharing a
/// signature. Total error is the sum of squared individual errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless a constraint with the same signature is already
    /// present. Returns whether the constraint was added.
    pub fn add(&mut self, constraint: Constraint) -> bool {
        let sig = constraint.signature();
        if self.items.iter().any(|c| c.signature() == sig) {
            return false;
        }
        self.items.push(constraint);
        true
    }

    pub fn remove(&mut self, constraint: &Constraint) {
        let sig = constraint.signature();
        self.items.retain(|c| c.signature() != sig);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rewrite every constraint under a handle mapping from a
    /// structural edit, dropping the ones that degenerate or fail to
    /// remap, then re-deduplicate: remapping can collide two formerly
    /// distinct constraints onto one signature.
    pub fn replace_handles(&mut self, map: &HashMap<HandleId, Option<HandleId>>) {
        let rewritten: Vec<Constraint> = self
            .items
            .iter()
            .filter_map(|c| c.replace_handles(map))
            .collect();
        self.items.clear();
        let mut seen = HashSet::new();
        for c in rewritten {
            if seen.insert(c.signature()) {
                self.items.push(c);
            }
        }
    }

    /// Drop constraints that reference any of the removed things.
    pub fn remove_things(&mut self, gone: &HashSet<ThingId>) {
        self.items
            .retain(|c| !c.things().iter().any(|t| gone.contains(t)));
    }
}

/// Scalar error of one constraint, zero meaning fully satisfied.
/// Missing operands (a handle or sheet that vanished mid-edit cannot
/// happen between relax calls, but a stale reference degrades to zero
/// rather than poisoning the sum) and degenerate geometry both yield
/// finite values; NaN never enters the error sum.
pub(crate) fn constraint_error(c: &Constraint, sheet: &Sheet, doc: &Document) -> f64 {
    let pos = |h: HandleId| sheet.handle_pos(h);
    match *c {
        Constraint::PointsEqual { p1, p2 } => match (pos(p1), pos(p2)) {
            (Some(p1), Some(p2)) => geometry::distance(p1, p2),
            _ => 0.0,
        },
        Constraint::HorizontalOrVertical { a, b } => match (pos(a), pos(b)) {
            (Some(a), Some(b)) => (a.x - b.x).abs().min((a.y - b.y).abs()),
            _ => 0.0,
        },
        Constraint::FixedDistance { a, b, distance } => match (pos(a), pos(b)) {
            (Some(a), Some(b)) => distance - geometry::distance(a, b),
            _ => 0.0,
        },
        Constraint::EqualDistance { a1, b1, a2, b2 } => {
            match (pos(a1), pos(b1), pos(a2), pos(b2)) {
                (Some(a1), Some(b1), Some(a2), Some(b2)) => {
                    (geometry::distance(a1, b1) - geometry::distance(a2, b2)).abs()
                }
                _ => 0.0,
            }
        }
        Constraint::PointOnLine { p, a, b } => match (pos(p), pos(a), pos(b)) {
            (Some(p), Some(a), Some(b)) => geometry::point_segment_distance(p, a, b),
            _ => 0.0,
        },
        Constraint::PointOnArc { p, a, b: _, c } => match (pos(p), pos(a), pos(c)) {
            (Some(p), Some(a), Some(c)) => {
                geometry::distance(p, c) - geometry::distance(a, c)
            }
            _ => 0.0,
        },
        Constraint::FixedPoint { h, target } => match pos(h) {
            Some(p) => geometry::distance(p, Point2::new(target[0], target[1])),
            None => 0.0,
        },
        // Opaque load for an external physics pass; no geometric error.
        Constraint::Weight { .. } => 0.0,
        Constraint::Size { instance, ratio } => sheet
            .instance(instance)
            .map_or(0.0, |inst| inst.transform.scaling() - ratio),
        Constraint::PointInstance {
            master_point,
            instance,
            instance_point,
        } => {
            let inst = match sheet.instance(instance) {
                Some(inst) => inst,
                None => return 0.0,
            };
            let master = match doc.sheet(inst.master) {
                Some(master) => master,
                None => return 0.0,
            };
            match (master.handle_pos(master_point), pos(instance_point)) {
                (Some(mp), Some(ip)) => geometry::distance(inst.transform * mp, ip),
                _ => 0.0,
            }
        }
    }
}

pub(crate) fn total_error(set: &ConstraintSet, sheet: &Sheet, doc: &Document) -> f64 {
    set.iter()
        .map(|c| {
            let e = constraint_error(c, sheet, doc);
            e * e
        })
        .sum()
}

/// One coordinate-descent pass over `vars`, in stable order. Returns
/// whether any variable moved. Safe to interrupt between passes:
/// partial convergence is a valid, resumable state.
pub(crate) fn relax_vars(
    sheet: &mut Sheet,
    doc: &Document,
    vars: &[VarId],
    scratch: Option<&ConstraintSet>,
) -> bool {
    let mut changed = false;
    for &v in vars {
        changed |= relax_one(sheet, doc, v, scratch);
    }
    changed
}

/// Unit-step hill-climbing on a single variable: probe one step up and
/// one step down, keep whichever strictly beats the current error by
/// more than the hysteresis threshold, otherwise restore the original
/// value. Not gradient descent — it settles at integer granularity and
/// refuses moves that only marginally help.
pub(crate) fn relax_one(
    sheet: &mut Sheet,
    doc: &Document,
    v: VarId,
    scratch: Option<&ConstraintSet>,
) -> bool {
    let err = |sheet: &Sheet| match scratch {
        Some(set) => total_error(set, sheet, doc),
        None => total_error(sheet.constraints(), sheet, doc),
    };

    let orig = sheet.vars().value(v);
    let e0 = err(sheet) - MIN_IMPROVEMENT;

    sheet.vars_mut().set_value(v, orig + STEP);
    let e_plus = err(sheet);
    sheet.vars_mut().set_value(v, orig - STEP);
    let e_minus = err(sheet);

    if e_plus < e0.min(e_minus) {
        sheet.vars_mut().set_value(v, orig + STEP);
        true
    } else if e_minus < e0.min(e_plus) {
        // Value is already at orig - STEP
        true
    } else {
        sheet.vars_mut().set_value(v, orig);
        false
    }
}
