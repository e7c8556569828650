use super::constraint::Constraint;
use super::solver::ConstraintSet;
use super::types::{Handle, HandleId, Instance, Thing, ThingId};
use crate::geometry::{self, Point2, HANDLE_RADIUS};
use crate::variables::{VarId, VarPool};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One drawing: owns its coordinate variables, handles, things,
/// attacher points, constraint set and selection. A sheet doubles as a
/// master when other sheets hold instances of it.
///
/// Everything here is sheet-local; operations that need another
/// sheet's geometry (instancing, inlining, relaxation) live on
/// [`super::Document`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    vars: VarPool,
    handles: BTreeMap<HandleId, Handle>,
    things: BTreeMap<ThingId, Thing>,
    /// Template connection points, in designation order.
    attachers: Vec<HandleId>,
    constraints: ConstraintSet,
    selection: BTreeSet<ThingId>,
    next_handle: u64,
    next_thing: u64,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    pub(crate) fn add_handle(&mut self, pos: Point2) -> HandleId {
        let id = HandleId(self.next_handle);
        self.next_handle += 1;
        let x = self.vars.alloc(pos.x);
        let y = self.vars.alloc(pos.y);
        self.handles.insert(id, Handle { x, y });
        id
    }

    pub(crate) fn remove_handle(&mut self, id: HandleId) {
        if let Some(handle) = self.handles.remove(&id) {
            self.vars.remove(handle.x);
            self.vars.remove(handle.y);
        }
    }

    pub fn handle(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    pub fn handle_pos(&self, id: HandleId) -> Option<Point2> {
        let h = self.handles.get(&id)?;
        Some(Point2::new(self.vars.value(h.x), self.vars.value(h.y)))
    }

    /// Move a handle (and everything merged with it). The host calls
    /// this while dragging.
    pub fn set_handle_pos(&mut self, id: HandleId, pos: Point2) -> bool {
        let Some(h) = self.handles.get(&id).copied() else {
            return false;
        };
        self.vars.set_value(h.x, pos.x);
        self.vars.set_value(h.y, pos.y);
        true
    }

    /// Two handles are equal iff their coordinate variables resolve to
    /// the same canonical cells.
    pub fn handles_equal(&self, a: HandleId, b: HandleId) -> bool {
        match (self.handles.get(&a), self.handles.get(&b)) {
            (Some(a), Some(b)) => {
                self.vars.same_root(a.x, b.x) && self.vars.same_root(a.y, b.y)
            }
            _ => false,
        }
    }

    /// Derived, never separately tracked: canonical iff both
    /// coordinate variables are canonical.
    pub fn handle_is_canonical(&self, id: HandleId) -> bool {
        self.handles.get(&id).map_or(false, |h| {
            self.vars.is_canonical(h.x) && self.vars.is_canonical(h.y)
        })
    }

    /// Merge `src` into `dst` (pairwise by coordinate); `dst`'s
    /// position survives. Both ids stay usable afterwards and observe
    /// the same coordinates.
    pub fn merge_handles(&mut self, src: HandleId, dst: HandleId) {
        let (Some(s), Some(d)) = (
            self.handles.get(&src).copied(),
            self.handles.get(&dst).copied(),
        ) else {
            return;
        };
        self.vars.merge(s.x, d.x);
        self.vars.merge(s.y, d.y);
    }

    /// True iff `pos` is within the handle radius of the handle.
    pub fn handle_contains(&self, id: HandleId, pos: Point2) -> bool {
        self.handle_pos(id)
            .map_or(false, |p| geometry::distance(p, pos) <= HANDLE_RADIUS)
    }

    /// First handle (in creation order) covering `pos`, skipping
    /// `exclude` and anything merged with it.
    pub fn handle_at(&self, pos: Point2, exclude: &[HandleId]) -> Option<HandleId> {
        self.handles.keys().copied().find(|&id| {
            !exclude
                .iter()
                .any(|&e| e == id || self.handles_equal(e, id))
                && self.handle_contains(id, pos)
        })
    }

    pub fn handle_ids(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.handles.keys().copied()
    }

    // ------------------------------------------------------------------
    // Things
    // ------------------------------------------------------------------

    pub(crate) fn push_thing(&mut self, thing: Thing) -> ThingId {
        let id = ThingId(self.next_thing);
        self.next_thing += 1;
        self.things.insert(id, thing);
        id
    }

    pub fn thing(&self, id: ThingId) -> Option<&Thing> {
        self.things.get(&id)
    }

    pub fn things(&self) -> impl Iterator<Item = (ThingId, &Thing)> {
        self.things.iter().map(|(id, t)| (*id, t))
    }

    pub fn instance(&self, id: ThingId) -> Option<&Instance> {
        self.things.get(&id).and_then(Thing::as_instance)
    }

    pub(crate) fn instance_mut(&mut self, id: ThingId) -> Option<&mut Instance> {
        match self.things.get_mut(&id) {
            Some(Thing::Instance(inst)) => Some(inst),
            _ => None,
        }
    }

    /// True iff `pos` lies on the thing's body. Endpoints take
    /// priority over a line's body; an arc is tested against its full
    /// circle, ignoring the angular span between its endpoints (a
    /// known looseness, kept as-is).
    pub fn thing_contains(&self, id: ThingId, pos: Point2) -> bool {
        match self.things.get(&id) {
            Some(Thing::Line { a, b }) => self.segment_contains(*a, *b, pos),
            Some(Thing::Arc { a, c, .. }) => self.circle_contains(*a, *c, pos),
            Some(Thing::Instance(_)) | None => false,
        }
    }

    /// Hit-test for picking: a thing is hit through any of its handles
    /// or through its body.
    pub fn thing_hit(&self, id: ThingId, pos: Point2) -> bool {
        let Some(thing) = self.things.get(&id) else {
            return false;
        };
        thing
            .handles()
            .iter()
            .any(|&h| self.handle_contains(h, pos))
            || self.thing_contains(id, pos)
    }

    pub fn find_thing_at(&self, pos: Point2) -> Option<ThingId> {
        self.things.keys().copied().find(|&id| self.thing_hit(id, pos))
    }

    fn segment_contains(&self, a: HandleId, b: HandleId, pos: Point2) -> bool {
        let (Some(ap), Some(bp)) = (self.handle_pos(a), self.handle_pos(b)) else {
            return false;
        };
        if geometry::distance(pos, ap) <= HANDLE_RADIUS
            || geometry::distance(pos, bp) <= HANDLE_RADIUS
        {
            return false;
        }
        geometry::point_segment_distance(pos, ap, bp) <= HANDLE_RADIUS
    }

    fn circle_contains(&self, a: HandleId, c: HandleId, pos: Point2) -> bool {
        let (Some(ap), Some(cp)) = (self.handle_pos(a), self.handle_pos(c)) else {
            return false;
        };
        (geometry::distance(pos, cp) - geometry::distance(ap, cp)).abs() <= HANDLE_RADIUS
    }

    // ------------------------------------------------------------------
    // Creation commands
    // ------------------------------------------------------------------

    /// Add a line, fusing its endpoints with coincident geometry and
    /// attaching any pre-existing handle that sits on the new body.
    pub fn add_line(&mut self, a_pos: Point2, b_pos: Point2) -> ThingId {
        let a = self.add_handle(a_pos);
        let b = self.add_handle(b_pos);
        let id = self.push_thing(Thing::Line { a, b });
        self.merge_and_add_implicit_constraints(a);
        self.merge_and_add_implicit_constraints(b);

        for k in self.handle_ids().collect::<Vec<_>>() {
            if k == a || k == b || self.handles_equal(k, a) || self.handles_equal(k, b) {
                continue;
            }
            let Some(kp) = self.handle_pos(k) else { continue };
            if self.segment_contains(a, b, kp) {
                self.constraints.add(Constraint::PointOnLine { p: k, a, b });
            }
        }
        id
    }

    /// Add an arc from `a` to `b` around center `c`. A standing
    /// equal-radius constraint keeps both endpoints at the same
    /// distance from the center.
    pub fn add_arc(&mut self, a_pos: Point2, b_pos: Point2, c_pos: Point2) -> ThingId {
        let a = self.add_handle(a_pos);
        let b = self.add_handle(b_pos);
        let c = self.add_handle(c_pos);
        let id = self.push_thing(Thing::Arc { a, b, c });
        self.merge_and_add_implicit_constraints(a);
        self.merge_and_add_implicit_constraints(b);
        self.merge_and_add_implicit_constraints(c);
        self.constraints.add(Constraint::EqualDistance {
            a1: a,
            b1: c,
            a2: b,
            b2: c,
        });

        for k in self.handle_ids().collect::<Vec<_>>() {
            if [a, b, c].contains(&k)
                || self.handles_equal(k, a)
                || self.handles_equal(k, b)
                || self.handles_equal(k, c)
            {
                continue;
            }
            let Some(kp) = self.handle_pos(k) else { continue };
            if self.circle_contains(a, c, kp) {
                self.constraints.add(Constraint::PointOnArc { p: k, a, b, c });
            }
        }
        id
    }

    /// Designate a template connection point at `pos`, fusing it with
    /// whatever geometry already sits there.
    pub fn add_attacher(&mut self, pos: Point2) -> HandleId {
        let h = self.add_handle(pos);
        self.merge_and_add_implicit_constraints(h);
        self.attachers.push(h);
        h
    }

    pub fn attachers(&self) -> &[HandleId] {
        &self.attachers
    }

    /// Implicit-constraint inference for a (typically just dropped)
    /// handle. First pass: merge into any coincident handle of an
    /// existing thing, marking that thing as handled — the merge
    /// already captures the coincidence. Second pass: for unmarked
    /// things whose body covers the handle, synthesize the on-curve
    /// constraint. The two passes keep a single coincidence from
    /// emitting both a merge and a redundant on-curve constraint.
    pub fn merge_and_add_implicit_constraints(&mut self, h: HandleId) {
        let thing_ids: Vec<ThingId> = self.things.keys().copied().collect();
        let mut handled: HashSet<ThingId> = HashSet::new();

        for &tid in &thing_ids {
            let owned = match self.things.get(&tid) {
                Some(t) => t.handles(),
                None => continue,
            };
            for th in owned {
                if th == h || self.handles_equal(th, h) {
                    continue;
                }
                let (Some(hp), Some(tp)) = (self.handle_pos(h), self.handle_pos(th)) else {
                    continue;
                };
                if geometry::distance(hp, tp) <= HANDLE_RADIUS {
                    self.merge_handles(h, th);
                    handled.insert(tid);
                }
            }
        }

        let Some(hp) = self.handle_pos(h) else { return };
        for &tid in &thing_ids {
            if handled.contains(&tid) {
                continue;
            }
            match self.things.get(&tid).cloned() {
                Some(Thing::Line { a, b }) => {
                    if a == h || b == h || self.handles_equal(a, h) || self.handles_equal(b, h)
                    {
                        continue;
                    }
                    if self.segment_contains(a, b, hp) {
                        self.constraints.add(Constraint::PointOnLine { p: h, a, b });
                    }
                }
                Some(Thing::Arc { a, b, c }) => {
                    if [a, b, c].contains(&h)
                        || self.handles_equal(a, h)
                        || self.handles_equal(b, h)
                        || self.handles_equal(c, h)
                    {
                        continue;
                    }
                    if self.circle_contains(a, c, hp) {
                        self.constraints.add(Constraint::PointOnArc { p: h, a, b, c });
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn toggle_select(&mut self, pos: Point2) -> bool {
        let Some(id) = self.find_thing_at(pos) else {
            return false;
        };
        if !self.selection.insert(id) {
            self.selection.remove(&id);
        }
        true
    }

    pub fn select(&mut self, id: ThingId) {
        if self.things.contains_key(&id) {
            self.selection.insert(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> impl Iterator<Item = ThingId> + '_ {
        self.selection.iter().copied()
    }

    /// The operand set for a command: the selection when non-empty,
    /// otherwise the single thing under the pointer.
    pub fn operand_things(&self, pos: Point2) -> Vec<ThingId> {
        if !self.selection.is_empty() {
            self.selection.iter().copied().collect()
        } else {
            self.find_thing_at(pos).into_iter().collect()
        }
    }

    // ------------------------------------------------------------------
    // Constraint commands
    // ------------------------------------------------------------------

    /// Lock each operand line at its current length.
    pub fn fixed_distance(&mut self, pos: Point2) -> bool {
        let mut added = false;
        for tid in self.operand_things(pos) {
            if let Some(Thing::Line { a, b }) = self.things.get(&tid).cloned() {
                let (Some(ap), Some(bp)) = (self.handle_pos(a), self.handle_pos(b)) else {
                    continue;
                };
                let distance = geometry::distance(ap, bp);
                added |= self
                    .constraints
                    .add(Constraint::FixedDistance { a, b, distance });
            }
        }
        added
    }

    /// Constrain each operand line to whichever axis it is closer to.
    pub fn horizontal_or_vertical(&mut self, pos: Point2) -> bool {
        let mut added = false;
        for tid in self.operand_things(pos) {
            if let Some(Thing::Line { a, b }) = self.things.get(&tid).cloned() {
                added |= self
                    .constraints
                    .add(Constraint::HorizontalOrVertical { a, b });
            }
        }
        added
    }

    /// Constrain every selected line to the length of the first.
    pub fn equal_distance(&mut self) -> bool {
        let lines: Vec<(HandleId, HandleId)> = self
            .selection
            .iter()
            .filter_map(|tid| match self.things.get(tid) {
                Some(Thing::Line { a, b }) => Some((*a, *b)),
                _ => None,
            })
            .collect();
        let Some(((a1, b1), rest)) = lines.split_first() else {
            return false;
        };
        let mut added = false;
        for (a2, b2) in rest {
            added |= self.constraints.add(Constraint::EqualDistance {
                a1: *a1,
                b1: *b1,
                a2: *a2,
                b2: *b2,
            });
        }
        added
    }

    /// Constrain each operand instance to full size (scale ratio 1).
    pub fn full_size(&mut self, pos: Point2) -> bool {
        let mut added = false;
        for tid in self.operand_things(pos) {
            if matches!(self.things.get(&tid), Some(Thing::Instance(_))) {
                added |= self.constraints.add(Constraint::Size {
                    instance: tid,
                    ratio: 1.0,
                });
            }
        }
        added
    }

    /// Pin the handle under the pointer at its current position.
    pub fn pin(&mut self, pos: Point2) -> bool {
        let Some(h) = self.handle_at(pos, &[]) else {
            return false;
        };
        let p = match self.handle_pos(h) {
            Some(p) => p,
            None => return false,
        };
        self.constraints.add(Constraint::FixedPoint {
            h,
            target: [p.x, p.y],
        })
    }

    /// Hang a unit load on the handle under the pointer, for the
    /// external physics pass.
    pub fn add_weight(&mut self, pos: Point2) -> bool {
        let Some(h) = self.handle_at(pos, &[]) else {
            return false;
        };
        self.constraints.add(Constraint::Weight { h, load: 1.0 })
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete the selection, or failing that the thing under the
    /// pointer. Constraints referencing removed handles are rewritten
    /// onto surviving merge partners where one exists and dropped
    /// otherwise. Returns false when there was nothing to delete.
    pub fn delete(&mut self, pos: Point2) -> bool {
        let targets = self.operand_things(pos);
        if targets.is_empty() {
            return false;
        }
        self.delete_things(&targets);
        self.selection.clear();
        true
    }

    pub(crate) fn delete_things(&mut self, targets: &[ThingId]) {
        let gone: HashSet<ThingId> = targets.iter().copied().collect();

        // Handles still referenced by a surviving thing stay alive
        let mut kept: HashSet<HandleId> = HashSet::new();
        for (tid, thing) in &self.things {
            if !gone.contains(tid) {
                kept.extend(thing.handles());
            }
        }
        let mut doomed: Vec<HandleId> = Vec::new();
        for tid in targets {
            if let Some(thing) = self.things.get(tid) {
                for h in thing.handles() {
                    if !kept.contains(&h) && !doomed.contains(&h) {
                        doomed.push(h);
                    }
                }
            }
        }

        // Each doomed handle maps onto a surviving merge partner if it
        // has one; the partner search must run before the variables go
        let mut map: HashMap<HandleId, Option<HandleId>> = HashMap::new();
        for &h in &doomed {
            let partner = self.handles.keys().copied().find(|&k| {
                k != h && !doomed.contains(&k) && self.handles_equal(k, h)
            });
            map.insert(h, partner);
        }

        for &h in &doomed {
            self.remove_handle(h);
        }
        for tid in targets {
            self.things.remove(tid);
        }
        self.constraints.replace_handles(&map);
        self.constraints.remove_things(&gone);
        self.selection.retain(|t| !gone.contains(t));

        let mut attachers = Vec::new();
        for a in std::mem::take(&mut self.attachers) {
            match map.get(&a) {
                None => attachers.push(a),
                Some(Some(replacement)) if !attachers.contains(replacement) => {
                    attachers.push(*replacement)
                }
                Some(_) => {}
            }
        }
        self.attachers = attachers;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintSet {
        &mut self.constraints
    }

    pub(crate) fn vars(&self) -> &VarPool {
        &self.vars
    }

    pub(crate) fn vars_mut(&mut self) -> &mut VarPool {
        &mut self.vars
    }

    pub(crate) fn live_vars(&self) -> Vec<VarId> {
        self.vars.live_roots()
    }

    /// Bounds of this sheet's own handles; instances are accounted for
    /// at the document level.
    pub fn local_bounds(&self) -> Option<(Point2, Point2)> {
        let mut min: Option<Point2> = None;
        let mut max: Option<Point2> = None;
        for id in self.handles.keys() {
            let Some(p) = self.handle_pos(*id) else { continue };
            min = Some(min.map_or(p, |m| Point2::new(m.x.min(p.x), m.y.min(p.y))));
            max = Some(max.map_or(p, |m| Point2::new(m.x.max(p.x), m.y.max(p.y))));
        }
        Some((min?, max?))
    }

    pub fn local_center(&self) -> Point2 {
        self.local_bounds()
            .map_or(Point2::origin(), |(min, max)| geometry::midpoint(min, max))
    }
}
