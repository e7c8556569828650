use super::constraint::Constraint;
use super::sheet::Sheet;
use super::solver::{self, ConstraintSet};
use super::types::{HandleId, Instance, SheetId, Thing, ThingId};
use crate::geometry::{self, Point2, Vector2};
use crate::variables::VarId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("unknown sheet {0}")]
    UnknownSheet(SheetId),
}

/// Outcome of a budgeted relaxation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaxOutcome {
    /// True when the solver reached a local optimum; false when the
    /// wall-clock budget expired first. Partial convergence is
    /// resumable: just call again next frame.
    pub settled: bool,
    pub passes: usize,
}

/// The registry of all sheets. Cross-sheet operations — instancing,
/// inlining, relaxation (whose instance constraints read master
/// geometry), bounding boxes — live here; sheet-local edits live on
/// [`Sheet`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    sheets: HashMap<SheetId, Sheet>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sheet(&mut self) -> SheetId {
        let id = SheetId::new();
        self.sheets.insert(id, Sheet::new());
        id
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(&id)
    }

    pub fn sheet_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.get_mut(&id)
    }

    pub fn sheet_ids(&self) -> impl Iterator<Item = SheetId> + '_ {
        self.sheets.keys().copied()
    }

    // ------------------------------------------------------------------
    // Relaxation
    // ------------------------------------------------------------------

    /// One coordinate-descent pass over all live variables of the
    /// sheet. Returns whether anything moved; callers loop this under
    /// a frame budget.
    pub fn relax(&mut self, id: SheetId) -> Result<bool, DocumentError> {
        let mut sheet = self
            .sheets
            .remove(&id)
            .ok_or(DocumentError::UnknownSheet(id))?;
        let vars = sheet.live_vars();
        let changed = solver::relax_vars(&mut sheet, self, &vars, None);
        self.sheets.insert(id, sheet);
        Ok(changed)
    }

    /// Loop [`Self::relax`] until it settles or the wall-clock budget
    /// expires, whichever comes first. At least one pass always runs.
    pub fn relax_budgeted(
        &mut self,
        id: SheetId,
        budget: Duration,
    ) -> Result<RelaxOutcome, DocumentError> {
        let start = Instant::now();
        let mut passes = 0;
        loop {
            let changed = self.relax(id)?;
            passes += 1;
            if !changed {
                return Ok(RelaxOutcome {
                    settled: true,
                    passes,
                });
            }
            if start.elapsed() >= budget {
                return Ok(RelaxOutcome {
                    settled: false,
                    passes,
                });
            }
        }
    }

    /// Sum of squared constraint errors for the sheet.
    pub fn total_error(&self, id: SheetId) -> Result<f64, DocumentError> {
        let sheet = self.sheet(id).ok_or(DocumentError::UnknownSheet(id))?;
        Ok(solver::total_error(sheet.constraints(), sheet, self))
    }

    /// Constraints with their current error values, for on-screen
    /// labels.
    pub fn constraint_errors(
        &self,
        id: SheetId,
    ) -> Result<Vec<(Constraint, f64)>, DocumentError> {
        let sheet = self.sheet(id).ok_or(DocumentError::UnknownSheet(id))?;
        Ok(sheet
            .constraints()
            .iter()
            .map(|c| (c.clone(), solver::constraint_error(c, sheet, self)))
            .collect())
    }

    // ------------------------------------------------------------------
    // Instancing
    // ------------------------------------------------------------------

    /// Place an instance of `master` in `host` at `pos`, scaled by
    /// `size` and rotated by `angle` radians. Instance-side copies of
    /// the master's attachers are created and tied to the master's via
    /// PointInstance constraints. Instancing a sheet into itself, or
    /// with a non-positive `size`, is a structural no-op (`None`);
    /// deeper cycles across several masters are deliberately not
    /// detected.
    pub fn add_instance(
        &mut self,
        host: SheetId,
        master: SheetId,
        pos: Point2,
        size: f64,
        angle: f64,
    ) -> Result<Option<ThingId>, DocumentError> {
        if host == master || size <= 0.0 {
            return Ok(None);
        }
        if !self.sheets.contains_key(&host) {
            return Err(DocumentError::UnknownSheet(host));
        }
        let Some(master_sheet) = self.sheets.get(&master) else {
            return Ok(None);
        };

        let transform = geometry::placement(pos, size, angle, master_sheet.local_center());
        let master_attachers: Vec<(HandleId, Point2)> = master_sheet
            .attachers()
            .iter()
            .filter_map(|&h| master_sheet.handle_pos(h).map(|p| (h, p)))
            .collect();

        let Some(sheet) = self.sheets.get_mut(&host) else {
            return Err(DocumentError::UnknownSheet(host));
        };
        let attachers: Vec<HandleId> = master_attachers
            .iter()
            .map(|(_, p)| sheet.add_handle(transform * *p))
            .collect();
        let tid = sheet.push_thing(Thing::Instance(Instance {
            master,
            transform,
            attachers: attachers.clone(),
        }));
        for ((master_point, _), &instance_point) in master_attachers.iter().zip(&attachers) {
            sheet.constraints_mut().add(Constraint::PointInstance {
                master_point: *master_point,
                instance: tid,
                instance_point,
            });
        }
        for &h in &attachers {
            sheet.merge_and_add_implicit_constraints(h);
        }
        Ok(Some(tid))
    }

    /// First instance whose footprint (transformed master bounds, or
    /// an attacher handle) covers `pos`.
    pub fn instance_at(
        &self,
        host: SheetId,
        pos: Point2,
    ) -> Result<Option<ThingId>, DocumentError> {
        let sheet = self.sheet(host).ok_or(DocumentError::UnknownSheet(host))?;
        for (tid, thing) in sheet.things() {
            let Thing::Instance(inst) = thing else { continue };
            if inst
                .attachers
                .iter()
                .any(|&h| sheet.handle_contains(h, pos))
            {
                return Ok(Some(tid));
            }
            if let Some((min, max)) = self.instance_bounds(inst) {
                if pos.x >= min.x && pos.x <= max.x && pos.y >= min.y && pos.y <= max.y {
                    return Ok(Some(tid));
                }
            }
        }
        Ok(None)
    }

    /// Multiply the scale of the instance under `pos` by `mult`,
    /// keeping its center fixed.
    pub fn resize_instance_at(
        &mut self,
        host: SheetId,
        pos: Point2,
        mult: f64,
    ) -> Result<bool, DocumentError> {
        if mult <= 0.0 {
            return Ok(false);
        }
        let Some((tid, anchor)) = self.instance_anchor(host, pos)? else {
            return Ok(false);
        };
        let sheet = self
            .sheets
            .get_mut(&host)
            .ok_or(DocumentError::UnknownSheet(host))?;
        if let Some(inst) = sheet.instance_mut(tid) {
            inst.transform = geometry::scaling_about(anchor, mult) * inst.transform;
        }
        Ok(true)
    }

    /// Rotate the instance under `pos` by `d_angle` radians about its
    /// center.
    pub fn rotate_instance_at(
        &mut self,
        host: SheetId,
        pos: Point2,
        d_angle: f64,
    ) -> Result<bool, DocumentError> {
        let Some((tid, anchor)) = self.instance_anchor(host, pos)? else {
            return Ok(false);
        };
        let sheet = self
            .sheets
            .get_mut(&host)
            .ok_or(DocumentError::UnknownSheet(host))?;
        if let Some(inst) = sheet.instance_mut(tid) {
            inst.transform = geometry::rotation_about(anchor, d_angle) * inst.transform;
        }
        Ok(true)
    }

    fn instance_anchor(
        &self,
        host: SheetId,
        pos: Point2,
    ) -> Result<Option<(ThingId, Point2)>, DocumentError> {
        let Some(tid) = self.instance_at(host, pos)? else {
            return Ok(None);
        };
        let sheet = self.sheet(host).ok_or(DocumentError::UnknownSheet(host))?;
        let Some(inst) = sheet.instance(tid) else {
            return Ok(None);
        };
        let center = self
            .sheet(inst.master)
            .map_or(Point2::origin(), Sheet::local_center);
        Ok(Some((tid, inst.transform * center)))
    }

    // ------------------------------------------------------------------
    // Inlining
    // ------------------------------------------------------------------

    /// Replace the instance under `pos` with concrete geometry. No-op
    /// (false) when the thing under the pointer is not an instance.
    pub fn dismember(&mut self, host: SheetId, pos: Point2) -> Result<bool, DocumentError> {
        match self.instance_at(host, pos)? {
            Some(tid) => self.inline(host, tid),
            None => Ok(false),
        }
    }

    /// Replace an instance by transformed copies of its master's
    /// lines, arcs and nested instances, carry the master's
    /// constraints over (with captured lengths and pin targets mapped
    /// through the placement), and remove the instance. The instance's
    /// attacher handles are merged with their inlined counterparts
    /// first, so constraints that referenced them survive the removal
    /// rewritten onto the copies.
    pub fn inline(&mut self, host: SheetId, tid: ThingId) -> Result<bool, DocumentError> {
        let mut sheet = self
            .sheets
            .remove(&host)
            .ok_or(DocumentError::UnknownSheet(host))?;
        let done = self.inline_into(&mut sheet, tid);
        self.sheets.insert(host, sheet);
        Ok(done)
    }

    fn inline_into(&self, sheet: &mut Sheet, tid: ThingId) -> bool {
        let inst = match sheet.instance(tid) {
            Some(inst) => inst.clone(),
            None => return false,
        };
        let Some(master) = self.sheets.get(&inst.master) else {
            return false;
        };
        let transform = inst.transform;
        let scale = transform.scaling();

        // Master handle -> host handle. Master handles that share one
        // merge class map onto one host handle, preserving the fusion.
        let mut hmap: HashMap<HandleId, HandleId> = HashMap::new();
        let mut by_class: HashMap<(VarId, VarId), HandleId> = HashMap::new();
        let mut copy_handle = |sheet: &mut Sheet, mh: HandleId| -> Option<HandleId> {
            if let Some(&h) = hmap.get(&mh) {
                return Some(h);
            }
            let handle = master.handle(mh)?;
            let class = (
                master.vars().resolve(handle.x),
                master.vars().resolve(handle.y),
            );
            let host_h = match by_class.get(&class) {
                Some(&h) => h,
                None => {
                    let p = master.handle_pos(mh)?;
                    let h = sheet.add_handle(transform * p);
                    by_class.insert(class, h);
                    h
                }
            };
            hmap.insert(mh, host_h);
            Some(host_h)
        };

        let mut tmap: HashMap<ThingId, ThingId> = HashMap::new();
        let master_things: Vec<(ThingId, Thing)> =
            master.things().map(|(id, t)| (id, t.clone())).collect();
        for (mtid, thing) in master_things {
            let copy = match thing {
                Thing::Line { a, b } => {
                    let (Some(a), Some(b)) = (copy_handle(sheet, a), copy_handle(sheet, b))
                    else {
                        continue;
                    };
                    Thing::Line { a, b }
                }
                Thing::Arc { a, b, c } => {
                    let (Some(a), Some(b), Some(c)) = (
                        copy_handle(sheet, a),
                        copy_handle(sheet, b),
                        copy_handle(sheet, c),
                    ) else {
                        continue;
                    };
                    Thing::Arc { a, b, c }
                }
                Thing::Instance(nested) => {
                    let attachers: Vec<HandleId> = nested
                        .attachers
                        .iter()
                        .filter_map(|&h| copy_handle(sheet, h))
                        .collect();
                    Thing::Instance(Instance {
                        master: nested.master,
                        transform: transform * nested.transform,
                        attachers,
                    })
                }
            };
            tmap.insert(mtid, sheet.push_thing(copy));
        }

        // Attachers may be loose handles outside every thing; copy
        // them too so the instance-side handles have merge partners.
        for &mh in master.attachers() {
            copy_handle(sheet, mh);
        }

        let mapped: Vec<Constraint> = master
            .constraints()
            .iter()
            .filter_map(|c| c.map_into(&tmap, &hmap, &transform, scale))
            .collect();
        for c in mapped {
            sheet.constraints_mut().add(c);
        }

        for (idx, &mh) in master.attachers().iter().enumerate() {
            let (Some(&copied), Some(&mine)) = (hmap.get(&mh), inst.attachers.get(idx))
            else {
                continue;
            };
            sheet.merge_handles(mine, copied);
        }

        sheet.delete_things(&[tid]);
        true
    }

    // ------------------------------------------------------------------
    // Snap preview
    // ------------------------------------------------------------------

    /// Preview where `pos` would land if dropped: exactly onto a
    /// covering handle when there is one (ignoring `drag_thing`'s own
    /// handles), otherwise relaxed onto nearby curve bodies through a
    /// scratch constraint set. Commits no structural change.
    pub fn snap(
        &mut self,
        host: SheetId,
        pos: Point2,
        drag_thing: Option<ThingId>,
    ) -> Result<Point2, DocumentError> {
        let mut sheet = self
            .sheets
            .remove(&host)
            .ok_or(DocumentError::UnknownSheet(host))?;
        let snapped = self.snap_in(&mut sheet, pos, drag_thing);
        self.sheets.insert(host, sheet);
        Ok(snapped)
    }

    fn snap_in(&self, sheet: &mut Sheet, pos: Point2, drag_thing: Option<ThingId>) -> Point2 {
        let exclude: Vec<HandleId> = drag_thing
            .and_then(|t| sheet.thing(t).map(Thing::handles))
            .unwrap_or_default();
        if let Some(h) = sheet.handle_at(pos, &exclude) {
            return sheet.handle_pos(h).unwrap_or(pos);
        }

        let temp = sheet.add_handle(pos);
        let mut scratch = ConstraintSet::new();
        let skip: Vec<ThingId> = sheet.selection().collect();
        for (tid, thing) in sheet.things() {
            if Some(tid) == drag_thing || skip.contains(&tid) {
                continue;
            }
            if !sheet.thing_contains(tid, pos) {
                continue;
            }
            match *thing {
                Thing::Line { a, b } => {
                    scratch.add(Constraint::PointOnLine { p: temp, a, b });
                }
                Thing::Arc { a, b, c } => {
                    scratch.add(Constraint::PointOnArc { p: temp, a, b, c });
                }
                Thing::Instance(_) => {}
            }
        }

        let snapped = if scratch.is_empty() {
            pos
        } else {
            let vars = match sheet.handle(temp) {
                Some(h) => [h.x, h.y],
                None => return pos,
            };
            for _ in 0..100 {
                if !solver::relax_vars(sheet, self, &vars, Some(&scratch)) {
                    break;
                }
            }
            sheet.handle_pos(temp).unwrap_or(pos)
        };
        sheet.remove_handle(temp);
        snapped
    }

    // ------------------------------------------------------------------
    // Geometry queries
    // ------------------------------------------------------------------

    fn instance_bounds(&self, inst: &Instance) -> Option<(Point2, Point2)> {
        let master = self.sheets.get(&inst.master)?;
        let (min, max) = master.local_bounds()?;
        let corners = [
            inst.transform * min,
            inst.transform * Point2::new(min.x, max.y),
            inst.transform * Point2::new(max.x, min.y),
            inst.transform * max,
        ];
        let lo = Point2::new(
            corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min),
            corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min),
        );
        let hi = Point2::new(
            corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max),
            corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max),
        );
        Some((lo, hi))
    }

    /// Bounds over the sheet's handles plus the footprints of its
    /// instances. One level deep per instance: an instance contributes
    /// its master's own bounds, transformed.
    pub fn bounding_box(&self, id: SheetId) -> Result<Option<(Point2, Point2)>, DocumentError> {
        let sheet = self.sheet(id).ok_or(DocumentError::UnknownSheet(id))?;
        let mut boxes: Vec<(Point2, Point2)> = sheet.local_bounds().into_iter().collect();
        for (_, thing) in sheet.things() {
            if let Thing::Instance(inst) = thing {
                boxes.extend(self.instance_bounds(inst));
            }
        }
        let mut it = boxes.into_iter();
        let first = it.next();
        Ok(first.map(|acc| {
            it.fold(acc, |(lo, hi), (min, max)| {
                (
                    Point2::new(lo.x.min(min.x), lo.y.min(min.y)),
                    Point2::new(hi.x.max(max.x), hi.y.max(max.y)),
                )
            })
        }))
    }

    pub fn size(&self, id: SheetId) -> Result<Option<Vector2>, DocumentError> {
        Ok(self.bounding_box(id)?.map(|(min, max)| max - min))
    }

    pub fn center(&self, id: SheetId) -> Result<Option<Point2>, DocumentError> {
        Ok(self
            .bounding_box(id)?
            .map(|(min, max)| geometry::midpoint(min, max)))
    }

    // ------------------------------------------------------------------
    // Render surface
    // ------------------------------------------------------------------

    /// Read-only dump of a sheet for rendering hosts.
    pub fn scene(&self, id: SheetId) -> Result<Scene, DocumentError> {
        let sheet = self.sheet(id).ok_or(DocumentError::UnknownSheet(id))?;
        let selected: Vec<ThingId> = sheet.selection().collect();
        let things = sheet
            .things()
            .map(|(tid, thing)| {
                let points: Vec<[f64; 2]> = thing
                    .handles()
                    .iter()
                    .filter_map(|&h| sheet.handle_pos(h).map(|p| [p.x, p.y]))
                    .collect();
                let kind = match thing {
                    Thing::Line { .. } => "line",
                    Thing::Arc { .. } => "arc",
                    Thing::Instance(_) => "instance",
                };
                SceneThing {
                    id: tid.0,
                    kind: kind.to_string(),
                    points,
                    selected: selected.contains(&tid),
                }
            })
            .collect();
        let constraints = sheet
            .constraints()
            .iter()
            .map(|c| SceneConstraint {
                kind: c.tag().to_string(),
                error: solver::constraint_error(c, sheet, self),
            })
            .collect();
        let bounds = self
            .bounding_box(id)?
            .map(|(min, max)| [[min.x, min.y], [max.x, max.y]]);
        Ok(Scene {
            things,
            constraints,
            bounds,
        })
    }
}

/// A sheet flattened to plain coordinates for a rendering host.
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub things: Vec<SceneThing>,
    pub constraints: Vec<SceneConstraint>,
    pub bounds: Option<[[f64; 2]; 2]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneThing {
    pub id: u64,
    pub kind: String,
    /// Line: [a, b]; arc: [start, end, center]; instance: attachers.
    pub points: Vec<[f64; 2]>,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneConstraint {
    pub kind: String,
    pub error: f64,
}
