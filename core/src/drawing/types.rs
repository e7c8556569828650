use crate::geometry::Transform2;
use crate::variables::VarId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a sheet (a drawing, usable as a master for instancing)
/// within a [`super::Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub Uuid);

impl SheetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SheetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a handle within its sheet. Monotonic, so sorting
/// ids gives a creation-order total order for constraint signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

/// Stable identity of a thing (line, arc or instance) within its sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThingId(pub u64);

/// A 2D point: an (x, y) pair of coordinate variables. Two handles are
/// equal iff their variables resolve to the same canonical cells, even
/// though their ids stay distinct — structural references by either
/// handle keep working after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Handle {
    pub x: VarId,
    pub y: VarId,
}

/// A placement of a master sheet inside another drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub master: SheetId,
    pub transform: Transform2,
    /// Instance-side copies of the master's attacher handles,
    /// index-aligned with `Sheet::attachers` of the master.
    pub attachers: Vec<HandleId>,
}

/// Everything that can live on a sheet. Closed set: constraint
/// applicability and rendering match on this exhaustively, so adding a
/// kind is a compile-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Thing {
    Line { a: HandleId, b: HandleId },
    Arc { a: HandleId, b: HandleId, c: HandleId },
    Instance(Instance),
}

impl Thing {
    /// Handles owned by this thing. For an arc: start, end, center.
    pub fn handles(&self) -> Vec<HandleId> {
        match self {
            Thing::Line { a, b } => vec![*a, *b],
            Thing::Arc { a, b, c } => vec![*a, *b, *c],
            Thing::Instance(inst) => inst.attachers.clone(),
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Thing::Instance(inst) => Some(inst),
            _ => None,
        }
    }
}
