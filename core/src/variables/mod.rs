//! Mergeable coordinate variables.
//!
//! Every handle coordinate is a scalar cell in a [`VarPool`]. Cells can
//! be merged so that several handles observe one authoritative value
//! (this is how dragging a point onto another fuses them), broken off
//! again, and removed. The merge relation is a flat forest: a merged
//! cell points directly at its canonical root, never at another merged
//! cell.

use serde::{Deserialize, Serialize};

pub mod pool;
pub use pool::{VarId, VarPool};


/// State of one cell in the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Slot {
    /// Owns the authoritative value for itself and `members`.
    Canonical { value: f64, members: Vec<VarId> },
    /// Delegates to a canonical root, always exactly one hop away.
    Merged { root: VarId },
    /// Removed; the id is retired and never reused.
    Free,
}
