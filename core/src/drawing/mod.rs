//! The drawing model: sheets of points, lines, arcs and template
//! instances, the constraints over them, and the relaxation solver
//! that keeps the constraints satisfied while geometry is dragged.

pub mod constraint;
pub mod document;
pub mod sheet;
pub mod solver;
pub mod types;

pub use constraint::{Constraint, Signature};
pub use document::{Document, DocumentError, RelaxOutcome, Scene};
pub use sheet::Sheet;
pub use solver::ConstraintSet;
pub use types::{Handle, HandleId, Instance, SheetId, Thing, ThingId};

#[cfg(test)]
mod tests_constraints;
#[cfg(test)]
mod tests_instance;
