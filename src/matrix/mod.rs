//! The Role x Phase x Task matrix and the merged document built around it.

pub mod document;
pub mod model;

pub use document::{GameMeta, MergedDocument, PayoffEntry, Provenance};
pub use model::{CellPath, Matrix, PhaseDef, RoleDef, TaskDef};
