//! Document tree model: nodes, marks, integer token positions, and the
//! transaction type every mutation goes through.
//!
//! This is the engine-side stand-in for the host editor's tree and
//! transaction contract (serialize, traverse with positions, add-mark /
//! insert / delete with a single dispatch). The diff and annotation layers
//! only ever talk to `Document` and `Transaction`, which keeps them
//! independent of any concrete rendering engine.

pub mod document;
pub mod node;
pub mod transaction;

pub use document::{Document, Schema};
pub use node::{Attrs, Mark, MarkKind, Node, NodeKind};
pub use transaction::{Step, Transaction};
