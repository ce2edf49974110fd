//! Statement ordering.
//!
//! Foreign keys are the only cross-table dependency the engine manages, so
//! ordering reduces to three phases:
//!
//! 1. drop every foreign key that is going away or changing,
//! 2. everything else, in the order the differ produced it,
//! 3. add every foreign key.
//!
//! ```text
//! -- This fails on most backends:
//! ALTER TABLE wt_person DROP COLUMN family_id;     -- still referenced
//! ALTER TABLE wt_child DROP CONSTRAINT wt_fk_child_family_id;
//!
//! -- This works:
//! ALTER TABLE wt_child DROP CONSTRAINT wt_fk_child_family_id;
//! ALTER TABLE wt_person DROP COLUMN family_id;
//! ```
//!
//! The sort is stable, so the differ's per-table order (drops before
//! modifications before additions) survives inside the body phase.

use crate::diff::Operation;

/// Execution phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    DropForeignKeys = 1,
    Body = 2,
    AddForeignKeys = 3,
}

impl Operation {
    pub fn phase(&self) -> Phase {
        match self {
            Operation::DropForeignKey { .. } => Phase::DropForeignKeys,
            Operation::AddForeignKey { .. } => Phase::AddForeignKeys,
            _ => Phase::Body,
        }
    }
}

/// Sort operations into phase order, keeping the relative order within
/// each phase.
pub fn order(mut operations: Vec<Operation>) -> Vec<Operation> {
    operations.sort_by_key(Operation::phase);
    operations
}

/// Whether phases never decrease along the list.
pub fn check_phases(operations: &[Operation]) -> bool {
    operations.windows(2).all(|w| w[0].phase() <= w[1].phase())
}
