//! Operations across versions: diff and prune

mod diff;
mod prune;

pub use diff::{diff_versions, Diff, DiffEntry};
pub use prune::prune_versions;
