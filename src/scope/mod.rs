//! Per-pass transaction objects
//!
//! A scope owns the records loaded for one reconciliation pass. Reconcilers
//! mutate the records in place, then call `finish` on every exit path so the
//! delta against the opening snapshot is persisted even when the pass fails.

mod cluster;
mod machine;
mod patch;

pub use cluster::{ClusterScope, ClusterScopeParams};
pub use machine::{MachineScope, MachineScopeParams};
pub use patch::{PatchHelper, ResourcePatch};
