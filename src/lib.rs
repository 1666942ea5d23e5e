//! Anchor Patcher: idempotent, anchor-based patching of source files
//!
//! A patch is an ordered list of [`PatchOperation`]s against one target
//! file. Each operation finds an anchor (exact text, a regex or an ast-grep
//! pattern) and replaces, inserts around or deletes it. A postcondition tells
//! whether the operation is already in effect, so running the same patch
//! twice changes nothing the second time.
//!
//! # Architecture
//!
//! Every anchor kind compiles down to byte-span splices ([`edit::Splice`]).
//! Intelligence lives in span acquisition, not in the application logic.
//!
//! # Safety
//!
//! - A verified, numbered backup exists before the target is touched
//! - The target is written once, atomically, only if it changed
//! - Results that introduce new syntax errors are not written
//! - Anchor misses are reported per operation and never abort a run
//!
//! # Example
//!
//! ```no_run
//! use anchor_patcher::{run, PatchOperation};
//! use std::path::Path;
//!
//! let ops = [PatchOperation::insert_after(
//!     "reset progress",
//!     "setBulkParsing(false);",
//!     "\nsetBulkProgress(\"\");",
//! )];
//!
//! match run(Path::new("client/src/App.jsx"), &ops) {
//!     Ok(report) => {
//!         for op in &report.operations {
//!             println!("{op}");
//!         }
//!     }
//!     Err(e) => eprintln!("patch failed: {e}"),
//! }
//! ```

pub mod backup;
pub mod config;
pub mod edit;
pub mod hint;
pub mod operation;
pub mod runner;
pub mod sg;
pub mod ts;
pub mod validate;

// Re-exports
pub use backup::{backup, backup_into, list_backups, restore, BackupError, BackupFile};
pub use config::{load_from_path, load_from_str, ConfigError, PatchConfig, TargetPlan};
pub use edit::{EditError, Splice};
pub use operation::{
    apply_operation, Anchor, ApplyContext, Cardinality, EditKind, OperationOutcome,
    PatchOperation, Postcondition, RejectReason, Status,
};
pub use runner::{run, run_with, PatchRunReport, RunError, RunOptions, RunState, Validation};
