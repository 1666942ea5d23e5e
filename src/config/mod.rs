//! Declarative TOML patch files.
//!
//! ```toml
//! [meta]
//! name = "bulk-import-progress"
//! next_steps = ["Run: npm run build"]
//!
//! [[patches]]
//! id = "reset-progress"
//! file = "client/src/App.jsx"
//! anchor = { type = "text", text = "setBulkParsing(false);" }
//! operation = { type = "insert-after", text = "\nsetBulkProgress(\"\");" }
//! ```

pub mod loader;
pub mod schema;

pub use loader::{discover, load_from_path, load_from_str, ConfigError};
pub use schema::{
    resolve_target, AnchorSpec, Metadata, OperationSpec, PatchConfig, PatchDefinition,
    PostconditionSpec, TargetPlan, ValidationError, ValidationIssue,
};
