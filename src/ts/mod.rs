//! Tree-sitter parsing for target files.
//!
//! Targets are parsed only to find ERROR and MISSING nodes; the patcher never
//! edits through the tree.

pub mod errors;
pub mod parser;

pub use errors::TreeSitterError;
pub use parser::{ErrorNode, ParsedSource, SourceParser};
