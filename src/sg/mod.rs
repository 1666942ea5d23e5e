//! ast-grep integration for structural anchors.
//!
//! Structural anchors locate nodes with ast-grep's metavariable syntax
//! ($NAME, $$$ARGS, ...) instead of exact text, so a patch keeps working
//! when the surrounding formatting drifts.

pub mod errors;
pub mod lang;
pub mod matcher;

pub use errors::AstGrepError;
pub use lang::{detect_language, language_name, SupportLang};
pub use matcher::{StructuralMatch, StructuralMatcher};
