//! Malformed-result detection.
//!
//! After all operations are folded over a target, the original and patched
//! content are both parsed with the target's grammar. If the patched content
//! carries ERROR/MISSING nodes the original does not, the run refuses to
//! write. Pre-existing breakage in the target is tolerated: only errors the
//! run introduces count.
//!
//! This is best-effort. Spliced prompt text inside template literals is
//! opaque to the grammar, and targets with no grammar are not checked.

use crate::ts::{ErrorNode, SourceParser, TreeSitterError};
use ast_grep_language::SupportLang;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Parse error introduced: found {count} new ERROR nodes")]
    ParseErrorIntroduced { count: usize, errors: Vec<ErrorNode> },

    #[error("Tree-sitter error: {0}")]
    TreeSitter(#[from] TreeSitterError),
}

/// Parse validator bound to one grammar.
pub struct ParseValidator {
    parser: SourceParser,
}

impl ParseValidator {
    pub fn new(lang: SupportLang) -> Result<Self, TreeSitterError> {
        Ok(Self {
            parser: SourceParser::new(lang)?,
        })
    }

    /// Check that `edited` does not introduce parse errors absent from `original`.
    ///
    /// Error positions shift when text is inserted, so errors are matched by
    /// kind and the trimmed text of the line they start on. An edit that fixes
    /// one existing error and breaks something else still fails.
    pub fn validate_edit(&mut self, original: &str, edited: &str) -> Result<(), ValidationError> {
        let edited = self.parser.parse_with_source(edited)?;
        if !edited.has_errors() {
            return Ok(());
        }
        let original = self.parser.parse_with_source(original)?;

        let mut known: HashMap<(bool, &str), usize> = HashMap::new();
        for error in original.error_nodes() {
            *known.entry(signature(original.source, &error)).or_default() += 1;
        }

        let fresh: Vec<ErrorNode> = edited
            .error_nodes()
            .into_iter()
            .filter(|error| match known.get_mut(&signature(edited.source, error)) {
                Some(seen) if *seen > 0 => {
                    *seen -= 1;
                    false
                }
                _ => true,
            })
            .collect();

        if fresh.is_empty() {
            return Ok(());
        }
        Err(ValidationError::ParseErrorIntroduced {
            count: fresh.len(),
            errors: fresh,
        })
    }
}

/// Kind of an error node plus the trimmed line it starts on.
fn signature<'s>(source: &'s str, error: &ErrorNode) -> (bool, &'s str) {
    let at = error.byte_start.min(source.len());
    let start = source[..at].rfind('\n').map_or(0, |i| i + 1);
    let end = source[at..].find('\n').map_or(source.len(), |i| at + i);
    (error.missing, source[start..end].trim())
}
