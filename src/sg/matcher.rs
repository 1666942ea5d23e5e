use crate::sg::errors::AstGrepError;
use ast_grep_core::tree_sitter::StrDoc;
use ast_grep_core::{AstGrep, Pattern};
use ast_grep_language::SupportLang;

/// Byte span of a node matched by a structural pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMatch {
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Structural anchor matcher using ast-grep's metavariable syntax.
///
/// # Example Patterns
///
/// ```text
/// setBulkParsing($V)                       // a specific call
/// const [$STATE, $SETTER] = useState($$$)  // any state hook
/// <button onClick={$H}>$$$</button>        // a JSX element
/// ```
pub struct StructuralMatcher {
    lang: SupportLang,
    sg: AstGrep<StrDoc<SupportLang>>,
}

impl StructuralMatcher {
    /// Parse `source` with the grammar for `lang`.
    pub fn new(source: &str, lang: SupportLang) -> Self {
        Self {
            lang,
            sg: AstGrep::new(source, lang),
        }
    }

    /// Find every match of `pattern`, in source order.
    ///
    /// Nested matches (a node matching inside another matching node) are
    /// dropped so the returned spans never overlap; the outermost wins.
    pub fn find_all(&self, pattern: &str) -> Result<Vec<StructuralMatch>, AstGrepError> {
        let compiled =
            Pattern::try_new(pattern, self.lang).map_err(|e| AstGrepError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        let mut spans: Vec<StructuralMatch> = self
            .sg
            .root()
            .find_all(&compiled)
            .map(|m| {
                let range = m.get_node().range();
                StructuralMatch {
                    byte_start: range.start,
                    byte_end: range.end,
                }
            })
            .collect();

        spans.sort_by(|a, b| {
            a.byte_start
                .cmp(&b.byte_start)
                .then(b.byte_end.cmp(&a.byte_end))
        });

        let mut outermost: Vec<StructuralMatch> = Vec::with_capacity(spans.len());
        for span in spans {
            if let Some(last) = outermost.last() {
                if span.byte_start < last.byte_end {
                    continue;
                }
            }
            outermost.push(span);
        }

        Ok(outermost)
    }

    /// Compile `pattern` for `lang` without searching anything.
    pub fn check_pattern(pattern: &str, lang: SupportLang) -> Result<(), AstGrepError> {
        Pattern::try_new(pattern, lang)
            .map(|_| ())
            .map_err(|e| AstGrepError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }
}
