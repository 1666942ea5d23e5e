//! Target language detection.
//!
//! Grammars come from ast-grep-language's bundled tree-sitter parsers. The
//! language is picked from the target's extension; targets with no grammar
//! are still patchable as plain text, they just skip structural anchors and
//! the malformed-result check.

use std::path::Path;

pub use ast_grep_language::SupportLang;

/// Detect the grammar for a target file from its extension.
pub fn detect_language(path: &Path) -> Option<SupportLang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "js" | "jsx" | "mjs" | "cjs" => SupportLang::JavaScript,
        "ts" | "mts" | "cts" => SupportLang::TypeScript,
        "tsx" => SupportLang::Tsx,
        "json" => SupportLang::Json,
        "css" => SupportLang::Css,
        "py" => SupportLang::Python,
        "rs" => SupportLang::Rust,
        _ => return None,
    };
    Some(lang)
}

/// Short display name used in reports and log fields.
pub fn language_name(lang: SupportLang) -> &'static str {
    match lang {
        SupportLang::JavaScript => "javascript",
        SupportLang::TypeScript => "typescript",
        SupportLang::Tsx => "tsx",
        SupportLang::Json => "json",
        SupportLang::Css => "css",
        SupportLang::Python => "python",
        SupportLang::Rust => "rust",
        _ => "other",
    }
}
