//! Patch operations and the pure fold step that applies them.
//!
//! A [`PatchOperation`] is one labeled anchor-based transformation with an
//! idempotence postcondition. [`apply_operation`] never fails: every problem
//! (anchor missing, ambiguous, result not verified) becomes an
//! [`OperationOutcome`] so a run can go on with its other operations.

use crate::edit::{apply_splices, Splice};
use crate::hint::{self, AnchorHint};
use crate::sg::{AstGrepError, StructuralMatcher, SupportLang};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where an operation takes effect.
#[derive(Debug, Clone)]
pub enum Anchor {
    /// Exact substring
    Text(String),
    /// Regular expression; replacement text may reference captures
    Regex(Regex),
    /// ast-grep pattern matched against the target's grammar
    Structural { pattern: String },
}

impl Anchor {
    /// Text used for drift diagnostics when the anchor misses.
    pub fn probe(&self) -> &str {
        match self {
            Anchor::Text(text) => text,
            Anchor::Regex(re) => re.as_str(),
            Anchor::Structural { pattern } => pattern,
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::Text(text) => write!(f, "text {:?}", text),
            Anchor::Regex(re) => write!(f, "regex /{}/", re.as_str()),
            Anchor::Structural { pattern } => write!(f, "pattern `{}`", pattern),
        }
    }
}

/// What happens at each selected anchor match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    Replace(String),
    InsertAfter(String),
    InsertBefore(String),
    Delete,
}

/// How many anchor matches an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// First match only. When that alone leaves the postcondition unmet,
    /// as with a delete whose anchor repeats, every match is touched.
    #[default]
    First,
    /// Every non-overlapping match
    All,
    /// Exactly one match must exist; more is ambiguous and nothing changes
    Unique,
}

/// Check that decides whether an operation is already in effect.
#[derive(Debug, Clone)]
pub enum Postcondition {
    Contains(String),
    Matches(Regex),
    Absent(String),
    NotMatches(Regex),
    /// Every check must hold
    All(Vec<Postcondition>),
}

impl Postcondition {
    pub fn holds(&self, content: &str) -> bool {
        match self {
            Postcondition::Contains(text) => content.contains(text.as_str()),
            Postcondition::Matches(re) => re.is_match(content),
            Postcondition::Absent(text) => !content.contains(text.as_str()),
            Postcondition::NotMatches(re) => !re.is_match(content),
            Postcondition::All(checks) => checks.iter().all(|c| c.holds(content)),
        }
    }

    /// Derive the default postcondition for an anchor/edit pair.
    ///
    /// A replacement that no longer contains its anchor must leave the anchor
    /// gone as well as the new text present, so replacement text that merely
    /// exists elsewhere does not count as applied. A replacement that grows
    /// its anchor can only check for the new text. Returns `None` when no
    /// literal check is sound: a replacement that references regex captures,
    /// an empty insertion, or a structural delete.
    pub fn derive(anchor: &Anchor, edit: &EditKind) -> Option<Postcondition> {
        match (anchor, edit) {
            (Anchor::Text(a), EditKind::Replace(t)) if !t.is_empty() && t.contains(a.as_str()) => {
                Some(Postcondition::Contains(t.clone()))
            }
            (Anchor::Text(a), EditKind::Replace(t)) if t.is_empty() || a.contains(t.as_str()) => {
                Some(Postcondition::Absent(a.clone()))
            }
            (Anchor::Text(a), EditKind::Replace(t)) => Some(Postcondition::All(vec![
                Postcondition::Contains(t.clone()),
                Postcondition::Absent(a.clone()),
            ])),
            (Anchor::Text(a), EditKind::InsertAfter(t)) if !t.is_empty() => {
                Some(Postcondition::Contains(format!("{a}{t}")))
            }
            (Anchor::Text(a), EditKind::InsertBefore(t)) if !t.is_empty() => {
                Some(Postcondition::Contains(format!("{t}{a}")))
            }
            (Anchor::Text(a), EditKind::Delete) => Some(Postcondition::Absent(a.clone())),
            (Anchor::Regex(re), EditKind::Replace(t)) if t.is_empty() => {
                Some(Postcondition::NotMatches(re.clone()))
            }
            (Anchor::Regex(_), EditKind::Replace(t)) if t.contains('$') => None,
            (Anchor::Regex(re), EditKind::Replace(t)) if !re.is_match(t) => {
                Some(Postcondition::All(vec![
                    Postcondition::Contains(t.clone()),
                    Postcondition::NotMatches(re.clone()),
                ]))
            }
            (Anchor::Regex(re), EditKind::Delete) => Some(Postcondition::NotMatches(re.clone())),
            (Anchor::Regex(_) | Anchor::Structural { .. }, EditKind::Replace(t))
            | (
                Anchor::Regex(_) | Anchor::Structural { .. },
                EditKind::InsertAfter(t) | EditKind::InsertBefore(t),
            ) if !t.is_empty() => Some(Postcondition::Contains(t.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Postcondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Postcondition::Contains(text) => write!(f, "contains {:?}", text),
            Postcondition::Matches(re) => write!(f, "matches /{}/", re.as_str()),
            Postcondition::Absent(text) => write!(f, "lacks {:?}", text),
            Postcondition::NotMatches(re) => write!(f, "does not match /{}/", re.as_str()),
            Postcondition::All(checks) => {
                for (idx, check) in checks.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{check}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("operation '{label}' needs an explicit postcondition ({anchor} cannot derive one)")]
    PostconditionRequired { label: String, anchor: String },

    #[error("operation '{label}' uses ${{{name}}}, not a capture of {anchor} (use $$ for $)")]
    UnknownCapture {
        label: String,
        anchor: String,
        name: String,
    },
}

/// One labeled, anchor-based find-and-replace transformation.
#[derive(Debug, Clone)]
pub struct PatchOperation {
    pub label: String,
    pub anchor: Anchor,
    pub edit: EditKind,
    pub cardinality: Cardinality,
    pub postcondition: Postcondition,
    /// Marker whose surroundings are shown when the anchor misses
    pub hint_marker: Option<String>,
}

impl PatchOperation {
    /// Build an operation, deriving its postcondition when `postcondition` is `None`.
    pub fn new(
        label: impl Into<String>,
        anchor: Anchor,
        edit: EditKind,
        postcondition: Option<Postcondition>,
    ) -> Result<Self, OperationError> {
        let label = label.into();
        if let (Anchor::Regex(re), EditKind::Replace(template)) = (&anchor, &edit) {
            if let Some(name) = unknown_capture(re, template) {
                return Err(OperationError::UnknownCapture {
                    label,
                    anchor: anchor.to_string(),
                    name: name.to_string(),
                });
            }
        }
        let postcondition = match postcondition.or_else(|| Postcondition::derive(&anchor, &edit)) {
            Some(p) => p,
            None => {
                return Err(OperationError::PostconditionRequired {
                    label,
                    anchor: anchor.to_string(),
                })
            }
        };

        Ok(Self {
            label,
            anchor,
            edit,
            cardinality: Cardinality::default(),
            postcondition,
            hint_marker: None,
        })
    }

    /// Literal replacement.
    ///
    /// The result must contain `replacement` and, unless the replacement
    /// grows the anchor, no longer contain the anchor.
    pub fn replace(
        label: impl Into<String>,
        anchor: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self::literal(label, anchor.into(), EditKind::Replace(replacement.into()))
    }

    pub fn insert_after(
        label: impl Into<String>,
        anchor: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::literal(label, anchor.into(), EditKind::InsertAfter(text.into()))
    }

    pub fn insert_before(
        label: impl Into<String>,
        anchor: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::literal(label, anchor.into(), EditKind::InsertBefore(text.into()))
    }

    pub fn delete(label: impl Into<String>, anchor: impl Into<String>) -> Self {
        Self::literal(label, anchor.into(), EditKind::Delete)
    }

    fn literal(label: impl Into<String>, anchor: String, edit: EditKind) -> Self {
        let anchor = Anchor::Text(anchor);
        // Only an empty insertion has nothing to derive; it is a no-op anyway.
        let postcondition = Postcondition::derive(&anchor, &edit)
            .unwrap_or_else(|| Postcondition::Contains(anchor.probe().to_string()));
        Self {
            label: label.into(),
            anchor,
            edit,
            cardinality: Cardinality::default(),
            postcondition,
            hint_marker: None,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_postcondition(mut self, postcondition: Postcondition) -> Self {
        self.postcondition = postcondition;
        self
    }

    pub fn with_hint(mut self, marker: impl Into<String>) -> Self {
        self.hint_marker = Some(marker.into());
        self
    }
}

/// Per-run inputs the fold step needs besides the content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyContext {
    /// Grammar of the target, if it has one
    pub lang: Option<SupportLang>,
}

/// Console status word for an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Exists,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "OK",
            Status::Exists => "EXISTS",
            Status::Failed => "FAILED",
        })
    }
}

/// Why an operation whose anchor was present still did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RejectReason {
    /// Cardinality was `unique` but the anchor matched several times
    Ambiguous { count: usize },
    /// The replacement ran but the postcondition still does not hold
    PostconditionNotMet { postcondition: String },
    /// Structural anchor on a target with no grammar
    UnsupportedLanguage,
    /// Structural pattern failed to compile
    InvalidPattern { message: String },
    /// Matched spans could not be spliced
    InvalidSpan { message: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Ambiguous { count } => {
                write!(f, "anchor matched {count} locations, expected exactly 1")
            }
            RejectReason::PostconditionNotMet { postcondition } => {
                write!(f, "result still fails postcondition ({postcondition}); rolled back")
            }
            RejectReason::UnsupportedLanguage => {
                write!(f, "structural anchor on a target with no known grammar")
            }
            RejectReason::InvalidPattern { message } => write!(f, "invalid pattern: {message}"),
            RejectReason::InvalidSpan { message } => write!(f, "cannot splice matches: {message}"),
        }
    }
}

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
#[must_use = "OperationOutcome should be reported"]
pub enum OperationOutcome {
    Applied { replacements: usize },
    AlreadyApplied,
    AnchorNotFound {
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<AnchorHint>,
    },
    Rejected { reason: RejectReason },
}

impl OperationOutcome {
    pub fn status(&self) -> Status {
        match self {
            OperationOutcome::Applied { .. } => Status::Ok,
            OperationOutcome::AlreadyApplied => Status::Exists,
            OperationOutcome::AnchorNotFound { .. } | OperationOutcome::Rejected { .. } => {
                Status::Failed
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status() == Status::Failed
    }
}

/// A resolved anchor match and the text to splice there.
struct AnchorMatch {
    byte_start: usize,
    byte_end: usize,
    /// Capture-expanded replacement for regex anchors
    expanded: Option<String>,
}

/// Apply one operation to `content`.
///
/// The input is returned unchanged for every outcome except `Applied`.
pub fn apply_operation(
    content: &str,
    op: &PatchOperation,
    ctx: &ApplyContext,
) -> (String, OperationOutcome) {
    if op.postcondition.holds(content) {
        return (content.to_string(), OperationOutcome::AlreadyApplied);
    }

    let matches = match find_matches(content, op, ctx) {
        Ok(matches) => matches,
        Err(reason) => return (content.to_string(), OperationOutcome::Rejected { reason }),
    };

    if matches.is_empty() {
        let hint = hint::diagnose(content, op.anchor.probe(), op.hint_marker.as_deref());
        return (content.to_string(), OperationOutcome::AnchorNotFound { hint });
    }

    let selected = match op.cardinality {
        Cardinality::First => &matches[..1],
        Cardinality::All => &matches[..],
        Cardinality::Unique if matches.len() > 1 => {
            let reason = RejectReason::Ambiguous {
                count: matches.len(),
            };
            return (content.to_string(), OperationOutcome::Rejected { reason });
        }
        Cardinality::Unique => &matches[..],
    };

    let mut spliced = splice_matches(content, &op.edit, selected);
    let widen = op.cardinality == Cardinality::First
        && matches.len() > 1
        && matches!(&spliced, Ok((patched, _)) if !op.postcondition.holds(patched));
    if widen {
        spliced = splice_matches(content, &op.edit, &matches);
    }

    let (patched, replacements) = match spliced {
        Ok(spliced) => spliced,
        Err(reason) => return (content.to_string(), OperationOutcome::Rejected { reason }),
    };

    if !op.postcondition.holds(&patched) {
        let reason = RejectReason::PostconditionNotMet {
            postcondition: op.postcondition.to_string(),
        };
        return (content.to_string(), OperationOutcome::Rejected { reason });
    }

    (patched, OperationOutcome::Applied { replacements })
}

fn splice_matches(
    content: &str,
    edit: &EditKind,
    selected: &[AnchorMatch],
) -> Result<(String, usize), RejectReason> {
    let splices: Vec<Splice> = selected.iter().map(|m| to_splice(m, edit)).collect();
    let count = splices.len();
    apply_splices(content, splices)
        .map(|patched| (patched, count))
        .map_err(|e| RejectReason::InvalidSpan {
            message: e.to_string(),
        })
}

/// First capture reference in a replacement template that `re` does not define.
///
/// Follows the `regex` crate's template syntax: `$$` is a literal `$`, and
/// `$name` takes the longest run of `[_0-9A-Za-z]`. An unclosed `${` is literal.
pub fn unknown_capture<'t>(re: &Regex, template: &'t str) -> Option<&'t str> {
    let defined = |name: &str| match name.parse::<usize>() {
        Ok(index) => index < re.captures_len(),
        Err(_) => re.capture_names().flatten().any(|n| n == name),
    };

    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let rest = &template[i + 1..];
        if rest.starts_with('$') {
            i += 2;
            continue;
        }
        let (name, consumed) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let len = rest
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            (&rest[..len], len)
        };
        if !name.is_empty() && !defined(name) {
            return Some(name);
        }
        i += 1 + consumed;
    }
    None
}

fn find_matches(
    content: &str,
    op: &PatchOperation,
    ctx: &ApplyContext,
) -> Result<Vec<AnchorMatch>, RejectReason> {
    match &op.anchor {
        Anchor::Text(text) if text.is_empty() => Ok(Vec::new()),
        Anchor::Text(text) => Ok(content
            .match_indices(text.as_str())
            .map(|(idx, found)| AnchorMatch {
                byte_start: idx,
                byte_end: idx + found.len(),
                expanded: None,
            })
            .collect()),
        Anchor::Regex(re) => Ok(re
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let expanded = match &op.edit {
                    EditKind::Replace(template) => {
                        let mut dst = String::new();
                        caps.expand(template, &mut dst);
                        Some(dst)
                    }
                    _ => None,
                };
                Some(AnchorMatch {
                    byte_start: whole.start(),
                    byte_end: whole.end(),
                    expanded,
                })
            })
            .collect()),
        Anchor::Structural { pattern } => {
            let lang = ctx.lang.ok_or(RejectReason::UnsupportedLanguage)?;
            let matcher = StructuralMatcher::new(content, lang);
            let found = matcher.find_all(pattern).map_err(|e| match e {
                AstGrepError::InvalidPattern { message, .. } => {
                    RejectReason::InvalidPattern { message }
                }
            })?;
            Ok(found
                .into_iter()
                .map(|m| AnchorMatch {
                    byte_start: m.byte_start,
                    byte_end: m.byte_end,
                    expanded: None,
                })
                .collect())
        }
    }
}

fn to_splice(m: &AnchorMatch, edit: &EditKind) -> Splice {
    match edit {
        EditKind::Replace(text) => Splice::new(
            m.byte_start,
            m.byte_end,
            m.expanded.clone().unwrap_or_else(|| text.clone()),
        ),
        EditKind::InsertAfter(text) => Splice::insert(m.byte_end, text.clone()),
        EditKind::InsertBefore(text) => Splice::insert(m.byte_start, text.clone()),
        EditKind::Delete => Splice::new(m.byte_start, m.byte_end, String::new()),
    }
}
