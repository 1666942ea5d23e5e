//! One patch run against one target file.
//!
//! A run reads the target, takes a verified backup, folds every operation
//! over the content in order, checks the result for newly introduced syntax
//! errors and writes it back atomically, but only when it changed.
//!
//! ```text
//! Initialized → BackedUp → Applying(1) → … → Applying(n) → Written → Complete
//!                                              └──────────→ Complete (unchanged)
//! ```
//!
//! Reading and backing up are the only steps that abort before any
//! operation is attempted. Operation-level problems never abort a run; they
//! are reported per operation and the remaining operations still run.

use crate::backup::{self, BackupError};
use crate::edit::{atomic_write, EditError};
use crate::operation::{apply_operation, ApplyContext, OperationOutcome, PatchOperation, Status};
use crate::sg::{detect_language, language_name, SupportLang};
use crate::ts::ErrorNode;
use crate::validate::{ParseValidator, ValidationError};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Initialized,
    BackedUp,
    /// Attempting the operation with this 1-based index
    Applying(usize),
    Written,
    Complete,
    /// Stopped before writing; see the accompanying `RunError`
    Failed,
}

/// Whether to check the folded content for new syntax errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Check targets whose grammar is known
    #[default]
    Auto,
    Off,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fold and report only: no backup, no write
    pub dry_run: bool,
    /// Where backups go; next to the target when `None`
    pub backup_dir: Option<PathBuf>,
    pub validation: Validation,
    /// Write even when the result has new syntax errors
    pub allow_malformed: bool,
    /// Grammar override; detected from the extension when `None`
    pub lang: Option<SupportLang>,
}

impl RunOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// Outcome of one operation within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    /// 1-based position in the run
    pub index: usize,
    pub label: String,
    pub status: Status,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}: {}", self.index, self.label, self.status)
    }
}

/// Everything a run did to one target.
#[derive(Debug, Clone, Serialize)]
pub struct PatchRunReport {
    pub target: PathBuf,
    pub backup: Option<PathBuf>,
    pub operations: Vec<OperationReport>,
    pub changed: bool,
    pub written: bool,
    pub dry_run: bool,
    pub state: RunState,
    pub trace: Vec<RunState>,
    /// Content read at run start
    #[serde(skip)]
    pub original: String,
    /// Content after every operation was attempted
    #[serde(skip)]
    pub content: String,
}

impl PatchRunReport {
    fn new(target: &Path, dry_run: bool) -> Self {
        Self {
            target: target.to_path_buf(),
            backup: None,
            operations: Vec::new(),
            changed: false,
            written: false,
            dry_run,
            state: RunState::Initialized,
            trace: vec![RunState::Initialized],
            original: String::new(),
            content: String::new(),
        }
    }

    fn transition(&mut self, state: RunState) {
        tracing::debug!(
            target_file = %self.target.display(),
            from = ?self.state,
            to = ?state,
            "run state"
        );
        self.state = state;
        self.trace.push(state);
    }

    fn count(&self, status: Status) -> usize {
        self.operations.iter().filter(|o| o.status == status).count()
    }

    pub fn applied(&self) -> usize {
        self.count(Status::Ok)
    }

    pub fn already_applied(&self) -> usize {
        self.count(Status::Exists)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("target not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("cannot read target {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup of {} failed; nothing was changed", path.display())]
    BackupWriteFailed {
        path: PathBuf,
        #[source]
        source: BackupError,
    },

    #[error(
        "patched {} would introduce {} syntax error(s); target left untouched",
        path.display(),
        errors.len()
    )]
    MalformedResult {
        path: PathBuf,
        errors: Vec<ErrorNode>,
        report: Box<PatchRunReport>,
    },

    #[error("failed to write {}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: EditError,
    },
}

/// Run `operations` against `path` with default options.
pub fn run(path: &Path, operations: &[PatchOperation]) -> Result<PatchRunReport, RunError> {
    run_with(path, operations, &RunOptions::default())
}

pub fn run_with(
    path: &Path,
    operations: &[PatchOperation],
    options: &RunOptions,
) -> Result<PatchRunReport, RunError> {
    let mut report = PatchRunReport::new(path, options.dry_run);

    let bytes = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => RunError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => RunError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let original = String::from_utf8(bytes).map_err(|e| RunError::SourceUnreadable {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    if !options.dry_run {
        let backup_dir = options.backup_dir.as_deref();
        let backup_path = backup::write_backup(path, original.as_bytes(), backup_dir)
            .map_err(|source| RunError::BackupWriteFailed {
                path: path.to_path_buf(),
                source,
            })?;
        report.backup = Some(backup_path);
        report.transition(RunState::BackedUp);
    }

    let lang = options.lang.or_else(|| detect_language(path));
    tracing::debug!(
        target_file = %path.display(),
        lang = lang.map_or("none", language_name),
        operations = operations.len(),
        "folding operations"
    );
    let ctx = ApplyContext { lang };

    let mut content = original.clone();
    for (idx, op) in operations.iter().enumerate() {
        let index = idx + 1;
        report.transition(RunState::Applying(index));

        let (next, outcome) = apply_operation(&content, op, &ctx);
        tracing::debug!(
            index,
            label = %op.label,
            status = %outcome.status(),
            "operation attempted"
        );
        content = next;
        report.operations.push(OperationReport {
            index,
            label: op.label.clone(),
            status: outcome.status(),
            outcome,
        });
    }

    report.changed = content != original;
    report.original = original;
    report.content = content;

    if report.changed && options.validation == Validation::Auto {
        if let Some(lang) = lang {
            if let Err(errors) = check_malformed(lang, &report.original, &report.content) {
                if options.allow_malformed {
                    tracing::warn!(
                        target_file = %path.display(),
                        errors = errors.len(),
                        "writing result with new syntax errors"
                    );
                } else {
                    report.transition(RunState::Failed);
                    return Err(RunError::MalformedResult {
                        path: path.to_path_buf(),
                        errors,
                        report: Box::new(report),
                    });
                }
            }
        }
    }

    if report.changed && !options.dry_run {
        atomic_write(path, report.content.as_bytes()).map_err(|source| RunError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        report.written = true;
        report.transition(RunState::Written);
        tracing::info!(
            target_file = %path.display(),
            applied = report.applied(),
            "target written"
        );
    }

    report.transition(RunState::Complete);
    Ok(report)
}

/// New syntax errors in `patched`, if any. Grammar problems skip the check.
fn check_malformed(lang: SupportLang, original: &str, patched: &str) -> Result<(), Vec<ErrorNode>> {
    let mut validator = match ParseValidator::new(lang) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "skipping syntax check");
            return Ok(());
        }
    };
    match validator.validate_edit(original, patched) {
        Ok(()) => Ok(()),
        Err(ValidationError::ParseErrorIntroduced { errors, .. }) => Err(errors),
        Err(ValidationError::TreeSitter(e)) => {
            tracing::warn!(error = %e, "skipping syntax check");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Anchor, EditKind};

    fn target(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn fresh_file_single_operation() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;");
        let ops = [PatchOperation::replace("add y", "const x = 1;", "const x = 1;\nconst y = 2;")];

        let report = run(&path, &ops).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "const x = 1;\nconst y = 2;");
        assert_eq!(report.operations[0].to_string(), "1. add y: OK");
        let backup = report.backup.unwrap();
        assert_eq!(backup, dir.path().join("a.js.bak"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "const x = 1;");
        assert!(report.written);
        assert_eq!(
            report.trace,
            vec![
                RunState::Initialized,
                RunState::BackedUp,
                RunState::Applying(1),
                RunState::Written,
                RunState::Complete,
            ]
        );
    }

    #[test]
    fn already_patched_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;\nconst y = 2;");
        let ops = [PatchOperation::replace("add y", "const x = 1;", "const x = 1;\nconst y = 2;")];

        let report = run(&path, &ops).unwrap();

        assert_eq!(report.operations[0].to_string(), "1. add y: EXISTS");
        assert!(!report.changed);
        assert!(!report.written);
        assert_eq!(report.state, RunState::Complete);
        assert!(!report.trace.contains(&RunState::Written));
        assert_eq!(fs::read_to_string(&path).unwrap(), "const x = 1;\nconst y = 2;");
    }

    #[test]
    fn missing_anchor_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;");
        let ops = [PatchOperation::replace("z", "const z = 9;", "const z = 10;")];

        let report = run(&path, &ops).unwrap();

        assert_eq!(report.operations[0].to_string(), "1. z: FAILED");
        assert!(report.has_failures());
        assert!(!report.written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "const x = 1;");
    }

    #[test]
    fn backup_failure_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;");
        let blocker = target(&dir, "not-a-dir", "");
        let ops = [PatchOperation::replace("add y", "const x = 1;", "const x = 1;\nconst y = 2;")];
        let options = RunOptions {
            backup_dir: Some(blocker),
            ..RunOptions::default()
        };

        let result = run_with(&path, &ops, &options);

        assert!(matches!(result, Err(RunError::BackupWriteFailed { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "const x = 1;");
    }

    #[test]
    fn missing_target_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(&dir.path().join("gone.js"), &[]);
        assert!(matches!(result, Err(RunError::SourceNotFound { .. })));
    }

    #[test]
    fn non_utf8_target_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.js");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let result = run_with(&path, &[], &RunOptions::dry_run());
        assert!(matches!(result, Err(RunError::SourceUnreadable { .. })));
    }

    #[test]
    fn anchor_miss_does_not_block_later_operations() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "let a = 1;\nlet b = 2;\n");
        let ops = [
            PatchOperation::replace("gone", "let q = 0;", "let q = 1;"),
            PatchOperation::replace("bump b", "let b = 2;", "let b = 3;"),
        ];

        let report = run(&path, &ops).unwrap();

        let lines: Vec<String> = report.operations.iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["1. gone: FAILED", "2. bump b: OK"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "let a = 1;\nlet b = 3;\n");
    }

    #[test]
    fn rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "let a = 1;\n");
        let ops = [
            PatchOperation::insert_after("b", "let a = 1;\n", "let b = 2;\n"),
            PatchOperation::replace("a", "let a = 1;", "let a = 10;"),
        ];

        run(&path, &ops).unwrap();
        let first = fs::read_to_string(&path).unwrap();
        let report = run(&path, &ops).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), first);
        assert!(report.operations.iter().all(|o| o.status == Status::Exists));
        assert!(!report.written);
    }

    #[test]
    fn unrelated_operations_commute() {
        let content = "let a = 1;\nlet b = 2;\n";
        let first = PatchOperation::replace("a", "let a = 1;", "let a = 10;");
        let second = PatchOperation::replace("b", "let b = 2;", "let b = 20;");

        let dir = tempfile::tempdir().unwrap();
        let left = target(&dir, "left.js", content);
        let right = target(&dir, "right.js", content);
        run(&left, &[first.clone(), second.clone()]).unwrap();
        run(&right, &[second, first]).unwrap();

        assert_eq!(
            fs::read_to_string(&left).unwrap(),
            fs::read_to_string(&right).unwrap()
        );
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;");
        let ops = [PatchOperation::replace("add y", "const x = 1;", "const x = 1;\nconst y = 2;")];

        let report = run_with(&path, &ops, &RunOptions::dry_run()).unwrap();

        assert!(report.changed);
        assert!(!report.written);
        assert!(report.backup.is_none());
        assert_eq!(report.content, "const x = 1;\nconst y = 2;");
        assert_eq!(fs::read_to_string(&path).unwrap(), "const x = 1;");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn malformed_result_is_not_written() {
        let source = "const el = ok ? (\n  <b>yes</b>\n) : (\n  <i>no</i>\n);\n";
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "App.jsx", source);
        let ops = [PatchOperation::replace(
            "break ternary",
            ") : (\n",
            "{extra && (\n",
        )];

        let result = run(&path, &ops);

        match result {
            Err(RunError::MalformedResult { errors, report, .. }) => {
                assert!(!errors.is_empty());
                assert_eq!(report.state, RunState::Failed);
                assert!(report.backup.is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), source);
    }

    #[test]
    fn allow_malformed_writes_anyway() {
        let source = "const el = ok ? (\n  <b>yes</b>\n) : (\n  <i>no</i>\n);\n";
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "App.jsx", source);
        let ops = [PatchOperation::replace(
            "break ternary",
            ") : (\n",
            "{extra && (\n",
        )];
        let options = RunOptions {
            allow_malformed: true,
            ..RunOptions::default()
        };

        let report = run_with(&path, &ops, &options).unwrap();
        assert!(report.written);
        assert!(fs::read_to_string(&path).unwrap().contains("{extra && ("));
    }

    #[test]
    fn unknown_extension_skips_syntax_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "notes.txt", "a ( b");
        let ops = [PatchOperation::replace("paren", "a ( b", "a (( b")];

        let report = run(&path, &ops).unwrap();
        assert!(report.written);
    }

    #[test]
    fn structural_operation_uses_detected_grammar() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "App.jsx", "if (done) {\n  setBulkParsing( false );\n}\n");
        let op = PatchOperation::new(
            "reset progress",
            Anchor::Structural {
                pattern: "setBulkParsing(false)".into(),
            },
            EditKind::InsertAfter(";\n  setBulkProgress(\"\")".into()),
            None,
        )
        .unwrap();

        let report = run(&path, &[op]).unwrap();

        assert_eq!(report.operations[0].status, Status::Ok);
        assert!(fs::read_to_string(&path)
            .unwrap()
            .contains("setBulkParsing( false );\n  setBulkProgress(\"\");"));
    }

    #[test]
    fn report_serializes_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = target(&dir, "a.js", "const x = 1;");
        let ops = [PatchOperation::replace("z", "const z = 9;", "const z = 10;")];

        let report = run_with(&path, &ops, &RunOptions::dry_run()).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["operations"][0]["status"], "FAILED");
        assert_eq!(json["operations"][0]["outcome"], "anchor-not-found");
        assert_eq!(json["state"], "complete");
        assert!(json.get("content").is_none());
    }
}
