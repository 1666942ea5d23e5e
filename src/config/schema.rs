use crate::operation::{
    Anchor, Cardinality, EditKind, OperationError, PatchOperation, Postcondition,
};
use crate::sg::{detect_language, StructuralMatcher};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    patch_id: patch.id.clone(),
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            }

            match &patch.anchor {
                AnchorSpec::Text { text } if text.is_empty() => {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "anchor.text",
                    });
                }
                AnchorSpec::Regex { pattern } | AnchorSpec::AstGrep { pattern }
                    if pattern.trim().is_empty() =>
                {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "anchor.pattern",
                    });
                }
                AnchorSpec::AstGrep { pattern } => match detect_language(Path::new(&patch.file)) {
                    Some(lang) => {
                        if let Err(e) = StructuralMatcher::check_pattern(pattern, lang) {
                            issues.push(ValidationIssue::InvalidPattern {
                                patch_id: patch.id.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                    None => issues.push(ValidationIssue::InvalidCombo {
                        patch_id: Some(patch.id.clone()),
                        message: format!(
                            "ast-grep anchor needs a file with a known grammar, got '{}'",
                            patch.file
                        ),
                    }),
                },
                _ => {}
            }

            if let OperationSpec::InsertAfter { text } | OperationSpec::InsertBefore { text } =
                &patch.operation
            {
                if text.is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "operation.text",
                    });
                }
            }

            // Only surface conversion problems for entries that are otherwise sound.
            if issues.iter().all(|i| i.patch_id() != Some(patch.id.as_str())) {
                if let Err(issue) = patch.to_operation() {
                    issues.push(issue);
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Group the patches into one ordered operation list per target.
    ///
    /// Targets keep the order in which they first appear; operations keep
    /// their order within each target.
    pub fn plan(&self, root: &Path) -> Result<Vec<TargetPlan>, ValidationError> {
        let mut plans: Vec<TargetPlan> = Vec::new();
        let mut issues = Vec::new();

        for patch in &self.patches {
            let operation = match patch.to_operation() {
                Ok(op) => op,
                Err(issue) => {
                    issues.push(issue);
                    continue;
                }
            };
            let path = resolve_target(root, &patch.file);
            match plans.iter_mut().find(|p| p.path == path) {
                Some(plan) => plan.operations.push(operation),
                None => plans.push(TargetPlan {
                    path,
                    operations: vec![operation],
                }),
            }
        }

        if issues.is_empty() {
            Ok(plans)
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Operations bound for one target file, in patch-file order.
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub path: PathBuf,
    pub operations: Vec<PatchOperation>,
}

/// Resolve a patch's `file` against the target root.
///
/// Absolute paths are kept and a leading `~/` expands to the home directory.
pub fn resolve_target(root: &Path, file: &str) -> PathBuf {
    if let Some(rest) = file.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Printed after a successful apply
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    pub file: String,
    pub anchor: AnchorSpec,
    pub operation: OperationSpec,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub postcondition: Option<PostconditionSpec>,
    /// Marker whose context is shown when the anchor misses
    #[serde(default)]
    pub hint: Option<String>,
}

impl PatchDefinition {
    pub fn to_operation(&self) -> Result<PatchOperation, ValidationIssue> {
        let anchor = match &self.anchor {
            AnchorSpec::Text { text } => Anchor::Text(text.clone()),
            AnchorSpec::Regex { pattern } => Anchor::Regex(self.compile(pattern)?),
            AnchorSpec::AstGrep { pattern } => Anchor::Structural {
                pattern: pattern.clone(),
            },
        };

        let edit = match &self.operation {
            OperationSpec::Replace { text } => EditKind::Replace(text.clone()),
            OperationSpec::InsertAfter { text } => EditKind::InsertAfter(text.clone()),
            OperationSpec::InsertBefore { text } => EditKind::InsertBefore(text.clone()),
            OperationSpec::Delete => EditKind::Delete,
        };

        let postcondition = match &self.postcondition {
            None => None,
            Some(PostconditionSpec::Contains { text }) => {
                Some(Postcondition::Contains(text.clone()))
            }
            Some(PostconditionSpec::Absent { text }) => Some(Postcondition::Absent(text.clone())),
            Some(PostconditionSpec::Matches { pattern }) => {
                Some(Postcondition::Matches(self.compile(pattern)?))
            }
            Some(PostconditionSpec::NotMatches { pattern }) => {
                Some(Postcondition::NotMatches(self.compile(pattern)?))
            }
        };

        let operation = PatchOperation::new(self.id.clone(), anchor, edit, postcondition)
            .map_err(|e| match e {
                OperationError::PostconditionRequired { .. } => ValidationIssue::InvalidCombo {
                    patch_id: Some(self.id.clone()),
                    message: e.to_string(),
                },
                OperationError::UnknownCapture { .. } => ValidationIssue::InvalidPattern {
                    patch_id: self.id.clone(),
                    message: e.to_string(),
                },
            })?
            .with_cardinality(self.cardinality);

        Ok(match &self.hint {
            Some(marker) => operation.with_hint(marker.clone()),
            None => operation,
        })
    }

    fn compile(&self, pattern: &str) -> Result<Regex, ValidationIssue> {
        Regex::new(pattern).map_err(|e| ValidationIssue::InvalidPattern {
            patch_id: self.id.clone(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnchorSpec {
    /// Exact substring
    Text { text: String },
    Regex { pattern: String },
    /// ast-grep pattern, language taken from the target's extension
    AstGrep { pattern: String },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationSpec {
    Replace { text: String },
    InsertAfter { text: String },
    InsertBefore { text: String },
    Delete,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PostconditionSpec {
    Contains { text: String },
    Matches { pattern: String },
    Absent { text: String },
    NotMatches { pattern: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        patch_id: String,
    },
    InvalidPattern {
        patch_id: String,
        message: String,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl ValidationIssue {
    fn patch_id(&self) -> Option<&str> {
        match self {
            ValidationIssue::EmptyPatchList => None,
            ValidationIssue::MissingField { patch_id, .. }
            | ValidationIssue::InvalidCombo { patch_id, .. } => patch_id.as_deref(),
            ValidationIssue::DuplicateId { patch_id }
            | ValidationIssue::InvalidPattern { patch_id, .. } => Some(patch_id),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { patch_id } => {
                write!(f, "patch id '{patch_id}' is used more than once")
            }
            ValidationIssue::InvalidPattern { patch_id, message } => {
                write!(f, "patch '{patch_id}' has an invalid pattern: {message}")
            }
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> PatchConfig {
        toml_edit::de::from_str(input).unwrap()
    }

    #[test]
    fn plan_groups_by_target_in_first_appearance_order() {
        let config = parse(
            r#"
[[patches]]
id = "a1"
file = "client/src/App.jsx"
anchor = { type = "text", text = "A" }
operation = { type = "replace", text = "AA" }

[[patches]]
id = "s1"
file = "server/index.js"
anchor = { type = "text", text = "S" }
operation = { type = "replace", text = "SS" }

[[patches]]
id = "a2"
file = "client/src/App.jsx"
anchor = { type = "text", text = "B" }
operation = { type = "delete" }
"#,
        );
        let plans = config.plan(Path::new("/srv/app")).unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].path, PathBuf::from("/srv/app/client/src/App.jsx"));
        let labels: Vec<&str> = plans[0].operations.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["a1", "a2"]);
        assert_eq!(plans[1].path, PathBuf::from("/srv/app/server/index.js"));
    }

    #[test]
    fn absolute_and_home_targets() {
        assert_eq!(
            resolve_target(Path::new("/srv"), "/etc/app.js"),
            PathBuf::from("/etc/app.js")
        );
        if let Some(home) = home::home_dir() {
            assert_eq!(
                resolve_target(Path::new("/srv"), "~/app/App.jsx"),
                home.join("app/App.jsx")
            );
        }
    }

    #[test]
    fn capture_replacement_needs_postcondition() {
        let config = parse(
            r#"
[[patches]]
id = "tokens"
file = "server/index.js"
anchor = { type = "regex", pattern = 'max_tokens: (\d+)' }
operation = { type = "replace", text = "max_tokens: ${1}0" }
"#,
        );
        let err = config.validate().unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.to_string().contains("explicit postcondition"));
    }

    #[test]
    fn template_literal_in_regex_replacement_is_rejected() {
        let config = parse(
            r#"
[[patches]]
id = "visits-url"
file = "src/App.jsx"
anchor = { type = "regex", pattern = 'fetch\(`/api/(\w+)`' }
operation = { type = "replace", text = 'fetch(`${API_URL}/api/$1`' }

[patches.postcondition]
type = "contains"
text = "API_URL}/api/"
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(
            &err.issues[0],
            ValidationIssue::InvalidPattern { patch_id, message }
                if patch_id == "visits-url" && message.contains("API_URL")
        ));

        let escaped = parse(
            r#"
[[patches]]
id = "visits-url"
file = "src/App.jsx"
anchor = { type = "regex", pattern = 'fetch\(`/api/(\w+)`' }
operation = { type = "replace", text = 'fetch(`$${API_URL}/api/$1`' }

[patches.postcondition]
type = "contains"
text = "API_URL}/api/"
"#,
        );
        escaped.validate().unwrap();
    }

    #[test]
    fn collects_every_issue() {
        let config = parse(
            r#"
[[patches]]
id = "dup"
file = ""
anchor = { type = "text", text = "x" }
operation = { type = "replace", text = "y" }

[[patches]]
id = "dup"
file = "a.js"
anchor = { type = "regex", pattern = "(" }
operation = { type = "delete" }

[[patches]]
id = "structural"
file = "notes.txt"
anchor = { type = "ast-grep", pattern = "foo($A)" }
operation = { type = "insert-after", text = ";" }
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::MissingField { field: "file", .. })));
        assert!(err
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::DuplicateId { .. })));
        assert!(err
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::InvalidCombo { .. })));
    }

    #[test]
    fn explicit_postcondition_and_cardinality() {
        let config = parse(
            r#"
[[patches]]
id = "models"
file = "server/index.js"
anchor = { type = "regex", pattern = 'claude-3-[a-z]+' }
operation = { type = "replace", text = "claude-sonnet-4" }
cardinality = "all"
hint = "model:"

[patches.postcondition]
type = "not-matches"
pattern = 'claude-3-[a-z]+'
"#,
        );
        config.validate().unwrap();
        let op = config.patches[0].to_operation().unwrap();
        assert_eq!(op.cardinality, Cardinality::All);
        assert_eq!(op.hint_marker.as_deref(), Some("model:"));
        assert!(matches!(op.postcondition, Postcondition::NotMatches(_)));
    }

    #[test]
    fn empty_config_is_invalid() {
        let err = PatchConfig::default().validate().unwrap_err();
        assert!(matches!(err.issues[0], ValidationIssue::EmptyPatchList));
    }
}
