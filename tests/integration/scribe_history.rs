//! A sequence of patches applied over time to the same target, the way a
//! long-lived app accumulates fixes. Later runs start from whatever earlier
//! runs left behind, including their misses.

use anchor_patcher::config::load_from_str;
use anchor_patcher::{list_backups, run, OperationOutcome, PatchOperation, Status};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const APP: &str = r#"export function FollowUp({ conData }) {
  let text = "";
  if (conData.follow_up.instructions) text += `Instructions: ${conData.follow_up.instructions}\n`;
  return (
    <div>
      {conData.follow_up.instructions && <div className="warn">{conData.follow_up.instructions}</div>}
    </div>
  );
}
"#;

const NORMALIZE: &str = r#"
[meta]
name = "follow-up-normalize"
next_steps = ["Run: npm run build"]

[[patches]]
id = "instructions-ui"
file = "FollowUp.jsx"
anchor = { type = "text", text = '{conData.follow_up.instructions && <div className="warn">{conData.follow_up.instructions}</div>}' }
operation = { type = "replace", text = '{(conData.follow_up.instructions||conData.follow_up.special_instructions) && <div className="warn">{conData.follow_up.instructions||conData.follow_up.special_instructions}</div>}' }

[[patches]]
id = "instructions-text"
file = "FollowUp.jsx"
anchor = { type = "text", text = 'if (conData.follow_up.instructions) text +=' }
operation = { type = "replace", text = 'if (conData.follow_up.instructions||conData.follow_up.special_instructions) text +=' }

[[patches]]
id = "normalizer"
file = "FollowUp.jsx"
anchor = { type = "text", text = 'else if(data) { setConData(fixConMedicines(data)); }' }
operation = { type = "replace", text = 'else if(data) { setConData(fixConMedicines(normalizeFollowUp(data))); }' }
hint = "return ("
"#;

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("FollowUp.jsx");
    fs::write(&path, APP).unwrap();
    (dir, path)
}

fn operations(root: &Path, patch: &str) -> Vec<PatchOperation> {
    let config = load_from_str(patch).unwrap();
    let mut plans = config.plan(root).unwrap();
    assert_eq!(plans.len(), 1);
    plans.remove(0).operations
}

#[test]
fn partial_application_reports_each_operation() {
    let (dir, path) = setup();
    let ops = operations(dir.path(), NORMALIZE);

    let report = run(&path, &ops).unwrap();

    let lines: Vec<String> = report.operations.iter().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "1. instructions-ui: OK",
            "2. instructions-text: OK",
            "3. normalizer: FAILED",
        ]
    );
    match &report.operations[2].outcome {
        OperationOutcome::AnchorNotFound { hint: Some(hint) } => {
            let marker = hint.marker.as_ref().unwrap();
            assert_eq!(marker.line, 4);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.matches("special_instructions").count(), 3);
}

#[test]
fn rerun_after_partial_application() {
    let (dir, path) = setup();
    let ops = operations(dir.path(), NORMALIZE);

    run(&path, &ops).unwrap();
    let after_first = fs::read_to_string(&path).unwrap();
    let report = run(&path, &ops).unwrap();

    let statuses: Vec<Status> = report.operations.iter().map(|o| o.status).collect();
    assert_eq!(statuses, vec![Status::Exists, Status::Exists, Status::Failed]);
    assert!(!report.written);
    assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
}

#[test]
fn later_patch_builds_on_earlier_output() {
    let (dir, path) = setup();
    run(&path, &operations(dir.path(), NORMALIZE)).unwrap();

    // A follow-up fix in a later run gets the next backup number
    let followup = [PatchOperation::replace(
        "instructions-label",
        "text += `Instructions: ${conData.follow_up.instructions}\\n`",
        "text += `Instructions: ${conData.follow_up.instructions||conData.follow_up.special_instructions}\\n`",
    )];
    let report = run(&path, &followup).unwrap();
    assert_eq!(report.operations[0].status, Status::Ok);

    let backups = list_backups(&path, None).unwrap();
    let numbers: Vec<u32> = backups.iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(fs::read_to_string(&backups[0].path).unwrap(), APP);
}

#[test]
fn unrelated_fixes_commute() {
    let (dir, path) = setup();
    let ops = operations(dir.path(), NORMALIZE);
    let other = dir.path().join("Other.jsx");
    fs::write(&other, APP).unwrap();

    run(&path, &[ops[0].clone(), ops[1].clone()]).unwrap();
    run(&other, &[ops[1].clone(), ops[0].clone()]).unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        fs::read_to_string(&other).unwrap()
    );
}
