//! An insertion that lands inside a JSX ternary breaks the tree. The run
//! must refuse to write it, and a later fix must be allowed to repair a file
//! that was already broken.

use anchor_patcher::{run, run_with, PatchOperation, RunError, RunOptions, RunState, Status};
use std::fs;
use tempfile::TempDir;

const PANEL: &str = r#"export function BriefPanel({ moBrief, patientFullData, generateBrief }) {
  return (
    <div>
      {moBrief ? (
        <div className="brief">{moBrief.summary}</div>
      ) : (
        <button onClick={generateBrief}>
          Generate Consultant Brief
        </button>
      )}
    </div>
  );
}
"#;

/// Inserting the AI brief button right after the consultant button puts it
/// between `</button>` and `)}`, inside the ternary's else branch.
fn misplaced_ai_button() -> PatchOperation {
    PatchOperation::replace(
        "ai-brief-button",
        "          Generate Consultant Brief\n        </button>\n      )}",
        "          Generate Consultant Brief\n        </button>\n      {patientFullData && (\n        <button>AI Clinical Brief</button>\n      )}",
    )
}

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BriefPanel.jsx");
    fs::write(&path, PANEL).unwrap();
    (dir, path)
}

#[test]
fn misplaced_insertion_is_refused() {
    let (dir, path) = setup();

    let err = run(&path, &[misplaced_ai_button()]).unwrap_err();

    match err {
        RunError::MalformedResult { errors, report, .. } => {
            assert!(!errors.is_empty());
            assert_eq!(report.operations[0].status, Status::Ok);
            assert_eq!(report.state, RunState::Failed);
            assert!(!report.trace.contains(&RunState::Written));
        }
        other => panic!("expected MalformedResult, got {other}"),
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), PANEL);
    // The backup was taken before the fold and is harmless
    assert_eq!(
        fs::read_to_string(dir.path().join("BriefPanel.jsx.bak")).unwrap(),
        PANEL
    );
}

#[test]
fn fix_repairs_an_already_broken_file() {
    let (_dir, path) = setup();
    let forced = RunOptions {
        allow_malformed: true,
        ..RunOptions::default()
    };
    run_with(&path, &[misplaced_ai_button()], &forced).unwrap();
    let broken = fs::read_to_string(&path).unwrap();

    // Wrap the stray block in a fragment so the else branch holds one node
    let fix = PatchOperation::replace(
        "wrap-else-branch",
        "        <button onClick={generateBrief}>\n          Generate Consultant Brief\n        </button>\n      {patientFullData && (\n        <button>AI Clinical Brief</button>\n      )}",
        "        <>\n        <button onClick={generateBrief}>\n          Generate Consultant Brief\n        </button>\n        {patientFullData && (\n          <button>AI Clinical Brief</button>\n        )}\n        </>\n      )}",
    );

    let report = run(&path, &[fix.clone()]).unwrap();
    assert_eq!(report.operations[0].status, Status::Ok);
    assert!(report.written);

    let fixed = fs::read_to_string(&path).unwrap();
    assert_ne!(fixed, broken);
    assert!(fixed.contains("<>\n"));

    let rerun = run(&path, &[fix]).unwrap();
    assert_eq!(rerun.operations[0].status, Status::Exists);
}
