use anchor_patcher::backup::{list_backups, restore};
use anchor_patcher::config::{discover, load_from_path, resolve_target};
use anchor_patcher::runner::{run_with, OperationReport};
use anchor_patcher::{OperationOutcome, PatchRunReport, RunError, RunOptions, Status};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anchor-patcher")]
#[command(about = "Idempotent anchor-based patching of source files", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch files to their targets
    Apply {
        /// Patch files or directories of patch files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directory relative target paths resolve against (default: cwd)
        #[arg(short, long, env = "ANCHOR_PATCHER_ROOT")]
        root: Option<PathBuf>,

        /// Dry run - show what would change without backing up or writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Print reports as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Keep backups here instead of next to each target
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Write results even if they introduce syntax errors
        #[arg(long)]
        allow_malformed: bool,
    },

    /// Show which operations would apply, without touching any file
    Status {
        /// Patch files or directories of patch files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directory relative target paths resolve against (default: cwd)
        #[arg(short, long, env = "ANCHOR_PATCHER_ROOT")]
        root: Option<PathBuf>,
    },

    /// List the numbered backups of a target
    Backups {
        target: PathBuf,

        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },

    /// Restore a target from a backup (latest unless --number is given)
    Restore {
        target: PathBuf,

        /// Backup number: 1 for F.bak, N for F.bakN
        #[arg(short = 'N', long)]
        number: Option<u32>,

        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            paths,
            root,
            dry_run,
            diff,
            json,
            backup_dir,
            allow_malformed,
        } => {
            let options = RunOptions {
                dry_run,
                backup_dir: backup_dir.map(|d| expand_home(&d)),
                allow_malformed,
                ..RunOptions::default()
            };
            cmd_apply(&paths, root, &options, diff, json)
        }

        Commands::Status { paths, root } => cmd_status(&paths, root),

        Commands::Backups { target, backup_dir } => cmd_backups(&target, backup_dir),

        Commands::Restore {
            target,
            number,
            backup_dir,
        } => cmd_restore(&target, number, backup_dir),
    }
}

/// Logs go to stderr so the report on stdout stays clean.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "anchor_patcher=debug",
        _ => "anchor_patcher=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the target root.
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. ANCHOR_PATCHER_ROOT environment variable (clap reads it into the flag)
/// 3. Current directory
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    match cli_root {
        Some(root) => {
            let root = expand_home(&root);
            if !root.is_dir() {
                anyhow::bail!("target root is not a directory: {}", root.display());
            }
            Ok(root)
        }
        None => env::current_dir().context("cannot determine current directory"),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) if s.starts_with("~/") => resolve_target(Path::new("."), s),
        _ => path.to_path_buf(),
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        println!("{}", hunk.header().to_string().cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{}", change).red(),
                ChangeTag::Insert => format!("+{}", change).green(),
                ChangeTag::Equal => format!(" {}", change).normal(),
            };
            print!("{}", line);
            if change.missing_newline() {
                println!();
            }
        }
    }
}

fn print_operation(op: &OperationReport, pending_word: Option<&str>) {
    let status = match op.status {
        Status::Ok => op.status.to_string().green(),
        Status::Exists => op.status.to_string().yellow(),
        Status::Failed => op.status.to_string().red().bold(),
    };
    match (op.status, pending_word) {
        (Status::Ok, Some(word)) => {
            println!("  {}. {}: {} {}", op.index, op.label, status, word.dimmed())
        }
        _ => println!("  {}. {}: {}", op.index, op.label, status),
    }

    match &op.outcome {
        OperationOutcome::AnchorNotFound { hint } => {
            println!("     {}", "anchor not found".red());
            let Some(hint) = hint else {
                return;
            };
            if let Some(closest) = &hint.closest {
                println!(
                    "     closest line {} ({:.0}% similar): {}",
                    closest.line,
                    closest.similarity * 100.0,
                    closest.text.dimmed()
                );
            }
            if let Some(marker) = &hint.marker {
                println!(
                    "     near '{}' (line {}): {}",
                    marker.marker,
                    marker.line,
                    marker.context.dimmed()
                );
            }
        }
        OperationOutcome::Rejected { reason } => println!("     {}", reason.to_string().red()),
        OperationOutcome::Applied { .. } | OperationOutcome::AlreadyApplied => {}
    }
}

#[derive(Default)]
struct Totals {
    applied: usize,
    already_applied: usize,
    failed: usize,
    fatal: usize,
}

impl Totals {
    fn add(&mut self, report: &PatchRunReport) {
        self.applied += report.applied();
        self.already_applied += report.already_applied();
        self.failed += report.failed();
    }

    fn ok(&self) -> bool {
        self.failed == 0 && self.fatal == 0
    }
}

fn cmd_apply(
    paths: &[PathBuf],
    root: Option<PathBuf>,
    options: &RunOptions,
    show_diff: bool,
    json: bool,
) -> Result<()> {
    // 1. Resolve target root and patch files
    let root = resolve_root(root)?;
    let patch_files = discover(paths)?;

    if !json {
        println!("Root: {}", root.display());
        if options.dry_run {
            println!("{}", "[DRY RUN - nothing will be backed up or written]".cyan());
        }
        println!();
    }

    // 2. Run each patch file, one run per target
    let mut totals = Totals::default();
    let mut json_reports = Vec::new();

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        let plans = config
            .plan(&root)
            .with_context(|| format!("invalid patch file {}", patch_file.display()))?;

        if !json {
            let name = if config.meta.name.is_empty() {
                patch_file.display().to_string()
            } else {
                config.meta.name.clone()
            };
            println!("{} {}", "Patch:".bold(), name);
            if let Some(description) = &config.meta.description {
                println!("  {}", description.dimmed());
            }
        }

        let failures_before = (totals.failed, totals.fatal);

        for plan in plans {
            if !json {
                println!("\n{}", plan.path.display().to_string().bold());
            }

            match run_with(&plan.path, &plan.operations, options) {
                Ok(report) => {
                    totals.add(&report);
                    if json {
                        json_reports.push(serde_json::to_value(&report)?);
                        continue;
                    }
                    for op in &report.operations {
                        print_operation(op, options.dry_run.then_some("(would apply)"));
                    }
                    if let Some(backup) = &report.backup {
                        println!("  {} {}", "backup:".dimmed(), backup.display());
                    }
                    if show_diff && report.changed {
                        display_diff(&plan.path, &report.original, &report.content);
                    }
                    if !report.changed {
                        println!("  {}", "no changes".dimmed());
                    }
                }
                Err(RunError::MalformedResult {
                    path,
                    errors,
                    report,
                }) => {
                    totals.add(&report);
                    totals.fatal += 1;
                    if json {
                        json_reports.push(serde_json::json!({
                            "target": path,
                            "error": "malformed-result",
                            "syntax_errors": errors
                                .iter()
                                .map(|e| {
                                    serde_json::json!({
                                        "line": e.line,
                                        "column": e.column,
                                        "context": e.context,
                                    })
                                })
                                .collect::<Vec<_>>(),
                            "report": serde_json::to_value(&*report)?,
                        }));
                        continue;
                    }
                    for op in &report.operations {
                        print_operation(op, None);
                    }
                    eprintln!(
                        "  {} result would introduce {} syntax error(s); {} left untouched",
                        "MALFORMED".red().bold(),
                        errors.len(),
                        path.display()
                    );
                    for error in &errors {
                        eprintln!(
                            "     line {}:{} {}",
                            error.line,
                            error.column,
                            error.context.dimmed()
                        );
                    }
                    eprintln!("  Review the diff with --dry-run --diff, or pass --allow-malformed");
                    if show_diff {
                        display_diff(&path, &report.original, &report.content);
                    }
                }
                Err(e) => {
                    totals.fatal += 1;
                    if json {
                        json_reports.push(serde_json::json!({
                            "target": plan.path,
                            "error": e.to_string(),
                        }));
                        continue;
                    }
                    eprintln!("  {} {:#}", "ERROR".red().bold(), anyhow::Error::new(e));
                }
            }
        }

        let clean = (totals.failed, totals.fatal) == failures_before;
        if !json && clean && !options.dry_run && !config.meta.next_steps.is_empty() {
            println!("\n{}", "Next steps:".bold());
            for step in &config.meta.next_steps {
                println!("  {}", step);
            }
        }
        if !json {
            println!();
        }
    }

    // 3. Summary
    if json {
        println!("{}", serde_json::to_string_pretty(&json_reports)?);
    } else {
        println!("{}", "Summary:".bold());
        println!("  {} applied", format!("{}", totals.applied).green());
        println!(
            "  {} already applied",
            format!("{}", totals.already_applied).yellow()
        );
        println!("  {} failed", format!("{}", totals.failed).red());
        if totals.fatal > 0 {
            println!("  {} target(s) not patched", format!("{}", totals.fatal).red());
        }
    }

    if !totals.ok() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(paths: &[PathBuf], root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let patch_files = discover(paths)?;
    let options = RunOptions::dry_run();

    println!("{}", "Patch Status Report".bold());
    println!("Root: {}", root.display());

    let mut totals = Totals::default();

    // Read-only: every run is a dry run
    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        let plans = config
            .plan(&root)
            .with_context(|| format!("invalid patch file {}", patch_file.display()))?;

        println!("\n{} {}", "Patch:".bold(), patch_file.display());

        for plan in plans {
            println!("  {}", plan.path.display());
            let report = match run_with(&plan.path, &plan.operations, &options) {
                Ok(report) => report,
                Err(RunError::MalformedResult { report, .. }) => {
                    println!("  {}", "applying would introduce syntax errors".red());
                    totals.fatal += 1;
                    *report
                }
                Err(e) => {
                    println!("  {} {}", "ERROR".red().bold(), e);
                    totals.fatal += 1;
                    continue;
                }
            };
            totals.add(&report);
            for op in &report.operations {
                print_operation(op, Some("(pending)"));
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} pending", format!("{}", totals.applied).green());
    println!(
        "  {} already applied",
        format!("{}", totals.already_applied).yellow()
    );
    println!("  {} failing", format!("{}", totals.failed).red());

    if !totals.ok() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_backups(target: &Path, backup_dir: Option<PathBuf>) -> Result<()> {
    let target = expand_home(target);
    let backup_dir = backup_dir.map(|d| expand_home(&d));
    let backups = list_backups(&target, backup_dir.as_deref())?;

    if backups.is_empty() {
        println!("No backups of {}", target.display());
        return Ok(());
    }

    println!("Backups of {}:", target.display().to_string().bold());
    for backup in &backups {
        let age = backup
            .modified
            .map(format_age)
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {:>3}  {}  {} bytes  {}",
            backup.number,
            backup.path.display(),
            backup.len,
            age.dimmed()
        );
    }

    Ok(())
}

fn cmd_restore(target: &Path, number: Option<u32>, backup_dir: Option<PathBuf>) -> Result<()> {
    let target = expand_home(target);
    let backup_dir = backup_dir.map(|d| expand_home(&d));
    let report = restore(&target, number, backup_dir.as_deref())
        .with_context(|| format!("restore of {} failed", target.display()))?;

    println!(
        "{} {} from {}",
        "Restored".green(),
        target.display(),
        report.restored_from.display()
    );
    if let Some(safety) = &report.safety_backup {
        println!("  previous content saved to {}", safety.display());
    }

    Ok(())
}

fn format_age(modified: SystemTime) -> String {
    let Ok(elapsed) = SystemTime::now().duration_since(modified) else {
        return "just now".to_string();
    };
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
