//! Numbered, verified backups.
//!
//! For a target `F` the backups are `F.bak`, `F.bak2`, `F.bak3`, ... kept next
//! to `F` or in an explicit backup directory. Numbers only grow: a new backup
//! takes the highest existing number plus one, so a deleted backup never gets
//! its number reused by a later run.
//!
//! A backup is only returned after it has been read back and compared with
//! the bytes it was meant to hold.

use crate::edit::{atomic_write, EditError};
use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

const BACKUP_SUFFIX: &str = ".bak";

/// Upper bound on create_new collisions before giving up.
const MAX_CREATE_ATTEMPTS: u32 = 64;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write backup {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup {} does not match the source content", path.display())]
    VerificationFailed { path: PathBuf },

    #[error("no backups found for {}", .0.display())]
    NoBackups(PathBuf),

    #[error("backup #{number} of {} does not exist", path.display())]
    MissingNumber { path: PathBuf, number: u32 },

    #[error("failed to restore {}: {source}", path.display())]
    RestoreFailed {
        path: PathBuf,
        #[source]
        source: EditError,
    },
}

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    /// 1 for `F.bak`, N for `F.bakN`
    pub number: u32,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// What a restore did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored_from: PathBuf,
    /// Backup of the content that was overwritten, if the target existed
    pub safety_backup: Option<PathBuf>,
}

/// Back up `path` next to itself and return the backup path.
pub fn backup(path: &Path) -> Result<PathBuf, BackupError> {
    backup_into(path, None)
}

/// Back up `path` into `dir` (or next to it when `dir` is `None`).
pub fn backup_into(path: &Path, dir: Option<&Path>) -> Result<PathBuf, BackupError> {
    let content = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => BackupError::NotFound(path.to_path_buf()),
        _ => BackupError::Read {
            path: path.to_path_buf(),
            source,
        },
    })?;
    write_backup(path, &content, dir)
}

/// Persist `content` as the next numbered backup of `source`.
///
/// `content` is what the caller read from `source`; taking it as an argument
/// keeps the backup identical to the bytes a run is about to transform even
/// if the file changes underneath.
pub fn write_backup(
    source: &Path,
    content: &[u8],
    dir: Option<&Path>,
) -> Result<PathBuf, BackupError> {
    let backup_dir = backup_dir_for(source, dir);
    if !backup_dir.is_dir() {
        fs::create_dir_all(&backup_dir).map_err(|e| BackupError::WriteFailed {
            path: backup_dir.clone(),
            source: e,
        })?;
    }

    let file_name = source_file_name(source)?;
    let mut number = highest_number(&backup_dir, &file_name)?.map_or(1, |n| n + 1);

    let mut attempts = 0;
    let (path, mut file) = loop {
        let candidate = backup_dir.join(backup_name(&file_name, number));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => break (candidate, file),
            Err(e)
                if e.kind() == io::ErrorKind::AlreadyExists && attempts < MAX_CREATE_ATTEMPTS =>
            {
                attempts += 1;
                number += 1;
            }
            Err(e) => {
                return Err(BackupError::WriteFailed {
                    path: candidate,
                    source: e,
                })
            }
        }
    };

    let written = file
        .write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|source| BackupError::WriteFailed {
            path: path.clone(),
            source,
        });
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&path);
        return Err(e);
    }

    verify(&path, content)?;

    if let Ok(meta) = fs::metadata(source) {
        let mtime = FileTime::from_last_modification_time(&meta);
        if let Err(e) = filetime::set_file_mtime(&path, mtime) {
            tracing::debug!(backup = %path.display(), error = %e, "could not copy source mtime");
        }
    }

    tracing::info!(
        source = %source.display(),
        backup = %path.display(),
        bytes = content.len(),
        "backup written"
    );
    Ok(path)
}

fn verify(path: &Path, expected: &[u8]) -> Result<(), BackupError> {
    let actual = fs::read(path).map_err(|source| BackupError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    if actual.len() != expected.len() || xxh3_64(&actual) != xxh3_64(expected) {
        let _ = fs::remove_file(path);
        return Err(BackupError::VerificationFailed {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// List the backups of `source`, oldest number first.
pub fn list_backups(source: &Path, dir: Option<&Path>) -> Result<Vec<BackupFile>, BackupError> {
    let backup_dir = backup_dir_for(source, dir);
    let file_name = source_file_name(source)?;

    let entries = match fs::read_dir(&backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BackupError::Read {
                path: backup_dir,
                source,
            })
        }
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BackupError::Read {
            path: backup_dir.clone(),
            source,
        })?;
        let name = entry.file_name();
        let Some(number) = name.to_str().and_then(|n| parse_number(&file_name, n)) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        backups.push(BackupFile {
            path: entry.path(),
            number,
            len: meta.len(),
            modified: meta.modified().ok(),
        });
    }

    backups.sort_by_key(|b| b.number);
    Ok(backups)
}

/// Restore `source` from backup `number` (latest when `None`).
///
/// The content being overwritten is itself backed up first, so a restore
/// can be undone with another restore.
pub fn restore(
    source: &Path,
    number: Option<u32>,
    dir: Option<&Path>,
) -> Result<RestoreReport, BackupError> {
    let backups = list_backups(source, dir)?;
    let chosen = match number {
        Some(n) => backups
            .iter()
            .find(|b| b.number == n)
            .ok_or_else(|| BackupError::MissingNumber {
                path: source.to_path_buf(),
                number: n,
            })?,
        None => backups
            .last()
            .ok_or_else(|| BackupError::NoBackups(source.to_path_buf()))?,
    };

    let content = fs::read(&chosen.path).map_err(|e| BackupError::Read {
        path: chosen.path.clone(),
        source: e,
    })?;

    let safety_backup = if source.exists() {
        Some(backup_into(source, dir)?)
    } else {
        None
    };

    atomic_write(source, &content).map_err(|e| BackupError::RestoreFailed {
        path: source.to_path_buf(),
        source: e,
    })?;

    tracing::info!(
        file = %source.display(),
        from = %chosen.path.display(),
        "restored from backup"
    );

    Ok(RestoreReport {
        restored_from: chosen.path.clone(),
        safety_backup,
    })
}

fn backup_dir_for(source: &Path, dir: Option<&Path>) -> PathBuf {
    match dir {
        Some(dir) => dir.to_path_buf(),
        None => match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    }
}

fn source_file_name(source: &Path) -> Result<String, BackupError> {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BackupError::NotFound(source.to_path_buf()))
}

fn highest_number(dir: &Path, file_name: &str) -> Result<Option<u32>, BackupError> {
    let entries = fs::read_dir(dir).map_err(|source| BackupError::WriteFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str().and_then(|n| parse_number(file_name, n)))
        .max())
}

fn backup_name(file_name: &str, number: u32) -> String {
    if number <= 1 {
        format!("{file_name}{BACKUP_SUFFIX}")
    } else {
        format!("{file_name}{BACKUP_SUFFIX}{number}")
    }
}

/// `App.jsx.bak` → 1, `App.jsx.bak7` → 7. `.bak0`/`.bak1` are not ours.
fn parse_number(file_name: &str, candidate: &str) -> Option<u32> {
    let rest = candidate
        .strip_prefix(file_name)?
        .strip_prefix(BACKUP_SUFFIX)?;
    if rest.is_empty() {
        return Some(1);
    }
    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse::<u32>().ok().filter(|n| *n >= 2)
}
