use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::report::{FailedMove, RestoreReport};
use crate::models::undo_record::{UndoRecord, UNDO_FORMAT_VERSION, UNDO_RECORD_FILE};
use crate::scope_path::{child_path, is_within_scope};
use crate::services::file_service::{self, failure_reason, EntryMover};
use crate::shell::safety::validate_target_dir;

#[derive(Debug, Clone, PartialEq)]
pub enum UndoState {
    NoRecord,
    RecordPresent(UndoRecord),
}

pub fn record_path(target: &Path) -> PathBuf {
    target.join(UNDO_RECORD_FILE)
}

/// The record file's presence is the only signal of a prior run.
pub fn detect(target: &Path) -> Result<UndoState, AppError> {
    if fs::symlink_metadata(record_path(target)).is_err() {
        return Ok(UndoState::NoRecord);
    }
    read_record(target).map(UndoState::RecordPresent)
}

pub fn write_record(target: &Path, record: &UndoRecord) -> Result<(), AppError> {
    let json = serde_json::to_vec_pretty(record)?;
    file_service::write_atomic(&record_path(target), &json)
}

pub fn read_record(target: &Path) -> Result<UndoRecord, AppError> {
    let path = record_path(target);
    let raw = fs::read_to_string(&path)?;
    let record: UndoRecord = serde_json::from_str(&raw)
        .map_err(|e| AppError::InvalidRecord(format!("{}: {e}", path.display())))?;
    if record.format_version > UNDO_FORMAT_VERSION {
        return Err(AppError::InvalidRecord(format!(
            "format version {} is newer than supported version {UNDO_FORMAT_VERSION}",
            record.format_version
        )));
    }
    Ok(record)
}

pub fn discard(target: &Path) -> Result<(), AppError> {
    match fs::remove_file(record_path(target)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

struct PendingRestore {
    group: String,
    source: PathBuf,
    name: String,
}

fn collect_pending(
    target: &Path,
    record: &UndoRecord,
    report: &mut RestoreReport,
) -> (Vec<PathBuf>, Vec<PendingRestore>) {
    let mut folders = Vec::new();
    let mut pending = Vec::new();

    for group in record.group_names() {
        let folder = match child_path(target, &group) {
            Ok(folder) => folder,
            Err(err) => {
                tracing::warn!(group = %group, error = %err, "record names an unusable group folder");
                report.missing_groups.push(group);
                continue;
            }
        };
        let children = match fs::read_dir(&folder) {
            Ok(children) => children,
            Err(_) => {
                tracing::warn!(group = %group, "group folder not found, nothing to restore");
                report.missing_groups.push(group);
                continue;
            }
        };
        for child in children.flatten() {
            pending.push(PendingRestore {
                group: group.clone(),
                source: child.path(),
                name: child.file_name().to_string_lossy().to_string(),
            });
        }
        folders.push(folder);
    }
    (folders, pending)
}

fn unrestored_names(target: &Path, record: &UndoRecord) -> Vec<String> {
    record
        .original_structure
        .iter()
        .filter(|item| match child_path(target, &item.name) {
            Ok(path) => fs::symlink_metadata(path).is_err(),
            Err(_) => true,
        })
        .map(|item| item.name.clone())
        .collect()
}

/// Moves everything found in the record's group folders back to the target
/// root, replacing anything in the way, then removes emptied group folders.
/// The record is deleted only when every move succeeded, every group folder
/// was found and every original entry is back at the root.
pub fn restore(
    target: &Path,
    record: &UndoRecord,
    mover: &dyn EntryMover,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<RestoreReport, AppError> {
    validate_target_dir(&target.to_string_lossy())?;

    let mut report = RestoreReport {
        run_id: record.run_id.clone(),
        ..RestoreReport::default()
    };
    let (folders, pending) = collect_pending(target, record, &mut report);
    report.total = pending.len();

    for (done, item) in pending.iter().enumerate() {
        let destination = target.join(&item.name);
        let outcome = if is_within_scope(&destination, target) {
            mover.move_entry_replacing(&item.source, &destination)
        } else {
            Err(AppError::General(format!(
                "refusing to restore outside target: {}",
                destination.display()
            )))
        };
        match outcome {
            Ok(()) => report.restored += 1,
            Err(err) => {
                tracing::warn!(item = %item.name, group = %item.group, error = %err, "restore failed");
                report.failures.push(FailedMove {
                    name: item.name.clone(),
                    group: item.group.clone(),
                    reason: failure_reason(&err),
                });
            }
        }
        on_progress(done + 1, report.total);
    }

    for folder in &folders {
        match file_service::remove_dir_if_empty(folder) {
            Ok(true) => report.folders_removed += 1,
            Ok(false) => {
                tracing::debug!(folder = %folder.display(), "group folder not empty, leaving it")
            }
            Err(err) => {
                tracing::warn!(folder = %folder.display(), error = %err, "could not remove group folder")
            }
        }
    }

    report.unrestored = unrestored_names(target, record);
    for name in &report.unrestored {
        tracing::warn!(item = %name, "original entry is not back at the root");
    }

    if report.is_clean() {
        discard(target)?;
        report.record_removed = true;
    } else {
        tracing::warn!(
            failed = report.failures.len(),
            missing_groups = report.missing_groups.len(),
            unrestored = report.unrestored.len(),
            "keeping undo record so the restore can be retried"
        );
    }

    tracing::info!(
        restored = report.restored,
        failed = report.failures.len(),
        folders_removed = report.folders_removed,
        "undo finished"
    );
    Ok(report)
}
