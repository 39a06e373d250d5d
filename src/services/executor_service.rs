use std::path::Path;

use crate::error::AppError;
use crate::models::entry::Entry;
use crate::models::grouping::MasterGrouping;
use crate::models::report::{ApplyReport, FailedMove};
use crate::models::undo_record::UndoRecord;
use crate::scope_path::child_path;
use crate::services::file_service::{self, failure_reason, EntryMover};
use crate::services::undo_service;
use crate::shell::safety::validate_target_dir;

/// Materializes `grouping` under `target`. The undo record is persisted
/// before the first folder is created; a failed individual move is
/// reported and never stops the run.
pub fn apply(
    target: &Path,
    entries: &[Entry],
    grouping: &MasterGrouping,
    mover: &dyn EntryMover,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<ApplyReport, AppError> {
    validate_target_dir(&target.to_string_lossy())?;

    let record = UndoRecord::new(&target.to_string_lossy(), entries, grouping);
    undo_service::write_record(target, &record)?;
    tracing::info!(
        run_id = %record.run_id,
        groups = grouping.groups.len(),
        "undo record written"
    );

    let mut report = ApplyReport {
        run_id: record.run_id,
        total: grouping.item_count(),
        ..ApplyReport::default()
    };
    let mut processed = 0;

    for group in &grouping.groups {
        let folder = match child_path(target, &group.name)
            .and_then(|folder| file_service::create_dir(&folder).map(|_| folder))
        {
            Ok(folder) => folder,
            Err(err) => {
                tracing::warn!(group = %group.name, error = %err, "could not create group folder");
                for item in &group.items {
                    report.failures.push(FailedMove {
                        name: item.clone(),
                        group: group.name.clone(),
                        reason: format!("group folder unavailable: {}", failure_reason(&err)),
                    });
                    processed += 1;
                    on_progress(processed, report.total);
                }
                continue;
            }
        };
        report.groups_created += 1;

        for item in &group.items {
            processed += 1;
            let outcome = child_path(target, item).and_then(|source| {
                if std::fs::symlink_metadata(&source).is_err() {
                    return Ok(false);
                }
                mover.move_entry(&source, &folder.join(item)).map(|_| true)
            });
            match outcome {
                Ok(true) => report.moved += 1,
                Ok(false) => {
                    tracing::debug!(item = %item, "source no longer present, skipping");
                    report.skipped.push(item.clone());
                }
                Err(err) => {
                    tracing::warn!(item = %item, group = %group.name, error = %err, "move failed");
                    report.failures.push(FailedMove {
                        name: item.clone(),
                        group: group.name.clone(),
                        reason: failure_reason(&err),
                    });
                }
            }
            on_progress(processed, report.total);
        }
    }

    tracing::info!(
        moved = report.moved,
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "organization applied"
    );
    Ok(report)
}
