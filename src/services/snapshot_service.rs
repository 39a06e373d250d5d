use std::collections::HashSet;
use std::fs::Metadata;
use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::AppError;
use crate::models::entry::{
    extension_of, name_key, AgeBucket, Entry, EntryKind, FolderContext, SizeBucket,
    MAX_SAMPLE_CONTENTS,
};

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn not_accessible(path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::NotAccessible(format!("{}: {err}", path.display()))
}

fn age_bucket(metadata: &Metadata, now: DateTime<Utc>) -> AgeBucket {
    let modified = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or(now);
    AgeBucket::from_age_days((now - modified).num_days())
}

fn file_entry(name: String, metadata: &Metadata, now: DateTime<Utc>) -> Entry {
    Entry {
        extension: extension_of(&name),
        name,
        kind: EntryKind::File,
        size_bucket: SizeBucket::from_bytes(metadata.len()),
        age_bucket: age_bucket(metadata, now),
        folder: None,
    }
}

/// Lists the direct children of `path`. Any failure to enumerate the target
/// aborts the whole snapshot.
pub fn snapshot(path: &Path) -> Result<Vec<Entry>, AppError> {
    snapshot_at(path, Utc::now())
}

pub fn snapshot_at(path: &Path, now: DateTime<Utc>) -> Result<Vec<Entry>, AppError> {
    let metadata = std::fs::metadata(path).map_err(|e| not_accessible(path, e))?;
    if !metadata.is_dir() {
        return Err(not_accessible(path, "not a directory"));
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let item = item.map_err(|e| not_accessible(path, e))?;
        let Some(name) = item.file_name().to_str().map(str::to_string) else {
            tracing::warn!(
                path = %item.path().display(),
                "skipping entry with a non UTF-8 name"
            );
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        let metadata = item.metadata().map_err(|e| not_accessible(item.path(), e))?;

        if item.file_type().is_dir() {
            let context = folder_context(item.path(), now);
            let total_bytes = sampled_bytes(item.path());
            entries.push(Entry {
                extension: String::new(),
                name,
                kind: EntryKind::Folder,
                size_bucket: SizeBucket::from_bytes(total_bytes),
                age_bucket: age_bucket(&metadata, now),
                folder: Some(context),
            });
        } else {
            entries.push(file_entry(name, &metadata, now));
        }
    }

    tracing::debug!(path = %path.display(), entries = entries.len(), "snapshot taken");
    Ok(entries)
}

/// Splits off entries whose names differ from an earlier entry only by case.
/// The first name in listing order is organized; the others are returned by
/// name and stay where they are.
pub fn partition_case_duplicates(entries: Vec<Entry>) -> (Vec<Entry>, Vec<String>) {
    let mut keys = HashSet::new();
    let mut kept = Vec::with_capacity(entries.len());
    let mut left_in_place = Vec::new();
    for entry in entries {
        if keys.insert(name_key(&entry.name)) {
            kept.push(entry);
        } else {
            tracing::warn!(
                item = %entry.name,
                "name differs from another entry only by case, leaving it in place"
            );
            left_in_place.push(entry.name);
        }
    }
    (kept, left_in_place)
}

/// One level of metadata for a subfolder. An unreadable subfolder yields an
/// empty, `readable: false` context instead of failing the snapshot.
fn folder_context(dir: &Path, now: DateTime<Utc>) -> FolderContext {
    let mut context = FolderContext {
        readable: true,
        ..FolderContext::default()
    };

    for child in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let child = match child {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(folder = %dir.display(), error = %err, "could not sample folder");
                return FolderContext {
                    readable: false,
                    ..FolderContext::default()
                };
            }
        };
        let Some(name) = child.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        if child.file_type().is_dir() {
            context.folder_count += 1;
            continue;
        }
        context.file_count += 1;
        if context.sample_contents.len() < MAX_SAMPLE_CONTENTS {
            if let Ok(metadata) = child.metadata() {
                context.sample_contents.push(file_entry(name, &metadata, now));
            }
        }
    }

    context.is_empty = context.file_count == 0 && context.folder_count == 0;
    context
}

fn sampled_bytes(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|child| child.file_type().is_file())
        .filter_map(|child| child.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
