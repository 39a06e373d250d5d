use crate::error::AppError;
use std::fs;
use std::path::Path;

/// Relocates a single top-level entry. Apply and undo both go through this
/// seam so tests can inject failures.
pub trait EntryMover: Send + Sync {
    /// Moves `source` to `destination`, refusing to replace anything there.
    fn move_entry(&self, source: &Path, destination: &Path) -> Result<(), AppError>;

    /// Moves `source` to `destination`, replacing whatever is there.
    fn move_entry_replacing(&self, source: &Path, destination: &Path) -> Result<(), AppError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsMover;

fn move_failure(path: &Path, reason: impl std::fmt::Display) -> AppError {
    AppError::MoveFailure {
        name: display_name(path),
        reason: reason.to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

impl EntryMover for FsMover {
    fn move_entry(&self, source: &Path, destination: &Path) -> Result<(), AppError> {
        if fs::symlink_metadata(source).is_err() {
            return Err(move_failure(source, "source does not exist"));
        }
        if fs::symlink_metadata(destination).is_ok() {
            return Err(move_failure(
                source,
                format!("destination already exists: {}", destination.display()),
            ));
        }
        fs::rename(source, destination).map_err(|e| move_failure(source, e))
    }

    fn move_entry_replacing(&self, source: &Path, destination: &Path) -> Result<(), AppError> {
        if fs::symlink_metadata(source).is_err() {
            return Err(move_failure(source, "source does not exist"));
        }
        if let Ok(existing) = fs::symlink_metadata(destination) {
            let removed = if existing.is_dir() {
                fs::remove_dir_all(destination)
            } else {
                fs::remove_file(destination)
            };
            removed.map_err(|e| move_failure(source, format!("could not replace destination: {e}")))?;
        }
        fs::rename(source, destination).map_err(|e| move_failure(source, e))
    }
}

/// Reason text for a report line, without repeating the entry name.
pub fn failure_reason(err: &AppError) -> String {
    match err {
        AppError::MoveFailure { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

pub fn create_dir(path: &Path) -> Result<(), AppError> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Removes `path` only when it is an empty directory. Returns whether it was
/// removed.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool, AppError> {
    if !path.is_dir() {
        return Ok(false);
    }
    if fs::read_dir(path)?.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path)?;
    Ok(true)
}

/// Writes `contents` to `path` through a sibling temp file and a rename, so
/// readers never see a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::General(format!("invalid file path: {}", path.display())))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);

    fs::write(&temp, contents)?;
    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}
