use std::path::{Component, Path, PathBuf};

use crate::error::AppError;

pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

pub fn is_within_scope(path: &Path, root: &Path) -> bool {
    let path = normalize(&path.to_string_lossy());
    let root = normalize(&root.to_string_lossy());

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

/// Joins a single top-level name onto `root`, refusing anything that would
/// address a path outside it.
pub fn child_path(root: &Path, name: &str) -> Result<PathBuf, AppError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(AppError::General(format!(
                "not a top-level entry name: {name:?}"
            )))
        }
    }
    let joined = root.join(name);
    if !is_within_scope(&joined, root) {
        return Err(AppError::General(format!(
            "path escapes target directory: {}",
            joined.display()
        )));
    }
    Ok(joined)
}
