use crate::error::AppError;

pub const MAX_GROUP_NAME_CHARS: usize = 50;

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const PROTECTED_ROOTS: &[&str] = &[
    "/",
    "/Applications",
    "/bin",
    "/sbin",
    "/usr",
    "/System",
    "/Library",
    "/etc",
    "/boot",
    "/proc",
    "/dev",
    "C:\\",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

/// Only the root itself is refused for `/` and `C:\`; the other roots are
/// refused together with everything beneath them.
const EXACT_ONLY_ROOTS: &[&str] = &["/", "C:/"];

pub fn is_protected_path(path: &str) -> bool {
    let normalized = normalize_path_for_match(path);
    PROTECTED_ROOTS.iter().any(|root| {
        let root_normalized = normalize_path_for_match(root);
        let exact_only = EXACT_ONLY_ROOTS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&root_normalized));
        if is_windows_style_path(&root_normalized) {
            let normalized_lower = normalized.to_ascii_lowercase();
            let root_lower = root_normalized.to_ascii_lowercase();
            normalized_lower == root_lower
                || (!exact_only && normalized_lower.starts_with(&format!("{root_lower}/")))
        } else {
            normalized == root_normalized
                || (!exact_only && normalized.starts_with(&format!("{root_normalized}/")))
        }
    })
}

fn normalize_path_for_match(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 && !normalized.ends_with(":/") {
        normalized.pop();
    }
    normalized
}

fn is_windows_style_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

pub fn validate_target_dir(path: &str) -> Result<(), AppError> {
    if path.trim().is_empty() {
        return Err(AppError::NotAccessible("path is empty".to_string()));
    }
    if is_protected_path(path) {
        return Err(AppError::NotAccessible(format!(
            "refusing to organize protected path: {path}"
        )));
    }
    Ok(())
}

/// Turns a classifier-proposed group name into a usable folder name, or
/// `None` when nothing usable is left.
pub fn sanitize_group_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if FORBIDDEN_NAME_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }
    let capped: String = trimmed.chars().take(MAX_GROUP_NAME_CHARS).collect();
    let capped = capped.trim_end().to_string();
    if capped.is_empty() || capped == "." || capped == ".." {
        return None;
    }
    Some(capped)
}
