use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::AppError;
use crate::models::batch::Conflict;
use crate::models::entry::{name_key, Entry};
use crate::models::grouping::{Group, GroupedItems};
use crate::shell::safety::sanitize_group_name;

/// Below this size a payload only has to be structurally balanced.
pub const SHORT_PAYLOAD_CHARS: usize = 100;
const GROUP_FIELD_MARKERS: &[&str] = &["\"folderName\"", "\"groupName\""];
const ITEMS_FIELD_MARKER: &str = "\"items\"";

/// Names the classifier is allowed to reference, matched exactly first and
/// case-insensitively second.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    exact: HashSet<String>,
    folded: HashMap<String, String>,
}

impl NameIndex {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for name in names {
            let name = name.into();
            index.folded.entry(name_key(&name)).or_insert_with(|| name.clone());
            index.exact.insert(name);
        }
        index
    }

    pub fn from_entries(entries: &[Entry]) -> Self {
        Self::from_names(entries.iter().map(|e| e.name.clone()))
    }

    pub fn resolve(&self, raw: &str) -> Option<String> {
        if self.exact.contains(raw) {
            return Some(raw.to_string());
        }
        self.folded.get(&name_key(raw)).cloned()
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Structural scanning
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Scan {
    depth_left: usize,
    mismatched: bool,
    open_string: bool,
    /// Byte offset just past the last value completed at depth 1.
    last_complete: Option<usize>,
    /// Byte offset of the last separator at depth 1.
    last_separator: Option<usize>,
    /// Byte offset of the close matching the first opener.
    outer_close: Option<usize>,
}

fn scan(text: &str) -> Scan {
    let mut result = Scan::default();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if stack.len() == 1 {
                    result.last_complete = Some(i + 1);
                }
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => stack.push(c),
            ']' | '}' => {
                let expected = if c == ']' { '[' } else { '{' };
                if stack.pop() != Some(expected) {
                    result.mismatched = true;
                    break;
                }
                match stack.len() {
                    0 => {
                        result.outer_close = Some(i);
                        break;
                    }
                    1 => result.last_complete = Some(i + 1),
                    _ => {}
                }
            }
            ',' if stack.len() == 1 => result.last_separator = Some(i),
            _ => {}
        }
    }

    result.depth_left = stack.len();
    result.open_string = in_string;
    result
}

fn fenced_region(text: &str) -> &str {
    let (start, fence_len) = match (text.find("```json"), text.find("```")) {
        (Some(json), _) => (json, "```json".len()),
        (None, Some(plain)) => (plain, 3),
        _ => return text,
    };
    let rest = &text[start + fence_len..];
    let body = match rest.find('\n') {
        Some(newline) if fence_len == 3 => &rest[newline + 1..],
        _ => rest,
    };
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

fn is_object_array(candidate: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(serde_json::Value::Array(items)) => items.first().map_or(true, |v| v.is_object()),
        _ => false,
    }
}

/// Finds the JSON array inside a classifier reply, tolerating prose and
/// code fences around it. Returns the first well-formed array of objects,
/// or everything from an opener that never closes so truncation can be
/// judged on it.
pub fn extract_json_array(text: &str) -> Option<String> {
    let region = fenced_region(text.trim());
    let mut offset = 0;

    while let Some(pos) = region[offset..].find('[') {
        let start = offset + pos;
        let tail = &region[start..];
        let scanned = scan(tail);
        match scanned.outer_close {
            Some(end) if !scanned.mismatched => {
                let candidate = &tail[..=end];
                if is_object_array(candidate) {
                    return Some(candidate.to_string());
                }
                offset = start + 1;
            }
            _ if scanned.mismatched => offset = start + 1,
            _ => return Some(tail.trim_end().to_string()),
        }
    }

    let start = region.find('{')?;
    let tail = &region[start..];
    let scanned = scan(tail);
    match scanned.outer_close {
        Some(end) => Some(tail[..=end].to_string()),
        None => Some(tail.trim_end().to_string()),
    }
}

/// Structural truncation check: unbalanced brackets or braces, an
/// unterminated string, or an opener whose payload ends without its closer.
pub fn looks_truncated(payload: &str) -> bool {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return true;
    }
    let scanned = scan(trimmed);
    if scanned.mismatched || scanned.open_string || scanned.depth_left > 0 {
        return true;
    }
    if trimmed.chars().count() < SHORT_PAYLOAD_CHARS {
        return false;
    }
    match trimmed.chars().next() {
        Some('[') => !trimmed.ends_with(']'),
        Some('{') => !trimmed.ends_with('}'),
        _ => false,
    }
}

/// Cuts an unclosed payload back to its last complete element and closes
/// it. The result still has to pass validation.
pub fn repair_truncated(payload: &str) -> Option<String> {
    let trimmed = payload.trim();
    let closer = match trimmed.chars().next()? {
        '[' => ']',
        '{' => '}',
        _ => return None,
    };
    let scanned = scan(trimmed);
    if scanned.mismatched || scanned.outer_close.is_some() {
        return None;
    }
    let cut = match (scanned.last_complete, scanned.last_separator) {
        (Some(done), Some(sep)) => done.max(sep),
        (Some(done), None) => done,
        (None, Some(sep)) => sep,
        (None, None) => return None,
    };
    let kept = trimmed[..cut].trim_end().trim_end_matches(',').trim_end();
    if kept.len() <= 1 {
        return None;
    }
    Some(format!("{kept}{closer}"))
}

fn has_field_markers(payload: &str) -> bool {
    GROUP_FIELD_MARKERS.iter().any(|m| payload.contains(m)) && payload.contains(ITEMS_FIELD_MARKER)
}

// ---------------------------------------------------------------------------
// Parsing and filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(rename = "folderName", alias = "groupName")]
    folder_name: String,
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItem {
    Name(String),
    Object { name: String },
}

impl RawItem {
    fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Object { name } => name,
        }
    }
}

/// Converts a raw classifier reply into a grouping that only references
/// names from `known`. Truncated or malformed replies are rejected whole.
pub fn reconcile(raw: &str, known: &NameIndex) -> Result<GroupedItems, AppError> {
    let payload = extract_json_array(raw)
        .ok_or_else(|| AppError::InvalidStructure("no JSON array in response".to_string()))?;

    let payload = if looks_truncated(&payload) {
        let repaired = repair_truncated(&payload).ok_or_else(|| {
            AppError::Truncated("response ends mid-structure and could not be repaired".to_string())
        })?;
        if looks_truncated(&repaired) {
            return Err(AppError::Truncated("repair left an unbalanced payload".to_string()));
        }
        tracing::warn!(
            original_chars = payload.len(),
            repaired_chars = repaired.len(),
            "repaired truncated classifier payload"
        );
        repaired
    } else {
        payload
    };

    if !has_field_markers(&payload) {
        return Err(AppError::InvalidStructure(
            "response lacks folderName/items fields".to_string(),
        ));
    }

    let payload = if payload.starts_with('{') {
        format!("[{payload}]")
    } else {
        payload
    };
    let raw_groups: Vec<RawGroup> = serde_json::from_str(&payload)
        .map_err(|e| AppError::InvalidStructure(format!("unparseable grouping: {e}")))?;

    Ok(filter_groups(raw_groups, known))
}

fn filter_groups(raw_groups: Vec<RawGroup>, known: &NameIndex) -> GroupedItems {
    let mut groups: Vec<Group> = Vec::new();

    for raw in raw_groups {
        let Some(name) = sanitize_group_name(&raw.folder_name) else {
            tracing::warn!(
                folder = %raw.folder_name,
                items = raw.items.len(),
                "dropping group with unusable name"
            );
            continue;
        };

        let position = match groups.iter().position(|g| g.is_named(&name)) {
            Some(position) => position,
            None => {
                groups.push(Group::new(name));
                groups.len() - 1
            }
        };

        for item in &raw.items {
            match known.resolve(item.name().trim()) {
                Some(canonical) => {
                    groups[position].push_item(canonical);
                }
                None => tracing::warn!(
                    item = %item.name(),
                    group = %groups[position].name,
                    "dropping item not present in snapshot"
                ),
            }
        }
    }

    groups.retain(|g| {
        if g.items.is_empty() {
            tracing::debug!(group = %g.name, "dropping group left empty after filtering");
        }
        !g.items.is_empty()
    });
    GroupedItems::new(groups)
}

fn extract_json_object(text: &str) -> Option<String> {
    let region = fenced_region(text.trim());
    let start = region.find('{')?;
    let tail = &region[start..];
    let scanned = scan(tail);
    match scanned.outer_close {
        Some(end) if !scanned.mismatched => Some(tail[..=end].to_string()),
        _ => None,
    }
}

/// Parses a conflict reply (`{"entry": "group"}`) and keeps only choices
/// that name one of the entry's candidate groups. Keys are lowercased
/// entry names; values are canonical candidate group names.
pub fn reconcile_conflict_choices(
    raw: &str,
    conflicts: &[Conflict],
) -> Result<HashMap<String, String>, AppError> {
    let payload = extract_json_object(raw).ok_or_else(|| {
        AppError::InvalidStructure("no complete JSON object in conflict response".to_string())
    })?;
    let parsed: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&payload)
        .map_err(|e| AppError::InvalidStructure(format!("unparseable conflict mapping: {e}")))?;

    let by_key: HashMap<String, &Conflict> = conflicts
        .iter()
        .map(|c| (name_key(&c.entry_name), c))
        .collect();

    let mut choices = HashMap::new();
    for (entry_name, value) in parsed {
        let key = name_key(&entry_name);
        let Some(conflict) = by_key.get(&key) else {
            tracing::warn!(item = %entry_name, "conflict reply names an unknown item");
            continue;
        };
        let Some(chosen) = value.as_str() else {
            continue;
        };
        let chosen_key = name_key(chosen);
        match conflict
            .candidate_groups
            .iter()
            .find(|candidate| name_key(candidate) == chosen_key)
        {
            Some(candidate) => {
                choices.insert(key, candidate.clone());
            }
            None => tracing::warn!(
                item = %entry_name,
                chosen = %chosen,
                "conflict reply chose a group outside the candidates"
            ),
        }
    }
    Ok(choices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(names: &[&str]) -> NameIndex {
        NameIndex::from_names(names.iter().copied())
    }

    #[test]
    fn extract_handles_code_fence_and_prose() {
        let text = "Sure! Here you go:\n```json\n[{\"folderName\":\"Docs\",\"items\":[{\"name\":\"a.txt\"}]}]\n```\nLet me know.";
        assert_eq!(
            extract_json_array(text).unwrap(),
            "[{\"folderName\":\"Docs\",\"items\":[{\"name\":\"a.txt\"}]}]"
        );

        let prose = "I grouped [3] folders: [{\"folderName\":\"A\",\"items\":[\"x\"]}] done";
        assert_eq!(
            extract_json_array(prose).unwrap(),
            "[{\"folderName\":\"A\",\"items\":[\"x\"]}]"
        );
    }

    #[test]
    fn extract_returns_unclosed_tail_for_truncation_checks() {
        let text = "[{\"folderName\":\"Docs\",\"items\":[{\"name\":\"a.txt\"}";
        assert_eq!(extract_json_array(text).unwrap(), text);
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_scanning() {
        let text = r#"[{"folderName":"Misc [old]","items":[{"name":"notes ]{.txt"}]}]"#;
        assert_eq!(extract_json_array(text).unwrap(), text);
        assert!(!looks_truncated(text));
    }

    #[test]
    fn truncation_detection_flags_unbalanced_payloads() {
        assert!(looks_truncated("[{\"folderName\":\"Docs\",\"items\":[{\"name\":\"a.txt\"}"));
        assert!(looks_truncated("[{\"folderName\":\"Do"));
        assert!(!looks_truncated("[]"));
        assert!(!looks_truncated("[{\"folderName\":\"A\",\"items\":[\"x\"]}]"));

        let long_tail = format!("[{}]garbage", "{\"folderName\":\"A\",\"items\":[\"x\"]},".repeat(5));
        assert!(looks_truncated(&long_tail));
    }

    #[test]
    fn repair_keeps_complete_groups_only() {
        let payload = "[{\"folderName\":\"A\",\"items\":[\"x\"]},{\"folderName\":\"B\",\"items\":[\"y\"";
        let repaired = repair_truncated(payload).unwrap();
        assert_eq!(repaired, "[{\"folderName\":\"A\",\"items\":[\"x\"]}]");
        assert!(repair_truncated("[{\"folderName\":\"Docs\",\"items\":[{\"name\":\"a.txt\"}").is_none());
        assert!(repair_truncated("[{\"a\":1}]").is_none());
    }

    #[test]
    fn reconcile_rejects_reply_ending_mid_object() {
        let raw = r#"[{"folderName":"Docs","items":[{"name":"a.txt"}"#;
        let result = reconcile(raw, &index(&["a.txt"]));
        assert!(matches!(result, Err(AppError::Truncated(_))));
    }

    #[test]
    fn reconcile_uses_repaired_prefix_when_possible() {
        let raw = r#"[{"folderName":"Docs","items":[{"name":"a.txt"}]},{"folderName":"Img","items":[{"name":"b.j"#;
        let grouped = reconcile(raw, &index(&["a.txt", "b.jpg"])).unwrap();
        assert_eq!(grouped.groups, vec![Group::with_items("Docs", ["a.txt"])]);
    }

    #[test]
    fn reconcile_requires_field_markers() {
        let raw = r#"[{"category":"Docs","files":["a.txt"]}]"#;
        assert!(matches!(
            reconcile(raw, &index(&["a.txt"])),
            Err(AppError::InvalidStructure(_))
        ));
        assert!(matches!(
            reconcile("no json here", &index(&["a.txt"])),
            Err(AppError::InvalidStructure(_))
        ));
        assert!(matches!(
            reconcile(r#"[{"folderName": 5, "items": "x"}]"#, &index(&["a.txt"])),
            Err(AppError::InvalidStructure(_))
        ));
    }

    #[test]
    fn reconcile_drops_hallucinations_and_empty_groups() {
        let raw = r#"[
            {"folderName":"Images","items":[{"name":"a.jpg"},{"name":"ghost.png"},"A.JPG"]},
            {"folderName":"Ghosts","items":[{"name":"nope.txt"}]},
            {"folderName":"docs","items":["B.TXT"]},
            {"folderName":"Docs","items":["c.md"]}
        ]"#;
        let grouped = reconcile(raw, &index(&["a.jpg", "b.txt", "c.md"])).unwrap();
        assert_eq!(
            grouped.groups,
            vec![
                Group::with_items("Images", ["a.jpg"]),
                Group::with_items("docs", ["b.txt", "c.md"]),
            ]
        );
    }

    #[test]
    fn reconcile_accepts_single_group_object() {
        let raw = r#"{"folderName":"Docs","items":["a.txt"]}"#;
        let grouped = reconcile(raw, &index(&["a.txt"])).unwrap();
        assert_eq!(grouped.item_count(), 1);
    }

    #[test]
    fn conflict_choices_keep_only_valid_candidates() {
        let conflicts = vec![
            Conflict {
                entry_name: "a.jpg".into(),
                candidate_groups: vec!["Images".into(), "Media".into()],
            },
            Conflict {
                entry_name: "b.mp3".into(),
                candidate_groups: vec!["Audio".into(), "Media".into()],
            },
        ];
        let raw = "```json\n{\"A.jpg\": \"media\", \"b.mp3\": \"Podcasts\", \"zzz\": \"Audio\"}\n```";
        let choices = reconcile_conflict_choices(raw, &conflicts).unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices.get("a.jpg").map(String::as_str), Some("Media"));

        assert!(reconcile_conflict_choices("{\"a.jpg\": \"Im", &conflicts).is_err());
    }
}
