use serde::{Deserialize, Serialize};

use super::entry::{Entry, EntryKind};
use super::grouping::MasterGrouping;

pub const UNDO_RECORD_FILE: &str = ".tidyai";
pub const UNDO_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureItem {
    pub name: String,
    pub kind: EntryKind,
}

impl From<&Entry> for StructureItem {
    fn from(entry: &Entry) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind,
        }
    }
}

/// Point-in-time description of a directory before organization, persisted
/// as `.tidyai` at the directory root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub format_version: u32,
    pub run_id: String,
    pub timestamp: String,
    pub target_path: String,
    pub original_structure: Vec<StructureItem>,
    pub new_structure: MasterGrouping,
}

impl UndoRecord {
    pub fn new(target_path: &str, entries: &[Entry], grouping: &MasterGrouping) -> Self {
        Self {
            format_version: UNDO_FORMAT_VERSION,
            run_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            target_path: target_path.to_string(),
            original_structure: entries.iter().map(StructureItem::from).collect(),
            new_structure: grouping.clone(),
        }
    }

    pub fn group_names(&self) -> Vec<String> {
        self.new_structure.group_names()
    }
}
