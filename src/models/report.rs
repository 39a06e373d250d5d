use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMove {
    pub name: String,
    pub group: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub run_id: String,
    pub total: usize,
    pub moved: usize,
    /// Items whose source had already disappeared.
    pub skipped: Vec<String>,
    pub failures: Vec<FailedMove>,
    pub groups_created: usize,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub run_id: String,
    pub total: usize,
    pub restored: usize,
    pub failures: Vec<FailedMove>,
    pub folders_removed: usize,
    /// Group folders named by the record that were no longer present.
    pub missing_groups: Vec<String>,
    /// Names from the original structure still absent from the root after
    /// the restore.
    pub unrestored: Vec<String>,
    pub record_removed: bool,
}

impl RestoreReport {
    /// A restore is clean only when the root holds every original entry again.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.missing_groups.is_empty() && self.unrestored.is_empty()
    }
}
