use serde::{Deserialize, Serialize};

pub const SMALL_FILE_MAX_BYTES: u64 = 1024 * 1024;
pub const MEDIUM_FILE_MAX_BYTES: u64 = 100 * 1024 * 1024;
pub const RECENT_MAX_AGE_DAYS: i64 = 30;
pub const MAX_SAMPLE_CONTENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
}

impl SizeBucket {
    pub fn from_bytes(bytes: u64) -> Self {
        if bytes < SMALL_FILE_MAX_BYTES {
            Self::Small
        } else if bytes < MEDIUM_FILE_MAX_BYTES {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeBucket {
    Recent,
    Old,
}

impl AgeBucket {
    pub fn from_age_days(days: i64) -> Self {
        if days <= RECENT_MAX_AGE_DAYS {
            Self::Recent
        } else {
            Self::Old
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Old => "old",
        }
    }
}

/// One-level look inside a top-level folder. Context for the classifier only;
/// nothing in here is ever moved on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderContext {
    pub file_count: usize,
    pub folder_count: usize,
    pub is_empty: bool,
    pub readable: bool,
    pub sample_contents: Vec<Entry>,
}

/// A top-level file or folder of the target directory. `name` is the only
/// identity the pipeline tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub extension: String,
    pub size_bucket: SizeBucket,
    pub age_bucket: AgeBucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderContext>,
}

impl Entry {
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn sample_contents(&self) -> &[Entry] {
        self.folder
            .as_ref()
            .map(|ctx| ctx.sample_contents.as_slice())
            .unwrap_or(&[])
    }
}

/// Lowercased key used to match classifier output against snapshot names.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_buckets_follow_thresholds() {
        assert_eq!(SizeBucket::from_bytes(0), SizeBucket::Small);
        assert_eq!(SizeBucket::from_bytes(SMALL_FILE_MAX_BYTES), SizeBucket::Medium);
        assert_eq!(SizeBucket::from_bytes(MEDIUM_FILE_MAX_BYTES - 1), SizeBucket::Medium);
        assert_eq!(SizeBucket::from_bytes(MEDIUM_FILE_MAX_BYTES), SizeBucket::Large);
    }

    #[test]
    fn age_buckets_split_at_thirty_days() {
        assert_eq!(AgeBucket::from_age_days(0), AgeBucket::Recent);
        assert_eq!(AgeBucket::from_age_days(30), AgeBucket::Recent);
        assert_eq!(AgeBucket::from_age_days(31), AgeBucket::Old);
    }

    #[test]
    fn extension_is_lowercased_and_optional() {
        assert_eq!(extension_of("Report.PDF"), "pdf");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
    }
}
