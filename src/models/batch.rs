use super::entry::Entry;

/// Bounded slice of the snapshot sent to the classifier in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,
    pub entries: Vec<Entry>,
    pub existing_groups: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entry assigned to two or more groups after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub entry_name: String,
    pub candidate_groups: Vec<String>,
}
