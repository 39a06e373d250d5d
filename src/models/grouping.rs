use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::entry::name_key;

pub const UNORGANIZED_GROUP: &str = "Unorganized Files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "folderName")]
    pub name: String,
    pub items: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_items<I, S>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut group = Self::new(name);
        for item in items {
            group.push_item(item);
        }
        group
    }

    /// Items behave as a set: a repeated name is ignored.
    pub fn push_item(&mut self, item: impl Into<String>) -> bool {
        let item = item.into();
        let key = name_key(&item);
        if self.items.iter().any(|existing| name_key(existing) == key) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn is_named(&self, name: &str) -> bool {
        name_key(&self.name) == name_key(name)
    }
}

/// Grouping proposed for one batch, after reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupedItems {
    pub groups: Vec<Group>,
}

impl GroupedItems {
    pub fn new(groups: Vec<Group>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }
}

/// Accumulated grouping across every batch and pass of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MasterGrouping {
    pub groups: Vec<Group>,
}

impl MasterGrouping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.is_named(name))
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.is_named(name))
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    /// Lowercased keys of every item referenced by any group.
    pub fn assigned_keys(&self) -> HashSet<String> {
        self.groups
            .iter()
            .flat_map(|g| g.items.iter().map(|item| name_key(item)))
            .collect()
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn drop_empty_groups(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|g| !g.items.is_empty());
        before - self.groups.len()
    }
}
