use std::collections::{HashMap, HashSet};

use crate::error::AppError;
use crate::models::batch::Conflict;
use crate::models::entry::{name_key, Entry};
use crate::models::grouping::{Group, GroupedItems, MasterGrouping, UNORGANIZED_GROUP};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub new_groups: usize,
    pub items_added: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStats {
    pub resolved: usize,
    pub by_classifier: usize,
    pub by_fallback: usize,
    pub groups_removed: usize,
}

/// Appends each group of `batch` to `master`, concatenating items into a
/// same-named group when one exists. An item repeated across groups is
/// kept in both places; conflicts are settled later.
pub fn merge(master: &mut MasterGrouping, batch: GroupedItems) -> MergeStats {
    let mut stats = MergeStats::default();
    for group in batch.groups {
        match master.group_mut(&group.name) {
            Some(existing) => {
                for item in group.items {
                    if existing.push_item(item) {
                        stats.items_added += 1;
                    }
                }
            }
            None => {
                stats.new_groups += 1;
                stats.items_added += group.items.len();
                master.groups.push(group);
            }
        }
    }
    stats
}

/// Every item referenced by two or more groups, with its candidate groups
/// in first-encountered order.
pub fn find_conflicts(master: &MasterGrouping) -> Vec<Conflict> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, Conflict> = HashMap::new();

    for group in &master.groups {
        for item in &group.items {
            let key = name_key(item);
            let conflict = seen.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Conflict {
                    entry_name: item.clone(),
                    candidate_groups: Vec::new(),
                }
            });
            if !conflict
                .candidate_groups
                .iter()
                .any(|candidate| name_key(candidate) == name_key(&group.name))
            {
                conflict.candidate_groups.push(group.name.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| seen.remove(&key))
        .filter(|conflict| conflict.candidate_groups.len() > 1)
        .collect()
}

/// Leaves each conflicted item in exactly one group: the classifier's
/// choice when it made a valid one, otherwise the first candidate. Groups
/// emptied by the resolution are removed.
pub fn apply_resolutions(
    master: &mut MasterGrouping,
    conflicts: &[Conflict],
    choices: &HashMap<String, String>,
) -> ResolutionStats {
    let mut stats = ResolutionStats::default();

    for conflict in conflicts {
        let key = name_key(&conflict.entry_name);
        let chosen = match choices.get(&key) {
            Some(choice) => {
                stats.by_classifier += 1;
                choice.clone()
            }
            None => {
                let Some(first) = conflict.candidate_groups.first() else {
                    continue;
                };
                stats.by_fallback += 1;
                tracing::debug!(
                    item = %conflict.entry_name,
                    group = %first,
                    "conflict settled by first-encountered group"
                );
                first.clone()
            }
        };

        let mut kept = false;
        for group in &mut master.groups {
            let keep_here = !kept && group.is_named(&chosen);
            group.items.retain(|item| {
                if name_key(item) != key {
                    return true;
                }
                if keep_here && !kept {
                    kept = true;
                    return true;
                }
                false
            });
        }
        stats.resolved += 1;
    }

    stats.groups_removed = master.drop_empty_groups();
    stats
}

/// Snapshot entries no group references yet.
pub fn unassigned_entries(master: &MasterGrouping, entries: &[Entry]) -> Vec<Entry> {
    let assigned = master.assigned_keys();
    entries
        .iter()
        .filter(|entry| !assigned.contains(&name_key(&entry.name)))
        .cloned()
        .collect()
}

/// Places every still-unassigned entry into the catch-all group. Returns the
/// number of entries placed there.
pub fn assign_unorganized(master: &mut MasterGrouping, entries: &[Entry]) -> usize {
    let leftovers = unassigned_entries(master, entries);
    if leftovers.is_empty() {
        return 0;
    }
    tracing::warn!(
        count = leftovers.len(),
        "placing unclassified entries into {UNORGANIZED_GROUP}"
    );

    if master.group(UNORGANIZED_GROUP).is_none() {
        master.groups.push(Group::new(UNORGANIZED_GROUP));
    }
    let mut placed = 0;
    if let Some(group) = master.group_mut(UNORGANIZED_GROUP) {
        for entry in leftovers {
            if group.push_item(entry.name) {
                placed += 1;
            }
        }
    }
    placed
}

/// Renames groups whose folder would land on an existing top-level entry,
/// e.g. `Photos` becomes `Photos (2)`. Returns `(old, new)` pairs.
pub fn resolve_name_collisions(
    master: &mut MasterGrouping,
    entries: &[Entry],
) -> Vec<(String, String)> {
    let mut taken: HashSet<String> = entries.iter().map(|e| name_key(&e.name)).collect();
    taken.extend(master.groups.iter().map(|g| name_key(&g.name)));

    let mut renamed = Vec::new();
    for index in 0..master.groups.len() {
        let current = master.groups[index].name.clone();
        if !entries.iter().any(|e| name_key(&e.name) == name_key(&current)) {
            continue;
        }
        let mut suffix = 2;
        let replacement = loop {
            let candidate = format!("{current} ({suffix})");
            if !taken.contains(&name_key(&candidate)) {
                break candidate;
            }
            suffix += 1;
        };
        taken.insert(name_key(&replacement));
        tracing::info!(from = %current, to = %replacement, "renaming group that collides with an existing entry");
        master.groups[index].name = replacement.clone();
        renamed.push((current, replacement));
    }
    renamed
}

/// Checks that the grouping covers the snapshot exactly: every entry once,
/// nothing else. Items must carry the snapshot's exact names.
pub fn verify_coverage(master: &MasterGrouping, entries: &[Entry]) -> Result<(), AppError> {
    let expected: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut problems = Vec::new();

    for group in &master.groups {
        for item in &group.items {
            if !expected.contains(item.as_str()) {
                problems.push(format!("'{item}' in '{}' is not in the snapshot", group.name));
            } else if !seen.insert(item.as_str()) {
                problems.push(format!("'{item}' is assigned more than once"));
            }
        }
    }
    for entry in entries {
        if !seen.contains(entry.name.as_str()) {
            problems.push(format!("'{}' is not assigned to any group", entry.name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::CoverageViolation(problems.join("; ")))
    }
}
