use crate::models::batch::Batch;
use crate::models::entry::Entry;

pub const DEFAULT_SINGLE_BATCH_THRESHOLD: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 75;
pub const DEFAULT_MIN_BATCH_SIZE: usize = 25;
pub const DEFAULT_SHRINK_FACTOR: f64 = 0.7;
const FAILURES_BEFORE_SHRINK: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPolicy {
    pub single_batch_threshold: usize,
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub shrink_factor: f64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            single_batch_threshold: DEFAULT_SINGLE_BATCH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            shrink_factor: DEFAULT_SHRINK_FACTOR,
        }
    }
}

fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Static partition of a snapshot, before any adaptive shrink.
pub fn plan(entries: &[Entry], policy: BatchPolicy) -> Vec<Batch> {
    let mut planner = BatchPlanner::new(entries.to_vec(), policy);
    let mut batches = Vec::new();
    while let Some(batch) = planner.next_batch(&[]) {
        batches.push(batch);
    }
    batches
}

/// Hands out batches one at a time so the batch size can shrink when the
/// classifier keeps rejecting requests.
#[derive(Debug)]
pub struct BatchPlanner {
    pending: Vec<Entry>,
    cursor: usize,
    current_size: usize,
    min_size: usize,
    shrink_factor: f64,
    consecutive_failures: usize,
    next_index: usize,
    single: bool,
}

impl BatchPlanner {
    pub fn new(mut entries: Vec<Entry>, policy: BatchPolicy) -> Self {
        let single = entries.len() <= policy.single_batch_threshold;
        if !single {
            sort_entries(&mut entries);
        }
        let min_size = policy.min_batch_size.max(1);
        let current_size = if single {
            entries.len().max(1)
        } else {
            policy.batch_size.max(min_size)
        };
        Self {
            pending: entries,
            cursor: 0,
            current_size,
            min_size,
            shrink_factor: policy.shrink_factor.clamp(0.1, 0.95),
            consecutive_failures: 0,
            next_index: 0,
            single,
        }
    }

    pub fn current_batch_size(&self) -> usize {
        self.current_size
    }

    pub fn remaining_entries(&self) -> usize {
        self.pending.len() - self.cursor
    }

    pub fn remaining_batches(&self) -> usize {
        self.remaining_entries().div_ceil(self.current_size)
    }

    /// Later batches carry the group names accepted so far; the first never does.
    pub fn next_batch(&mut self, existing_groups: &[String]) -> Option<Batch> {
        if self.cursor >= self.pending.len() {
            return None;
        }
        let end = (self.cursor + self.current_size).min(self.pending.len());
        let entries = self.pending[self.cursor..end].to_vec();
        self.cursor = end;

        let index = self.next_index;
        self.next_index += 1;
        let existing_groups = if index == 0 {
            Vec::new()
        } else {
            existing_groups.to_vec()
        };

        Some(Batch {
            index,
            entries,
            existing_groups,
        })
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure shrank the batch size.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.single || self.consecutive_failures < FAILURES_BEFORE_SHRINK {
            return false;
        }
        self.consecutive_failures = 0;

        let shrunk = ((self.current_size as f64) * self.shrink_factor).floor() as usize;
        let shrunk = shrunk.max(self.min_size);
        if shrunk >= self.current_size {
            return false;
        }
        tracing::info!(
            from = self.current_size,
            to = shrunk,
            remaining_batches = self.remaining_entries().div_ceil(shrunk),
            "shrinking batch size after consecutive failures"
        );
        self.current_size = shrunk;
        true
    }
}
