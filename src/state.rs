use serde::Serialize;

const SNAPSHOT_SPAN: (f64, f64) = (0.0, 5.0);
const CLASSIFYING_SPAN: (f64, f64) = (5.0, 75.0);
const RECOVERING_SPAN: (f64, f64) = (75.0, 82.0);
const RESOLVING_SPAN: (f64, f64) = (82.0, 85.0);
const APPLYING_SPAN: (f64, f64) = (85.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Snapshot,
    Classifying,
    Recovering,
    Resolving,
    Applying,
    Restoring,
    Done,
}

impl ProgressPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Snapshot => "Scanning",
            Self::Classifying => "Classifying",
            Self::Recovering => "Recovering",
            Self::Resolving => "Resolving",
            Self::Applying => "Applying",
            Self::Restoring => "Restoring",
            Self::Done => "Done",
        }
    }

    fn span(self) -> (f64, f64) {
        match self {
            Self::Snapshot => SNAPSHOT_SPAN,
            Self::Classifying => CLASSIFYING_SPAN,
            Self::Recovering => RECOVERING_SPAN,
            Self::Resolving => RESOLVING_SPAN,
            Self::Applying => APPLYING_SPAN,
            Self::Restoring => (0.0, 100.0),
            Self::Done => (100.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub phase: ProgressPhase,
    pub processed: usize,
    pub total: usize,
    pub percent: usize,
    pub combined_percent: usize,
    pub message: String,
    pub sequence: u64,
}

pub fn phase_percent(processed: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    ((processed as f64 / total as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0) as usize
}

fn combined_percent_for_phase(phase: ProgressPhase, percent: usize) -> usize {
    let (start, end) = phase.span();
    (start + (percent as f64 / 100.0) * (end - start))
        .round()
        .clamp(0.0, 100.0) as usize
}

/// Keeps the combined percent monotonic across phases and drops updates
/// once the run is done.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<ProgressUpdate>,
    sequence: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        phase: ProgressPhase,
        processed: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Option<ProgressUpdate> {
        if self.last.as_ref().is_some_and(|last| last.phase.is_terminal()) {
            return None;
        }

        let percent = if phase.is_terminal() {
            100
        } else {
            phase_percent(processed, total)
        };
        let combined_percent = combined_percent_for_phase(phase, percent);
        let combined_percent = self
            .last
            .as_ref()
            .map_or(combined_percent, |last| last.combined_percent.max(combined_percent));

        self.sequence += 1;
        let update = ProgressUpdate {
            phase,
            processed,
            total,
            percent,
            combined_percent,
            message: message.into(),
            sequence: self.sequence,
        };
        self.last = Some(update.clone());
        Some(update)
    }

    pub fn last(&self) -> Option<&ProgressUpdate> {
        self.last.as_ref()
    }
}

/// Counters gathered while building the grouping, shown in the summary.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub entries: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub batch_size_shrinks: usize,
    pub recovered: usize,
    pub conflicts_resolved: usize,
    pub conflicts_by_fallback: usize,
    pub unorganized: usize,
    pub renamed_groups: usize,
    /// Entries whose name matches an organized entry except for case.
    pub left_in_place: Vec<String>,
}
