use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::operator::{
    render_plan, render_restore_report, ExistingRecordChoice, Operator, PostApplyChoice,
};
use crate::config::Config;
use crate::error::AppError;
use crate::models::entry::Entry;
use crate::models::grouping::MasterGrouping;
use crate::models::report::{ApplyReport, RestoreReport};
use crate::models::undo_record::UndoRecord;
use crate::services::batch_planner::{BatchPlanner, BatchPolicy};
use crate::services::classifier_service::{
    build_bulk_request, build_conflict_request, build_recovery_request, Classifier,
    ClassifierGateway,
};
use crate::services::executor_service;
use crate::services::file_service::EntryMover;
use crate::services::merge_service::{
    apply_resolutions, assign_unorganized, find_conflicts, merge, resolve_name_collisions,
    unassigned_entries, verify_coverage,
};
use crate::services::reconcile_service::{reconcile, reconcile_conflict_choices, NameIndex};
use crate::services::snapshot_service;
use crate::services::undo_service::{self, UndoState};
use crate::shell::safety::validate_target_dir;
use crate::state::{ProgressPhase, ProgressTracker, RunStats};

// ---------------------------------------------------------------------------
// Pipeline context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineCtx {
    pub target: PathBuf,
    pub policy: BatchPolicy,
    pub retry_backoff: Duration,
    /// Build and show the plan, then stop before any mutation.
    pub dry_run: bool,
}

impl PipelineCtx {
    pub fn from_config(target: PathBuf, config: &Config, dry_run: bool) -> Self {
        Self {
            target,
            policy: config.batch_policy(),
            retry_backoff: config.retry_backoff(),
            dry_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Undone(RestoreReport),
    NothingToUndo,
    EmptyDirectory,
    DryRun {
        grouping: MasterGrouping,
        stats: RunStats,
    },
    Declined,
    Applied {
        report: ApplyReport,
        stats: RunStats,
    },
    AppliedThenUndone {
        report: ApplyReport,
        restore: RestoreReport,
    },
}

impl RunOutcome {
    /// True when any move or restore failed; the binary exits non-zero.
    pub fn has_failures(&self) -> bool {
        match self {
            Self::Undone(restore) => !restore.is_clean(),
            Self::Applied { report, .. } => !report.is_clean(),
            Self::AppliedThenUndone { report, restore } => {
                !report.is_clean() || !restore.is_clean()
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct Pipeline<'a> {
    ctx: &'a PipelineCtx,
    mover: &'a dyn EntryMover,
    operator: &'a dyn Operator,
    tracker: RefCell<ProgressTracker>,
}

impl<'a> Pipeline<'a> {
    fn new(ctx: &'a PipelineCtx, mover: &'a dyn EntryMover, operator: &'a dyn Operator) -> Self {
        Self {
            ctx,
            mover,
            operator,
            tracker: RefCell::new(ProgressTracker::new()),
        }
    }
}

/// Runs one invocation against `ctx.target`: the undo gate, then snapshot,
/// classification, reconciliation, confirmation and apply.
pub async fn run(
    ctx: &PipelineCtx,
    classifier: &dyn Classifier,
    mover: &dyn EntryMover,
    operator: &dyn Operator,
) -> Result<RunOutcome, AppError> {
    Pipeline::new(ctx, mover, operator).run(classifier).await
}

/// Restores from an existing record without asking, and never organizes.
pub fn run_undo(
    ctx: &PipelineCtx,
    mover: &dyn EntryMover,
    operator: &dyn Operator,
) -> Result<RunOutcome, AppError> {
    let pipeline = Pipeline::new(ctx, mover, operator);
    validate_target_dir(&ctx.target.to_string_lossy())?;
    match undo_service::detect(&ctx.target)? {
        UndoState::RecordPresent(record) => {
            let restore = pipeline.stage_restore(&record)?;
            pipeline.finish("undo complete");
            Ok(RunOutcome::Undone(restore))
        }
        UndoState::NoRecord => {
            operator.notice("No previous organization found; nothing to undo.");
            Ok(RunOutcome::NothingToUndo)
        }
    }
}

impl Pipeline<'_> {
    fn emit(&self, phase: ProgressPhase, processed: usize, total: usize, message: impl Into<String>) {
        let update = self.tracker.borrow_mut().record(phase, processed, total, message);
        if let Some(update) = update {
            self.operator.progress(&update);
        }
    }

    fn finish(&self, message: impl Into<String>) {
        self.emit(ProgressPhase::Done, 0, 0, message);
    }

    async fn run(&self, classifier: &dyn Classifier) -> Result<RunOutcome, AppError> {
        let target = &self.ctx.target;
        validate_target_dir(&target.to_string_lossy())?;

        let mut replacing_record = false;
        match undo_service::detect(target)? {
            UndoState::RecordPresent(record) => {
                match self.operator.on_existing_record(&record)? {
                    ExistingRecordChoice::Undo => {
                        let restore = self.stage_restore(&record)?;
                        self.finish("undo complete");
                        return Ok(RunOutcome::Undone(restore));
                    }
                    ExistingRecordChoice::Continue => replacing_record = true,
                }
            }
            UndoState::NoRecord => {}
        }

        let (entries, left_in_place) = self.stage_snapshot()?;
        if !left_in_place.is_empty() {
            self.operator.notice(&format!(
                "Leaving {} in place: another entry has the same name apart from case.",
                left_in_place.join(", ")
            ));
        }
        if entries.is_empty() {
            self.operator.notice("Nothing to organize.");
            self.finish("empty directory");
            return Ok(RunOutcome::EmptyDirectory);
        }

        let (grouping, mut stats) = self.stage_build_grouping(classifier, &entries).await?;
        stats.left_in_place = left_in_place;

        if self.ctx.dry_run {
            self.operator.notice(&render_plan(&grouping, &stats));
            self.finish("dry run, nothing changed");
            return Ok(RunOutcome::DryRun { grouping, stats });
        }

        if !self.operator.confirm_apply(&grouping, &stats)? {
            self.operator.notice("Nothing was changed.");
            self.finish("declined");
            return Ok(RunOutcome::Declined);
        }

        if replacing_record {
            undo_service::discard(target)?;
        }
        let report = self.stage_apply(&entries, &grouping)?;

        match self.operator.after_apply(&report)? {
            PostApplyChoice::Keep => {
                self.finish("organization kept");
                Ok(RunOutcome::Applied { report, stats })
            }
            PostApplyChoice::UndoNow => {
                let record = undo_service::read_record(target)?;
                *self.tracker.borrow_mut() = ProgressTracker::new();
                let restore = self.stage_restore(&record)?;
                self.finish("organization undone");
                Ok(RunOutcome::AppliedThenUndone { report, restore })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn stage_snapshot(&self) -> Result<(Vec<Entry>, Vec<String>), AppError> {
        self.emit(ProgressPhase::Snapshot, 0, 1, "reading directory");
        let listed = snapshot_service::snapshot(&self.ctx.target)?;
        let (entries, left_in_place) = snapshot_service::partition_case_duplicates(listed);
        self.emit(
            ProgressPhase::Snapshot,
            1,
            1,
            format!("found {} entries", entries.len()),
        );
        Ok((entries, left_in_place))
    }

    async fn stage_build_grouping(
        &self,
        classifier: &dyn Classifier,
        entries: &[Entry],
    ) -> Result<(MasterGrouping, RunStats), AppError> {
        let gateway = ClassifierGateway::new(classifier, self.ctx.retry_backoff);
        let mut master = MasterGrouping::new();
        let mut stats = RunStats {
            entries: entries.len(),
            ..RunStats::default()
        };

        let mut planner = BatchPlanner::new(entries.to_vec(), self.ctx.policy);
        self.stage_classify(&gateway, &mut planner, &mut master, &mut stats)
            .await?;
        self.stage_recover(&gateway, planner.current_batch_size(), entries, &mut master, &mut stats)
            .await?;
        self.stage_resolve(&gateway, &mut master, &mut stats).await?;

        stats.unorganized = assign_unorganized(&mut master, entries);
        stats.renamed_groups = resolve_name_collisions(&mut master, entries).len();
        master.drop_empty_groups();
        verify_coverage(&master, entries)?;

        tracing::info!(
            groups = master.groups.len(),
            items = master.item_count(),
            failed_batches = stats.failed_batches,
            unorganized = stats.unorganized,
            "grouping complete"
        );
        Ok((master, stats))
    }

    async fn stage_classify(
        &self,
        gateway: &ClassifierGateway<'_>,
        planner: &mut BatchPlanner,
        master: &mut MasterGrouping,
        stats: &mut RunStats,
    ) -> Result<(), AppError> {
        let total = planner.remaining_entries();
        self.emit(ProgressPhase::Classifying, 0, total, "classifying");

        while let Some(batch) = planner.next_batch(&master.group_names()) {
            stats.batches += 1;
            let known = NameIndex::from_entries(&batch.entries);
            let request = build_bulk_request(&batch)?;

            match gateway.request(&request, |text| reconcile(text, &known)).await {
                Ok(grouped) => {
                    planner.record_success();
                    let merged = merge(master, grouped);
                    tracing::debug!(
                        batch = batch.index,
                        new_groups = merged.new_groups,
                        items = merged.items_added,
                        "batch merged"
                    );
                }
                Err(err) => {
                    stats.failed_batches += 1;
                    tracing::warn!(
                        batch = batch.index,
                        items = batch.len(),
                        error = %err,
                        "batch failed, its entries go to recovery"
                    );
                    if planner.record_failure() {
                        stats.batch_size_shrinks += 1;
                    }
                }
            }

            let done = total - planner.remaining_entries();
            self.emit(
                ProgressPhase::Classifying,
                done,
                total,
                format!(
                    "batch {} done, {} batches left",
                    batch.index + 1,
                    planner.remaining_batches()
                ),
            );
        }
        Ok(())
    }

    /// Re-asks the classifier about entries no batch placed, in chunks of the
    /// planner's current size.
    async fn stage_recover(
        &self,
        gateway: &ClassifierGateway<'_>,
        chunk_size: usize,
        entries: &[Entry],
        master: &mut MasterGrouping,
        stats: &mut RunStats,
    ) -> Result<(), AppError> {
        let missed = unassigned_entries(master, entries);
        if missed.is_empty() {
            return Ok(());
        }
        tracing::info!(count = missed.len(), "recovering missed entries");

        let chunks: Vec<&[Entry]> = missed.chunks(chunk_size.max(1)).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            let known = NameIndex::from_entries(chunk);
            let request = build_recovery_request(chunk, &master.group_names())?;
            match gateway.request(&request, |text| reconcile(text, &known)).await {
                Ok(grouped) => {
                    merge(master, grouped);
                }
                Err(err) => tracing::warn!(
                    chunk = index,
                    items = chunk.len(),
                    error = %err,
                    "recovery request failed"
                ),
            }
            self.emit(
                ProgressPhase::Recovering,
                index + 1,
                chunks.len(),
                format!("recovery {}/{}", index + 1, chunks.len()),
            );
        }

        stats.recovered = missed.len() - unassigned_entries(master, entries).len();
        Ok(())
    }

    async fn stage_resolve(
        &self,
        gateway: &ClassifierGateway<'_>,
        master: &mut MasterGrouping,
        stats: &mut RunStats,
    ) -> Result<(), AppError> {
        let conflicts = find_conflicts(master);
        if conflicts.is_empty() {
            return Ok(());
        }
        self.emit(
            ProgressPhase::Resolving,
            0,
            conflicts.len(),
            format!("{} items placed more than once", conflicts.len()),
        );

        let request = build_conflict_request(&conflicts)?;
        let choices = match gateway
            .request(&request, |text| reconcile_conflict_choices(text, &conflicts))
            .await
        {
            Ok(choices) => choices,
            Err(err) => {
                tracing::warn!(error = %err, "conflict request failed, using first-encountered groups");
                HashMap::new()
            }
        };

        let resolution = apply_resolutions(master, &conflicts, &choices);
        stats.conflicts_resolved = resolution.resolved;
        stats.conflicts_by_fallback = resolution.by_fallback;
        self.emit(
            ProgressPhase::Resolving,
            conflicts.len(),
            conflicts.len(),
            format!("resolved {} conflicts", resolution.resolved),
        );
        Ok(())
    }

    fn stage_apply(
        &self,
        entries: &[Entry],
        grouping: &MasterGrouping,
    ) -> Result<ApplyReport, AppError> {
        executor_service::apply(&self.ctx.target, entries, grouping, self.mover, |done, total| {
            self.emit(ProgressPhase::Applying, done, total, format!("moved {done}/{total}"))
        })
    }

    fn stage_restore(&self, record: &UndoRecord) -> Result<RestoreReport, AppError> {
        let restore = undo_service::restore(&self.ctx.target, record, self.mover, |done, total| {
            self.emit(ProgressPhase::Restoring, done, total, format!("restored {done}/{total}"))
        })?;
        self.operator.notice(&render_restore_report(&restore));
        Ok(restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::operator::scripted::ScriptedOperator;
    use crate::models::grouping::UNORGANIZED_GROUP;
    use crate::models::undo_record::UNDO_RECORD_FILE;
    use crate::services::classifier_service::{ClassifierRequest, RequestKind};
    use crate::services::file_service::FsMover;
    use crate::services::reconcile_service::extract_json_array;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Reply = Box<dyn Fn(&ClassifierRequest, usize) -> Result<String, AppError> + Send + Sync>;

    /// Classifier driven by a closure; also records every request it saw.
    struct FakeClassifier {
        reply: Reply,
        seen: Mutex<Vec<ClassifierRequest>>,
    }

    impl FakeClassifier {
        fn new(
            reply: impl Fn(&ClassifierRequest, usize) -> Result<String, AppError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                reply: Box::new(reply),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn kinds(&self) -> Vec<RequestKind> {
            self.seen.lock().unwrap().iter().map(|r| r.kind).collect()
        }
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, request: &ClassifierRequest) -> Result<String, AppError> {
            let call = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(request.clone());
                seen.len() - 1
            };
            (self.reply)(request, call)
        }
    }

    fn names_in(request: &ClassifierRequest) -> Vec<String> {
        let payload = extract_json_array(&request.user_prompt).unwrap();
        let items: Vec<serde_json::Value> = serde_json::from_str(&payload).unwrap();
        items
            .iter()
            .map(|item| item["name"].as_str().unwrap().to_string())
            .collect()
    }

    fn by_extension(names: &[String]) -> String {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for name in names {
            let group = match Path::new(name).extension().and_then(|e| e.to_str()) {
                Some("jpg") | Some("png") => "Images",
                Some("txt") | Some("md") => "Documents",
                _ => "Other",
            };
            match groups.iter_mut().find(|(g, _)| g == group) {
                Some((_, items)) => items.push(name.clone()),
                None => groups.push((group.to_string(), vec![name.clone()])),
            }
        }
        let value: Vec<serde_json::Value> = groups
            .into_iter()
            .map(|(group, items)| {
                serde_json::json!({
                    "folderName": group,
                    "items": items.iter().map(|n| serde_json::json!({"name": n})).collect::<Vec<_>>(),
                })
            })
            .collect();
        format!("```json\n{}\n```", serde_json::to_string(&value).unwrap())
    }

    fn sorting_classifier() -> FakeClassifier {
        FakeClassifier::new(|request, _| Ok(by_extension(&names_in(request))))
    }

    fn ctx(root: &Path) -> PipelineCtx {
        PipelineCtx {
            target: root.to_path_buf(),
            policy: BatchPolicy::default(),
            retry_backoff: Duration::ZERO,
            dry_run: false,
        }
    }

    fn populate(root: &Path, names: &[&str]) {
        for name in names {
            fs::write(root.join(name), name.as_bytes()).unwrap();
        }
    }

    fn listing(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn case_only_duplicate_stays_at_root() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["Notes.txt", "notes.txt", "a.jpg"]);
        if listing(dir.path()).len() < 3 {
            // Case-insensitive filesystem: only one notes file exists.
            return;
        }
        let classifier = sorting_classifier();
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::Applied { report, stats } = outcome else {
            panic!("expected an applied run");
        };
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.left_in_place, vec!["notes.txt"]);
        assert_eq!(report.total, 2);
        assert_eq!(report.moved, 2);
        assert!(report.is_clean());
        assert!(dir.path().join("Documents").join("Notes.txt").is_file());
        assert!(dir.path().join("notes.txt").is_file());
        assert!(operator
            .notices
            .borrow()
            .iter()
            .any(|n| n.contains("Leaving notes.txt in place")));

        let record = undo_service::read_record(dir.path()).unwrap();
        let restore = undo_service::restore(dir.path(), &record, &FsMover, |_, _| {}).unwrap();
        assert!(restore.is_clean());
        assert_eq!(
            listing(dir.path()),
            BTreeSet::from(["Notes.txt".into(), "a.jpg".into(), "notes.txt".into()])
        );
    }

    #[tokio::test]
    async fn organizes_and_keeps_record() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "b.png", "notes.txt", "song.mp3"]);
        let classifier = sorting_classifier();
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::Applied { report, stats } = outcome else {
            panic!("expected an applied run");
        };
        assert_eq!(report.moved, 4);
        assert_eq!(stats.batches, 1);
        assert_eq!(classifier.kinds(), vec![RequestKind::Bulk]);
        assert!(dir.path().join("Images").join("a.jpg").is_file());
        assert!(dir.path().join("Documents").join("notes.txt").is_file());
        assert!(dir.path().join("Other").join("song.mp3").is_file());
        assert!(dir.path().join(UNDO_RECORD_FILE).is_file());

        let updates = operator.updates.borrow();
        assert_eq!(updates.last().map(|u| u.combined_percent), Some(100));
        assert!(updates
            .windows(2)
            .all(|w| w[0].combined_percent <= w[1].combined_percent));
    }

    #[tokio::test]
    async fn declining_changes_nothing() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "notes.txt"]);
        let before = listing(dir.path());
        let operator = ScriptedOperator::new(false, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &sorting_classifier(), &FsMover, &operator)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Declined);
        assert_eq!(listing(dir.path()), before);
        assert_eq!(operator.previews.borrow().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_shows_plan_without_mutating() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "notes.txt"]);
        let before = listing(dir.path());
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);
        let ctx = PipelineCtx {
            dry_run: true,
            ..ctx(dir.path())
        };

        let outcome = run(&ctx, &sorting_classifier(), &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::DryRun { grouping, .. } = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(grouping.item_count(), 2);
        assert_eq!(listing(dir.path()), before);
        assert!(operator.previews.borrow().is_empty());
        assert!(operator.notices.borrow()[0].starts_with("Proposed organization"));
    }

    #[tokio::test]
    async fn truncated_batch_is_recovered() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "notes.txt"]);
        let classifier = FakeClassifier::new(|request, _| match request.kind {
            RequestKind::Bulk => Ok(r#"[{"folderName":"Docs","items":[{"name":"a.txt"}"#.to_string()),
            _ => Ok(by_extension(&names_in(request))),
        });
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::Applied { report, stats } = outcome else {
            panic!("expected an applied run");
        };
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.recovered, 2);
        assert_eq!(report.moved, 2);
        // Truncation is never retried: one bulk call, then recovery.
        assert_eq!(classifier.kinds(), vec![RequestKind::Bulk, RequestKind::Recovery]);
    }

    #[tokio::test]
    async fn unreachable_classifier_puts_everything_in_unorganized() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "notes.txt", "x.bin"]);
        let classifier =
            FakeClassifier::new(|_, _| Err(AppError::Transport("connection refused".into())));
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);
        let ctx = PipelineCtx {
            dry_run: true,
            ..ctx(dir.path())
        };

        let outcome = run(&ctx, &classifier, &FsMover, &operator).await.unwrap();

        let RunOutcome::DryRun { grouping, stats } = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(stats.unorganized, 3);
        assert_eq!(grouping.group_names(), vec![UNORGANIZED_GROUP]);
        // Bulk and recovery each get exactly one retry.
        assert_eq!(
            classifier.kinds(),
            vec![
                RequestKind::Bulk,
                RequestKind::Bulk,
                RequestKind::Recovery,
                RequestKind::Recovery
            ]
        );
    }

    #[tokio::test]
    async fn duplicates_and_hallucinations_are_cleaned_up() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "song.mp3"]);
        let classifier = FakeClassifier::new(|request, _| match request.kind {
            RequestKind::Bulk => Ok(r#"[
                {"folderName":"Images","items":[{"name":"a.jpg"},{"name":"a.jpg"},{"name":"ghost.png"}]},
                {"folderName":"Media","items":[{"name":"a.jpg"},{"name":"song.mp3"}]}
            ]"#
            .to_string()),
            RequestKind::Conflict => Ok("I am not sure.".to_string()),
            RequestKind::Recovery => panic!("nothing should be missed"),
        });
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);
        let ctx = PipelineCtx {
            dry_run: true,
            ..ctx(dir.path())
        };

        let outcome = run(&ctx, &classifier, &FsMover, &operator).await.unwrap();

        let RunOutcome::DryRun { grouping, stats } = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(stats.conflicts_resolved, 1);
        assert_eq!(stats.conflicts_by_fallback, 1);
        assert_eq!(grouping.group("Images").unwrap().items, vec!["a.jpg"]);
        assert_eq!(grouping.group("Media").unwrap().items, vec!["song.mp3"]);
    }

    #[tokio::test]
    async fn later_batches_see_existing_groups() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..30).map(|i| format!("file_{i:02}.txt")).collect();
        for name in &names {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let classifier = sorting_classifier();
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);
        let ctx = PipelineCtx {
            policy: BatchPolicy {
                single_batch_threshold: 10,
                batch_size: 10,
                min_batch_size: 5,
                ..BatchPolicy::default()
            },
            dry_run: true,
            ..ctx(dir.path())
        };

        let outcome = run(&ctx, &classifier, &FsMover, &operator).await.unwrap();

        let RunOutcome::DryRun { grouping, stats } = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(stats.batches, 3);
        assert_eq!(grouping.group("Documents").unwrap().items.len(), 30);
        let seen = classifier.seen.lock().unwrap();
        assert!(!seen[0].user_prompt.contains("Existing folders"));
        assert!(seen[1].user_prompt.contains("Existing folders (reuse these before creating new ones): Documents"));
    }

    #[tokio::test]
    async fn existing_record_can_be_undone_without_classifying() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "notes.txt"]);
        let before = listing(dir.path());
        let classifier = sorting_classifier();
        let keep = ScriptedOperator::new(true, PostApplyChoice::Keep);
        run(&ctx(dir.path()), &classifier, &FsMover, &keep)
            .await
            .unwrap();
        assert!(dir.path().join("Images").is_dir());

        let undo = ScriptedOperator::new(true, PostApplyChoice::Keep)
            .with_existing(ExistingRecordChoice::Undo);
        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &undo)
            .await
            .unwrap();

        let RunOutcome::Undone(restore) = outcome else {
            panic!("expected an undo");
        };
        assert_eq!(restore.restored, 2);
        assert!(restore.record_removed);
        assert_eq!(*undo.existing_asked.borrow(), 1);
        assert_eq!(classifier.kinds().len(), 1);
        assert_eq!(listing(dir.path()), before);
    }

    #[tokio::test]
    async fn continue_replaces_the_previous_record() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg"]);
        let classifier = sorting_classifier();
        let keep = ScriptedOperator::new(true, PostApplyChoice::Keep);
        let first = run(&ctx(dir.path()), &classifier, &FsMover, &keep)
            .await
            .unwrap();
        let RunOutcome::Applied { report: first, .. } = first else {
            panic!("expected an applied run");
        };

        let again = ScriptedOperator::new(true, PostApplyChoice::Keep)
            .with_existing(ExistingRecordChoice::Continue);
        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &again)
            .await
            .unwrap();

        let RunOutcome::Applied { report, .. } = outcome else {
            panic!("expected an applied run");
        };
        assert_ne!(report.run_id, first.run_id);
        let record = undo_service::read_record(dir.path()).unwrap();
        assert_eq!(record.run_id, report.run_id);
        // The previous group folder is now an entry of its own.
        assert!(record.original_structure.iter().any(|item| item.name == "Images"));
    }

    #[tokio::test]
    async fn undo_now_restores_immediately() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg", "b.png", "notes.txt"]);
        fs::create_dir(dir.path().join("projects")).unwrap();
        fs::write(dir.path().join("projects").join("main.rs"), "fn main() {}").unwrap();
        let before = listing(dir.path());
        let operator = ScriptedOperator::new(true, PostApplyChoice::UndoNow);

        let outcome = run(&ctx(dir.path()), &sorting_classifier(), &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::AppliedThenUndone { report, restore } = outcome else {
            panic!("expected apply then undo");
        };
        assert_eq!(report.moved, 4);
        assert_eq!(restore.restored, 4);
        assert!(!outcome_has_failures(&report, &restore));
        assert_eq!(listing(dir.path()), before);
    }

    fn outcome_has_failures(report: &ApplyReport, restore: &RestoreReport) -> bool {
        RunOutcome::AppliedThenUndone {
            report: report.clone(),
            restore: restore.clone(),
        }
        .has_failures()
    }

    #[tokio::test]
    async fn undo_only_restores_without_asking() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg"]);
        let classifier = sorting_classifier();
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run_undo(&ctx(dir.path()), &FsMover, &operator).unwrap();
        assert_eq!(outcome, RunOutcome::NothingToUndo);
        assert!(dir.path().join("a.jpg").is_file());

        run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();
        let outcome = run_undo(&ctx(dir.path()), &FsMover, &operator).unwrap();
        let RunOutcome::Undone(restore) = outcome else {
            panic!("expected an undo");
        };
        assert_eq!(restore.restored, 1);
        assert_eq!(*operator.existing_asked.borrow(), 0);
        assert!(dir.path().join("a.jpg").is_file());
    }

    #[tokio::test]
    async fn group_named_like_existing_folder_gets_suffix() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &["a.jpg"]);
        fs::create_dir(dir.path().join("Images")).unwrap();
        fs::write(dir.path().join("Images").join("old.jpg"), "x").unwrap();
        let classifier = FakeClassifier::new(|_, _| {
            Ok(r#"[{"folderName":"Images","items":["a.jpg","Images"]}]"#.to_string())
        });
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();

        let RunOutcome::Applied { report, stats } = outcome else {
            panic!("expected an applied run");
        };
        assert_eq!(stats.renamed_groups, 1);
        assert_eq!(report.moved, 2);
        assert!(dir.path().join("Images (2)").join("a.jpg").is_file());
        assert!(dir
            .path()
            .join("Images (2)")
            .join("Images")
            .join("old.jpg")
            .is_file());
    }

    #[tokio::test]
    async fn empty_directory_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let classifier = sorting_classifier();
        let operator = ScriptedOperator::new(true, PostApplyChoice::Keep);

        let outcome = run(&ctx(dir.path()), &classifier, &FsMover, &operator)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::EmptyDirectory);
        assert!(classifier.kinds().is_empty());
        assert!(!dir.path().join(UNDO_RECORD_FILE).exists());
    }
}
