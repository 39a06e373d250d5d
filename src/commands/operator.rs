use console::{style, Term};

use crate::error::AppError;
use crate::models::grouping::MasterGrouping;
use crate::models::report::{ApplyReport, RestoreReport};
use crate::models::undo_record::UndoRecord;
use crate::state::{ProgressUpdate, RunStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingRecordChoice {
    Undo,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostApplyChoice {
    Keep,
    UndoNow,
}

/// Every decision and message that reaches the person running the tool.
pub trait Operator {
    fn on_existing_record(&self, record: &UndoRecord) -> Result<ExistingRecordChoice, AppError>;
    fn confirm_apply(&self, grouping: &MasterGrouping, stats: &RunStats) -> Result<bool, AppError>;
    fn after_apply(&self, report: &ApplyReport) -> Result<PostApplyChoice, AppError>;
    fn progress(&self, update: &ProgressUpdate);
    fn notice(&self, message: &str);
}

pub fn render_plan(grouping: &MasterGrouping, stats: &RunStats) -> String {
    let mut out = format!(
        "Proposed organization: {} items into {} folders\n",
        grouping.item_count(),
        grouping.groups.len()
    );
    for group in &grouping.groups {
        out.push_str(&format!("\n  {} ({})\n", group.name, group.items.len()));
        for item in &group.items {
            out.push_str(&format!("    - {item}\n"));
        }
    }
    let mut notes = Vec::new();
    if stats.failed_batches > 0 {
        notes.push(format!("{} batch(es) failed and went to recovery", stats.failed_batches));
    }
    if stats.conflicts_resolved > 0 {
        notes.push(format!(
            "{} duplicate placement(s) resolved ({} by fallback)",
            stats.conflicts_resolved, stats.conflicts_by_fallback
        ));
    }
    if stats.unorganized > 0 {
        notes.push(format!("{} item(s) could not be classified", stats.unorganized));
    }
    if stats.renamed_groups > 0 {
        notes.push(format!(
            "{} folder name(s) suffixed to avoid existing entries",
            stats.renamed_groups
        ));
    }
    if !stats.left_in_place.is_empty() {
        notes.push(format!(
            "left in place (name differs only by case): {}",
            stats.left_in_place.join(", ")
        ));
    }
    if !notes.is_empty() {
        out.push_str(&format!("\nNotes: {}\n", notes.join("; ")));
    }
    out
}

pub fn render_apply_report(report: &ApplyReport) -> String {
    let mut out = format!("Moved {} of {} items", report.moved, report.total);
    if !report.skipped.is_empty() {
        out.push_str(&format!(", {} already gone", report.skipped.len()));
    }
    for failure in &report.failures {
        out.push_str(&format!(
            "\n  failed: {} -> {}: {}",
            failure.name, failure.group, failure.reason
        ));
    }
    out
}

pub fn render_restore_report(report: &RestoreReport) -> String {
    let mut out = format!(
        "Restored {} of {} items, removed {} folders",
        report.restored, report.total, report.folders_removed
    );
    for failure in &report.failures {
        out.push_str(&format!(
            "\n  failed: {}/{}: {}",
            failure.group, failure.name, failure.reason
        ));
    }
    if !report.missing_groups.is_empty() {
        out.push_str(&format!(
            "\n  folders not found: {}",
            report.missing_groups.join(", ")
        ));
    }
    if !report.unrestored.is_empty() {
        out.push_str(&format!(
            "\n  not back in place: {}",
            report.unrestored.join(", ")
        ));
    }
    if !report.record_removed {
        out.push_str("\n  undo record kept; run again to retry");
    }
    out
}

/// Interactive prompts on the terminal. With `assume_yes` every question is
/// answered affirmatively without reading input.
pub struct ConsoleOperator {
    term: Term,
    assume_yes: bool,
}

impl ConsoleOperator {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            term: Term::stdout(),
            assume_yes,
        }
    }

    fn write(&self, line: &str) {
        if let Err(err) = self.term.write_line(line) {
            tracing::debug!(error = %err, "could not write to terminal");
        }
    }

    /// Redraws the single progress line, ending it when `finished`.
    fn redraw(&self, line: &str, finished: bool) -> std::io::Result<()> {
        self.term.clear_line()?;
        self.term.write_str(line)?;
        if finished {
            self.term.write_line("")?;
        }
        Ok(())
    }

    fn ask(&self, question: &str) -> Result<String, AppError> {
        self.term.write_str(&format!("{question} "))?;
        let answer = self.term.read_line()?;
        Ok(answer.trim().to_lowercase())
    }
}

impl Operator for ConsoleOperator {
    fn on_existing_record(&self, record: &UndoRecord) -> Result<ExistingRecordChoice, AppError> {
        self.write(&format!(
            "{} this folder was organized on {} into {} folders.",
            style("Found a previous run:").yellow().bold(),
            record.timestamp,
            record.new_structure.groups.len()
        ));
        if self.assume_yes {
            return Ok(ExistingRecordChoice::Continue);
        }
        loop {
            match self.ask("[u]ndo it, or [c]ontinue with a fresh organization?")?.as_str() {
                "u" | "undo" => return Ok(ExistingRecordChoice::Undo),
                "c" | "continue" => return Ok(ExistingRecordChoice::Continue),
                // Non-interactive input reads as empty; leave the folder alone.
                "" if !self.term.is_term() => {
                    return Err(AppError::General(
                        "a previous run exists; rerun with --undo or --yes".to_string(),
                    ))
                }
                _ => continue,
            }
        }
    }

    fn confirm_apply(&self, grouping: &MasterGrouping, stats: &RunStats) -> Result<bool, AppError> {
        self.write(&render_plan(grouping, stats));
        if self.assume_yes {
            return Ok(true);
        }
        let answer = self.ask("Apply this organization? (y/N)")?;
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }

    fn after_apply(&self, report: &ApplyReport) -> Result<PostApplyChoice, AppError> {
        self.write(&render_apply_report(report));
        if self.assume_yes {
            return Ok(PostApplyChoice::Keep);
        }
        let answer = self.ask("Keep this organization? (Y/n, n undoes it now)")?;
        Ok(match answer.as_str() {
            "n" | "no" | "u" | "undo" => PostApplyChoice::UndoNow,
            _ => PostApplyChoice::Keep,
        })
    }

    fn progress(&self, update: &ProgressUpdate) {
        let line = format!(
            "[{:>3}%] {}: {}",
            update.combined_percent,
            style(update.phase.label()).cyan(),
            update.message
        );
        if self.term.is_term() {
            if let Err(err) = self.redraw(&line, update.phase.is_terminal()) {
                tracing::debug!(error = %err, "could not write to terminal");
            }
        } else {
            tracing::info!(percent = update.combined_percent, phase = ?update.phase, "{}", update.message);
        }
    }

    fn notice(&self, message: &str) {
        if self.term.is_term() {
            if let Err(err) = self.term.clear_line() {
                tracing::debug!(error = %err, "could not write to terminal");
            }
        }
        self.write(message);
    }
}
