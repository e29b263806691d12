//! Run summary: what was processed, what was skipped and why, and which rows
//! were dropped along the way.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::manifest::EntryType;

/// Why a single row or edge was left out of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    BlankIdentifier,
    MissingCoordinate,
    NonFiniteCoordinate,
    MissingEndpoint,
    UnmatchedPlacement,
    MissingAsset,
    EmptyLabel,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::BlankIdentifier => "blank identifier",
            DropReason::MissingCoordinate => "missing coordinate",
            DropReason::NonFiniteCoordinate => "non-finite coordinate",
            DropReason::MissingEndpoint => "missing branch endpoint",
            DropReason::UnmatchedPlacement => "unmatched placement",
            DropReason::MissingAsset => "missing model file",
            DropReason::EmptyLabel => "empty label",
        };
        f.write_str(text)
    }
}

/// Per-reason drop counts for one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDrops(BTreeMap<DropReason, usize>);

impl RowDrops {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason: DropReason) {
        self.add(reason, 1);
    }

    pub fn add(&mut self, reason: DropReason, count: usize) {
        if count > 0 {
            *self.0.entry(reason).or_insert(0) += count;
        }
    }

    pub fn merge(&mut self, other: &RowDrops) {
        for (reason, count) in other.iter() {
            self.add(reason, count);
        }
    }

    pub fn get(&self, reason: DropReason) -> usize {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DropReason, usize)> + '_ {
        self.0.iter().map(|(reason, count)| (*reason, *count))
    }
}

impl fmt::Display for RowDrops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(reason, count)| format!("{count} {reason}"))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Outcome of one entry that got past validation.
#[derive(Debug, Clone)]
pub struct EntryReport {
    pub identifier: String,
    pub entry_type: EntryType,
    pub rows_written: usize,
    pub drops: RowDrops,
    pub files: Vec<PathBuf>,
    /// Loaded and registered for references, but emitted nothing.
    pub disabled: bool,
}

#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub label: String,
    pub reason: String,
}

/// Run-level step that runs after every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    SceneIndex,
    Cache,
    Deploy,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStage::SceneIndex => "scene index",
            RunStage::Cache => "cache invalidation",
            RunStage::Deploy => "deploy",
        };
        f.write_str(text)
    }
}

/// A run-level step that failed. Entry artifacts stay written.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub stage: RunStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed: Vec<EntryReport>,
    pub skipped: Vec<SkippedEntry>,
    /// Run-level files such as the scene index, outside any single entry.
    pub index_files: Vec<PathBuf>,
    pub cache_removed: Vec<PathBuf>,
    pub deployed: Vec<PathBuf>,
    pub failures: Vec<RunFailure>,
}

impl RunSummary {
    pub fn skip(&mut self, label: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedEntry {
            label: label.into(),
            reason: reason.into(),
        });
    }

    pub fn fail(&mut self, stage: RunStage, reason: impl fmt::Display) {
        let reason = reason.to_string();
        warn!(stage = %stage, error = %reason, "Run step failed");
        self.failures.push(RunFailure { stage, reason });
    }

    pub fn failed(&self, stage: RunStage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }

    /// Every artifact file written this run, in write order.
    pub fn written_files(&self) -> Vec<PathBuf> {
        self.processed
            .iter()
            .flat_map(|report| report.files.iter().cloned())
            .chain(self.index_files.iter().cloned())
            .collect()
    }

    pub fn report(&self, identifier: &str) -> Option<&EntryReport> {
        self.processed.iter().find(|r| r.identifier == identifier)
    }

    pub fn was_skipped(&self, label: &str) -> bool {
        self.skipped.iter().any(|s| s.label == label)
    }

    /// Log the end-of-run summary.
    pub fn log(&self) {
        info!(
            processed = self.processed.len(),
            skipped = self.skipped.len(),
            files = self.written_files().len(),
            "Run complete"
        );

        for report in &self.processed {
            if report.disabled {
                info!(entry = %report.identifier, "Disabled, no artifacts emitted");
                continue;
            }
            if report.drops.is_empty() {
                info!(entry = %report.identifier, rows = report.rows_written, "Written");
            } else {
                warn!(
                    entry = %report.identifier,
                    rows = report.rows_written,
                    dropped = %report.drops,
                    "Written with dropped rows"
                );
            }
        }

        for skipped in &self.skipped {
            warn!(entry = %skipped.label, reason = %skipped.reason, "Skipped");
        }

        if !self.cache_removed.is_empty() {
            info!(count = self.cache_removed.len(), "Cleared stale cache entries");
        }
        if !self.deployed.is_empty() {
            info!(count = self.deployed.len(), "Deployed files");
        }
        for failure in &self.failures {
            warn!(stage = %failure.stage, reason = %failure.reason, "Failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_drops_accumulate_per_reason() {
        let mut drops = RowDrops::new();
        drops.record(DropReason::MissingCoordinate);
        drops.record(DropReason::MissingCoordinate);
        drops.add(DropReason::MissingEndpoint, 3);
        drops.add(DropReason::NonFiniteCoordinate, 0);

        assert_eq!(drops.get(DropReason::MissingCoordinate), 2);
        assert_eq!(drops.get(DropReason::NonFiniteCoordinate), 0);
        assert_eq!(drops.total(), 5);
        assert_eq!(
            drops.to_string(),
            "2 missing coordinate, 3 missing branch endpoint"
        );
    }

    #[test]
    fn test_written_files_in_order() {
        let mut summary = RunSummary::default();
        summary.processed.push(EntryReport {
            identifier: "a_points".into(),
            entry_type: EntryType::Points,
            rows_written: 1,
            drops: RowDrops::new(),
            files: vec![PathBuf::from("a_points.csv"), PathBuf::from("a_points.asset")],
            disabled: false,
        });
        summary.index_files.push(PathBuf::from("scene.json"));
        summary.skip("b_points", "bad");

        assert_eq!(summary.written_files().len(), 3);
        assert!(summary.was_skipped("b_points"));
        assert!(summary.report("a_points").is_some());
    }

    #[test]
    fn test_stage_failures_are_recorded() {
        let mut summary = RunSummary::default();
        summary.fail(RunStage::Cache, "cache is not a directory");

        assert!(summary.failed(RunStage::Cache));
        assert!(!summary.failed(RunStage::Deploy));
        assert_eq!(summary.failures[0].reason, "cache is not a directory");
        assert_eq!(RunStage::SceneIndex.to_string(), "scene index");
    }
}
