use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processed,
    Skipped,
    Failed,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    /// Project-relative path.
    pub path: String,
    pub status: FileStatus,
    pub reason: Option<String>,
    /// Rows written (1 for code files, chunk count for documents).
    pub rows: usize,
}

impl FileOutcome {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self { path: path.into(), status, reason: None, rows: 0 }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }
}

/// Emitted once per file as soon as its outcome is known.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub outcome: FileOutcome,
    pub done: usize,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub excluded: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub excluded: usize,
    pub files: Vec<FileOutcome>,
    /// Set when the whole batch was abandoned (model or store unavailable).
    pub aborted: Option<String>,
    pub structure_updated: bool,
}

impl BatchReport {
    pub(crate) fn record(&mut self, outcome: FileOutcome, total: usize, progress: Option<&ProgressCallback>) {
        match outcome.status {
            FileStatus::Processed => self.processed += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Failed => self.failed += 1,
            FileStatus::Excluded => self.excluded += 1,
        }
        if let Some(cb) = progress {
            cb(&ProgressEvent {
                outcome: outcome.clone(),
                done: self.files.len() + 1,
                total,
                processed: self.processed,
                skipped: self.skipped,
                failed: self.failed,
                excluded: self.excluded,
            });
        }
        self.files.push(outcome);
    }

    pub fn outcome(&self, path: &str) -> Option<&FileOutcome> { self.files.iter().find(|f| f.path == path) }
}
