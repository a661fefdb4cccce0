//! Turns project files into scoped embedding rows.

pub mod chunker;
pub mod exclusions;
pub mod indexer;
pub mod language;
pub mod report;
pub mod structure;

pub use exclusions::DefaultExclusions;
pub use indexer::{IndexOptions, Indexer};
pub use report::{BatchReport, FileOutcome, FileStatus, ProgressCallback, ProgressEvent};
