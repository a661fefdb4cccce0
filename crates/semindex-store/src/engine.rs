//! The storage-engine seam: everything the store needs from a vector +
//! full-text database, and nothing more.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, RecordBatch};
use arrow_array::cast::AsArray;
use arrow_schema::SchemaRef;
use async_trait::async_trait;

use semindex_core::{Error, Result};

/// Scalar row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, String),
    In(String, Vec<String>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<String>) -> Self { Filter::Eq(column.to_string(), value.into()) }

    pub fn is_in(column: &str, values: impl IntoIterator<Item = String>) -> Self {
        Filter::In(column.to_string(), values.into_iter().collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    /// SQL rendering for engines that take a `WHERE` string; `None` means no predicate.
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Filter::All => None,
            Filter::Eq(col, v) => Some(format!("{col} = '{}'", escape(v))),
            Filter::In(_, vs) if vs.is_empty() => Some("false".to_string()),
            Filter::In(col, vs) => {
                let quoted = vs.iter().map(|v| format!("'{}'", escape(v))).collect::<Vec<_>>().join(", ");
                Some(format!("{col} IN ({quoted})"))
            }
            Filter::And(fs) => {
                let parts: Vec<String> = fs.iter().filter_map(|f| f.to_sql().map(|s| format!("({s})"))).collect();
                if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
            }
        }
    }

    /// Evaluate against one row. A column missing from the batch never matches.
    pub fn matches(&self, batch: &RecordBatch, row: usize) -> bool {
        let cell = |col: &str| -> Option<String> {
            let arr = batch.column_by_name(col)?.as_string_opt::<i32>()?;
            arr.is_valid(row).then(|| arr.value(row).to_string())
        };
        match self {
            Filter::All => true,
            Filter::Eq(col, v) => cell(col).is_some_and(|c| &c == v),
            Filter::In(col, vs) => cell(col).is_some_and(|c| vs.contains(&c)),
            Filter::And(fs) => fs.iter().all(|f| f.matches(batch, row)),
        }
    }
}

fn escape(v: &str) -> String { v.replace('\'', "''") }

/// Index to build on a column.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexSpec {
    FullText,
    IvfFlat { partitions: u32 },
    IvfPq { partitions: u32, sub_vectors: u32, bits: u32 },
}

/// One hybrid (vector + full-text) request.
#[derive(Debug, Clone)]
pub struct HybridQuery<'a> {
    pub text: &'a str,
    pub vector: &'a [f32],
    pub filter: Filter,
    pub limit: usize,
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn table_names(&self) -> Result<Vec<String>>;
    async fn create_table(&self, table: &str, schema: SchemaRef) -> Result<()>;
    async fn schema(&self, table: &str) -> Result<SchemaRef>;
    async fn scan(&self, table: &str, filter: &Filter) -> Result<Vec<RecordBatch>>;
    /// Rows carry one engine score column: `_distance`, `_relevance_score` or `_score`.
    async fn hybrid_search(&self, table: &str, query: &HybridQuery<'_>) -> Result<Vec<RecordBatch>>;
    async fn add(&self, table: &str, batch: RecordBatch) -> Result<()>;
    async fn delete(&self, table: &str, filter: &Filter) -> Result<()>;
    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<usize>;
    async fn create_index(&self, table: &str, column: &str, spec: &IndexSpec) -> Result<()>;
    /// Compaction.
    async fn optimize(&self, table: &str) -> Result<()>;
    async fn drop_all(&self) -> Result<()>;
}

/// Opens an engine rooted at a directory.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, dir: &Path) -> Result<Arc<dyn StorageEngine>>;
}

pub fn is_already_exists(error: &Error) -> bool {
    let msg = error.to_string().to_ascii_lowercase();
    msg.contains("already exists")
}

/// Compaction errors caused by data files written by an older format version.
pub fn is_legacy_format(error: &Error) -> bool {
    let msg = error.to_string().to_ascii_lowercase();
    msg.contains("legacy") || msg.contains("older version") || msg.contains("unsupported version")
}
