//! Typed rows for each table, with Arrow conversions.
//!
//! Reading is lenient: a missing optional column (legacy tables, or a
//! projection that skipped it) yields `None`/empty rather than an error.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{ArrayRef, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, StringArray};

use semindex_core::{Error, Result};

use crate::columns;
use crate::schema::{Table, SCOPE_COLUMN};

/// Shared shape of every stored row: an id, a project scope, a content hash
/// and an embedding.
pub trait ScopedRecord: Sized + Send + Sync {
    const TABLE: Table;

    fn id(&self) -> &str;
    /// `None` only for legacy rows from tables without a scope column.
    fn scope(&self) -> Option<&str>;
    fn content_hash(&self) -> &str;
    fn vector(&self) -> &[f32];

    fn to_batch(records: &[Self], dim: usize) -> Result<RecordBatch>;
    fn from_batch(batch: &RecordBatch) -> Vec<Self>;
}

fn vector_array(vectors: impl Iterator<Item = Vec<f32>>, dim: usize) -> FixedSizeListArray {
    let rows: Vec<Option<Vec<Option<f32>>>> = vectors.map(|v| Some(v.into_iter().map(Some).collect())).collect();
    FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(rows, dim as i32)
}

fn check_dims<'a>(vectors: impl Iterator<Item = &'a [f32]>, dim: usize) -> Result<()> {
    for v in vectors {
        if v.len() != dim {
            return Err(Error::Computation(format!("embedding dimension mismatch: expected {dim}, got {}", v.len())));
        }
    }
    Ok(())
}

fn strings<'a>(it: impl Iterator<Item = &'a str>) -> ArrayRef { Arc::new(StringArray::from_iter_values(it)) }

fn opt_strings<'a>(it: impl Iterator<Item = Option<&'a str>>) -> ArrayRef { Arc::new(StringArray::from_iter(it)) }

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub project_path: Option<String>,
    /// Relative to the project root, forward slashes.
    pub path: String,
    /// `file` or `directory-structure`.
    pub kind: String,
    pub language: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub last_modified: i64,
    pub vector: Vec<f32>,
}

impl ScopedRecord for FileRecord {
    const TABLE: Table = Table::Files;

    fn id(&self) -> &str { &self.id }
    fn scope(&self) -> Option<&str> { self.project_path.as_deref() }
    fn content_hash(&self) -> &str { &self.content_hash }
    fn vector(&self) -> &[f32] { &self.vector }

    fn to_batch(records: &[Self], dim: usize) -> Result<RecordBatch> {
        check_dims(records.iter().map(Self::vector), dim)?;
        RecordBatch::try_new(
            Self::TABLE.schema(dim),
            vec![
                strings(records.iter().map(|r| r.id.as_str())),
                strings(records.iter().map(|r| r.project_path.as_deref().unwrap_or_default())),
                strings(records.iter().map(|r| r.path.as_str())),
                strings(records.iter().map(|r| r.kind.as_str())),
                opt_strings(records.iter().map(|r| r.language.as_deref())),
                strings(records.iter().map(|r| r.content.as_str())),
                strings(records.iter().map(|r| r.content_hash.as_str())),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.last_modified))),
                Arc::new(vector_array(records.iter().map(|r| r.vector.clone()), dim)),
            ],
        )
        .map_err(Error::storage)
    }

    fn from_batch(batch: &RecordBatch) -> Vec<Self> {
        (0..batch.num_rows())
            .filter_map(|i| {
                Some(FileRecord {
                    id: columns::string(batch, "id", i)?,
                    project_path: columns::string(batch, SCOPE_COLUMN, i),
                    path: columns::string(batch, "path", i)?,
                    kind: columns::string(batch, "kind", i).unwrap_or_else(|| "file".to_string()),
                    language: columns::string(batch, "language", i),
                    content: columns::string(batch, "content", i).unwrap_or_default(),
                    content_hash: columns::string(batch, "content_hash", i).unwrap_or_default(),
                    last_modified: columns::int64(batch, "last_modified", i).unwrap_or_default(),
                    vector: columns::vector(batch, "vector", i).unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChunkRecord {
    pub id: String,
    pub project_path: Option<String>,
    pub document_path: String,
    pub document_title: Option<String>,
    pub heading_text: Option<String>,
    pub chunk_index: i32,
    /// 1-based line of the chunk's first line in the document.
    pub start_line: i32,
    pub content: String,
    pub content_hash: String,
    pub last_modified: i64,
    pub vector: Vec<f32>,
}

impl ScopedRecord for DocChunkRecord {
    const TABLE: Table = Table::DocChunks;

    fn id(&self) -> &str { &self.id }
    fn scope(&self) -> Option<&str> { self.project_path.as_deref() }
    fn content_hash(&self) -> &str { &self.content_hash }
    fn vector(&self) -> &[f32] { &self.vector }

    fn to_batch(records: &[Self], dim: usize) -> Result<RecordBatch> {
        check_dims(records.iter().map(Self::vector), dim)?;
        RecordBatch::try_new(
            Self::TABLE.schema(dim),
            vec![
                strings(records.iter().map(|r| r.id.as_str())),
                strings(records.iter().map(|r| r.project_path.as_deref().unwrap_or_default())),
                strings(records.iter().map(|r| r.document_path.as_str())),
                opt_strings(records.iter().map(|r| r.document_title.as_deref())),
                opt_strings(records.iter().map(|r| r.heading_text.as_deref())),
                Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.chunk_index))),
                Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.start_line))),
                strings(records.iter().map(|r| r.content.as_str())),
                strings(records.iter().map(|r| r.content_hash.as_str())),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.last_modified))),
                Arc::new(vector_array(records.iter().map(|r| r.vector.clone()), dim)),
            ],
        )
        .map_err(Error::storage)
    }

    fn from_batch(batch: &RecordBatch) -> Vec<Self> {
        (0..batch.num_rows())
            .filter_map(|i| {
                Some(DocChunkRecord {
                    id: columns::string(batch, "id", i)?,
                    project_path: columns::string(batch, SCOPE_COLUMN, i),
                    document_path: columns::string(batch, "document_path", i)?,
                    document_title: columns::string(batch, "document_title", i),
                    heading_text: columns::string(batch, "heading_text", i),
                    chunk_index: columns::int32(batch, "chunk_index", i).unwrap_or_default(),
                    start_line: columns::int32(batch, "start_line", i).unwrap_or(1),
                    content: columns::string(batch, "content", i).unwrap_or_default(),
                    content_hash: columns::string(batch, "content_hash", i).unwrap_or_default(),
                    last_modified: columns::int64(batch, "last_modified", i).unwrap_or_default(),
                    vector: columns::vector(batch, "vector", i).unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// A classified review comment. Rows are written by the PR-history
/// ingester; this crate only stores, scopes and clears them.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub id: String,
    pub project_path: Option<String>,
    pub pr_number: i64,
    pub file_path: Option<String>,
    pub author: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub created_at: i64,
    pub vector: Vec<f32>,
}

impl ScopedRecord for CommentRecord {
    const TABLE: Table = Table::Comments;

    fn id(&self) -> &str { &self.id }
    fn scope(&self) -> Option<&str> { self.project_path.as_deref() }
    fn content_hash(&self) -> &str { &self.content_hash }
    fn vector(&self) -> &[f32] { &self.vector }

    fn to_batch(records: &[Self], dim: usize) -> Result<RecordBatch> {
        check_dims(records.iter().map(Self::vector), dim)?;
        RecordBatch::try_new(
            Self::TABLE.schema(dim),
            vec![
                strings(records.iter().map(|r| r.id.as_str())),
                strings(records.iter().map(|r| r.project_path.as_deref().unwrap_or_default())),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.pr_number))),
                opt_strings(records.iter().map(|r| r.file_path.as_deref())),
                opt_strings(records.iter().map(|r| r.author.as_deref())),
                strings(records.iter().map(|r| r.content.as_str())),
                strings(records.iter().map(|r| r.content_hash.as_str())),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.created_at))),
                Arc::new(vector_array(records.iter().map(|r| r.vector.clone()), dim)),
            ],
        )
        .map_err(Error::storage)
    }

    fn from_batch(batch: &RecordBatch) -> Vec<Self> {
        (0..batch.num_rows())
            .filter_map(|i| {
                Some(CommentRecord {
                    id: columns::string(batch, "id", i)?,
                    project_path: columns::string(batch, SCOPE_COLUMN, i),
                    pr_number: columns::int64(batch, "pr_number", i).unwrap_or_default(),
                    file_path: columns::string(batch, "file_path", i),
                    author: columns::string(batch, "author", i),
                    content: columns::string(batch, "content", i).unwrap_or_default(),
                    content_hash: columns::string(batch, "content_hash", i).unwrap_or_default(),
                    created_at: columns::int64(batch, "created_at", i).unwrap_or_default(),
                    vector: columns::vector(batch, "vector", i).unwrap_or_default(),
                })
            })
            .collect()
    }
}
