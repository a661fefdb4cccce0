use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub const EMBEDDING_DIM: usize = 384;

/// Column holding the absolute project root of each row.
pub const SCOPE_COLUMN: &str = "project_path";
pub const VECTOR_COLUMN: &str = "vector";
pub const CONTENT_COLUMN: &str = "content";

/// The three tables of the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Files,
    DocChunks,
    Comments,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Files, Table::DocChunks, Table::Comments];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Files => "file_embeddings",
            Table::DocChunks => "document_chunk_embeddings",
            Table::Comments => "pr_comment_embeddings",
        }
    }

    pub fn schema(&self, dim: usize) -> SchemaRef {
        match self {
            Table::Files => file_schema(dim),
            Table::DocChunks => doc_chunk_schema(dim),
            Table::Comments => comment_schema(dim),
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

fn vector_field(dim: usize) -> Field {
    Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
        true,
    )
}

pub fn file_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(SCOPE_COLUMN, DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, true),
        Field::new(CONTENT_COLUMN, DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("last_modified", DataType::Int64, false),
        vector_field(dim),
    ]))
}

pub fn doc_chunk_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(SCOPE_COLUMN, DataType::Utf8, false),
        Field::new("document_path", DataType::Utf8, false),
        Field::new("document_title", DataType::Utf8, true),
        Field::new("heading_text", DataType::Utf8, true),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("start_line", DataType::Int32, false),
        Field::new(CONTENT_COLUMN, DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("last_modified", DataType::Int64, false),
        vector_field(dim),
    ]))
}

pub fn comment_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(SCOPE_COLUMN, DataType::Utf8, false),
        Field::new("pr_number", DataType::Int64, false),
        Field::new("file_path", DataType::Utf8, true),
        Field::new("author", DataType::Utf8, true),
        Field::new(CONTENT_COLUMN, DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("created_at", DataType::Int64, false),
        vector_field(dim),
    ]))
}

pub fn has_scope_column(schema: &Schema) -> bool { schema.field_with_name(SCOPE_COLUMN).is_ok() }
