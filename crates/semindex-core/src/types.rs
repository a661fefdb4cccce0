//! Domain types shared by the indexer, the store and the retriever.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `kind` value carried by the per-project directory-structure row.
pub const STRUCTURE_KIND: &str = "directory-structure";

/// Semantic area a document or a query is about.
///
/// `General` is the catch-all bucket; `Unknown` means no inference was possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    Frontend,
    Backend,
    Database,
    DevOps,
    Testing,
    Security,
    Documentation,
    General,
    #[default]
    Unknown,
}

impl Area {
    /// Every area that can win an inference vote.
    pub const SPECIFIC: [Area; 7] = [
        Area::Frontend,
        Area::Backend,
        Area::Database,
        Area::DevOps,
        Area::Testing,
        Area::Security,
        Area::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Frontend => "frontend",
            Area::Backend => "backend",
            Area::Database => "database",
            Area::DevOps => "devops",
            Area::Testing => "testing",
            Area::Security => "security",
            Area::Documentation => "documentation",
            Area::General => "general",
            Area::Unknown => "unknown",
        }
    }

    /// Lenient parse; anything unrecognised becomes `Unknown`.
    pub fn parse(s: &str) -> Area {
        match s.trim().to_ascii_lowercase().as_str() {
            "frontend" | "ui" => Area::Frontend,
            "backend" | "api" | "server" => Area::Backend,
            "database" | "db" | "data" => Area::Database,
            "devops" | "infra" | "infrastructure" => Area::DevOps,
            "testing" | "test" | "tests" => Area::Testing,
            "security" | "auth" => Area::Security,
            "documentation" | "docs" => Area::Documentation,
            "general" => Area::General,
            _ => Area::Unknown,
        }
    }

    pub fn is_known(&self) -> bool { !matches!(self, Area::Unknown) }

    /// Known and not the catch-all.
    pub fn is_specific(&self) -> bool { Self::SPECIFIC.contains(self) }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Inferred classification of a parent document, shared by all of its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentContext {
    pub area: Area,
    pub dominant_technologies: Vec<String>,
    /// README-style documents that describe the whole project.
    pub is_generic: bool,
}

impl DocumentContext {
    pub fn generic() -> Self {
        Self { area: Area::General, dominant_technologies: Vec::new(), is_generic: true }
    }
}

/// What the caller knows about the code under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryContext {
    pub area: Area,
    pub dominant_technologies: Vec<String>,
    /// Path of the file under review, used for path-proximity scoring.
    pub query_path: Option<String>,
}

/// Which table a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    File,
    DocumentChunk,
    ProjectStructure,
}

/// A scored retrieval hit. `similarity` is always within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub kind: ResultKind,
    pub project_path: Option<String>,
    /// Path relative to the project root (document path for chunks).
    pub path: String,
    pub content: String,
    pub language: Option<String>,
    pub heading_text: Option<String>,
    pub document_title: Option<String>,
    pub start_line: Option<u32>,
    pub similarity: f32,
    pub reranked: bool,
}

/// Lightweight view of a stored documentation chunk, as cached per project
/// for document-context inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_path: String,
    pub document_title: Option<String>,
    pub heading_text: Option<String>,
    pub content: String,
    pub start_line: Option<u32>,
}
