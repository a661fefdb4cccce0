//! Document-context inference for reranking.
//!
//! Generic project documents (README and friends) get a fixed context. Every
//! other document is classified from its own chunks by a [`ContextInferer`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use semindex_core::types::{Area, DocumentChunk, DocumentContext};

/// File stems (case-insensitive, `-` treated as `_`) that describe a whole project.
pub const GENERIC_DOCUMENTS: &[&str] =
    &["readme", "changelog", "contributing", "license", "code_of_conduct", "security", "index"];

pub fn is_generic_document(path: &str) -> bool {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase().replace('-', "_"))
        .unwrap_or_default();
    GENERIC_DOCUMENTS.contains(&stem.as_str())
}

#[async_trait]
pub trait ContextInferer: Send + Sync {
    /// Classify one document from its chunks (possibly empty).
    async fn infer(&self, document_path: &str, chunks: &[DocumentChunk]) -> DocumentContext;
}

const AREA_KEYWORDS: &[(Area, &[&str])] = &[
    (Area::Frontend, &["frontend", "ui", "component", "components", "css", "html", "browser", "react", "vue", "angular", "svelte", "jsx", "tsx", "style", "layout", "render"]),
    (Area::Backend, &["backend", "api", "server", "endpoint", "endpoints", "handler", "middleware", "route", "routes", "service", "services", "request", "response", "grpc", "rest"]),
    (Area::Database, &["database", "db", "sql", "query", "queries", "schema", "migration", "migrations", "table", "tables", "postgres", "postgresql", "mysql", "sqlite", "mongodb", "redis", "orm"]),
    (Area::DevOps, &["deploy", "deployment", "docker", "dockerfile", "kubernetes", "k8s", "helm", "terraform", "ci", "cd", "pipeline", "infrastructure", "monitoring", "release"]),
    (Area::Testing, &["test", "tests", "testing", "jest", "mocha", "pytest", "vitest", "fixture", "fixtures", "mock", "mocks", "coverage", "e2e", "assertion"]),
    (Area::Security, &["security", "auth", "authentication", "authorization", "oauth", "jwt", "token", "tokens", "password", "encryption", "csrf", "xss", "vulnerability", "permission", "permissions"]),
    (Area::Documentation, &["documentation", "docs", "guide", "tutorial", "overview", "introduction", "faq", "glossary"]),
];

const TECHNOLOGIES: &[&str] = &[
    "react", "vue", "angular", "svelte", "nextjs", "node", "express", "django", "flask", "fastapi", "rails", "spring",
    "postgres", "mysql", "sqlite", "mongodb", "redis", "docker", "kubernetes", "terraform", "graphql", "typescript",
    "javascript", "python", "rust", "go", "java", "kotlin", "jest", "pytest", "webpack", "vite", "tailwind", "aws",
];

/// Minimum weighted keyword hits for an area to win.
pub const MIN_AREA_SCORE: usize = 2;
pub const MAX_TECHNOLOGIES: usize = 3;

/// Lexicon-based classifier. Title and heading words count double.
#[derive(Debug, Default, Clone)]
pub struct KeywordInferer;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|w| w.trim_matches('.').to_ascii_lowercase().replace('.', ""))
        .filter(|w| !w.is_empty())
}

impl KeywordInferer {
    pub fn classify(&self, document_path: &str, chunks: &[DocumentChunk]) -> DocumentContext {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut bump = |text: &str, weight: usize| {
            for w in words(text) {
                *counts.entry(w).or_default() += weight;
            }
        };
        bump(document_path, 2);
        if let Some(title) = chunks.iter().find_map(|c| c.document_title.as_deref()) {
            bump(title, 2);
        }
        for c in chunks {
            if let Some(h) = &c.heading_text {
                bump(h, 2);
            }
            bump(&c.content, 1);
        }

        let hits = |keywords: &[&str]| keywords.iter().map(|k| counts.get(*k).copied().unwrap_or(0)).sum::<usize>();
        let best = AREA_KEYWORDS
            .iter()
            .map(|(area, keywords)| (*area, hits(keywords)))
            // first listed area wins ties
            .fold(None::<(Area, usize)>, |best, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            });
        let area = match best {
            Some((area, score)) if score >= MIN_AREA_SCORE => area,
            _ => Area::General,
        };

        let mut tech: Vec<(&str, usize)> = TECHNOLOGIES
            .iter()
            .filter_map(|t| counts.get(*t).map(|n| (*t, *n)))
            .collect();
        tech.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        DocumentContext {
            area,
            dominant_technologies: tech.into_iter().take(MAX_TECHNOLOGIES).map(|(t, _)| t.to_string()).collect(),
            is_generic: false,
        }
    }
}

#[async_trait]
impl ContextInferer for KeywordInferer {
    async fn infer(&self, document_path: &str, chunks: &[DocumentChunk]) -> DocumentContext {
        self.classify(document_path, chunks)
    }
}
