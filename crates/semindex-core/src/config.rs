//! Layered configuration and path helpers.
//!
//! Uses Figment to merge serialized defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (nested keys split on `__`).
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    /// Load with config files looked up under `dir` for the given environment.
    pub fn load_from(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::Config(format!("Failed to get '{}': {}", key, e)))
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Typed view over every tunable the workspace reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub indexing: IndexingSettings,
    pub search: SearchSettings,
    pub rerank: RerankSettings,
    pub cache: CacheSettings,
    pub model: ModelSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.storage.embedding_dim == 0 {
            return Err(Error::Config("storage.embedding_dim must be > 0".into()));
        }
        if self.indexing.embed_batch_size == 0 {
            return Err(Error::Config("indexing.embed_batch_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(Error::Config(format!(
                "search.similarity_threshold must be within [0, 1], got {}",
                self.search.similarity_threshold
            )));
        }
        if self.rerank.context_concurrency == 0 {
            return Err(Error::Config("rerank.context_concurrency must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub dir: String,
    pub embedding_dim: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { dir: "~/.semindex/lancedb".to_string(), embedding_dim: 384 }
    }
}

impl StorageSettings {
    pub fn resolved_dir(&self) -> PathBuf { expand_path(&self.dir) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingSettings {
    /// Code files longer than this are truncated before embedding.
    pub max_code_lines: usize,
    /// Upper bound on texts per provider call.
    pub embed_batch_size: usize,
    pub max_structure_depth: usize,
    pub max_structure_entries: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self { max_code_lines: 1000, embed_batch_size: 50, max_structure_depth: 4, max_structure_entries: 400 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub similarity_threshold: f32,
    /// Candidates fetched per requested result.
    pub over_fetch: usize,
    /// Minimum similarity for the structure snapshot to be appended.
    pub structure_similarity: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_limit: 10, similarity_threshold: 0.3, over_fetch: 3, structure_similarity: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RerankSettings {
    pub context_concurrency: usize,
    pub context_pause_ms: u64,
    pub min_candidates: usize,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self { context_concurrency: 3, context_pause_ms: 25, min_candidates: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub embeddings: usize,
    pub heading_embeddings: usize,
    pub document_contexts: usize,
    pub project_chunks: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { embeddings: 1000, heading_embeddings: 1000, document_contexts: 500, project_chunks: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub init_attempts: usize,
    pub init_backoff_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { init_attempts: 3, init_backoff_ms: 250 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
