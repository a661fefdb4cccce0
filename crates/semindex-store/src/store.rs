use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use arrow_array::RecordBatch;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use semindex_core::config::StorageSettings;
use semindex_core::paths::{guard_destructive_scope, scope_key};
use semindex_core::{Error, Result};

use crate::columns;
use crate::engine::{is_already_exists, is_legacy_format, Connector, Filter, HybridQuery, IndexSpec, StorageEngine};
use crate::lance::LanceConnector;
use crate::records::ScopedRecord;
use crate::schema::{has_scope_column, Table, CONTENT_COLUMN, SCOPE_COLUMN};

/// Vector-index strategy chosen from a table's row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexStrategy {
    /// Brute-force scan, no index.
    Exact,
    Approximate { partitions: u32 },
    Quantized { partitions: u32, sub_vectors: u32, bits: u32 },
}

impl IndexStrategy {
    fn spec(&self) -> Option<IndexSpec> {
        match *self {
            IndexStrategy::Exact => None,
            IndexStrategy::Approximate { partitions } => Some(IndexSpec::IvfFlat { partitions }),
            IndexStrategy::Quantized { partitions, sub_vectors, bits } => {
                Some(IndexSpec::IvfPq { partitions, sub_vectors, bits })
            }
        }
    }
}

pub const APPROXIMATE_MIN_ROWS: usize = 1_000;
pub const QUANTIZED_MIN_ROWS: usize = 10_000;

pub fn choose_strategy(rows: usize, dim: usize) -> IndexStrategy {
    if rows < APPROXIMATE_MIN_ROWS {
        IndexStrategy::Exact
    } else if rows < QUANTIZED_MIN_ROWS {
        let partitions = ((rows as f64 / 50.0).sqrt().floor() as u32).max(2);
        IndexStrategy::Approximate { partitions }
    } else {
        let partitions = ((rows as f64 / 100.0).sqrt().floor() as u32).max(8);
        IndexStrategy::Quantized { partitions, sub_vectors: (dim / 4).max(1) as u32, bits: 8 }
    }
}

/// Result of [`EmbeddingStore::adaptive_index`]. A failed build reports
/// `Exact` with the error attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexOutcome {
    pub rows: usize,
    pub strategy: IndexStrategy,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted,
    /// Old data files; the engine rewrites them over time.
    LegacyFormat(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub name: &'static str,
    pub exists: bool,
    pub rows: usize,
    pub has_scope_column: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub dir: PathBuf,
    pub open: bool,
    pub tables: Vec<TableStatus>,
}

/// Owns the connection to the shared store and the table housekeeping
/// around it.
pub struct EmbeddingStore {
    dir: PathBuf,
    dim: usize,
    connector: Arc<dyn Connector>,
    engine: AsyncMutex<Option<Arc<dyn StorageEngine>>>,
    scope_columns: Mutex<HashMap<Table, bool>>,
}

impl EmbeddingStore {
    pub fn new(dir: impl Into<PathBuf>, dim: usize, connector: Arc<dyn Connector>) -> Self {
        Self {
            dir: dir.into(),
            dim,
            connector,
            engine: AsyncMutex::new(None),
            scope_columns: Mutex::new(HashMap::new()),
        }
    }

    pub fn lance(settings: &StorageSettings) -> Self {
        Self::new(settings.resolved_dir(), settings.embedding_dim, Arc::new(LanceConnector))
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn dim(&self) -> usize { self.dim }

    fn scope_columns(&self) -> MutexGuard<'_, HashMap<Table, bool>> {
        self.scope_columns.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Shared engine handle, connecting and ensuring the schema on first use.
    /// Concurrent callers wait on the one in-flight initialisation; a failed
    /// attempt leaves the store closed so the next call retries.
    pub async fn open(&self) -> Result<Arc<dyn StorageEngine>> {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let engine = match self.connector.connect(&self.dir).await {
            Ok(engine) => engine,
            Err(error) => {
                tracing::error!(%error, dir = %self.dir.display(), "store connection failed");
                return Err(error);
            }
        };
        if let Err(error) = self.ensure_schema(engine.as_ref()).await {
            tracing::error!(%error, "schema setup failed");
            self.scope_columns().clear();
            return Err(Error::Initialization(error.to_string()));
        }
        tracing::info!(dir = %self.dir.display(), "store opened");
        *slot = Some(engine.clone());
        Ok(engine)
    }

    pub async fn close(&self) {
        if self.engine.lock().await.take().is_some() {
            tracing::debug!("store closed");
        }
        self.scope_columns().clear();
    }

    pub async fn is_open(&self) -> bool { self.engine.lock().await.is_some() }

    /// Create missing tables; for existing ones note whether they carry the
    /// scope column. Also makes sure each table has a full-text index.
    pub async fn ensure_schema(&self, engine: &dyn StorageEngine) -> Result<()> {
        let names = engine.table_names().await?;
        for table in Table::ALL {
            if names.iter().any(|n| n == table.name()) {
                let schema = engine.schema(table.name()).await?;
                let scoped = has_scope_column(&schema);
                if !scoped {
                    tracing::warn!(table = table.name(), column = SCOPE_COLUMN, "legacy table without scope column; rows will be existence-checked");
                }
                self.scope_columns().insert(table, scoped);
            } else {
                match engine.create_table(table.name(), table.schema(self.dim)).await {
                    Ok(()) => tracing::info!(table = table.name(), "created table"),
                    Err(e) if is_already_exists(&e) => {}
                    Err(e) => return Err(e),
                }
                self.scope_columns().insert(table, true);
            }
            match engine.create_index(table.name(), CONTENT_COLUMN, &IndexSpec::FullText).await {
                Ok(()) => tracing::debug!(table = table.name(), "full-text index created"),
                Err(e) if is_already_exists(&e) => {}
                Err(error) => tracing::warn!(%error, table = table.name(), "full-text index unavailable"),
            }
        }
        Ok(())
    }

    /// Whether `table` has the scope column. Unknown tables are assumed current.
    pub fn has_scope_column(&self, table: Table) -> bool { self.scope_columns().get(&table).copied().unwrap_or(true) }

    /// Engine-side scope predicate, when the table supports it.
    pub fn scope_filter(&self, table: Table, scope: &str) -> Filter {
        if self.has_scope_column(table) { Filter::eq(SCOPE_COLUMN, scope) } else { Filter::All }
    }

    pub async fn scan<R: ScopedRecord>(&self, filter: &Filter) -> Result<Vec<R>> {
        let engine = self.open().await?;
        let batches = engine.scan(R::TABLE.name(), filter).await?;
        Ok(batches.iter().flat_map(R::from_batch).collect())
    }

    /// All rows of one project. Legacy tables without the scope column
    /// cannot attribute rows to a project and yield nothing.
    pub async fn scan_scope<R: ScopedRecord>(&self, scope: &str) -> Result<Vec<R>> {
        if !self.has_scope_column(R::TABLE) {
            tracing::debug!(table = R::TABLE.name(), "scope scan skipped on legacy table");
            return Ok(Vec::new());
        }
        self.scan(&Filter::eq(SCOPE_COLUMN, scope)).await
    }

    pub async fn insert<R: ScopedRecord>(&self, records: &[R]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch = R::to_batch(records, self.dim)?;
        let engine = self.open().await?;
        engine.add(R::TABLE.name(), batch).await?;
        Ok(records.len())
    }

    /// Delete rows by id, one call per id; failures are logged and skipped.
    /// Returns how many deletes succeeded.
    pub async fn delete_ids(&self, table: Table, ids: &[String]) -> Result<usize> {
        let engine = self.open().await?;
        let mut deleted = 0;
        for id in ids {
            match engine.delete(table.name(), &Filter::eq("id", id.as_str())).await {
                Ok(()) => deleted += 1,
                Err(error) => tracing::warn!(%error, table = table.name(), id = %id, "row delete failed"),
            }
        }
        Ok(deleted)
    }

    pub async fn delete_where(&self, table: Table, filter: &Filter) -> Result<()> {
        let engine = self.open().await?;
        engine.delete(table.name(), filter).await
    }

    pub async fn search(&self, table: Table, query: &HybridQuery<'_>) -> Result<Vec<RecordBatch>> {
        let engine = self.open().await?;
        engine.hybrid_search(table.name(), query).await
    }

    pub async fn count_rows(&self, table: Table, filter: &Filter) -> Result<usize> {
        let engine = self.open().await?;
        engine.count_rows(table.name(), filter).await
    }

    /// Build the vector index `choose_strategy` picks for the table's current
    /// size. Never fails: errors are reported in the outcome.
    pub async fn adaptive_index(&self, table: Table, column: &str) -> IndexOutcome {
        let rows = match self.count_rows(table, &Filter::All).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%error, table = table.name(), "row count failed; using exact search");
                return IndexOutcome { rows: 0, strategy: IndexStrategy::Exact, error: Some(error.to_string()) };
            }
        };
        let strategy = choose_strategy(rows, self.dim);
        let Some(spec) = strategy.spec() else {
            return IndexOutcome { rows, strategy, error: None };
        };
        let built = match self.open().await {
            Ok(engine) => engine.create_index(table.name(), column, &spec).await,
            Err(e) => Err(e),
        };
        match built {
            Ok(()) => {
                tracing::info!(table = table.name(), rows, ?strategy, "vector index built");
                IndexOutcome { rows, strategy, error: None }
            }
            Err(e) if is_already_exists(&e) => IndexOutcome { rows, strategy, error: None },
            Err(error) => {
                tracing::warn!(%error, table = table.name(), ?strategy, "vector index build failed; using exact search");
                IndexOutcome { rows, strategy: IndexStrategy::Exact, error: Some(error.to_string()) }
            }
        }
    }

    /// Delete every row scoped to `path` across all tables. Refuses root and
    /// too-shallow paths before touching anything.
    pub async fn delete_project_scope(&self, path: &Path) -> Result<usize> {
        let scope = scope_key(&guard_destructive_scope(path)?);
        let scope_ref = scope.as_str();
        let engine = self.open().await?;
        let names = engine.table_names().await?;
        let mut deleted = 0;
        for table in Table::ALL {
            if !names.iter().any(|n| n == table.name()) {
                continue;
            }
            if !self.has_scope_column(table) {
                tracing::warn!(table = table.name(), "legacy table has no scope column; nothing to delete by project");
                continue;
            }
            // Client-side match: predicate pushdown is not reliable across table versions.
            let ids: Vec<String> = engine
                .scan(table.name(), &Filter::All)
                .await?
                .iter()
                .flat_map(|batch| {
                    (0..batch.num_rows()).filter_map(move |i| {
                        let row_scope = columns::string(batch, SCOPE_COLUMN, i)?;
                        (row_scope == scope_ref).then(|| columns::string(batch, "id", i)).flatten()
                    })
                })
                .collect();
            let n = self.delete_ids(table, &ids).await?;
            tracing::info!(table = table.name(), project = %scope, deleted = n, "project rows deleted");
            deleted += n;
        }
        Ok(deleted)
    }

    /// Drop all tables and close the connection.
    pub async fn clear_all(&self) -> Result<()> {
        let engine = self.open().await?;
        let result = engine.drop_all().await;
        self.close().await;
        result
    }

    pub async fn compact(&self, table: Table) -> CompactionOutcome {
        let result = match self.open().await {
            Ok(engine) => engine.optimize(table.name()).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => CompactionOutcome::Compacted,
            Err(e) if is_legacy_format(&e) => {
                tracing::info!(table = table.name(), error = %e, "compaction skipped for legacy data files; will self-heal");
                CompactionOutcome::LegacyFormat(e.to_string())
            }
            Err(error) => {
                tracing::warn!(%error, table = table.name(), "compaction failed");
                CompactionOutcome::Failed(error.to_string())
            }
        }
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        let engine = self.open().await?;
        let names = engine.table_names().await?;
        let mut tables = Vec::new();
        for table in Table::ALL {
            let exists = names.iter().any(|n| n == table.name());
            let rows = if exists { engine.count_rows(table.name(), &Filter::All).await? } else { 0 };
            tables.push(TableStatus { name: table.name(), exists, rows, has_scope_column: self.has_scope_column(table) });
        }
        Ok(StoreStatus { dir: self.dir.clone(), open: true, tables })
    }
}
