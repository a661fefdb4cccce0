//! LanceDB-backed [`StorageEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::scalar::FullTextSearchQuery;
use lancedb::index::vector::{IvfFlatIndexBuilder, IvfPqIndexBuilder};
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase, VectorQuery};
use lancedb::table::OptimizeAction;
use lancedb::{connect, Connection, DistanceType};

use semindex_core::{Error, Result};

use crate::engine::{Connector, Filter, HybridQuery, IndexSpec, StorageEngine};

pub struct LanceEngine {
    conn: Connection,
    dir: PathBuf,
}

impl LanceEngine {
    pub async fn open(dir: &Path) -> Result<Self> {
        let conn = connect(dir.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(|e| Error::Initialization(format!("lancedb connect {}: {e}", dir.display())))?;
        Ok(Self { conn, dir: dir.to_path_buf() })
    }

    async fn table(&self, name: &str) -> Result<lancedb::Table> {
        self.conn.open_table(name).execute().await.map_err(Error::storage)
    }

    fn vector_query(table: &lancedb::Table, query: &HybridQuery<'_>) -> Result<VectorQuery> {
        let mut q = table
            .query()
            .nearest_to(query.vector)
            .map_err(Error::storage)?
            .distance_type(DistanceType::Cosine)
            .limit(query.limit);
        if let Some(sql) = query.filter.to_sql() {
            q = q.only_if(sql);
        }
        Ok(q)
    }
}

#[async_trait]
impl StorageEngine for LanceEngine {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.conn.table_names().execute().await.map_err(Error::storage)
    }

    async fn create_table(&self, table: &str, schema: SchemaRef) -> Result<()> {
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter().map(Ok), schema);
        self.conn.create_table(table, Box::new(iter)).execute().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn schema(&self, table: &str) -> Result<SchemaRef> {
        self.table(table).await?.schema().await.map_err(Error::storage)
    }

    async fn scan(&self, table: &str, filter: &Filter) -> Result<Vec<RecordBatch>> {
        let t = self.table(table).await?;
        let mut q = t.query();
        if let Some(sql) = filter.to_sql() {
            q = q.only_if(sql);
        }
        q.execute().await.map_err(Error::storage)?.try_collect().await.map_err(Error::storage)
    }

    async fn hybrid_search(&self, table: &str, query: &HybridQuery<'_>) -> Result<Vec<RecordBatch>> {
        let t = self.table(table).await?;
        if !query.text.trim().is_empty() {
            let hybrid = Self::vector_query(&t, query)?.full_text_search(FullTextSearchQuery::new(query.text.to_string()));
            match hybrid.execute().await {
                Ok(stream) => return stream.try_collect().await.map_err(Error::storage),
                Err(error) => {
                    tracing::warn!(%error, table, "hybrid query failed; falling back to vector-only");
                }
            }
        }
        Self::vector_query(&t, query)?
            .execute()
            .await
            .map_err(Error::storage)?
            .try_collect()
            .await
            .map_err(Error::storage)
    }

    async fn add(&self, table: &str, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
        self.table(table).await?.add(Box::new(reader)).execute().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
        let predicate = filter.to_sql().unwrap_or_else(|| "true".to_string());
        self.table(table).await?.delete(&predicate).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.table(table).await?.count_rows(filter.to_sql()).await.map_err(Error::storage)
    }

    async fn create_index(&self, table: &str, column: &str, spec: &IndexSpec) -> Result<()> {
        let index = match *spec {
            IndexSpec::FullText => Index::FTS(Default::default()),
            IndexSpec::IvfFlat { partitions } => Index::IvfFlat(
                IvfFlatIndexBuilder::default().distance_type(DistanceType::Cosine).num_partitions(partitions),
            ),
            // lance PQ codes are 8-bit
            IndexSpec::IvfPq { partitions, sub_vectors, bits: _ } => Index::IvfPq(
                IvfPqIndexBuilder::default()
                    .distance_type(DistanceType::Cosine)
                    .num_partitions(partitions)
                    .num_sub_vectors(sub_vectors),
            ),
        };
        self.table(table)
            .await?
            .create_index(&[column], index)
            .replace(false)
            .execute()
            .await
            .map_err(Error::storage)
    }

    async fn optimize(&self, table: &str) -> Result<()> {
        self.table(table).await?.optimize(OptimizeAction::All).await.map_err(Error::storage)?;
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        for name in self.table_names().await? {
            let path = self.dir.join(format!("{name}.lance"));
            match std::fs::remove_dir_all(&path) {
                Ok(()) => tracing::info!(table = %name, "dropped table"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Storage(format!("drop {}: {e}", path.display()))),
            }
        }
        Ok(())
    }
}

/// Opens a [`LanceEngine`] per directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanceConnector;

#[async_trait]
impl Connector for LanceConnector {
    async fn connect(&self, dir: &Path) -> Result<Arc<dyn StorageEngine>> {
        Ok(Arc::new(LanceEngine::open(dir).await?))
    }
}
