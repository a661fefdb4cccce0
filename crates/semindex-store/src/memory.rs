//! In-process [`StorageEngine`] for tests and dry runs.
//!
//! Rows are kept as single-row batches. Every mutating or querying call is
//! appended to a call log so tests can assert exact write traffic, and any
//! operation can be made to fail on demand.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow_array::{ArrayRef, Float32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;

use semindex_core::{Error, Result};

use crate::columns;
use crate::engine::{Connector, Filter, HybridQuery, IndexSpec, StorageEngine};
use crate::schema::VECTOR_COLUMN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Scan,
    Search,
    Add,
    Delete,
    CountRows,
    CreateIndex,
    Optimize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Scan { table: String, filter: Filter },
    Search { table: String, text: String, filter: Filter, limit: usize },
    Add { table: String, rows: usize },
    Delete { table: String, filter: Filter },
    CreateIndex { table: String, column: String, spec: IndexSpec },
    Optimize { table: String },
    DropAll,
}

struct MemTable {
    schema: SchemaRef,
    rows: Vec<RecordBatch>,
    indexes: HashSet<String>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, MemTable>,
    calls: Vec<Call>,
    failures: HashMap<Op, String>,
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    /// Make every subsequent `op` fail with `message` until cleared.
    pub fn fail(&self, op: Op, message: &str) { self.lock().failures.insert(op, message.to_string()); }

    pub fn clear_failure(&self, op: Op) { self.lock().failures.remove(&op); }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn clear_calls(&self) { self.lock().calls.clear(); }

    pub fn deletes(&self) -> Vec<(String, Filter)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { table, filter } => Some((table, filter)),
                _ => None,
            })
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize { self.lock().tables.get(table).map(|t| t.rows.len()).unwrap_or(0) }

    pub fn has_index(&self, table: &str, column: &str) -> bool {
        self.lock().tables.get(table).is_some_and(|t| t.indexes.contains(column))
    }

    fn check(state: &State, op: Op) -> Result<()> {
        match state.failures.get(&op) {
            Some(msg) => Err(Error::Storage(msg.clone())),
            None => Ok(()),
        }
    }

    fn table_mut<'a>(state: &'a mut State, table: &str) -> Result<&'a mut MemTable> {
        state.tables.get_mut(table).ok_or_else(|| Error::Storage(format!("Table '{table}' was not found")))
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

fn with_distance(row: &RecordBatch, distance: f32) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = row.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new("_distance", DataType::Float32, true));
    let mut cols: Vec<ArrayRef> = row.columns().to_vec();
    cols.push(Arc::new(Float32Array::from(vec![distance])));
    RecordBatch::try_new(Arc::new(Schema::new(fields)), cols).map_err(Error::storage)
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock().tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, table: &str, schema: SchemaRef) -> Result<()> {
        let mut state = self.lock();
        if state.tables.contains_key(table) {
            return Err(Error::Storage(format!("Table '{table}' already exists")));
        }
        state.tables.insert(table.to_string(), MemTable { schema, rows: Vec::new(), indexes: HashSet::new() });
        Ok(())
    }

    async fn schema(&self, table: &str) -> Result<SchemaRef> {
        let mut state = self.lock();
        Ok(Self::table_mut(&mut state, table)?.schema.clone())
    }

    async fn scan(&self, table: &str, filter: &Filter) -> Result<Vec<RecordBatch>> {
        let mut state = self.lock();
        state.calls.push(Call::Scan { table: table.to_string(), filter: filter.clone() });
        Self::check(&state, Op::Scan)?;
        let t = Self::table_mut(&mut state, table)?;
        Ok(t.rows.iter().filter(|r| filter.matches(r, 0)).cloned().collect())
    }

    async fn hybrid_search(&self, table: &str, query: &HybridQuery<'_>) -> Result<Vec<RecordBatch>> {
        let mut state = self.lock();
        state.calls.push(Call::Search {
            table: table.to_string(),
            text: query.text.to_string(),
            filter: query.filter.clone(),
            limit: query.limit,
        });
        Self::check(&state, Op::Search)?;
        let t = Self::table_mut(&mut state, table)?;
        let mut scored: Vec<(f32, &RecordBatch)> = t
            .rows
            .iter()
            .filter(|r| query.filter.matches(r, 0))
            .map(|r| {
                let v = columns::vector(r, VECTOR_COLUMN, 0).unwrap_or_default();
                (1.0 - cosine(query.vector, &v), r)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.into_iter().take(query.limit).map(|(d, r)| with_distance(r, d)).collect()
    }

    async fn add(&self, table: &str, batch: RecordBatch) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::Add { table: table.to_string(), rows: batch.num_rows() });
        Self::check(&state, Op::Add)?;
        let t = Self::table_mut(&mut state, table)?;
        if batch.schema().fields() != t.schema.fields() {
            return Err(Error::Storage(format!("schema mismatch appending to '{table}'")));
        }
        for i in 0..batch.num_rows() {
            t.rows.push(batch.slice(i, 1));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::Delete { table: table.to_string(), filter: filter.clone() });
        Self::check(&state, Op::Delete)?;
        let t = Self::table_mut(&mut state, table)?;
        t.rows.retain(|r| !filter.matches(r, 0));
        Ok(())
    }

    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<usize> {
        let mut state = self.lock();
        Self::check(&state, Op::CountRows)?;
        let t = Self::table_mut(&mut state, table)?;
        Ok(t.rows.iter().filter(|r| filter.matches(r, 0)).count())
    }

    async fn create_index(&self, table: &str, column: &str, spec: &IndexSpec) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::CreateIndex { table: table.to_string(), column: column.to_string(), spec: spec.clone() });
        Self::check(&state, Op::CreateIndex)?;
        let t = Self::table_mut(&mut state, table)?;
        if !t.indexes.insert(column.to_string()) {
            return Err(Error::Storage(format!("Index on '{column}' already exists")));
        }
        Ok(())
    }

    async fn optimize(&self, table: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::Optimize { table: table.to_string() });
        Self::check(&state, Op::Optimize)?;
        Self::table_mut(&mut state, table).map(|_| ())
    }

    async fn drop_all(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::DropAll);
        state.tables.clear();
        Ok(())
    }
}

/// Hands out the same [`MemoryEngine`] for every directory.
pub struct MemoryConnector {
    engine: Arc<MemoryEngine>,
}

impl MemoryConnector {
    pub fn new(engine: Arc<MemoryEngine>) -> Self { Self { engine } }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _dir: &Path) -> Result<Arc<dyn StorageEngine>> {
        MemoryEngine::check(&self.engine.lock(), Op::Connect)?;
        Ok(self.engine.clone())
    }
}
