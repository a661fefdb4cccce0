//! Null-tolerant cell accessors for query results.

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int32Type, Int64Type};
use arrow_array::{Array, RecordBatch};

pub fn string(batch: &RecordBatch, name: &str, row: usize) -> Option<String> {
    let col = batch.column_by_name(name)?.as_string_opt::<i32>()?;
    col.is_valid(row).then(|| col.value(row).to_string())
}

pub fn int32(batch: &RecordBatch, name: &str, row: usize) -> Option<i32> {
    let col = batch.column_by_name(name)?.as_primitive_opt::<Int32Type>()?;
    col.is_valid(row).then(|| col.value(row))
}

pub fn int64(batch: &RecordBatch, name: &str, row: usize) -> Option<i64> {
    let col = batch.column_by_name(name)?.as_primitive_opt::<Int64Type>()?;
    col.is_valid(row).then(|| col.value(row))
}

/// Float cell, accepting either Float32 or Float64 columns (score columns vary).
pub fn float(batch: &RecordBatch, name: &str, row: usize) -> Option<f32> {
    let col = batch.column_by_name(name)?;
    if let Some(c) = col.as_primitive_opt::<Float32Type>() {
        return c.is_valid(row).then(|| c.value(row));
    }
    let c = col.as_primitive_opt::<Float64Type>()?;
    c.is_valid(row).then(|| c.value(row) as f32)
}

pub fn vector(batch: &RecordBatch, name: &str, row: usize) -> Option<Vec<f32>> {
    let col = batch.column_by_name(name)?.as_fixed_size_list_opt()?;
    if !col.is_valid(row) {
        return None;
    }
    let inner = col.value(row);
    let values = inner.as_primitive_opt::<Float32Type>()?;
    Some(values.values().to_vec())
}
