//! Engine score columns to unit similarity.

use arrow_array::RecordBatch;
use semindex_embed::cosine_similarity;
use semindex_store::columns;
use semindex_store::schema::VECTOR_COLUMN;

/// Reciprocal-rank-fusion constant used by the engine's hybrid reranker.
pub const RRF_K: f32 = 60.0;

/// Similarity in [0, 1] for one result row.
///
/// A cosine `_distance` is used directly. Fused hybrid rows carry a
/// rank-based `_relevance_score` that says nothing about closeness, so their
/// similarity is the cosine between `query` and the row's stored vector. The
/// fused or BM25 `_score` is only mapped to [0, 1] when no vector came back.
pub fn normalized_score(batch: &RecordBatch, row: usize, query: &[f32]) -> f32 {
    let raw = if let Some(d) = columns::float(batch, "_distance", row) {
        1.0 - d
    } else if let Some(v) = columns::vector(batch, VECTOR_COLUMN, row).filter(|v| v.len() == query.len()) {
        cosine_similarity(query, &v)
    } else if let Some(r) = columns::float(batch, "_relevance_score", row) {
        // best possible fused score for a hit ranked first in both lists is 2/(k+1)
        r * (RRF_K + 1.0) / 2.0
    } else if let Some(s) = columns::float(batch, "_score", row) {
        s / (1.0 + s)
    } else {
        0.0
    };
    clamp_unit(raw)
}

pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::types::Float32Type;
    use arrow_array::{ArrayRef, FixedSizeListArray, Float32Array, Float64Array};
    use std::sync::Arc;

    fn batch(name: &str, col: ArrayRef) -> RecordBatch { RecordBatch::try_from_iter(vec![(name, col)]).unwrap() }

    fn vectors(rows: Vec<[f32; 2]>) -> ArrayRef {
        Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            rows.into_iter().map(|r| Some(r.into_iter().map(Some).collect::<Vec<_>>())),
            2,
        ))
    }

    #[test]
    fn distance_becomes_similarity() {
        let b = batch("_distance", Arc::new(Float32Array::from(vec![0.25, 1.5, -0.1])));
        assert_eq!(normalized_score(&b, 0, &[]), 0.75);
        assert_eq!(normalized_score(&b, 1, &[]), 0.0);
        assert_eq!(normalized_score(&b, 2, &[]), 1.0);
    }

    #[test]
    fn fused_rows_are_scored_by_their_vectors() {
        // ranked third by full-text alone, but pointing away from the query
        let fused: ArrayRef = Arc::new(Float32Array::from(vec![1.0 / (RRF_K + 3.0), 1.0 / (RRF_K + 5.0)]));
        let b = RecordBatch::try_from_iter(vec![
            ("_relevance_score", fused),
            (VECTOR_COLUMN, vectors(vec![[0.0, 1.0], [0.6, 0.8]])),
        ])
        .unwrap();
        let query = [1.0, 0.0];
        assert_eq!(normalized_score(&b, 0, &query), 0.0);
        assert!((normalized_score(&b, 1, &query) - 0.6).abs() < 1e-5);
        assert!(normalized_score(&b, 0, &query) < 0.3, "a high fused rank alone must not pass the threshold");
    }

    #[test]
    fn fused_and_bm25_scores_without_vectors() {
        let top = 2.0 / (RRF_K + 1.0);
        let b = batch("_relevance_score", Arc::new(Float32Array::from(vec![top, top / 2.0])));
        assert!((normalized_score(&b, 0, &[1.0]) - 1.0).abs() < 1e-6);
        assert!((normalized_score(&b, 1, &[1.0]) - 0.5).abs() < 1e-6);

        let b = batch("_score", Arc::new(Float64Array::from(vec![3.0])));
        assert_eq!(normalized_score(&b, 0, &[1.0]), 0.75);
    }

    #[test]
    fn missing_score_is_zero() {
        let b = batch("id", Arc::new(Float32Array::from(vec![1.0])));
        assert_eq!(normalized_score(&b, 0, &[1.0]), 0.0);
    }
}
