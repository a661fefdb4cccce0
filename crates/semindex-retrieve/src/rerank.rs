//! Context-aware rescoring of documentation hits.

use semindex_core::types::{DocumentContext, QueryContext};

pub const SIMILARITY_WEIGHT: f32 = 0.3;
pub const AREA_MATCH_BONUS: f32 = 0.4;
pub const TECHNOLOGY_BONUS: f32 = 0.2;
pub const AREA_MISMATCH_PENALTY: f32 = 0.1;
pub const HEADING_WEIGHT: f32 = 0.15;
pub const GENERIC_PENALTY: f32 = 0.1;
pub const PATH_WEIGHT: f32 = 0.1;

/// Everything the scoring pass reads for one candidate.
#[derive(Debug, Clone)]
pub struct RerankSignals<'a> {
    pub similarity: f32,
    pub query: &'a QueryContext,
    pub document: &'a DocumentContext,
    /// Cosine between the query and the chunk heading; 0 without a heading.
    pub heading_similarity: f32,
    pub path_similarity: f32,
}

fn technologies_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.eq_ignore_ascii_case(y)))
}

pub fn rerank_score(s: &RerankSignals<'_>) -> f32 {
    let (q, d) = (s.query, s.document);
    let mut score = s.similarity * SIMILARITY_WEIGHT;

    let area_match = q.area.is_specific() && q.area == d.area;
    if area_match {
        score += AREA_MATCH_BONUS;
        if technologies_intersect(&q.dominant_technologies, &d.dominant_technologies) {
            score += TECHNOLOGY_BONUS;
        }
    } else if q.area.is_specific() && d.area.is_specific() && q.area != d.area {
        score -= AREA_MISMATCH_PENALTY;
    }

    score += s.heading_similarity * HEADING_WEIGHT;

    if d.is_generic && !area_match {
        score -= GENERIC_PENALTY;
    }

    score += s.path_similarity * PATH_WEIGHT;
    score.clamp(0.0, 1.0)
}
