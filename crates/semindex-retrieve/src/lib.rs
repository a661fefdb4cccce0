//! Scoped retrieval, reranking and the [`SemanticIndex`] facade.

pub mod context;
pub mod rerank;
pub mod retriever;
pub mod score;
pub mod semantic_index;
pub mod test_filter;

pub use context::{ContextInferer, KeywordInferer};
pub use retriever::{DocSearchOptions, Retriever, SearchOptions};
pub use semantic_index::{IndexStatus, SemanticIndex};
pub use test_filter::TestFilter;
