pub mod analyzer;
pub mod cache;
pub mod composer;
pub mod filter;
pub mod fts;
pub mod pipeline;
pub mod rerank;
pub mod scoring;
pub mod vector;

use serde::{Deserialize, Serialize};

pub use pipeline::{QueryPipeline, RetrievalTuning};

/// One cited fragment backing an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub citation_number: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub score: f32,
    pub section_label: Option<String>,
}

/// Full answer-plus-sources tuple returned to the caller and memoized in
/// the result cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub cached: bool,
}
