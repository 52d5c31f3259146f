use std::{cmp::Ordering, collections::HashMap};

use common::storage::types::document_chunk::{ChunkMetadata, DocumentChunk};

/// Candidate produced by hybrid retrieval and rescored downstream.
///
/// A chunk found by only one index keeps the other score as `None`; the
/// combination treats a missing side as zero rather than discarding the
/// candidate.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub filename: String,
    pub chunk_index: usize,
    pub vector_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub combined_score: f32,
    pub metadata: ChunkMetadata,
}

impl SearchCandidate {
    pub fn from_chunk(chunk: DocumentChunk) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            text: chunk.text,
            filename: chunk.filename,
            chunk_index: chunk.chunk_index,
            vector_score: None,
            lexical_score: None,
            combined_score: 0.0,
            metadata: chunk.metadata,
        }
    }

    pub fn with_vector_score(mut self, score: f32) -> Self {
        self.vector_score = Some(score);
        self
    }

    pub fn with_lexical_score(mut self, score: f32) -> Self {
        self.lexical_score = Some(score);
        self
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Maps a cosine distance in [0, 2] to a similarity in [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    clamp_unit(1.0 - distance)
}

/// Linear combination of the two retrieval signals; a missing side scores 0.
pub fn combine_score(
    vector: Option<f32>,
    lexical: Option<f32>,
    vector_weight: f32,
    lexical_weight: f32,
) -> f32 {
    vector
        .unwrap_or(0.0)
        .mul_add(vector_weight, lexical.unwrap_or(0.0) * lexical_weight)
}

/// BM25 scores are unbounded; scale each result set into [0, 1] so the
/// weighted combination stays comparable to the cosine side.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for score in scores {
        if !score.is_finite() {
            continue;
        }
        if *score < min {
            min = *score;
        }
        if *score > max {
            max = *score;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

pub fn normalize_lexical_scores(candidates: &mut [SearchCandidate]) {
    let raw: Vec<f32> = candidates
        .iter()
        .map(|candidate| candidate.lexical_score.unwrap_or(0.0))
        .collect();

    let normalized = min_max_normalize(&raw);
    for (candidate, score) in candidates.iter_mut().zip(normalized) {
        candidate.lexical_score = Some(score);
    }
}

/// Merge the two result lists, deduplicating by chunk id.
///
/// A chunk retrieved by both methods appears once with both scores
/// populated.
pub fn merge_by_chunk_id(
    vector_candidates: Vec<SearchCandidate>,
    lexical_candidates: Vec<SearchCandidate>,
) -> Vec<SearchCandidate> {
    let mut merged: HashMap<String, SearchCandidate> = HashMap::new();

    for candidate in vector_candidates.into_iter().chain(lexical_candidates) {
        match merged.get_mut(&candidate.chunk_id) {
            Some(existing) => {
                if let Some(score) = candidate.vector_score {
                    existing.vector_score = Some(score);
                }
                if let Some(score) = candidate.lexical_score {
                    existing.lexical_score = Some(score);
                }
            }
            None => {
                merged.insert(candidate.chunk_id.clone(), candidate);
            }
        }
    }

    merged.into_values().collect()
}

/// Deterministic ranking: combined score descending, ties broken by
/// vector score descending, then chunk insertion order.
pub fn sort_candidates(candidates: &mut [SearchCandidate]) {
    candidates.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.vector_score.unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
