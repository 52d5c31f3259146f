use tracing::debug;

use crate::{
    pipeline::RetrievalTuning,
    scoring::{sort_candidates, SearchCandidate},
};

/// Two-tier relevance filter.
///
/// Pass 1 keeps every candidate at or above the high threshold. Pass 2
/// fills remaining slots with candidates between the low and high
/// thresholds, in descending score order, capped at
/// `tuning.fallback_cap` additions regardless of how many slots remain.
///
/// An empty result means "no relevant information found"; the caller must
/// not invoke generation with an empty context.
pub fn filter_candidates(
    mut candidates: Vec<SearchCandidate>,
    breadth: usize,
    tuning: &RetrievalTuning,
) -> Vec<SearchCandidate> {
    sort_candidates(&mut candidates);

    let mut selected: Vec<SearchCandidate> = Vec::new();
    let mut fallback: Vec<SearchCandidate> = Vec::new();

    for candidate in candidates {
        if candidate.combined_score >= tuning.high_threshold {
            selected.push(candidate);
        } else if candidate.combined_score >= tuning.low_threshold {
            fallback.push(candidate);
        }
    }

    let confident = selected.len();
    let mut fallback_added = 0usize;

    if selected.len() < breadth {
        for candidate in fallback {
            if selected.len() >= breadth || fallback_added >= tuning.fallback_cap {
                break;
            }
            selected.push(candidate);
            fallback_added += 1;
        }
    }

    debug!(
        confident,
        fallback_added,
        total = selected.len(),
        "Relevance filter applied"
    );

    selected
}
