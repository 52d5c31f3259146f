use serde::{Deserialize, Serialize};

/// Tunable parameters governing each retrieval stage.
///
/// The weights and bonus magnitudes are empirically chosen starting
/// points, not requirements, so all of them deserialize from
/// configuration with these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Weight of the vector similarity signal in score fusion.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Weight of the lexical (BM25) signal in score fusion.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    /// Candidates fetched per index as a multiple of the breadth.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Upper bound on the requested breadth.
    #[serde(default = "default_max_breadth")]
    pub max_breadth: usize,
    /// Scores at or above this are trustworthy enough to cite outright.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    /// Floor for fallback candidates when too few pass the high bar.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f32,
    /// Cap on fallback additions regardless of remaining slots.
    #[serde(default = "default_fallback_cap")]
    pub fallback_cap: usize,
    /// Bonus for a category intersection with the query metadata.
    #[serde(default = "default_category_bonus")]
    pub category_bonus: f32,
    /// Bonus for an exact document-subtype match.
    #[serde(default = "default_subtype_bonus")]
    pub subtype_bonus: f32,
    /// Bonus for thematic tag overlap.
    #[serde(default = "default_theme_bonus")]
    pub theme_bonus: f32,
    /// Bonus when a referenced number prefixes the chunk's section id.
    #[serde(default = "default_numeric_ref_bonus")]
    pub numeric_ref_bonus: f32,
    /// Penalty applied on a not-relevant verification verdict.
    #[serde(default = "default_verification_penalty")]
    pub verification_penalty: f32,
    /// Verification runs when analyzer confidence is below this.
    #[serde(default = "default_verify_below_confidence")]
    pub verify_below_confidence: f32,
    /// Per-candidate verification timeout; elapsing means no penalty.
    #[serde(default = "default_verification_timeout_ms")]
    pub verification_timeout_ms: u64,
    /// Bound on concurrent verification calls.
    #[serde(default = "default_verification_concurrency")]
    pub verification_concurrency: usize,
    /// Request-level timeout over the embed/search/rerank span.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            max_breadth: default_max_breadth(),
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            fallback_cap: default_fallback_cap(),
            category_bonus: default_category_bonus(),
            subtype_bonus: default_subtype_bonus(),
            theme_bonus: default_theme_bonus(),
            numeric_ref_bonus: default_numeric_ref_bonus(),
            verification_penalty: default_verification_penalty(),
            verify_below_confidence: default_verify_below_confidence(),
            verification_timeout_ms: default_verification_timeout_ms(),
            verification_concurrency: default_verification_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

const fn default_vector_weight() -> f32 {
    0.7
}

const fn default_lexical_weight() -> f32 {
    0.3
}

const fn default_candidate_multiplier() -> usize {
    3
}

const fn default_max_breadth() -> usize {
    100
}

const fn default_high_threshold() -> f32 {
    0.65
}

const fn default_low_threshold() -> f32 {
    0.40
}

const fn default_fallback_cap() -> usize {
    3
}

const fn default_category_bonus() -> f32 {
    0.3
}

const fn default_subtype_bonus() -> f32 {
    0.2
}

const fn default_theme_bonus() -> f32 {
    0.2
}

const fn default_numeric_ref_bonus() -> f32 {
    0.1
}

const fn default_verification_penalty() -> f32 {
    0.2
}

const fn default_verify_below_confidence() -> f32 {
    0.6
}

const fn default_verification_timeout_ms() -> u64 {
    10_000
}

const fn default_verification_concurrency() -> usize {
    4
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}
