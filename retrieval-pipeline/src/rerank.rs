use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::{debug, instrument, warn};

use common::error::AppError;

use crate::{
    analyzer::QueryMetadata,
    pipeline::RetrievalTuning,
    scoring::{sort_candidates, SearchCandidate},
};

/// Outcome of one relevance verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Relevant,
    Unclear,
    NotRelevant,
}

/// Narrow seam around the LLM relevance check so tests can swap in a
/// deterministic rule-based implementation.
#[async_trait]
pub trait RelevanceVerifier: Send + Sync {
    async fn verify(&self, query: &str, candidate_text: &str) -> Result<Verdict, AppError>;
}

const VERIFIER_SYSTEM_PROMPT: &str = "You judge whether a document fragment is relevant \
to a question. Answer with exactly one word: RELEVANT if the fragment answers the \
question, UNCLEAR if it contains related information, NOT_RELEVANT otherwise.";

/// Fragment preview length sent to the verifier.
const VERIFY_PREVIEW_CHARS: usize = 500;

pub struct LlmVerifier {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl LlmVerifier {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl RelevanceVerifier for LlmVerifier {
    async fn verify(&self, query: &str, candidate_text: &str) -> Result<Verdict, AppError> {
        let preview: String = candidate_text.chars().take(VERIFY_PREVIEW_CHARS).collect();
        let user_message = format!("Question: {query}\n\nFragment:\n{preview}");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(VERIFIER_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| AppError::LLMParsing("No content in verifier response".into()))?;

        let upper = content.trim().to_ascii_uppercase();
        if upper.contains("NOT_RELEVANT") || upper.contains("NOT RELEVANT") {
            Ok(Verdict::NotRelevant)
        } else if upper.contains("UNCLEAR") {
            Ok(Verdict::Unclear)
        } else if upper.contains("RELEVANT") {
            Ok(Verdict::Relevant)
        } else {
            // Unparseable verdicts stay neutral rather than penalizing.
            Ok(Verdict::Unclear)
        }
    }
}

/// Metadata-match bonus for one candidate, additive on the combined score.
pub fn metadata_bonus(
    candidate: &SearchCandidate,
    query: &QueryMetadata,
    tuning: &RetrievalTuning,
) -> f32 {
    let mut bonus = 0.0;

    if candidate
        .metadata
        .categories
        .iter()
        .any(|category| query.categories.contains(category))
    {
        bonus += tuning.category_bonus;
    }

    if let (Some(candidate_subtype), Some(query_subtype)) =
        (&candidate.metadata.doc_subtype, &query.doc_subtype)
    {
        if candidate_subtype == query_subtype {
            bonus += tuning.subtype_bonus;
        }
    }

    if candidate
        .metadata
        .themes
        .iter()
        .any(|theme| query.themes.contains(theme))
    {
        bonus += tuning.theme_bonus;
    }

    if let Some(section_ref) = &candidate.metadata.section_ref {
        if query
            .numeric_refs
            .iter()
            .any(|reference| section_ref.starts_with(reference.as_str()))
        {
            bonus += tuning.numeric_ref_bonus;
        }
    }

    bonus
}

/// Adjusts candidate ordering in place: metadata bonuses always, and a
/// per-candidate verification pass when analyzer confidence is low.
///
/// Verification fails open: a timeout or error never penalizes and never
/// blocks sibling verifications.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn rerank(
    candidates: &mut [SearchCandidate],
    query: &str,
    query_metadata: &QueryMetadata,
    verifier: Option<&Arc<dyn RelevanceVerifier>>,
    tuning: &RetrievalTuning,
) -> Result<(), AppError> {
    for candidate in candidates.iter_mut() {
        candidate.combined_score += metadata_bonus(candidate, query_metadata, tuning);
    }

    let should_verify = query_metadata.confidence < tuning.verify_below_confidence;
    if should_verify {
        if let Some(verifier) = verifier {
            apply_verification(candidates, query, verifier, tuning).await;
        } else {
            debug!("No verifier configured; skipping low-confidence verification");
        }
    }

    sort_candidates(candidates);
    Ok(())
}

async fn apply_verification(
    candidates: &mut [SearchCandidate],
    query: &str,
    verifier: &Arc<dyn RelevanceVerifier>,
    tuning: &RetrievalTuning,
) {
    let timeout = Duration::from_millis(tuning.verification_timeout_ms);

    let verdicts: Vec<(usize, Verdict)> = stream::iter(candidates.iter().enumerate().map(
        |(index, candidate)| {
            let verifier = Arc::clone(verifier);
            let query = query.to_owned();
            let text = candidate.text.clone();
            async move {
                match tokio::time::timeout(timeout, verifier.verify(&query, &text)).await {
                    Ok(Ok(verdict)) => (index, verdict),
                    Ok(Err(err)) => {
                        warn!(error = %err, "Relevance verification failed; no penalty applied");
                        (index, Verdict::Unclear)
                    }
                    Err(_) => {
                        warn!("Relevance verification timed out; no penalty applied");
                        (index, Verdict::Unclear)
                    }
                }
            }
        },
    ))
    .buffer_unordered(tuning.verification_concurrency.max(1))
    .collect()
    .await;

    let mut penalized = 0usize;
    for (index, verdict) in verdicts {
        if verdict == Verdict::NotRelevant {
            if let Some(candidate) = candidates.get_mut(index) {
                candidate.combined_score -= tuning.verification_penalty;
                penalized += 1;
            }
        }
    }

    debug!(penalized, "Low-confidence verification pass complete");
}
