mod config;

pub use config::RetrievalTuning;

use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
    utils::embedding::Embedder,
};

use crate::{
    analyzer::{QueryAnalyzer, QueryMetadata},
    cache::ResultCache,
    composer,
    filter::filter_candidates,
    fts::lexical_search,
    rerank::{rerank, RelevanceVerifier},
    scoring::{
        combine_score, merge_by_chunk_id, normalize_lexical_scores, sort_candidates,
        SearchCandidate,
    },
    vector::vector_chunk_search,
    QueryAnswer, SourceRef,
};

/// Request-scoped retrieval pipeline with all collaborators injected.
///
/// The cache and the two index tables are the only state shared across
/// requests; everything else lives for one call.
pub struct QueryPipeline {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<Client<OpenAIConfig>>,
    embedder: Arc<Embedder>,
    cache: Arc<ResultCache>,
    analyzer: QueryAnalyzer,
    verifier: Option<Arc<dyn RelevanceVerifier>>,
    tuning: RetrievalTuning,
    query_model: String,
}

impl QueryPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        embedder: Arc<Embedder>,
        cache: Arc<ResultCache>,
        analyzer: QueryAnalyzer,
        tuning: RetrievalTuning,
        query_model: String,
    ) -> Self {
        Self {
            db,
            openai_client,
            embedder,
            cache,
            analyzer,
            verifier: None,
            tuning,
            query_model,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn RelevanceVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Answers one question over the tenant's corpus.
    ///
    /// Flow: cache check, tenant existence, query analysis, hybrid
    /// retrieval, rerank, relevance filter, generation, cache write. An
    /// empty filter result skips generation entirely and surfaces
    /// [`AppError::NoRelevantResults`].
    #[instrument(skip_all, fields(tenant_id, breadth))]
    pub async fn answer_query(
        &self,
        tenant_id: &str,
        query_text: &str,
        breadth: usize,
    ) -> Result<QueryAnswer, AppError> {
        if tenant_id.trim().is_empty() {
            return Err(AppError::Validation(
                "answer_query requires a tenant_id".into(),
            ));
        }
        let breadth = breadth.clamp(1, self.tuning.max_breadth);

        if let Some(mut hit) = self.cache.get(tenant_id, query_text, breadth).await {
            hit.cached = true;
            return Ok(hit);
        }

        if Document::count_for_tenant(tenant_id, &self.db).await? == 0 {
            return Err(AppError::NotFound("no documents available".into()));
        }

        let query_metadata = self.analyzer.analyze(query_text).await;

        let request_timeout = Duration::from_millis(self.tuning.request_timeout_ms);
        let candidates = tokio::time::timeout(request_timeout, async {
            let embedding = self.embedder.embed(&query_metadata.expanded_query).await?;
            self.retrieve_with_embedding(tenant_id, query_text, &query_metadata, &embedding, breadth)
                .await
        })
        .await
        .map_err(|_| {
            AppError::UpstreamUnavailable("retrieval temporarily unavailable".into())
        })??;

        let selected = filter_candidates(candidates, breadth, &self.tuning);
        if selected.is_empty() {
            return Err(AppError::NoRelevantResults);
        }

        let sources = to_source_refs(&selected);
        let answer = composer::generate_answer(
            &self.openai_client,
            &self.query_model,
            &sources,
            query_text,
        )
        .await?;

        let result = QueryAnswer {
            answer,
            sources,
            cached: false,
        };
        self.cache
            .set(tenant_id, query_text, breadth, result.clone())
            .await;

        info!(
            sources = result.sources.len(),
            "Query answered and cached"
        );

        Ok(result)
    }

    /// Hybrid retrieval with a precomputed query embedding and metadata.
    ///
    /// Vector and lexical search run concurrently, results are merged by
    /// chunk id, combined with the configured weights, truncated to the
    /// breadth and reranked. Exposed separately so callers with a cached
    /// embedding (and tests) skip the embedding call.
    pub async fn retrieve_with_embedding(
        &self,
        tenant_id: &str,
        query_text: &str,
        query_metadata: &QueryMetadata,
        query_embedding: &[f32],
        breadth: usize,
    ) -> Result<Vec<SearchCandidate>, AppError> {
        let breadth = breadth.clamp(1, self.tuning.max_breadth);
        let take = breadth * self.tuning.candidate_multiplier.max(1);

        let (vector_candidates, mut lexical_candidates) = tokio::try_join!(
            vector_chunk_search(take, query_embedding, &self.db, tenant_id, None),
            lexical_search(take, query_text, &self.db, tenant_id),
        )?;

        normalize_lexical_scores(&mut lexical_candidates);

        let mut merged = merge_by_chunk_id(vector_candidates, lexical_candidates);
        for candidate in &mut merged {
            candidate.combined_score = combine_score(
                candidate.vector_score,
                candidate.lexical_score,
                self.tuning.vector_weight,
                self.tuning.lexical_weight,
            );
        }

        sort_candidates(&mut merged);
        merged.truncate(breadth);

        rerank(
            &mut merged,
            query_text,
            query_metadata,
            self.verifier.as_ref(),
            &self.tuning,
        )
        .await?;

        Ok(merged)
    }
}

fn to_source_refs(candidates: &[SearchCandidate]) -> Vec<SourceRef> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| SourceRef {
            citation_number: index + 1,
            chunk_id: candidate.chunk_id.clone(),
            document_id: candidate.document_id.clone(),
            filename: candidate.filename.clone(),
            text: candidate.text.clone(),
            score: candidate.combined_score,
            section_label: candidate.metadata.section_label.clone(),
        })
        .collect()
}
