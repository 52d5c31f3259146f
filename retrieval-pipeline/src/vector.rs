use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk_embedding::{ChunkEmbedding, SearchFilters},
            document_chunk::DocumentChunk,
        },
    },
};

use crate::scoring::{distance_to_similarity, SearchCandidate};

/// Nearest-neighbour chunk retrieval: KNN over the embedding table, then
/// hydration of the owning chunks with the tenant re-checked.
pub async fn vector_chunk_search(
    take: usize,
    embedding: &[f32],
    db: &SurrealDbClient,
    tenant_id: &str,
    filters: Option<&SearchFilters>,
) -> Result<Vec<SearchCandidate>, AppError> {
    let hits = ChunkEmbedding::vector_search(take, embedding, db, tenant_id, filters).await?;

    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = hits.iter().map(|hit| hit.chunk_id.clone()).collect();
    let chunks = DocumentChunk::get_by_ids(&ids, tenant_id, db).await?;

    let mut chunk_map: HashMap<String, DocumentChunk> = chunks
        .into_iter()
        .map(|chunk| (chunk.id.clone(), chunk))
        .collect();

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(chunk) = chunk_map.remove(&hit.chunk_id) {
            results.push(
                SearchCandidate::from_chunk(chunk)
                    .with_vector_score(distance_to_similarity(hit.distance)),
            );
        }
    }

    Ok(results)
}
