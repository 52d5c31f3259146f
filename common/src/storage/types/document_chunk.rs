use std::collections::BTreeMap;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::chunk_embedding::ChunkEmbedding;

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    tenant_id: String,
    text: String,
    chunk_index: usize,
    filename: String,
    #[serde(default)]
    metadata: ChunkMetadata
});

/// Metadata attached to every chunk.
///
/// The named fields are the ones reranking pattern-matches on; anything
/// corpus-specific goes into the open `extra` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Domain categories the chunk applies to (e.g. usage functions).
    #[serde(default)]
    pub categories: Vec<String>,
    /// Document subtype label (e.g. new-build vs existing stock).
    #[serde(default)]
    pub doc_subtype: Option<String>,
    /// Thematic tags (e.g. fire-safety, ventilation).
    #[serde(default)]
    pub themes: Vec<String>,
    /// Numeric structural identifier (e.g. "4.101").
    #[serde(default)]
    pub section_ref: Option<String>,
    /// Human-readable structural label used in citations.
    #[serde(default)]
    pub section_label: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DocumentChunk {
    pub fn new(
        document_id: String,
        tenant_id: String,
        text: String,
        chunk_index: usize,
        filename: String,
        metadata: ChunkMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            tenant_id,
            text,
            chunk_index,
            filename,
            metadata,
        }
    }

    /// Stores the chunk together with its vector-index row.
    ///
    /// The embedding row denormalizes tenant, document and metadata so
    /// vector search can filter before ranking.
    pub async fn store_with_embedding(
        chunk: DocumentChunk,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let embedding_row = ChunkEmbedding::new(
            &chunk.id,
            chunk.document_id.clone(),
            chunk.tenant_id.clone(),
            embedding,
            chunk.metadata.clone(),
        );

        db.store_item(chunk).await?;
        db.store_item(embedding_row).await?;

        Ok(())
    }

    /// Deletes all chunks of one document, scoped to the tenant.
    pub async fn delete_by_document(
        tenant_id: &str,
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "DELETE {} WHERE document_id = $document_id AND tenant_id = $tenant_id",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    /// Fetches chunks by id, re-checking tenant ownership.
    pub async fn get_by_ids(
        ids: &[String],
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE id IN $things AND tenant_id = $tenant_id")
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;

        let chunks: Vec<Self> = response.take(0)?;
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(tenant_id: &str, document_id: &str, index: usize) -> DocumentChunk {
        DocumentChunk::new(
            document_id.to_owned(),
            tenant_id.to_owned(),
            format!("chunk {index} text about building rules"),
            index,
            "rules.txt".to_owned(),
            ChunkMetadata::default(),
        )
    }

    #[tokio::test]
    async fn test_store_with_embedding_creates_both_rows() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let chunk = sample_chunk("tenant_a", "doc_1", 0);
        let chunk_id = chunk.id.clone();

        DocumentChunk::store_with_embedding(chunk, vec![0.1, 0.2, 0.3], &db)
            .await
            .expect("Failed to store chunk with embedding");

        let stored: Option<DocumentChunk> =
            db.get_item(&chunk_id).await.expect("Failed to fetch chunk");
        assert!(stored.is_some(), "chunk row should exist");

        let embeddings: Vec<ChunkEmbedding> = db
            .get_all_stored_items()
            .await
            .expect("Failed to fetch embeddings");
        assert_eq!(embeddings.len(), 1, "embedding row should exist");
        assert_eq!(embeddings[0].document_id, "doc_1");
        assert_eq!(embeddings[0].tenant_id, "tenant_a");
    }

    #[tokio::test]
    async fn test_delete_by_document_is_tenant_scoped() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.store_item(sample_chunk("tenant_a", "doc_1", 0))
            .await
            .expect("store failed");
        db.store_item(sample_chunk("tenant_b", "doc_1", 0))
            .await
            .expect("store failed");

        DocumentChunk::delete_by_document("tenant_a", "doc_1", &db)
            .await
            .expect("delete failed");

        let remaining: Vec<DocumentChunk> = db
            .get_all_stored_items()
            .await
            .expect("Failed to fetch chunks");
        assert_eq!(remaining.len(), 1, "only tenant_a chunks should be gone");
        assert_eq!(remaining[0].tenant_id, "tenant_b");
    }

    #[tokio::test]
    async fn test_get_by_ids_excludes_other_tenants() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mine = sample_chunk("tenant_a", "doc_1", 0);
        let theirs = sample_chunk("tenant_b", "doc_2", 0);
        let ids = vec![mine.id.clone(), theirs.id.clone()];

        db.store_item(mine).await.expect("store failed");
        db.store_item(theirs).await.expect("store failed");

        let fetched = DocumentChunk::get_by_ids(&ids, "tenant_a", &db)
            .await
            .expect("fetch failed");

        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].tenant_id, "tenant_a");
    }
}
