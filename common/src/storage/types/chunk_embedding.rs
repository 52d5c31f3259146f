use surrealdb::RecordId;
use tracing::debug;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::document_chunk::{ChunkMetadata, DocumentChunk};

stored_object!(ChunkEmbedding, "chunk_embedding", {
    /// Record link to the owning document_chunk
    chunk_id: RecordId,
    /// Denormalized document id for bulk deletes
    document_id: String,
    /// Denormalized tenant id for hard isolation
    tenant_id: String,
    /// Embedding vector
    embedding: Vec<f32>,
    /// Denormalized chunk metadata so predicates apply before ranking
    #[serde(default)]
    metadata: ChunkMetadata
});

/// Optional metadata predicates applied before vector ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Keep rows whose categories intersect this set.
    pub categories_any: Option<Vec<String>>,
    /// Keep rows with exactly this document subtype.
    pub doc_subtype: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.categories_any.is_none() && self.doc_subtype.is_none()
    }
}

/// One nearest-neighbour result: chunk key plus cosine distance.
#[derive(Debug, Deserialize)]
pub struct VectorHit {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub chunk_id: String,
    pub distance: f32,
}

impl ChunkEmbedding {
    /// `chunk_id` is the **key** part of the document_chunk id (the UUID),
    /// not "document_chunk:uuid".
    pub fn new(
        chunk_id: &str,
        document_id: String,
        tenant_id: String,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id: RecordId::from_table_key(DocumentChunk::table_name(), chunk_id),
            document_id,
            tenant_id,
            embedding,
            metadata,
        }
    }

    /// Nearest-neighbour search over the HNSW index, filtered to the
    /// tenant (and optional metadata predicates) before ranking.
    pub async fn vector_search(
        take: usize,
        embedding: &[f32],
        db: &SurrealDbClient,
        tenant_id: &str,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<VectorHit>, AppError> {
        if tenant_id.is_empty() {
            return Err(AppError::Validation(
                "vector search requires a tenant_id".into(),
            ));
        }

        let mut conditions = String::from("tenant_id = $tenant_id");
        if let Some(filters) = filters {
            if filters.categories_any.is_some() {
                conditions.push_str(" AND metadata.categories CONTAINSANY $filter_categories");
            }
            if filters.doc_subtype.is_some() {
                conditions.push_str(" AND metadata.doc_subtype = $filter_subtype");
            }
        }

        let query = format!(
            "SELECT chunk_id, vector::distance::knn() AS distance FROM {table} \
             WHERE {conditions} AND embedding <|{take},40|> {embedding:?} \
             ORDER BY distance",
            table = Self::table_name(),
        );

        let mut request = db.client.query(query).bind(("tenant_id", tenant_id.to_owned()));
        if let Some(filters) = filters {
            if let Some(categories) = filters.categories_any.clone() {
                request = request.bind(("filter_categories", categories));
            }
            if let Some(subtype) = filters.doc_subtype.clone() {
                request = request.bind(("filter_subtype", subtype));
            }
        }

        let mut response = request.await?;
        let hits: Vec<VectorHit> = response.take(0)?;

        debug!(
            tenant_id,
            requested = take,
            returned = hits.len(),
            "Vector search completed"
        );

        Ok(hits)
    }

    /// Delete all embeddings belonging to one document, tenant-scoped.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::indexes::{ensure_indexes, redefine_hnsw_index};
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        ensure_indexes(&db, 3).await.expect("index setup failed");
        redefine_hnsw_index(&db, 3)
            .await
            .expect("index resize failed");

        db
    }

    async fn seed_embedding(
        db: &SurrealDbClient,
        tenant_id: &str,
        document_id: &str,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> String {
        let chunk_key = Uuid::new_v4().to_string();
        let row = ChunkEmbedding::new(
            &chunk_key,
            document_id.to_owned(),
            tenant_id.to_owned(),
            vector,
            metadata,
        );
        db.store_item(row).await.expect("Failed to store embedding");
        chunk_key
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_distance() {
        let db = setup_test_db().await;

        let near = seed_embedding(
            &db,
            "tenant_a",
            "doc_1",
            vec![1.0, 0.0, 0.0],
            ChunkMetadata::default(),
        )
        .await;
        let far = seed_embedding(
            &db,
            "tenant_a",
            "doc_1",
            vec![0.0, 1.0, 0.0],
            ChunkMetadata::default(),
        )
        .await;

        let hits = ChunkEmbedding::vector_search(2, &[0.9, 0.1, 0.0], &db, "tenant_a", None)
            .await
            .expect("search failed");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, near, "closest vector should rank first");
        assert_eq!(hits[1].chunk_id, far);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_vector_search_never_crosses_tenants() {
        let db = setup_test_db().await;

        seed_embedding(
            &db,
            "tenant_b",
            "doc_1",
            vec![1.0, 0.0, 0.0],
            ChunkMetadata::default(),
        )
        .await;

        let hits = ChunkEmbedding::vector_search(5, &[1.0, 0.0, 0.0], &db, "tenant_a", None)
            .await
            .expect("search failed");

        assert!(hits.is_empty(), "tenant_a must not see tenant_b vectors");
    }

    #[tokio::test]
    async fn test_vector_search_applies_metadata_predicates() {
        let db = setup_test_db().await;

        let tagged = seed_embedding(
            &db,
            "tenant_a",
            "doc_1",
            vec![1.0, 0.0, 0.0],
            ChunkMetadata {
                categories: vec!["residential".to_owned()],
                ..ChunkMetadata::default()
            },
        )
        .await;
        seed_embedding(
            &db,
            "tenant_a",
            "doc_1",
            vec![1.0, 0.0, 0.0],
            ChunkMetadata {
                categories: vec!["office".to_owned()],
                ..ChunkMetadata::default()
            },
        )
        .await;

        let filters = SearchFilters {
            categories_any: Some(vec!["residential".to_owned()]),
            doc_subtype: None,
        };
        let hits =
            ChunkEmbedding::vector_search(5, &[1.0, 0.0, 0.0], &db, "tenant_a", Some(&filters))
                .await
                .expect("search failed");

        assert_eq!(hits.len(), 1, "predicate should exclude the office chunk");
        assert_eq!(hits[0].chunk_id, tagged);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_a_programming_error() {
        let db = setup_test_db().await;

        let result = ChunkEmbedding::vector_search(5, &[1.0, 0.0, 0.0], &db, "", None).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
