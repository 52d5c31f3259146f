use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{chunk_embedding::ChunkEmbedding, document_chunk::DocumentChunk};

stored_object!(Document, "document", {
    tenant_id: String,
    filename: String,
    format: String
});

/// Listing row: a document plus how many chunks it owns.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub document: Document,
    pub chunk_count: usize,
}

#[derive(Deserialize)]
struct CountRow {
    total: usize,
}

#[derive(Deserialize)]
struct GroupedCountRow {
    document_id: String,
    total: usize,
}

impl Document {
    pub fn new(tenant_id: String, filename: String, format: String) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), tenant_id, filename, format)
    }

    /// Structured corpora derive stable ids from their own metadata
    /// (e.g. a statute version date), so the id can be supplied.
    pub fn with_id(id: String, tenant_id: String, filename: String, format: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            tenant_id,
            filename,
            format,
        }
    }

    pub async fn count_for_tenant(
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT count() AS total FROM {} WHERE tenant_id = $tenant_id GROUP ALL",
                Self::table_name()
            ))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;

        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.total))
    }

    pub async fn list_for_tenant(
        tenant_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentSummary>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE tenant_id = $tenant_id ORDER BY created_at",
                Self::table_name()
            ))
            .query(format!(
                "SELECT document_id, count() AS total FROM {} WHERE tenant_id = $tenant_id GROUP BY document_id",
                DocumentChunk::table_name()
            ))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?;

        let documents: Vec<Document> = response.take(0)?;
        let counts: Vec<GroupedCountRow> = response.take(1)?;

        let summaries = documents
            .into_iter()
            .map(|document| {
                let chunk_count = counts
                    .iter()
                    .find(|row| row.document_id == document.id)
                    .map_or(0, |row| row.total);
                DocumentSummary {
                    document,
                    chunk_count,
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Deletes the document and all its chunks from BOTH index tables in
    /// one transaction, then self-heals any remaining inconsistency.
    ///
    /// A partial delete (vector side removed, lexical side orphaned, or
    /// the reverse) violates the cascade invariant: it is logged as a
    /// data-integrity warning and the missing side is deleted again, never
    /// surfaced to the caller.
    pub async fn delete_with_chunks(
        tenant_id: &str,
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if tenant_id.is_empty() {
            return Err(AppError::Validation(
                "document deletion requires a tenant_id".into(),
            ));
        }

        let query = format!(
            "BEGIN TRANSACTION;
             DELETE type::thing('{document_table}', $document_id) WHERE tenant_id = $tenant_id;
             DELETE {chunk_table} WHERE document_id = $document_id AND tenant_id = $tenant_id;
             DELETE {embedding_table} WHERE document_id = $document_id AND tenant_id = $tenant_id;
             COMMIT TRANSACTION;",
            document_table = Self::table_name(),
            chunk_table = DocumentChunk::table_name(),
            embedding_table = ChunkEmbedding::table_name(),
        );

        db.client
            .query(query)
            .bind(("document_id", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.to_owned()))
            .await?
            .check()?;

        Self::heal_index_inconsistency(tenant_id, document_id, db).await?;

        info!(tenant_id, document_id, "Document and chunks deleted");
        Ok(())
    }

    /// Verifies both index tables agree the document is gone and
    /// re-attempts the missing side if they do not.
    pub async fn heal_index_inconsistency(
        tenant_id: &str,
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_count =
            count_by_document(DocumentChunk::table_name(), tenant_id, document_id, db).await?;
        let embedding_count =
            count_by_document(ChunkEmbedding::table_name(), tenant_id, document_id, db).await?;

        if chunk_count == 0 && embedding_count == 0 {
            return Ok(());
        }

        warn!(
            tenant_id,
            document_id,
            chunk_count,
            embedding_count,
            "Index inconsistency detected after document delete; re-attempting"
        );

        if chunk_count > 0 {
            DocumentChunk::delete_by_document(tenant_id, document_id, db).await?;
        }
        if embedding_count > 0 {
            ChunkEmbedding::delete_by_document(tenant_id, document_id, db).await?;
        }

        Ok(())
    }
}

async fn count_by_document(
    table: &str,
    tenant_id: &str,
    document_id: &str,
    db: &SurrealDbClient,
) -> Result<usize, AppError> {
    let mut response = db
        .client
        .query(format!(
            "SELECT count() AS total FROM {table} WHERE document_id = $document_id AND tenant_id = $tenant_id GROUP ALL"
        ))
        .bind(("document_id", document_id.to_owned()))
        .bind(("tenant_id", tenant_id.to_owned()))
        .await?;

    let rows: Vec<CountRow> = response.take(0)?;
    Ok(rows.first().map_or(0, |row| row.total))
}
