pub mod chunker;
pub mod structural;

use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, DocumentSummary},
            document_chunk::{ChunkMetadata, DocumentChunk},
        },
    },
    utils::embedding::Embedder,
};

use chunker::{chunk_text, ChunkerConfig};
use structural::{chunk_structural_tree, StructuralTree};

/// Everything the upload collaborator hands over for one document.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub tenant_id: String,
    /// Stable id override for corpora that derive ids from their own
    /// metadata; a fresh UUID otherwise.
    pub document_id: Option<String>,
    pub filename: String,
    pub format: String,
    pub text: String,
    /// Present when the source format encodes hierarchy; switches the
    /// chunker to structural mode.
    pub structure: Option<StructuralTree>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_created: usize,
}

/// Chunks, embeds and stores one document.
///
/// All embeddings are computed (batched, content-cached) before any row
/// is written, so an embedding failure leaves nothing behind. Empty
/// extraction is a validation failure, not an empty document.
#[instrument(skip_all, fields(tenant_id = %request.tenant_id, filename = %request.filename))]
pub async fn ingest_document(
    db: &SurrealDbClient,
    embedder: &Embedder,
    request: IngestionRequest,
    chunker_config: &ChunkerConfig,
) -> Result<IngestReport, AppError> {
    if request.tenant_id.trim().is_empty() {
        return Err(AppError::Validation(
            "ingestion requires a tenant_id".into(),
        ));
    }

    let pieces: Vec<(String, ChunkMetadata)> = match &request.structure {
        Some(tree) => chunk_structural_tree(tree)
            .into_iter()
            .map(|chunk| (chunk.text, chunk.metadata))
            .collect(),
        None => chunk_text(&request.text, chunker_config)?
            .into_iter()
            .map(|text| (text, ChunkMetadata::default()))
            .collect(),
    };

    if pieces.is_empty() {
        return Err(AppError::Validation(format!(
            "no text could be extracted from '{}'",
            request.filename
        )));
    }

    let texts: Vec<String> = pieces.iter().map(|(text, _)| text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;

    let document = match request.document_id {
        Some(id) => Document::with_id(id, request.tenant_id.clone(), request.filename.clone(), request.format.clone()),
        None => Document::new(request.tenant_id.clone(), request.filename.clone(), request.format.clone()),
    };
    let document_id = document.id.clone();
    db.store_item(document).await?;

    let chunk_lengths: Vec<usize> = texts.iter().map(|text| text.chars().count()).collect();

    for (index, ((text, metadata), embedding)) in
        pieces.into_iter().zip(embeddings).enumerate()
    {
        let chunk = DocumentChunk::new(
            document_id.clone(),
            request.tenant_id.clone(),
            text,
            index,
            request.filename.clone(),
            metadata,
        );
        DocumentChunk::store_with_embedding(chunk, embedding, db).await?;
    }

    let total: usize = chunk_lengths.iter().sum();
    info!(
        document_id = %document_id,
        chunks = chunk_lengths.len(),
        min_chunk_chars = chunk_lengths.iter().min().copied().unwrap_or(0),
        max_chunk_chars = chunk_lengths.iter().max().copied().unwrap_or(0),
        avg_chunk_chars = total / chunk_lengths.len().max(1),
        "Document ingested"
    );

    Ok(IngestReport {
        document_id,
        chunks_created: chunk_lengths.len(),
    })
}

/// Removes a document and all its chunks from both indexes.
pub async fn delete_document(
    db: &SurrealDbClient,
    tenant_id: &str,
    document_id: &str,
) -> Result<(), AppError> {
    Document::delete_with_chunks(tenant_id, document_id, db).await
}

/// Lists a tenant's documents with their chunk counts.
pub async fn list_documents(
    db: &SurrealDbClient,
    tenant_id: &str,
) -> Result<Vec<DocumentSummary>, AppError> {
    Document::list_for_tenant(tenant_id, db).await
}
