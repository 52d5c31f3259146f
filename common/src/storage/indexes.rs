use tracing::debug;

use crate::{error::AppError, storage::db::SurrealDbClient};

const FTS_ANALYZER_NAME: &str = "corpus_fts_analyzer";
const CHUNK_FTS_INDEX: &str = "document_chunk_text_fts_idx";
const EMBEDDING_HNSW_INDEX: &str = "idx_embedding_chunk_embedding";

/// Ensure the lexical (BM25) and vector (HNSW) indexes exist.
///
/// Idempotent: safe to call on every startup. The FTS analyzer stems with
/// snowball(english) and strips case/diacritics so keyword matching is
/// language-aware rather than byte-exact.
pub async fn ensure_indexes(db: &SurrealDbClient, embedding_dimension: usize) -> Result<(), AppError> {
    let analyzer_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);"
    );
    db.client.query(analyzer_query).await?.check()?;

    let fts_query = format!(
        "DEFINE INDEX IF NOT EXISTS {CHUNK_FTS_INDEX} ON TABLE document_chunk \
         FIELDS text SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25;"
    );
    db.client.query(fts_query).await?.check()?;

    let hnsw_query = format!(
        "DEFINE INDEX IF NOT EXISTS {EMBEDDING_HNSW_INDEX} ON TABLE chunk_embedding \
         FIELDS embedding HNSW DIMENSION {embedding_dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
    );
    db.client.query(hnsw_query).await?.check()?;

    db.client
        .query("DEFINE INDEX IF NOT EXISTS idx_document_tenant ON TABLE document FIELDS tenant_id;")
        .await?
        .check()?;
    db.client
        .query("DEFINE INDEX IF NOT EXISTS idx_chunk_document ON TABLE document_chunk FIELDS tenant_id, document_id;")
        .await?
        .check()?;
    db.client
        .query("DEFINE INDEX IF NOT EXISTS idx_embedding_document ON TABLE chunk_embedding FIELDS tenant_id, document_id;")
        .await?
        .check()?;

    debug!(
        dimension = embedding_dimension,
        "Lexical and vector indexes ensured"
    );

    Ok(())
}

/// Recreate the HNSW index with a new embedding dimension.
///
/// Surreal requires the index definition to be recreated when the
/// embedding length changes; also used by tests to shrink the dimension.
pub async fn redefine_hnsw_index(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    let query = format!(
        "DEFINE INDEX OVERWRITE {EMBEDDING_HNSW_INDEX} ON TABLE chunk_embedding \
         FIELDS embedding HNSW DIMENSION {embedding_dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
    );
    db.client.query(query).await?.check()?;

    Ok(())
}
