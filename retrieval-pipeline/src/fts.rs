use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document_chunk::{deserialize_flexible_id, DocumentChunk},
            StoredObject,
        },
    },
};

use crate::scoring::SearchCandidate;

#[derive(Debug, Deserialize)]
struct FtsScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    fts_score: Option<f32>,
}

/// Executes a BM25 full-text query over the chunk table, scoped to one
/// tenant, and returns candidates carrying raw lexical scores.
///
/// Scores are left unnormalized; the pipeline scales each result set
/// before fusion.
pub async fn lexical_search(
    take: usize,
    query: &str,
    db: &SurrealDbClient,
    tenant_id: &str,
) -> Result<Vec<SearchCandidate>, AppError> {
    if tenant_id.is_empty() {
        return Err(AppError::Validation(
            "lexical search requires a tenant_id".into(),
        ));
    }

    let sql = format!(
        "SELECT id, (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS fts_score \
         FROM {table} \
         WHERE text @0@ $terms \
           AND tenant_id = $tenant_id \
         ORDER BY fts_score DESC \
         LIMIT $limit",
        table = DocumentChunk::table_name(),
    );

    let mut response = db
        .query(sql)
        .bind(("terms", query.to_owned()))
        .bind(("tenant_id", tenant_id.to_owned()))
        .bind(("limit", take as i64))
        .await?;

    let score_rows: Vec<FtsScoreRow> = response.take(0)?;

    debug!(
        tenant_id,
        requested = take,
        returned = score_rows.len(),
        "Lexical search completed"
    );

    if score_rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = score_rows.iter().map(|row| row.id.clone()).collect();
    let chunks = DocumentChunk::get_by_ids(&ids, tenant_id, db).await?;

    let mut chunk_map: HashMap<String, DocumentChunk> = chunks
        .into_iter()
        .map(|chunk| (chunk.id.clone(), chunk))
        .collect();

    let mut results = Vec::with_capacity(score_rows.len());
    for row in score_rows {
        if let Some(chunk) = chunk_map.remove(&row.id) {
            let score = row.fts_score.unwrap_or_default();
            results.push(SearchCandidate::from_chunk(chunk).with_lexical_score(score));
        }
    }

    Ok(results)
}
