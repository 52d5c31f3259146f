use std::{collections::HashMap, sync::Arc};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, utils::retry::retry_transient};

/// Provider-imposed ceiling on inputs per embedding request.
const MAX_BATCH_INPUTS: usize = 2048;

/// Client for the remote embedding service.
///
/// Batches inputs up to the provider limit, retries transient failures
/// with bounded backoff, and keeps a content-hash cache so identical
/// chunk text is never embedded twice across re-uploads.
pub struct Embedder {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    dimensions: u32,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl Embedder {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            client,
            model,
            dimensions,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimensions as usize
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::InternalError("no embedding returned for input".into()))
    }

    /// Embeds `texts`, preserving input order in the returned vectors.
    ///
    /// Cached texts are served from the content-hash cache; the remainder
    /// is split into sequential provider-sized batches.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        {
            let cache = self.cache.lock().await;
            for (index, text) in texts.iter().enumerate() {
                match cache.get(&content_hash(text)) {
                    Some(vector) => results[index] = Some(vector.clone()),
                    None => misses.push(index),
                }
            }
        }

        debug!(
            total = texts.len(),
            cached = texts.len() - misses.len(),
            "Resolving embeddings"
        );

        for batch in misses.chunks(MAX_BATCH_INPUTS) {
            let inputs: Vec<String> = batch
                .iter()
                .map(|&index| texts[index].clone())
                .collect();
            let embeddings = self.request_embeddings(inputs).await?;

            if embeddings.len() != batch.len() {
                return Err(AppError::InternalError(format!(
                    "embedding service returned {} vectors for {} inputs",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let mut cache = self.cache.lock().await;
            for (&index, embedding) in batch.iter().zip(embeddings) {
                cache.insert(content_hash(&texts[index]), embedding.clone());
                results[index] = Some(embedding);
            }
        }

        results
            .into_iter()
            .map(|vector| {
                vector.ok_or_else(|| {
                    AppError::InternalError("embedding batch left an input unresolved".into())
                })
            })
            .collect()
    }

    async fn request_embeddings(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        retry_transient("embedding request", || {
            let inputs = inputs.clone();
            async move {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(self.model.clone())
                    .input(inputs)
                    .dimensions(self.dimensions)
                    .build()?;

                let response = self.client.embeddings().create(request).await?;

                Ok(response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect())
            }
        })
        .await
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn prime_cache(&self, text: &str, vector: Vec<f32>) {
        self.cache.lock().await.insert(content_hash(text), vector);
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_embedder() -> Embedder {
        // Points at a closed port so any network attempt fails fast.
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("http://127.0.0.1:1");
        Embedder::new(Arc::new(Client::with_config(config)), "test-model".into(), 3)
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("same text"), content_hash("same text"));
        assert_ne!(content_hash("same text"), content_hash("other text"));
    }

    #[tokio::test]
    async fn cached_text_is_served_without_network() {
        let embedder = offline_embedder();
        embedder.prime_cache("hello world", vec![0.1, 0.2, 0.3]).await;

        let vector = embedder
            .embed("hello world")
            .await
            .expect("cached embedding should not require the network");

        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn batch_preserves_input_order_for_cached_inputs() {
        let embedder = offline_embedder();
        embedder.prime_cache("first", vec![1.0, 0.0, 0.0]).await;
        embedder.prime_cache("second", vec![0.0, 1.0, 0.0]).await;

        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .expect("cached batch should resolve");

        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_service_surfaces_as_unavailable() {
        let embedder = offline_embedder();

        let result = embedder.embed("never embedded").await;

        assert!(
            matches!(result, Err(AppError::UpstreamUnavailable(_))),
            "expected exhausted retries, got {result:?}"
        );
    }
}
