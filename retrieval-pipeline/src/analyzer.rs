use std::{collections::HashSet, sync::Arc};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use common::{error::AppError, utils::retry::retry_transient};

/// Structured metadata derived from one raw query. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    pub categories: HashSet<String>,
    pub numeric_refs: HashSet<String>,
    pub doc_subtype: Option<String>,
    pub themes: HashSet<String>,
    pub expanded_query: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Moderate,
    Low,
    VeryLow,
}

impl QueryMetadata {
    /// Degraded analysis: no extracted structure, original query, zero
    /// confidence.
    pub fn fallback(query: &str) -> Self {
        Self {
            categories: HashSet::new(),
            numeric_refs: HashSet::new(),
            doc_subtype: None,
            themes: HashSet::new(),
            expanded_query: query.to_owned(),
            confidence: 0.0,
        }
    }

    pub fn confidence_band(&self) -> ConfidenceBand {
        if self.confidence >= 0.8 {
            ConfidenceBand::High
        } else if self.confidence >= 0.6 {
            ConfidenceBand::Moderate
        } else if self.confidence >= 0.4 {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::VeryLow
        }
    }
}

/// Controlled vocabulary of the corpus, offered to the extraction model.
#[derive(Debug, Clone, Default)]
pub struct DomainVocabulary {
    pub categories: Vec<String>,
    pub doc_subtypes: Vec<String>,
    pub themes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzerResponse {
    categories: Vec<String>,
    doc_subtype: Option<String>,
    themes: Vec<String>,
    expanded_query: String,
    confidence: f32,
}

const ANALYZER_SYSTEM_PROMPT: &str = "You analyze search queries over a document corpus. \
Extract the domain categories, document subtype and themes the query refers to, \
restricted to the provided vocabulary. Rewrite the query into an expanded form that \
adds likely synonyms and related phrasing without changing its meaning. Report your \
confidence in the extraction between 0 and 1.";

pub struct QueryAnalyzer {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    vocabulary: DomainVocabulary,
}

impl QueryAnalyzer {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        vocabulary: DomainVocabulary,
    ) -> Self {
        Self {
            client,
            model,
            vocabulary,
        }
    }

    /// Analyzes a raw query. Infallible by contract: any extraction
    /// failure (malformed output, exhausted retries) degrades to the
    /// fallback metadata instead of surfacing an error.
    #[instrument(skip_all)]
    pub async fn analyze(&self, query: &str) -> QueryMetadata {
        let mut metadata = match self.extract(query).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(error = %err, "Query analysis failed; degrading to defaults");
                QueryMetadata::fallback(query)
            }
        };

        // Numeric references are extracted locally so they survive an
        // analyzer degradation and stay deterministic.
        for reference in extract_numeric_refs(query) {
            metadata.numeric_refs.insert(reference);
        }

        metadata.confidence = metadata.confidence.clamp(0.0, 1.0);
        if metadata.expanded_query.trim().is_empty() {
            metadata.expanded_query = query.to_owned();
        }

        debug!(
            confidence = metadata.confidence,
            categories = metadata.categories.len(),
            numeric_refs = metadata.numeric_refs.len(),
            "Query analysis complete"
        );

        metadata
    }

    async fn extract(&self, query: &str) -> Result<QueryMetadata, AppError> {
        let response = retry_transient("query analysis", || async move {
            let request = CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages([
                    ChatCompletionRequestSystemMessage::from(ANALYZER_SYSTEM_PROMPT).into(),
                    ChatCompletionRequestUserMessage::from(self.build_user_message(query)).into(),
                ])
                .response_format(ResponseFormat::JsonSchema {
                    json_schema: ResponseFormatJsonSchema {
                        description: Some("Query metadata extraction".into()),
                        name: "query_metadata".into(),
                        schema: Some(analyzer_schema()),
                        strict: Some(true),
                    },
                })
                .build()?;

            Ok(self.client.chat().create(request).await?)
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| AppError::LLMParsing("No content in analyzer response".into()))?;

        let parsed: AnalyzerResponse = serde_json::from_str(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse analyzer output: {e}"))
        })?;

        Ok(QueryMetadata {
            categories: parsed.categories.into_iter().collect(),
            numeric_refs: HashSet::new(),
            doc_subtype: parsed.doc_subtype.filter(|s| !s.trim().is_empty()),
            themes: parsed.themes.into_iter().collect(),
            expanded_query: parsed.expanded_query,
            confidence: parsed.confidence,
        })
    }

    fn build_user_message(&self, query: &str) -> String {
        format!(
            "Known categories: {categories}\n\
             Known document subtypes: {subtypes}\n\
             Known themes: {themes}\n\n\
             Query:\n{query}",
            categories = self.vocabulary.categories.join(", "),
            subtypes = self.vocabulary.doc_subtypes.join(", "),
            themes = self.vocabulary.themes.join(", "),
        )
    }
}

fn analyzer_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "categories": {
                "type": "array",
                "items": { "type": "string" }
            },
            "doc_subtype": {
                "type": ["string", "null"]
            },
            "themes": {
                "type": "array",
                "items": { "type": "string" }
            },
            "expanded_query": { "type": "string" },
            "confidence": { "type": "number" }
        },
        "required": ["categories", "doc_subtype", "themes", "expanded_query", "confidence"],
        "additionalProperties": false
    })
}

/// Deterministic scan for numeric references like "4.101", plus bare
/// numbers that directly follow a structural keyword ("article 12").
pub fn extract_numeric_refs(query: &str) -> Vec<String> {
    const STRUCTURAL_KEYWORDS: [&str; 6] = [
        "article", "articles", "section", "sections", "chapter", "chapters",
    ];

    let mut references = Vec::new();
    let mut previous_was_keyword = false;

    for token in query.split_whitespace() {
        let trimmed = token.trim_matches(|c: char| !c.is_ascii_digit());

        if !trimmed.is_empty() {
            let is_dotted = is_dotted_number(trimmed);
            let is_plain = trimmed.chars().all(|c| c.is_ascii_digit());

            if is_dotted || (is_plain && previous_was_keyword) {
                if !references.iter().any(|existing| existing == trimmed) {
                    references.push(trimmed.to_owned());
                }
            }
        }

        let lowered = token
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        previous_was_keyword = STRUCTURAL_KEYWORDS.contains(&lowered.as_str());
    }

    references
}

fn is_dotted_number(token: &str) -> bool {
    match token.split_once('.') {
        Some((whole, fraction)) => {
            !whole.is_empty()
                && !fraction.is_empty()
                && whole.chars().all(|c| c.is_ascii_digit())
                && fraction.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_keeps_original_query_and_zero_confidence() {
        let metadata = QueryMetadata::fallback("what about stairs?");
        assert_eq!(metadata.expanded_query, "what about stairs?");
        assert!((metadata.confidence - 0.0).abs() < f32::EPSILON);
        assert!(metadata.categories.is_empty());
        assert_eq!(metadata.confidence_band(), ConfidenceBand::VeryLow);
    }

    #[test]
    fn confidence_bands_follow_thresholds() {
        let mut metadata = QueryMetadata::fallback("q");

        metadata.confidence = 0.85;
        assert_eq!(metadata.confidence_band(), ConfidenceBand::High);
        metadata.confidence = 0.7;
        assert_eq!(metadata.confidence_band(), ConfidenceBand::Moderate);
        metadata.confidence = 0.5;
        assert_eq!(metadata.confidence_band(), ConfidenceBand::Low);
        metadata.confidence = 0.2;
        assert_eq!(metadata.confidence_band(), ConfidenceBand::VeryLow);
    }

    #[test]
    fn extracts_dotted_references() {
        let refs = extract_numeric_refs("what does 4.101 say about exits?");
        assert_eq!(refs, vec!["4.101".to_owned()]);
    }

    #[test]
    fn extracts_keyword_prefixed_plain_numbers() {
        let refs = extract_numeric_refs("summarize article 12 please");
        assert_eq!(refs, vec!["12".to_owned()]);
    }

    #[test]
    fn plain_numbers_without_keyword_are_ignored() {
        let refs = extract_numeric_refs("a building of 12 floors");
        assert!(refs.is_empty());
    }

    #[test]
    fn strips_trailing_punctuation() {
        let refs = extract_numeric_refs("see section 2.1.");
        assert_eq!(refs, vec!["2.1".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_model_degrades_to_fallback() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("http://127.0.0.1:1");
        let analyzer = QueryAnalyzer::new(
            Arc::new(Client::with_config(config)),
            "test-model".into(),
            DomainVocabulary::default(),
        );

        let metadata = analyzer.analyze("what does article 4.101 require?").await;

        assert!((metadata.confidence - 0.0).abs() < f32::EPSILON);
        assert_eq!(metadata.expanded_query, "what does article 4.101 require?");
        assert!(
            metadata.numeric_refs.contains("4.101"),
            "local extraction must survive analyzer degradation"
        );
    }
}
