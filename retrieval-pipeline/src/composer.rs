use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use tracing::debug;

use common::{error::AppError, utils::retry::retry_transient};

use crate::SourceRef;

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions using only the provided context \
fragments. Cite fragments by their bracketed number, e.g. [2]. If the context does not \
contain the answer, say so instead of guessing.";

/// Builds the numbered context block the generation step consumes:
/// `[n] <chunk text>\nSource: <filename>` segments, one per source.
pub fn build_context(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|source| {
            let mut block = format!(
                "[{}] {}\nSource: {}",
                source.citation_number, source.text, source.filename
            );
            if let Some(label) = &source.section_label {
                block.push_str(&format!(" ({label})"));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn create_user_message(context: &str, query: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context}

        User Question:
        ==================
        {query}
        "
    )
}

/// Invokes generation over the composed context.
///
/// The answer is free text; the only validation is that it is non-empty.
pub async fn generate_answer(
    client: &Arc<Client<OpenAIConfig>>,
    model: &str,
    sources: &[SourceRef],
    query: &str,
) -> Result<String, AppError> {
    let context = build_context(sources);
    let user_message = create_user_message(&context, query);

    debug!(
        sources = sources.len(),
        context_chars = context.len(),
        "Invoking answer generation"
    );

    let response = retry_transient("answer generation", || {
        let user_message = user_message.clone();
        async move {
            let request = CreateChatCompletionRequestArgs::default()
                .model(model)
                .messages([
                    ChatCompletionRequestSystemMessage::from(ANSWER_SYSTEM_PROMPT).into(),
                    ChatCompletionRequestUserMessage::from(user_message).into(),
                ])
                .build()?;

            Ok(client.chat().create(request).await?)
        }
    })
    .await?;

    let answer = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .map(|content| content.trim().to_owned())
        .unwrap_or_default();

    if answer.is_empty() {
        return Err(AppError::LLMParsing(
            "Generation returned an empty answer".into(),
        ));
    }

    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(number: usize, text: &str, filename: &str, label: Option<&str>) -> SourceRef {
        SourceRef {
            citation_number: number,
            chunk_id: format!("chunk-{number}"),
            document_id: "doc".to_owned(),
            filename: filename.to_owned(),
            text: text.to_owned(),
            score: 0.9,
            section_label: label.map(str::to_owned),
        }
    }

    #[test]
    fn context_blocks_are_numbered_with_sources() {
        let context = build_context(&[
            source(1, "First fragment.", "rules.txt", None),
            source(2, "Second fragment.", "annex.txt", Some("Article 4.101")),
        ]);

        assert_eq!(
            context,
            "[1] First fragment.\nSource: rules.txt\n\n\
             [2] Second fragment.\nSource: annex.txt (Article 4.101)"
        );
    }

    #[test]
    fn user_message_contains_context_and_query() {
        let message = create_user_message("[1] fragment", "what is required?");
        assert!(message.contains("[1] fragment"));
        assert!(message.contains("what is required?"));
    }
}
