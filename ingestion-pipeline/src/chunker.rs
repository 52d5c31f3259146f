use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

use common::error::AppError;

/// Parameters for generic chunking.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in characters.
    pub window: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// Accumulate whole sentences instead of sliding a fixed window.
    pub sentence_aware: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window: 800,
            overlap: 150,
            sentence_aware: true,
        }
    }
}

/// Collapses whitespace runs into single spaces and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits document text into retrievable units.
///
/// Empty input yields zero chunks, not an error. The windowed mode
/// slides a fixed character window by `window - overlap`; the
/// sentence-aware mode never splits mid-sentence and falls below the
/// sentence level only when a single sentence exceeds the window.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Result<Vec<String>, AppError> {
    if config.window == 0 {
        return Err(AppError::Validation("chunk window must be positive".into()));
    }
    if config.overlap >= config.window {
        return Err(AppError::Validation(format!(
            "chunk overlap {} must be smaller than the window {}",
            config.overlap, config.window
        )));
    }

    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    let chunks = if config.sentence_aware {
        sentence_chunks(&normalized, config)?
    } else {
        windowed_chunks(&normalized, config.window, config.overlap)
    };

    debug!(
        chunks = chunks.len(),
        input_chars = normalized.chars().count(),
        sentence_aware = config.sentence_aware,
        "Chunked document text"
    );

    Ok(chunks)
}

fn windowed_chunks(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window {
        return vec![text.to_owned()];
    }

    let stride = window - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + window).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

fn sentence_chunks(text: &str, config: &ChunkerConfig) -> Result<Vec<String>, AppError> {
    let chunk_config = ChunkConfig::new(config.window)
        .with_overlap(config.overlap)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    Ok(splitter.chunks(text).map(str::to_owned).collect())
}
