use std::{future::Future, time::Duration};

use async_openai::error::OpenAIError;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::warn;

use crate::error::AppError;

/// Retries after 2s, 4s, 8s, 8s before giving up.
const MAX_RETRIES: usize = 4;

/// Classifies an error as a transient upstream condition worth retrying.
///
/// Rate limits and network-level failures are transient; malformed
/// requests, parsing failures and everything else are fatal for the call.
pub fn is_transient(error: &AppError) -> bool {
    match error {
        AppError::OpenAI(OpenAIError::Reqwest(_)) => true,
        AppError::OpenAI(OpenAIError::ApiError(api)) => {
            let kind = api
                .r#type
                .as_deref()
                .unwrap_or_default()
                .to_ascii_lowercase();
            let message = api.message.to_ascii_lowercase();
            kind.contains("rate_limit")
                || kind.contains("server_error")
                || message.contains("rate limit")
                || message.contains("overloaded")
                || message.contains("timed out")
        }
        AppError::UpstreamUnavailable(_) => true,
        _ => false,
    }
}

/// Runs `action` with bounded exponential backoff on transient failures.
///
/// Exhausted retries surface as [`AppError::UpstreamUnavailable`] rather
/// than the last transient error; fatal errors abort immediately and pass
/// through unchanged.
pub async fn retry_transient<T, A, F>(label: &str, action: A) -> Result<T, AppError>
where
    A: FnMut() -> F,
    F: Future<Output = Result<T, AppError>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(1000)
        .max_delay(Duration::from_secs(8))
        .map(jitter)
        .take(MAX_RETRIES);

    match RetryIf::spawn(strategy, action, is_transient).await {
        Ok(value) => Ok(value),
        Err(err) if is_transient(&err) => {
            warn!(operation = label, error = %err, "Retries exhausted for upstream call");
            Err(AppError::UpstreamUnavailable(format!("{label}: {err}")))
        }
        Err(err) => Err(err),
    }
}
