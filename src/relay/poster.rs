use crate::relay::protocol::{ResponseChunk, RESPONSE_CONTENT_TYPE};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Outcome of posting a single chunk.
#[derive(Debug)]
pub enum PostError {
    /// HTTP 400 — the relay is presumed to have lost our request context.
    /// Retrying is pointless; the whole request must be abandoned.
    Permanent(String),
    /// Any other non-2xx or transport failure; retried by the caller.
    Transient(String),
}

fn new_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        multiplier: 2.0,
        randomization_factor: 0.0,
        max_interval: Duration::from_secs(10),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// A single, non-retried POST of one chunk.
async fn post_response_once(
    client: &reqwest::Client,
    response_url: &str,
    chunk: &ResponseChunk,
    bearer_token: Option<&str>,
) -> Result<(), PostError> {
    let body = serde_json::to_vec(chunk).map_err(|e| PostError::Permanent(e.to_string()))?;

    let mut req = client
        .post(response_url)
        .header("content-type", RESPONSE_CONTENT_TYPE);
    if let Some(token) = bearer_token {
        req = req.bearer_auth(token);
    }

    let resp = req
        .body(body)
        .send()
        .await
        .map_err(|e| PostError::Transient(e.to_string()))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 400 {
        return Err(PostError::Permanent(format!(
            "relay rejected response with 400: {}",
            resp.text().await.unwrap_or_default()
        )));
    }
    Err(PostError::Transient(format!(
        "relay returned {}: {}",
        status,
        resp.text().await.unwrap_or_default()
    )))
}

/// Posts one chunk with bounded exponential backoff: initial interval 1s,
/// multiplier 2, no randomization, cap 10s, at most 10 attempts. A
/// permanent error short-circuits immediately without consuming an attempt.
pub async fn post_response(
    client: &reqwest::Client,
    response_url: &str,
    chunk: &ResponseChunk,
    bearer_token: Option<&str>,
) -> Result<(), PostError> {
    const MAX_ATTEMPTS: u32 = 10;

    let mut backoff = new_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match post_response_once(client, response_url, chunk, bearer_token).await {
            Ok(()) => return Ok(()),
            Err(PostError::Permanent(msg)) => return Err(PostError::Permanent(msg)),
            Err(PostError::Transient(msg)) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(PostError::Transient(msg));
                }
                let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(10));
                tracing::warn!(
                    "relay: response post failed, id={}, attempt={}, retrying_in={:?}, error={}",
                    chunk.id,
                    attempt,
                    wait,
                    msg
                );
                metrics::counter!("relay_client_post_retries_total").increment(1);
                tokio::time::sleep(wait).await;
            }
        }
    }
}
