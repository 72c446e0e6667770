use crate::backend::{build_backend_request, invoke_backend};
use crate::chunker::{collate, read_backend_source};
use crate::config::Config;
use crate::error::PollError;
use crate::relay::{get_request, post_response, HeaderPair, PostError, RelayedRequest, ResponseChunk};
use crate::transport::Transports;
use opentelemetry::propagation::Extractor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Runs one long-poll worker forever. `main` spawns `num_pending_requests`
/// of these; each pulls requests independently and hands each one to its
/// own handler task so a slow backend never blocks the next poll.
pub async fn run_worker_loop(config: Arc<Config>, transports: Arc<Transports>) -> ! {
    let relay_url = config.relay_request_url();

    loop {
        let bearer_token = match transports.remote_bearer_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("worker: fetching bearer token failed, error={}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let poll_start = Instant::now();
        match get_request(&transports.remote, &relay_url, bearer_token.as_deref()).await {
            Ok(pulled) => {
                metrics::histogram!("relay_client_poll_duration_seconds")
                    .record(poll_start.elapsed().as_secs_f64());

                let config = config.clone();
                let transports = transports.clone();
                tokio::spawn(async move {
                    handle_request(config, transports, pulled).await;
                });
            }
            Err(PollError::Timeout) => {}
            Err(PollError::Forbidden) => {
                tracing::error!("worker: relay rejected poll as forbidden, terminating process");
                std::process::exit(1);
            }
            Err(PollError::ConnectionRefused(msg)) => {
                tracing::error!("worker: relay connection refused, terminating process, error={}", msg);
                std::process::exit(1);
            }
            Err(other) => {
                tracing::warn!("worker: poll failed, error={}", other);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn handle_request(config: Arc<Config>, transports: Arc<Transports>, pulled: RelayedRequest) {
    metrics::gauge!("relay_client_inflight_requests").increment(1.0);
    let start = Instant::now();
    let outcome = handle_request_inner(&config, &transports, &pulled, start).await;
    metrics::gauge!("relay_client_inflight_requests").decrement(1.0);
    metrics::counter!("relay_client_requests_total", "outcome" => outcome).increment(1);
}

async fn handle_request_inner(
    config: &Config,
    transports: &Transports,
    pulled: &RelayedRequest,
    start: Instant,
) -> &'static str {
    let bearer_token = transports.remote_bearer_token().await.ok().flatten();

    let request = match build_backend_request(config, pulled) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!("worker: building backend request failed, id={}, error={}", pulled.id, e);
            post_synthesized_error(config, transports, &pulled.id, &e.to_string(), bearer_token.as_deref()).await;
            return "build_error";
        }
    };

    let span = tracing::info_span!("relay_client::handle_request", id = %pulled.id, method = %pulled.method);
    let parent_cx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderPairExtractor(&pulled.headers))
    });
    span.set_parent(parent_cx);

    async move {
        let invoke = match invoke_backend(&transports.local, request, &pulled.id).await {
            Ok(invoke) => invoke,
            Err(msg) => {
                tracing::warn!("worker: backend invocation failed, id={}, error={}", pulled.id, msg);
                post_synthesized_error(config, transports, &pulled.id, &msg, bearer_token.as_deref()).await;
                return "backend_error";
            }
        };

        if invoke.status.as_u16() == 101 {
            if let Some(writer) = invoke.upgraded_writer {
                let client = transports.remote.clone();
                let url = config.relay_request_stream_url(&pulled.id);
                let token = bearer_token.clone();
                tokio::spawn(async move {
                    crate::relay::stream_to_backend(&client, &url, token.as_deref(), writer).await;
                });
            }
        }

        let (block_tx, block_rx) = mpsc::unbounded_channel();
        let mut reader_handle = Some(tokio::spawn(read_backend_source(
            invoke.source,
            config.block_size,
            block_tx,
        )));

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        tokio::spawn(collate(
            invoke.seed_chunk,
            block_rx,
            config.max_chunk_size,
            config.backend_response_timeout,
            chunk_tx,
        ));

        let response_url = config.relay_response_url();
        let mut outcome = "success";

        while let Some(mut chunk) = chunk_rx.recv().await {
            if chunk.eof {
                if let Some(handle) = reader_handle.take() {
                    if let Ok(trailers) = handle.await {
                        chunk.trailers = trailers;
                    }
                }
                chunk.backend_duration_ms = Some(start.elapsed().as_millis() as u64);
                metrics::histogram!("relay_client_backend_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
            }

            metrics::counter!("relay_client_response_chunks_total").increment(1);

            match post_response(&transports.remote, &response_url, &chunk, bearer_token.as_deref()).await {
                Ok(()) => {}
                Err(PostError::Permanent(msg)) => {
                    tracing::warn!("worker: response rejected permanently, id={}, error={}", pulled.id, msg);
                    outcome = "post_permanent_error";
                    break;
                }
                Err(PostError::Transient(msg)) => {
                    tracing::warn!("worker: response post exhausted retries, id={}, error={}", pulled.id, msg);
                    outcome = "post_retries_exhausted";
                    break;
                }
            }

            if chunk.eof {
                break;
            }
        }

        outcome
    }
    .instrument(span)
    .await
}

async fn post_synthesized_error(
    config: &Config,
    transports: &Transports,
    id: &str,
    message: &str,
    bearer_token: Option<&str>,
) {
    let chunk = ResponseChunk::synthesized_error(id, 500, message);
    let url = config.relay_response_url();
    if let Err(e) = post_response(&transports.remote, &url, &chunk, bearer_token).await {
        tracing::warn!("worker: posting synthesized error chunk failed, id={}, error={:?}", id, e);
    }
}

/// Adapts a pulled request's flat header list to `opentelemetry`'s
/// extraction trait without allocating an intermediate map.
struct HeaderPairExtractor<'a>(&'a [HeaderPair]);

impl Extractor for HeaderPairExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(key))
            .map(|h| h.value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|h| h.name.as_str()).collect()
    }
}
