use crate::backend::BackendSource;
use crate::relay::{HeaderPair, ResponseChunk};
use http_body_util::BodyExt;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use std::time::Duration;

/// Reads the backend body into `block_size`-bounded blocks and pushes them
/// onto `tx`. Every non-zero read is emitted even if the
/// same call also returned an error. Returns the backend's trailers, if
/// any were present (only meaningful for the non-upgraded body case — an
/// upgraded byte stream carries none).
pub async fn read_backend_source(
    mut source: BackendSource,
    block_size: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Vec<HeaderPair> {
    let mut trailers = Vec::new();

    match &mut source {
        BackendSource::Body(body) => loop {
            let frame = match body.frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::warn!("chunker: backend body read error, error={}", e);
                    break;
                }
                None => break,
            };

            if frame.is_data() {
                match frame.into_data() {
                    Ok(data) => {
                        for block in data.chunks(block_size.max(1)) {
                            if tx.send(block.to_vec()).is_err() {
                                return trailers;
                            }
                        }
                    }
                    Err(_) => {}
                }
            } else if let Ok(trailer_map) = frame.into_trailers() {
                trailers = trailer_map
                    .iter()
                    .map(|(name, value)| {
                        HeaderPair::new(name.as_str(), value.to_str().unwrap_or_default())
                    })
                    .collect();
            }
        },
        BackendSource::Upgraded(reader) => loop {
            let mut buf = vec![0u8; block_size.max(1)];
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(buf).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("chunker: upgraded stream read error, error={}", e);
                    break;
                }
            }
        },
    }

    trailers
}

/// Coalesces reader blocks into response chunks sized by `max_chunk_size` or
/// `backend_response_timeout`. Emits a keep-alive once
/// every ~30 timer ticks when the backend has been silent and there is
/// nothing pending to report.
pub async fn collate(
    seed: ResponseChunk,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    max_chunk_size: usize,
    backend_response_timeout: Duration,
    out_tx: mpsc::UnboundedSender<ResponseChunk>,
) {
    const KEEPALIVE_TICKS: u32 = 30;

    let mut pending = seed;
    let mut timeout_count: u32 = 0;
    let mut timer = tokio::time::interval(backend_response_timeout);
    timer.tick().await;

    loop {
        tokio::select! {
            block = rx.recv() => {
                match block {
                    Some(bytes) => {
                        pending.body.extend_from_slice(&bytes);
                        if pending.body.len() > max_chunk_size {
                            let id = pending.id.clone();
                            let emitted = std::mem::replace(&mut pending, ResponseChunk::empty(id));
                            if out_tx.send(emitted).is_err() {
                                return;
                            }
                            timer = tokio::time::interval(backend_response_timeout);
                            timer.tick().await;
                            timeout_count = 0;
                        }
                    }
                    None => {
                        pending.eof = true;
                        let _ = out_tx.send(pending);
                        return;
                    }
                }
            }
            _ = timer.tick() => {
                timeout_count += 1;
                if !pending.body.is_empty() || pending.status_code.is_some() || timeout_count > KEEPALIVE_TICKS {
                    let id = pending.id.clone();
                    let emitted = std::mem::replace(&mut pending, ResponseChunk::empty(id));
                    if out_tx.send(emitted).is_err() {
                        return;
                    }
                    timeout_count = 0;
                }
            }
        }
    }
}
