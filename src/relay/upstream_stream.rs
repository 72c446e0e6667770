use tokio::io::AsyncWriteExt;

/// Bidirectional bridge activated only when the backend answers with a
/// protocol switch. Repeatedly long-polls the relay's per-request
/// request-stream endpoint and forwards whatever bytes it returns into the
/// backend's write side, until the relay signals 410 (orderly end) or any
/// failure occurs. On return, `writer` is always closed — this is what lets
/// the backend finish its own response and the response chunker drain.
pub async fn stream_to_backend<W>(
    client: &reqwest::Client,
    request_stream_url: &str,
    bearer_token: Option<&str>,
    mut writer: W,
) where
    W: AsyncWriteExt + Unpin,
{
    loop {
        let mut req = client.post(request_stream_url);
        if let Some(token) = bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("relay: requeststream transport error, error={}", e);
                break;
            }
        };

        let status = resp.status();
        if status.as_u16() == 410 {
            tracing::debug!("relay: requeststream ended (410)");
            break;
        }
        if !status.is_success() {
            tracing::warn!("relay: requeststream returned {}", status);
            break;
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("relay: requeststream body read error, error={}", e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&bytes).await {
            tracing::warn!("relay: backend write failed, error={}", e);
            break;
        }
    }

    let _ = writer.shutdown().await;
}
