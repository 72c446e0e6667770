use crate::relay::{HeaderPair, ResponseChunk};
use crate::transport::{BackendBody, LocalClient};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{ReadHalf, WriteHalf};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Where the response chunker reads backend bytes from — either the
/// still-open response body of an ordinary request, or the read half of an
/// upgraded connection when the backend answered with 101.
pub enum BackendSource {
    Body(hyper::body::Incoming),
    Upgraded(ReadHalf<TokioIo<Upgraded>>),
}

pub struct InvokeResult {
    pub seed_chunk: ResponseChunk,
    pub status: http::StatusCode,
    pub source: BackendSource,
    /// `Some` exactly when `status == 101` — the upstream streamer forwards
    /// relay bytes here. A 101 whose upgrade can't be driven is an `Err`
    /// from `invoke_backend`, never an `Ok` with this left `None`.
    pub upgraded_writer: Option<WriteHalf<TokioIo<Upgraded>>>,
}

/// Executes the backend request. Injects the current tracing span's
/// context as W3C trace-context headers before sending.
///
/// A 101 response's upgraded connection is surfaced on the *response*, not
/// the request — `hyper::upgrade::on(&mut request)` is the server-side
/// pattern and always errors here. If the backend answers 101 but the
/// upgrade cannot be driven (body not writable for this connection), that
/// is an unsupported upgrade and the whole request is an error, not a
/// silent downgrade to an ordinary body read.
pub async fn invoke_backend(
    client: &LocalClient,
    mut request: http::Request<BackendBody>,
    request_id: &str,
) -> Result<InvokeResult, String> {
    inject_trace_context(&mut request);

    let response = client
        .request(request)
        .await
        .map_err(|e| format!("backend request failed: {e}"))?;

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            HeaderPair::new(
                name.as_str(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let seed_chunk = ResponseChunk {
        id: request_id.to_string(),
        status_code: Some(status.as_u16()),
        headers,
        trailers: Vec::new(),
        body: Vec::new(),
        eof: false,
        backend_duration_ms: None,
    };

    if status.as_u16() == 101 {
        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| format!("unsupported 101 upgrade: {e}"))?;
        let (read_half, write_half) = tokio::io::split(TokioIo::new(upgraded));
        return Ok(InvokeResult {
            seed_chunk,
            status,
            source: BackendSource::Upgraded(read_half),
            upgraded_writer: Some(write_half),
        });
    }

    Ok(InvokeResult {
        seed_chunk,
        status,
        source: BackendSource::Body(response.into_body()),
        upgraded_writer: None,
    })
}

fn inject_trace_context(request: &mut http::Request<BackendBody>) {
    let cx = tracing::Span::current().context();
    let mut injector = HeaderMapInjector(request.headers_mut());
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut injector);
    });
}

/// Adapts `http::HeaderMap` to `opentelemetry`'s injection trait without
/// allocating an intermediate map.
struct HeaderMapInjector<'a>(&'a mut http::HeaderMap);

impl opentelemetry::propagation::Injector for HeaderMapInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::HeaderName::try_from(key) {
            if let Ok(val) = http::HeaderValue::try_from(value) {
                self.0.insert(name, val);
            }
        }
    }
}
