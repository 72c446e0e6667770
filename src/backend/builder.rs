use crate::config::Config;
use crate::error::RelayClientError;
use crate::relay::RelayedRequest;
use crate::transport::BackendBody;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Uri};
use http_body_util::{BodyExt, Full};

fn backend_body(bytes: Vec<u8>) -> BackendBody {
    Full::new(Bytes::from(bytes)).map_err(|never| match never {}).boxed()
}

/// Rewrites a pulled `RelayedRequest` into a request against the backend
/// Only the path and query of the pulled URL are meaningful — its
/// host is a placeholder and is replaced with `backend_address`.
pub fn build_backend_request(
    config: &Config,
    pulled: &RelayedRequest,
) -> Result<http::Request<BackendBody>, RelayClientError> {
    let pulled_uri: Uri = pulled
        .url
        .parse()
        .map_err(|e| RelayClientError::Internal(format!("parsing pulled url {}: {e}", pulled.url)))?;

    let path_and_query = pulled_uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let backend_path = format!(
        "{}{}",
        config.backend_path.trim_end_matches('/'),
        path_and_query
    );

    let uri: Uri = format!(
        "{}://{}{}",
        config.backend_scheme, config.backend_address, backend_path
    )
    .parse()
    .map_err(|e| RelayClientError::Internal(format!("building backend uri: {e}")))?;

    let method: http::Method = pulled
        .method
        .parse()
        .map_err(|e| RelayClientError::Internal(format!("invalid method {}: {e}", pulled.method)))?;

    let mut builder = http::Request::builder().method(method).uri(uri);

    for pair in &pulled.headers {
        let name = HeaderName::try_from(pair.name.as_str())
            .map_err(|e| RelayClientError::Internal(format!("invalid header name {}: {e}", pair.name)))?;
        let value = HeaderValue::try_from(pair.value.as_str())
            .map_err(|e| RelayClientError::Internal(format!("invalid header value for {}: {e}", pair.name)))?;
        builder = builder.header(name, value);
    }

    if config.preserve_host {
        if let Some(ref host) = pulled.host {
            let value = HeaderValue::try_from(host.as_str())
                .map_err(|e| RelayClientError::Internal(format!("invalid host header {host}: {e}")))?;
            builder = builder.header(http::header::HOST, value);
        }
    }

    if let Some(ref token_file) = config.authentication_token_file {
        let token = std::fs::read_to_string(token_file).map_err(|e| {
            RelayClientError::Internal(format!(
                "reading authentication_token_file {}: {e}",
                token_file.display()
            ))
        })?;
        let value = HeaderValue::try_from(format!("Bearer {}", token.trim()))
            .map_err(|e| RelayClientError::Internal(format!("invalid bearer token: {e}")))?;
        builder = builder.header(http::header::AUTHORIZATION, value);
    }

    builder
        .body(backend_body(pulled.body.clone()))
        .map_err(|e| RelayClientError::Internal(format!("building backend request: {e}")))
}
