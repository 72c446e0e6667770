//! End-to-end tests exercising the backend request builder, invoker,
//! response chunker, and response poster together against fake backend
//! and relay HTTP servers — the same pipeline `worker::handle_request_inner`
//! drives, without the long-poll loop around it.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use relay_client::backend::{build_backend_request, invoke_backend};
use relay_client::chunker::{collate, read_backend_source};
use relay_client::config::Config;
use relay_client::relay::{post_response, stream_to_backend, HeaderPair, RelayedRequest, ResponseChunk};
use relay_client::transport::Transports;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(relay: &MockServer, backend: &MockServer) -> Config {
    Config {
        remote_request_timeout: Duration::from_secs(5),
        backend_response_timeout: Duration::from_millis(50),
        disable_auth_for_remote: true,
        root_ca_file: None,
        authentication_token_file: None,
        backend_scheme: "http".into(),
        backend_address: backend.address().to_string(),
        backend_path: String::new(),
        preserve_host: false,
        relay_scheme: "http".into(),
        relay_address: relay.address().to_string(),
        relay_prefix: String::new(),
        server_name: "my-cluster".into(),
        num_pending_requests: 1,
        max_idle_conns_per_host: 10,
        max_chunk_size: 256 * 1024,
        block_size: 64 * 1024,
        disable_http2: false,
        force_http2: false,
        admin_listen: "127.0.0.1:0".into(),
        log_level: "info".into(),
    }
}

fn pulled_request(path_and_query: &str) -> RelayedRequest {
    RelayedRequest {
        id: "req-1".into(),
        method: "GET".into(),
        url: format!("http://placeholder{path_and_query}"),
        host: None,
        headers: vec![],
        body: vec![],
    }
}

/// Drives one pulled request through build → invoke → chunker → poster,
/// returning every chunk the relay received, in order.
async fn run_pipeline(config: &Config, transports: &Transports, pulled: &RelayedRequest) -> Vec<ResponseChunk> {
    let request = build_backend_request(config, pulled).unwrap();
    let invoke = invoke_backend(&transports.local, request, &pulled.id)
        .await
        .unwrap();

    let (block_tx, block_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_backend_source(invoke.source, config.block_size, block_tx));

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    tokio::spawn(collate(
        invoke.seed_chunk,
        block_rx,
        config.max_chunk_size,
        config.backend_response_timeout,
        chunk_tx,
    ));

    let mut posted = Vec::new();
    let response_url = config.relay_response_url();
    while let Some(mut chunk) = chunk_rx.recv().await {
        if chunk.eof {
            chunk.trailers = reader.await.unwrap_or_default();
        }
        post_response(&transports.remote, &response_url, &chunk, None)
            .await
            .unwrap();
        posted.push(chunk.clone());
        if chunk.eof {
            break;
        }
    }
    posted
}

#[tokio::test]
async fn happy_path_relays_full_response_in_one_chunk() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&backend)
        .await;

    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/response"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&relay)
        .await;

    let config = config_for(&relay, &backend);
    let transports = Transports::build(&config).await.unwrap();
    let pulled = pulled_request("/healthz");

    let posted = run_pipeline(&config, &transports, &pulled).await;

    assert_eq!(posted.len(), 1);
    assert!(posted[0].eof);
    assert_eq!(posted[0].status_code, Some(200));
    assert_eq!(posted[0].body, b"ok");
    assert!(posted[0].backend_duration_ms.is_some());
}

#[tokio::test]
async fn small_chunk_size_splits_response_across_multiple_posts() {
    let backend = MockServer::start().await;
    let body = "x".repeat(5000);
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .mount(&backend)
        .await;

    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/response"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&relay)
        .await;

    let mut config = config_for(&relay, &backend);
    config.max_chunk_size = 1000;
    config.block_size = 512;

    let transports = Transports::build(&config).await.unwrap();
    let pulled = pulled_request("/big");

    let posted = run_pipeline(&config, &transports, &pulled).await;

    assert!(posted.len() > 1, "expected more than one chunk, got {}", posted.len());
    assert!(posted[..posted.len() - 1].iter().all(|c| !c.eof));
    assert!(posted.last().unwrap().eof);

    let reassembled: Vec<u8> = posted.iter().flat_map(|c| c.body.clone()).collect();
    assert_eq!(reassembled, body.into_bytes());
}

#[tokio::test]
async fn backend_headers_are_preserved_in_seed_chunk() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/pods"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-custom", "value-1")
                .set_body_string("body"),
        )
        .mount(&backend)
        .await;

    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/response"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&relay)
        .await;

    let config = config_for(&relay, &backend);
    let transports = Transports::build(&config).await.unwrap();
    let pulled = pulled_request("/api/v1/pods?watch=true");

    let posted = run_pipeline(&config, &transports, &pulled).await;

    assert_eq!(posted.len(), 1);
    assert!(posted[0]
        .headers
        .contains(&HeaderPair::new("x-custom", "value-1")));
}

#[tokio::test]
async fn backend_connection_refused_is_reported_as_synthesized_error() {
    let dead_backend = MockServer::start().await;
    let backend_addr = dead_backend.address().to_string();
    drop(dead_backend); // nothing listens here anymore; connection refused

    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/response"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&relay)
        .await;

    let backend_placeholder = MockServer::start().await;
    let mut config = config_for(&relay, &backend_placeholder);
    config.backend_address = backend_addr;
    let transports = Transports::build(&config).await.unwrap();

    let pulled = pulled_request("/healthz");
    let request = build_backend_request(&config, &pulled).unwrap();
    let err = invoke_backend(&transports.local, request, &pulled.id)
        .await
        .unwrap_err();

    let chunk = ResponseChunk::synthesized_error(&pulled.id, 500, &err);
    post_response(&transports.remote, &config.relay_response_url(), &chunk, None)
        .await
        .unwrap();

    assert_eq!(chunk.status_code, Some(500));
    assert!(chunk.eof);
}

/// A minimal HTTP/1 backend that answers every request with 101 Switching
/// Protocols, then echoes whatever bytes it reads on the upgraded connection
/// back to the caller and closes once its peer's write side closes.
async fn spawn_upgrade_echo_backend() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let io = hyper_util::rt::TokioIo::new(stream);
                let service = hyper::service::service_fn(upgrade_echo_handler);
                let _ = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                    .http1()
                    .keep_alive(true)
                    .serve_connection_with_upgrades(io, service)
                    .await;
            });
        }
    });

    addr
}

async fn upgrade_echo_handler(
    mut req: hyper::Request<hyper::body::Incoming>,
) -> Result<hyper::Response<http_body_util::combinators::BoxBody<Bytes, hyper::Error>>, std::convert::Infallible> {
    let response = hyper::Response::builder()
        .status(101)
        .header("connection", "upgrade")
        .header("upgrade", "relay-test")
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .unwrap();

    tokio::spawn(async move {
        if let Ok(upgraded) = hyper::upgrade::on(&mut req).await {
            let mut io = hyper_util::rt::TokioIo::new(upgraded);
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match io.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            let _ = io.write_all(&received).await;
            let _ = io.shutdown().await;
        }
    });

    Ok(response)
}

#[tokio::test]
async fn protocol_upgrade_bridges_upstream_and_terminates_response_stream() {
    let backend_addr = spawn_upgrade_echo_backend().await;

    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/server/requeststream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"in1".to_vec()))
        .up_to_n_times(1)
        .mount(&relay)
        .await;
    Mock::given(method("POST"))
        .and(path("/server/requeststream"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&relay)
        .await;

    let backend_placeholder = MockServer::start().await;
    let mut config = config_for(&relay, &backend_placeholder);
    config.backend_address = backend_addr.to_string();
    config.backend_response_timeout = Duration::from_millis(20);
    let transports = Transports::build(&config).await.unwrap();

    let pulled = pulled_request("/echo");
    let request = build_backend_request(&config, &pulled).unwrap();
    let invoke = invoke_backend(&transports.local, request, &pulled.id)
        .await
        .unwrap();

    assert_eq!(invoke.status.as_u16(), 101);
    let writer = invoke
        .upgraded_writer
        .expect("101 response should carry a driveable upgrade");

    let stream_url = config.relay_request_stream_url(&pulled.id);
    let remote = transports.remote.clone();
    tokio::spawn(async move {
        stream_to_backend(&remote, &stream_url, None, writer).await;
    });

    let (block_tx, block_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_backend_source(invoke.source, config.block_size, block_tx));

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    tokio::spawn(collate(
        invoke.seed_chunk,
        block_rx,
        config.max_chunk_size,
        config.backend_response_timeout,
        chunk_tx,
    ));

    let mut body = Vec::new();
    let mut saw_eof = false;
    while let Some(chunk) = tokio::time::timeout(Duration::from_secs(5), chunk_rx.recv())
        .await
        .expect("response stream should terminate, not hang")
    {
        body.extend_from_slice(&chunk.body);
        if chunk.eof {
            saw_eof = true;
            break;
        }
    }

    assert!(saw_eof, "upstream close should drive the response stream to eof");
    assert_eq!(body, b"in1");
    let _ = reader.await;
}
