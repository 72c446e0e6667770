use crate::metrics::Metrics;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Shared state behind the admin surface. `ready` flips to true once the
/// worker pool has started, which is all `/healthz` reports on.
#[derive(Clone)]
pub struct AdminState {
    pub metrics: Metrics,
    pub ready: Arc<AtomicBool>,
}

fn handle_admin(req: Request<Incoming>, state: AdminState) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/healthz" | "/health" => {
            if state.ready.load(Ordering::Relaxed) {
                Ok(Response::builder()
                    .status(200)
                    .body(full_body(r#"{"status":"ok"}"#))
                    .unwrap())
            } else {
                Ok(Response::builder()
                    .status(503)
                    .body(full_body(r#"{"status":"starting"}"#))
                    .unwrap())
            }
        }

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}

/// Runs the health/metrics admin surface. Has no business logic of its own
/// and is independent of the relay worker pool's lifecycle other than
/// reading `state.ready`.
pub async fn run_admin_server(listen: &str, state: AdminState) -> anyhow::Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("admin: listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { handle_admin(req, state) }
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    tracing::error!("admin: connection error, error={}", e);
                }
            }
        });
    }
}
