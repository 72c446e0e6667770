pub mod auth;
mod keylog;

use crate::config::Config;
use crate::error::RelayClientError;
use auth::TokenSource;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;

pub type BackendBody = BoxBody<Bytes, hyper::Error>;
pub type LocalClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BackendBody>;

/// The two HTTP clients the rest of the crate is built on. Both are
/// constructed once at startup and shared, read-only, across every worker
/// for the process lifetime.
pub struct Transports {
    /// To the relay server. Bearer-authenticated when
    /// `disable_auth_for_remote` is false.
    pub remote: reqwest::Client,
    pub remote_token_source: Option<Arc<dyn TokenSource>>,
    /// To the backend. Never follows redirects — redirects are relayed
    /// verbatim to the original user agent.
    pub local: LocalClient,
}

impl Transports {
    pub async fn build(config: &Config) -> Result<Self, RelayClientError> {
        let remote = build_remote_client(config)?;

        let remote_token_source: Option<Arc<dyn TokenSource>> = if config.disable_auth_for_remote {
            None
        } else {
            Some(Arc::new(auth::GoogleTokenSource::new().await?))
        };

        let local = build_local_client(config)?;

        Ok(Self {
            remote,
            remote_token_source,
            local,
        })
    }

    /// Fetches a fresh bearer token for the relay, if authentication is
    /// enabled. `None` when `disable_auth_for_remote` is set.
    pub async fn remote_bearer_token(&self) -> Result<Option<String>, RelayClientError> {
        match &self.remote_token_source {
            Some(source) => Ok(Some(source.token().await?)),
            None => Ok(None),
        }
    }
}

fn build_remote_client(config: &Config) -> Result<reqwest::Client, RelayClientError> {
    reqwest::Client::builder()
        .timeout(config.remote_request_timeout)
        .pool_max_idle_per_host(config.max_idle_conns_per_host)
        .build()
        .map_err(|e| RelayClientError::Transport(format!("building remote client: {e}")))
}

fn build_local_client(config: &Config) -> Result<LocalClient, RelayClientError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);

    let root_store = load_root_store(config)?;
    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if let Ok(path) = std::env::var("SSLKEYLOGFILE") {
        match keylog::KeyLogFile::open(std::path::Path::new(&path)) {
            Ok(kl) => tls_config.key_log = Arc::new(kl),
            Err(e) => {
                return Err(RelayClientError::Transport(format!(
                    "opening SSLKEYLOGFILE {path}: {e}"
                )))
            }
        }
    }

    let builder = hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls_config);

    let https = if config.disable_http2 {
        builder.https_or_http().enable_http1().wrap_connector(http)
    } else if config.force_http2 {
        // Either ALPN-negotiated HTTP/2 over TLS (https backend), or H2C
        // prior-knowledge (http backend, forced below via `http2_only`).
        builder
            .https_or_http()
            .enable_http2()
            .wrap_connector(http)
    } else {
        builder
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    };

    let mut client_builder = Client::builder(TokioExecutor::new());
    client_builder.pool_max_idle_per_host(config.max_idle_conns_per_host);
    if config.force_http2 {
        client_builder.http2_only(true);
    }

    Ok(client_builder.build(https))
}

/// Loads the CA pool `local` validates the backend against. Defaults to
/// `webpki-roots`; a configured `root_ca_file` replaces it entirely.
fn load_root_store(config: &Config) -> Result<rustls::RootCertStore, RelayClientError> {
    match &config.root_ca_file {
        None => Ok(rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        }),
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                RelayClientError::Config(format!("reading root_ca_file {}: {e}", path.display()))
            })?;

            let mut store = rustls::RootCertStore::empty();
            let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    RelayClientError::Config(format!(
                        "parsing PEM blocks in root_ca_file {}: {e}",
                        path.display()
                    ))
                })?;

            if certs.is_empty() {
                return Err(RelayClientError::Config(format!(
                    "no certificates found in root_ca_file {}",
                    path.display()
                )));
            }

            for cert in certs {
                store.add(cert).map_err(|e| {
                    RelayClientError::Config(format!("adding certificate to root store: {e}"))
                })?;
            }

            Ok(store)
        }
    }
}
