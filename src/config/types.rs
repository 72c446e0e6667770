use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client-side configuration for the reverse HTTP relay worker pool.
///
/// Immutable once constructed — see `Config::load`. Every field here
/// corresponds to a named option in the relay-client data model; there
/// is deliberately no mutation path once a `Config` has been validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on any single call to the relay server (`GET /server/request`
    /// or `POST /server/response`).
    #[serde(default = "default_remote_request_timeout", with = "humantime_secs")]
    pub remote_request_timeout: Duration,

    /// The "trickle" interval driving the response chunker's keep-alive timer.
    #[serde(default = "default_backend_response_timeout", with = "humantime_secs")]
    pub backend_response_timeout: Duration,

    /// If false, `remote` is wrapped with an identity-provider token source.
    #[serde(default)]
    pub disable_auth_for_remote: bool,

    /// PEM file whose contents replace the default CA pool for `local`.
    #[serde(default)]
    pub root_ca_file: Option<std::path::PathBuf>,

    /// File whose contents are stamped as `Authorization: Bearer <contents>`
    /// on every backend request.
    #[serde(default)]
    pub authentication_token_file: Option<std::path::PathBuf>,

    pub backend_scheme: String,
    pub backend_address: String,
    #[serde(default)]
    pub backend_path: String,

    /// If true, the pulled request's original Host header is forwarded
    /// to the backend instead of being rewritten to `backend_address`.
    #[serde(default)]
    pub preserve_host: bool,

    #[serde(default = "default_relay_scheme")]
    pub relay_scheme: String,
    pub relay_address: String,
    #[serde(default)]
    pub relay_prefix: String,

    /// Identifies which relay queue this client polls.
    pub server_name: String,

    /// Number of concurrent long-pollers.
    #[serde(default = "default_num_pending_requests")]
    pub num_pending_requests: usize,

    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,

    /// Upper bound on a single response chunk's body, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Read granularity from the backend response body, in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default)]
    pub disable_http2: bool,

    #[serde(default)]
    pub force_http2: bool,

    /// Address for the `/healthz` and `/metrics` admin surface.
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    /// `tracing_subscriber::EnvFilter` directive string, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Built-in defaults for a config-file-less run. Required addressing
/// fields (`server_name`, `relay_address`, `backend_address`) default to
/// empty — `validate()` is what catches a truly unconfigured run, after
/// flags and env have had their chance to fill them in.
impl Default for Config {
    fn default() -> Self {
        Self {
            remote_request_timeout: default_remote_request_timeout(),
            backend_response_timeout: default_backend_response_timeout(),
            disable_auth_for_remote: false,
            root_ca_file: None,
            authentication_token_file: None,
            backend_scheme: String::new(),
            backend_address: String::new(),
            backend_path: String::new(),
            preserve_host: false,
            relay_scheme: default_relay_scheme(),
            relay_address: String::new(),
            relay_prefix: String::new(),
            server_name: String::new(),
            num_pending_requests: default_num_pending_requests(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            max_chunk_size: default_max_chunk_size(),
            block_size: default_block_size(),
            disable_http2: false,
            force_http2: false,
            admin_listen: default_admin_listen(),
            log_level: default_log_level(),
        }
    }
}

fn default_remote_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backend_response_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_relay_scheme() -> String {
    "https".to_string()
}

fn default_num_pending_requests() -> usize {
    1
}

fn default_max_idle_conns_per_host() -> usize {
    100
}

fn default_max_chunk_size() -> usize {
    256 * 1024
}

fn default_block_size() -> usize {
    10 * 1024
}

fn default_admin_listen() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// (De)serializes a `Duration` as a whole number of seconds in config files,
/// while still accepting human-friendly strings like `"30s"` or `"2m"`.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum SecsOrString {
            Secs(f64),
            Human(String),
        }
        match SecsOrString::deserialize(d)? {
            SecsOrString::Secs(secs) => Ok(Duration::from_secs_f64(secs)),
            SecsOrString::Human(s) => {
                humantime::parse_duration(&s).map_err(serde::de::Error::custom)
            }
        }
    }
}
