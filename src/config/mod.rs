pub mod types;


pub use types::Config;

use crate::error::RelayClientError;
use std::path::Path;

impl Config {
    /// Load configuration from an optional file, then apply environment
    /// variable overrides. When `path` is `None`, this starts from
    /// built-in defaults — the file is genuinely optional, since CLI flags
    /// (applied by the caller on top of this) and env vars are enough to
    /// run with zero config file. Validation is the caller's job, done
    /// once every layer (file, env, flags) has been applied — see
    /// `validate()`.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayClientError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    RelayClientError::Config(format!(
                        "reading config file {}: {e}",
                        path.display()
                    ))
                })?;
                match path.extension().and_then(|e| e.to_str()) {
                    Some("toml") => toml::from_str(&content)
                        .map_err(|e| RelayClientError::Config(format!("parsing toml: {e}")))?,
                    Some("json") => serde_json::from_str(&content)
                        .map_err(|e| RelayClientError::Config(format!("parsing json: {e}")))?,
                    Some(ext) => {
                        return Err(RelayClientError::Config(format!(
                            "unsupported config format: .{ext}, use .toml or .json"
                        )))
                    }
                    None => {
                        return Err(RelayClientError::Config(
                            "config file has no extension, use .toml or .json".to_string(),
                        ))
                    }
                }
            }
            Some(path) => {
                return Err(RelayClientError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variable overrides, applied after the file and before
    /// validation.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RELAY_CLIENT_SERVER_NAME") {
            self.server_name = v;
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_RELAY_ADDRESS") {
            self.relay_address = v;
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_BACKEND_ADDRESS") {
            self.backend_address = v;
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_AUTHENTICATION_TOKEN_FILE") {
            self.authentication_token_file = Some(v.into());
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_ROOT_CA_FILE") {
            self.root_ca_file = Some(v.into());
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_NUM_PENDING_REQUESTS") {
            if let Ok(n) = v.parse() {
                self.num_pending_requests = n;
            }
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if let Ok(v) = std::env::var("RELAY_CLIENT_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Fatal-at-startup checks. Anything caught here must abort the
    /// process before any worker is spawned.
    pub fn validate(&self) -> Result<(), RelayClientError> {
        if self.disable_http2 && self.force_http2 {
            return Err(RelayClientError::Config(
                "disable_http2 and force_http2 are mutually exclusive".to_string(),
            ));
        }
        if self.num_pending_requests < 1 {
            return Err(RelayClientError::Config(
                "num_pending_requests must be >= 1".to_string(),
            ));
        }
        if self.server_name.is_empty() {
            return Err(RelayClientError::Config(
                "server_name must not be empty".to_string(),
            ));
        }
        if self.relay_address.is_empty() {
            return Err(RelayClientError::Config(
                "relay_address must not be empty".to_string(),
            ));
        }
        if self.backend_address.is_empty() {
            return Err(RelayClientError::Config(
                "backend_address must not be empty".to_string(),
            ));
        }
        if let Some(ref ca) = self.root_ca_file {
            if !ca.exists() {
                return Err(RelayClientError::Config(format!(
                    "root_ca_file does not exist: {}",
                    ca.display()
                )));
            }
        }
        Ok(())
    }

    pub fn relay_request_url(&self) -> String {
        format!(
            "{}://{}{}/server/request?server={}",
            self.relay_scheme, self.relay_address, self.relay_prefix, self.server_name
        )
    }

    pub fn relay_response_url(&self) -> String {
        format!(
            "{}://{}{}/server/response",
            self.relay_scheme, self.relay_address, self.relay_prefix
        )
    }

    pub fn relay_request_stream_url(&self, id: &str) -> String {
        format!(
            "{}://{}{}/server/requeststream?id={}",
            self.relay_scheme, self.relay_address, self.relay_prefix, id
        )
    }
}
