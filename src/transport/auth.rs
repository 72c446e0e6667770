use crate::error::RelayClientError;
use async_trait::async_trait;
use std::sync::Arc;

/// A capability for producing bearer tokens for outbound relay requests.
/// Modeled as a trait (rather than baking `google-cloud-auth` types directly
/// into the transport factory) so the dynamic-dispatch seam the transport
/// layer wants lands here instead of inside request logic.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, RelayClientError>;
}

/// Wraps Google Application Default Credentials, requesting the
/// `cloud-platform.read-only` scope.
pub struct GoogleTokenSource {
    inner: Arc<dyn google_cloud_auth::token_source::TokenSource>,
}

impl GoogleTokenSource {
    pub async fn new() -> Result<Self, RelayClientError> {
        let config = google_cloud_auth::project::Config::default().with_scopes(&[
            "https://www.googleapis.com/auth/cloud-platform.read-only",
        ]);

        let provider = google_cloud_auth::token::DefaultTokenSourceProvider::new(config)
            .await
            .map_err(|e| {
                RelayClientError::Credential(format!(
                    "acquiring application default credentials: {e}"
                ))
            })?;

        Ok(Self {
            inner: provider.token_source(),
        })
    }
}

#[async_trait]
impl TokenSource for GoogleTokenSource {
    async fn token(&self) -> Result<String, RelayClientError> {
        self.inner
            .token()
            .await
            .map_err(|e| RelayClientError::Credential(format!("fetching token: {e}")))
    }
}

/// Fixed-string token source for tests.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, RelayClientError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_source_returns_fixed_value() {
        let src = StaticTokenSource("fake-token".to_string());
        assert_eq!(src.token().await.unwrap(), "fake-token");
    }
}
