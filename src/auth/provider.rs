//! Identity provider implementations.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use super::AuthError;

/// Timeout for calls to the remote identity collaborator.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The identity collaborator boundary: resolve an opaque credential to a
/// user id, or fail.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, credential: &SecretString) -> Result<Uuid, AuthError>;
}

/// Shared handle to the configured identity provider.
#[derive(Clone)]
pub struct IdentityClient {
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityClient {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        IdentityClient { provider }
    }

    pub async fn resolve(&self, credential: &SecretString) -> Result<Uuid, AuthError> {
        self.provider.resolve(credential).await
    }
}

/// Production provider: asks the external identity service over HTTP.
pub struct RemoteIdentityProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct ResolveResponse {
    user_id: Uuid,
}

impl RemoteIdentityProvider {
    pub fn new(endpoint: &str) -> Self {
        RemoteIdentityProvider {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for RemoteIdentityProvider {
    async fn resolve(&self, credential: &SecretString) -> Result<Uuid, AuthError> {
        let url = format!("{}/resolve", self.endpoint);
        let response = self
            .client
            .post(&url)
            .timeout(RESOLVE_TIMEOUT)
            .json(&serde_json::json!({ "credential": credential.expose_secret() }))
            .send()
            .await
            .map_err(|e| {
                warn!("Identity provider unreachable: {}", e);
                AuthError::new("Identity provider unreachable")
            })?;

        if !response.status().is_success() {
            return Err(AuthError::new("Invalid credentials"));
        }

        let body: ResolveResponse = response
            .json()
            .await
            .map_err(|_| AuthError::new("Malformed identity provider response"))?;

        Ok(body.user_id)
    }
}

/// Development fallback: a single configured credential mapped to a fixed
/// user id. Comparison is constant-time.
pub struct StaticIdentityProvider {
    key: SecretString,
    user_id: Uuid,
}

impl StaticIdentityProvider {
    pub fn new(key: SecretString, user_id: Uuid) -> Self {
        StaticIdentityProvider { key, user_id }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, credential: &SecretString) -> Result<Uuid, AuthError> {
        let matches: bool = self
            .key
            .expose_secret()
            .as_bytes()
            .ct_eq(credential.expose_secret().as_bytes())
            .into();

        if matches {
            Ok(self.user_id)
        } else {
            Err(AuthError::new("Invalid credentials"))
        }
    }
}
