//! Secret stores: an in-memory local store and an Azure Key Vault client.
//!
//! # Guarantees
//!
//! - **One call per lookup**: [`KeyVaultStore::get_secret`] performs exactly one
//!   HTTP request. No retries, no caching.
//! - **No value logging**: Secret values never reach the log output.
//!
//! # Errors
//!
//! - HTTP 404 maps to [`KeyVaultError::SecretNotFound`]
//! - Any other failure maps to [`KeyVaultError::Request`]

use crate::credential::{AccessToken, TokenCredential, KEY_VAULT_SCOPE};
use crate::error::KeyVaultError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Key Vault data-plane API version.
pub const SECRETS_API_VERSION: &str = "7.4";

/// A retrieved secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    /// Only populated by remote stores.
    pub properties: Option<SecretProperties>,
}

/// Metadata Key Vault keeps alongside a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretProperties {
    pub enabled: Option<bool>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Anything that can look up a secret by name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Secret, KeyVaultError>;
}

/// Secrets held in memory, supplied by configuration.
#[derive(Debug, Clone, Default)]
pub struct LocalSecretStore {
    secrets: HashMap<String, String>,
}

impl LocalSecretStore {
    /// Build a store from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.secrets.get(name)
    }
}

#[async_trait]
impl SecretStore for LocalSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Secret, KeyVaultError> {
        let value = self
            .get(name)
            .ok_or_else(|| KeyVaultError::SecretNotFound {
                name: name.to_string(),
            })?;

        Ok(Secret {
            name: name.to_string(),
            value: value.clone(),
            properties: None,
        })
    }
}

/// Build the shared HTTP client used for Key Vault and token requests.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, KeyVaultError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| KeyVaultError::Client(e.to_string()))
}

#[derive(Deserialize)]
struct SecretBundle {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    attributes: Option<SecretAttributes>,
}

#[derive(Deserialize)]
struct SecretAttributes {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    updated: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Azure Key Vault client bound to one vault and one access token.
#[derive(Debug, Clone)]
pub struct KeyVaultStore {
    client: reqwest::Client,
    endpoint: Url,
    token: AccessToken,
}

impl KeyVaultStore {
    /// Connect to a vault, obtaining an access token up front.
    ///
    /// # Errors
    ///
    /// - [`KeyVaultError::Authentication`] if the credential yields no token,
    ///   or a token that has already expired
    pub async fn connect(
        client: reqwest::Client,
        endpoint: Url,
        credential: &dyn TokenCredential,
    ) -> Result<Self, KeyVaultError> {
        debug!(credential = credential.name(), "requesting access token");
        let token = credential
            .get_token(KEY_VAULT_SCOPE)
            .await
            .map_err(|e| KeyVaultError::Authentication(e.to_string()))?;

        match token.expires_on {
            Some(expires_on) => {
                let remaining = expires_on - Utc::now();
                if remaining <= chrono::Duration::zero() {
                    return Err(KeyVaultError::Authentication(format!(
                        "access token from {} expired at {}",
                        credential.name(),
                        expires_on.to_rfc3339()
                    )));
                }
                debug!(remaining_secs = remaining.num_seconds(), "access token lifetime");
            }
            None => debug!("access token has no expiry"),
        }

        info!(vault = %endpoint, "connected to key vault");
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// Create a client from an already-obtained token.
    pub fn with_token(client: reqwest::Client, endpoint: Url, token: AccessToken) -> Self {
        Self {
            client,
            endpoint,
            token,
        }
    }

    /// `{vault}/secrets/{name}?api-version=7.4`
    fn secret_url(&self, name: &str) -> Result<Url, KeyVaultError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                KeyVaultError::Request(format!("vault URL cannot have a path: {}", self.endpoint))
            })?
            .pop_if_empty()
            .push("secrets")
            .push(name);
        url.query_pairs_mut()
            .append_pair("api-version", SECRETS_API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl SecretStore for KeyVaultStore {
    async fn get_secret(&self, name: &str) -> Result<Secret, KeyVaultError> {
        let url = self.secret_url(name)?;
        debug!(secret = name, "fetching secret");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token.token)
            .send()
            .await
            .map_err(|e| KeyVaultError::Request(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(KeyVaultError::SecretNotFound {
                name: name.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeyVaultError::Request(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(KeyVaultError::Request(describe_failure(status, &body)));
        }

        parse_secret_bundle(name, &body)
    }
}

/// Render a non-success response, preferring Key Vault's own error message.
fn describe_failure(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope.error.code.unwrap_or_else(|| status.to_string());
            match envelope.error.message {
                Some(message) => format!("{} ({}): {}", status, code, message),
                None => format!("{} ({})", status, code),
            }
        }
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status, body.trim()),
    }
}

fn parse_secret_bundle(name: &str, body: &str) -> Result<Secret, KeyVaultError> {
    let bundle: SecretBundle = serde_json::from_str(body)
        .map_err(|e| KeyVaultError::Request(format!("failed to parse secret response: {}", e)))?;

    let value = bundle.value.ok_or_else(|| KeyVaultError::SecretNotFound {
        name: name.to_string(),
    })?;

    let properties = bundle
        .attributes
        .map(|attrs| SecretProperties {
            enabled: attrs.enabled,
            created: attrs.created.and_then(unix_to_datetime),
            updated: attrs.updated.and_then(unix_to_datetime),
        })
        .unwrap_or_default();

    Ok(Secret {
        name: name.to_string(),
        value,
        properties: Some(properties),
    })
}

fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
