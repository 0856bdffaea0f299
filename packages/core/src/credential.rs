//! Credential capability for Azure Key Vault.
//!
//! A [`TokenCredential`] produces a bearer token for a scope or fails.
//! [`DefaultCredential`] tries several strategies in a fixed order and
//! returns the first token it gets:
//!
//! 1. A static bearer token (`AZURE_KEYVAULT_BEARER_TOKEN`)
//! 2. Client secret from the environment (`AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
//!    `AZURE_CLIENT_SECRET`)
//! 3. Managed identity (App Service identity endpoint or IMDS)
//! 4. Azure CLI (`az account get-access-token`)
//!
//! Token values are never logged.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Scope for the Key Vault data plane.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const MANAGED_IDENTITY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A bearer token and, when known, its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_on: None,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The strategy cannot run in this environment.
    #[error("{0}")]
    Unavailable(String),
    #[error("token endpoint rejected the request: {status} {body}")]
    Unauthorized {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to request token: {0}")]
    Request(String),
    #[error("failed to parse token response: {0}")]
    Parse(String),
}

/// Something that can obtain an access token on demand.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short name used in logs and aggregated errors.
    fn name(&self) -> &'static str;

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;
}

/// Convert a `.default` scope into the resource form used by IMDS and the CLI.
fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

/// Turn a non-success token response into an error, keeping its body.
async fn rejection(response: reqwest::Response) -> AuthError {
    let status = response.status();
    match response.text().await {
        Ok(body) => AuthError::Unauthorized { status, body },
        Err(err) => AuthError::Request(format!(
            "token endpoint returned {} and the response body could not be read: {}",
            status, err
        )),
    }
}

fn expiry_from_now(expires_in: u64) -> Option<DateTime<Utc>> {
    i64::try_from(expires_in)
        .ok()
        .map(|secs| Utc::now() + ChronoDuration::seconds(secs))
}

fn expiry_from_unix(expires_on: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(expires_on, 0).single()
}

/// A fixed bearer token, typically for emulators and tests.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("AZURE_KEYVAULT_BEARER_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn name(&self) -> &'static str {
        "StaticTokenCredential"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        Ok(AccessToken::new(self.token.clone()))
    }
}

/// Service principal settings for the client credentials flow.
#[derive(Clone)]
pub struct ClientSecretConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
}

impl ClientSecretConfig {
    /// Read the service principal from the process environment.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the service principal through an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AuthError::Unavailable(format!("{} is not set", key)))
        };

        Ok(Self {
            tenant_id: required("AZURE_TENANT_ID")?,
            client_id: required("AZURE_CLIENT_ID")?,
            client_secret: required("AZURE_CLIENT_SECRET")?,
            authority_host: lookup("AZURE_AUTHORITY_HOST")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
        })
    }

    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

impl fmt::Debug for ClientSecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 client credentials using a service principal from the environment.
pub struct EnvironmentCredential {
    client: reqwest::Client,
    config: Result<ClientSecretConfig, AuthError>,
}

impl EnvironmentCredential {
    pub fn new(client: reqwest::Client, config: ClientSecretConfig) -> Self {
        Self {
            client,
            config: Ok(config),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            config: ClientSecretConfig::from_env(),
        }
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "EnvironmentCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let cfg = self.config.as_ref().map_err(Clone::clone)?;

        let params = [
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("scope", scope),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(cfg.token_endpoint())
            .form(&params)
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Parse(err.to_string()))?;

        Ok(AccessToken {
            token: payload.access_token,
            expires_on: payload.expires_in.and_then(expiry_from_now),
        })
    }
}

#[derive(Deserialize)]
struct ManagedIdentityResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

/// Where the managed identity token is requested from.
#[derive(Debug, Clone)]
enum IdentityEndpoint {
    /// App Service / Functions identity endpoint.
    AppService { endpoint: String, header: String },
    /// Instance Metadata Service on VMs and containers.
    Imds { endpoint: String },
}

/// Token from the platform-managed identity.
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn from_env(client: reqwest::Client) -> Self {
        let endpoint = match (
            std::env::var("IDENTITY_ENDPOINT").ok(),
            std::env::var("IDENTITY_HEADER").ok(),
        ) {
            (Some(endpoint), Some(header)) => IdentityEndpoint::AppService { endpoint, header },
            _ => IdentityEndpoint::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        };

        Self {
            client,
            endpoint,
            client_id: std::env::var("AZURE_CLIENT_ID")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }

    /// Use an explicit IMDS-compatible endpoint.
    pub fn with_imds_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: IdentityEndpoint::Imds {
                endpoint: endpoint.into(),
            },
            client_id: None,
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let resource = scope_to_resource(scope);

        let mut query = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.endpoint {
            IdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.client
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
            }
            IdentityEndpoint::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.client.get(endpoint).header("Metadata", "true")
            }
        };

        let response = request
            .query(&query)
            .timeout(MANAGED_IDENTITY_PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                AuthError::Unavailable(format!("managed identity endpoint unreachable: {}", err))
            })?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let payload: ManagedIdentityResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Parse(err.to_string()))?;

        // IMDS sends expires_on as a string of Unix seconds, App Service as a number.
        let expires_on = match payload.expires_on {
            Some(serde_json::Value::String(s)) => s.parse::<i64>().ok(),
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            _ => None,
        }
        .and_then(expiry_from_unix);

        Ok(AccessToken {
            token: payload.access_token,
            expires_on,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

/// Token from a cached `az login` session.
pub struct AzureCliCredential {
    program: String,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_program("az")
    }

    /// Use a different executable in place of `az`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("account")
            .arg("get-access-token")
            .arg("--resource")
            .arg(scope_to_resource(scope))
            .arg("--output")
            .arg("json")
            .output()
            .await
            .map_err(|e| {
                AuthError::Unavailable(format!(
                    "Azure CLI is not installed or not in PATH: {}",
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Unavailable(format!(
                "Azure CLI could not get a token. Run 'az login'. {}",
                stderr.trim()
            )));
        }

        let payload: CliTokenResponse = serde_json::from_slice(&output.stdout)
            .map_err(|err| AuthError::Parse(err.to_string()))?;

        Ok(AccessToken {
            token: payload.access_token,
            expires_on: payload.expires_on.and_then(expiry_from_unix),
        })
    }
}

/// Ordered chain of credential strategies; the first token wins.
pub struct DefaultCredential {
    sources: Vec<Box<dyn TokenCredential>>,
}

impl DefaultCredential {
    pub fn new(sources: Vec<Box<dyn TokenCredential>>) -> Self {
        Self { sources }
    }

    /// Build the standard chain from the process environment.
    pub fn from_env(client: reqwest::Client) -> Self {
        let mut sources: Vec<Box<dyn TokenCredential>> = Vec::new();

        if let Some(static_token) = StaticTokenCredential::from_env() {
            sources.push(Box::new(static_token));
        }
        sources.push(Box::new(EnvironmentCredential::from_env(client.clone())));
        sources.push(Box::new(ManagedIdentityCredential::from_env(client)));
        sources.push(Box::new(AzureCliCredential::new()));

        Self { sources }
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &'static str {
        "DefaultCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    debug!(credential = source.name(), "acquired access token");
                    return Ok(token);
                }
                Err(err) => {
                    debug!(credential = source.name(), error = %err, "credential unavailable");
                    failures.push(format!("{}: {}", source.name(), err));
                }
            }
        }

        Err(AuthError::Unavailable(format!(
            "DefaultCredential failed to retrieve a token from the included credentials.\n- {}",
            failures.join("\n- ")
        )))
    }
}
