//! Ambient Azure credentials.
//!
//! `DefaultCredential` tries, in order:
//! 1. `EnvironmentCredential` (service principal secret in `AZURE_*` vars)
//! 2. `ManagedIdentityCredential` (App Service / Functions identity endpoint)
//! 3. `AzureCliCredential` (`az account get-access-token`)
//!
//! A source that is not configured reports `Unavailable` and the chain moves
//! on. A source that is configured but fails stops the chain. Tokens are not
//! cached; every call goes back to the source.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const APP_SERVICE_MSI_API_VERSION: &str = "2019-08-01";

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The source is not configured in this environment.
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    fn name(&self) -> &'static str;

    /// `scope` is an AAD v2 scope such as `https://management.azure.com/.default`.
    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError>;
}

/// v1 resource for endpoints that take `resource` rather than `scope`.
pub fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("failed to build identity HTTP client")
}

// ── Service principal from environment ──────────────────────

#[derive(Clone)]
pub struct EnvironmentCredential {
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl EnvironmentCredential {
    pub fn new(authority_host: &str, tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            authority_host: authority_host.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// `None` unless `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
    /// `AZURE_CLIENT_SECRET` are all set.
    pub fn from_env() -> Option<Self> {
        let tenant_id = non_empty_env("AZURE_TENANT_ID")?;
        let client_id = non_empty_env("AZURE_CLIENT_ID")?;
        let client_secret = non_empty_env("AZURE_CLIENT_SECRET")?;
        let authority_host =
            non_empty_env("AZURE_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.into());
        Some(Self::new(
            &authority_host,
            &tenant_id,
            &client_id,
            &client_secret,
        ))
    }

    fn oauth_client(&self) -> anyhow::Result<BasicClient> {
        let base = format!("{}/{}/oauth2/v2.0", self.authority_host, self.tenant_id);
        let auth_url = AuthUrl::new(format!("{base}/authorize"))
            .with_context(|| format!("invalid authority host '{}'", self.authority_host))?;
        let token_url = TokenUrl::new(format!("{base}/token"))
            .with_context(|| format!("invalid authority host '{}'", self.authority_host))?;

        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody))
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "EnvironmentCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let client = self.oauth_client()?;
        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()))
            .request_async(async_http_client)
            .await
            .with_context(|| {
                format!("client credentials grant rejected for client {}", self.client_id)
            })?;

        let lifetime = token
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        Ok(AccessToken {
            token: token.access_token().secret().to_string(),
            expires_on: Utc::now() + lifetime,
        })
    }
}

// ── Managed identity (App Service / Functions) ──────────────

#[derive(Clone)]
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    identity_header: String,
    client_id: Option<String>,
}

#[derive(Deserialize)]
struct ManagedIdentityResponse {
    access_token: String,
    /// Epoch seconds; App Service sends it as a string.
    expires_on: Value,
}

impl ManagedIdentityCredential {
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        identity_header: &str,
        client_id: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            identity_header: identity_header.to_string(),
            client_id,
        }
    }

    /// `None` unless `IDENTITY_ENDPOINT` and `IDENTITY_HEADER` are set.
    /// `AZURE_CLIENT_ID` selects a user-assigned identity.
    pub fn from_env(http: reqwest::Client) -> Option<Self> {
        let endpoint = non_empty_env("IDENTITY_ENDPOINT")?;
        let header = non_empty_env("IDENTITY_HEADER")?;
        Some(Self::new(
            http,
            &endpoint,
            &header,
            non_empty_env("AZURE_CLIENT_ID"),
        ))
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut query = vec![
            ("api-version", APP_SERVICE_MSI_API_VERSION),
            ("resource", scope_to_resource(scope)),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let resp = self
            .http
            .get(&self.endpoint)
            .header("X-IDENTITY-HEADER", &self.identity_header)
            .query(&query)
            .send()
            .await
            .context("managed identity endpoint unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "managed identity endpoint returned {}: {}",
                status,
                truncate(&body, 300)
            )
            .into());
        }

        let parsed: ManagedIdentityResponse = resp
            .json()
            .await
            .context("invalid managed identity token response")?;
        let expires_on = epoch_value(&parsed.expires_on)
            .context("managed identity token has no usable expires_on")?;
        Ok(AccessToken {
            token: parsed.access_token,
            expires_on,
        })
    }
}

// ── Azure CLI ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AzureCliCredential {
    tenant_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    /// Local time, `2024-01-01 12:00:00.000000`.
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds, newer CLI versions only.
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut cmd = tokio::process::Command::new("az");
        cmd.args([
            "account",
            "get-access-token",
            "--output",
            "json",
            "--resource",
            scope_to_resource(scope),
        ]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant.as_str()]);
        }

        let output = match tokio::time::timeout(Duration::from_secs(10), cmd.output()).await {
            Err(_) => return Err(anyhow::anyhow!("az timed out after 10s").into()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::Unavailable("az not found on PATH".into()))
            }
            Ok(Err(e)) => return Err(anyhow::Error::new(e).context("failed to run az").into()),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("az login") || stderr.contains("az account set") {
                return Err(CredentialError::Unavailable("az is not logged in".into()));
            }
            return Err(anyhow::anyhow!(
                "az exited with {}: {}",
                output.status,
                truncate(&stderr, 300)
            )
            .into());
        }

        parse_cli_token(&output.stdout).map_err(CredentialError::from)
    }
}

fn parse_cli_token(stdout: &[u8]) -> anyhow::Result<AccessToken> {
    let parsed: CliTokenResponse =
        serde_json::from_slice(stdout).context("az printed an unexpected token payload")?;

    let expires_on = match (parsed.expires_on_epoch, parsed.expires_on.as_deref()) {
        (Some(epoch), _) => Utc
            .timestamp_opt(epoch, 0)
            .single()
            .context("az expires_on out of range")?,
        (None, Some(local)) => {
            let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
                .with_context(|| format!("unparseable az expiresOn '{local}'"))?;
            chrono::Local
                .from_local_datetime(&naive)
                .earliest()
                .context("az expiresOn is not a valid local time")?
                .with_timezone(&Utc)
        }
        (None, None) => anyhow::bail!("az token has no expiry"),
    };

    Ok(AccessToken {
        token: parsed.access_token,
        expires_on,
    })
}

// ── Chain ───────────────────────────────────────────────────

pub struct DefaultCredential {
    sources: Sources,
}

enum Sources {
    /// Re-read the environment on every call.
    Ambient(reqwest::Client),
    Fixed(Vec<Arc<dyn TokenCredential>>),
}

impl DefaultCredential {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            sources: Sources::Ambient(http_client()?),
        })
    }

    pub fn from_sources(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources: Sources::Fixed(sources),
        }
    }

    fn resolve(&self) -> Vec<Arc<dyn TokenCredential>> {
        match &self.sources {
            Sources::Fixed(sources) => sources.clone(),
            Sources::Ambient(http) => {
                let mut chain: Vec<Arc<dyn TokenCredential>> = Vec::with_capacity(3);
                if let Some(c) = EnvironmentCredential::from_env() {
                    chain.push(Arc::new(c));
                }
                if let Some(c) = ManagedIdentityCredential::from_env(http.clone()) {
                    chain.push(Arc::new(c));
                }
                chain.push(Arc::new(AzureCliCredential::new(non_empty_env(
                    "AZURE_TENANT_ID",
                ))));
                chain
            }
        }
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &'static str {
        "DefaultCredential"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, CredentialError> {
        let mut attempts = Vec::new();
        for source in self.resolve() {
            match source.get_token(scope).await {
                Ok(token) => {
                    tracing::debug!(
                        credential = source.name(),
                        expires_on = %token.expires_on,
                        "acquired access token"
                    );
                    return Ok(token);
                }
                Err(CredentialError::Unavailable(reason)) => {
                    tracing::debug!(credential = source.name(), %reason, "credential unavailable");
                    attempts.push(format!("{}: {}", source.name(), reason));
                }
                Err(CredentialError::Failed(e)) => {
                    return Err(e
                        .context(format!("{} failed to acquire a token", source.name()))
                        .into());
                }
            }
        }
        Err(anyhow::anyhow!(
            "no credential source could provide a token ({})",
            attempts.join("; ")
        )
        .into())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn epoch_value(v: &Value) -> Option<DateTime<Utc>> {
    let secs = match v {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
