//! Azure Resource Manager client for Key Vault.
//!
//! Speaks the ARM REST API directly:
//! - `POST /subscriptions/{sub}/providers/Microsoft.KeyVault/checkNameAvailability`
//! - `PUT  /subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.KeyVault/vaults/{name}`
//!
//! The PUT is a long-running operation. Completion is tracked through the
//! `Azure-AsyncOperation` header when present, else the `Location` header of
//! a 202, else the resource's own `provisioningState`. No request is retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::credential::TokenCredential;
use super::VaultManager;
use crate::config::Config;
use crate::models::request::KeyVaultName;
use crate::models::vault::{
    ArmErrorResponse, AsyncOperationStatus, CheckNameAvailabilityParameters,
    CheckNameAvailabilityResult, ProvisioningState, Vault, VaultCreateOrUpdateParameters,
    VAULT_RESOURCE_TYPE,
};

pub const API_VERSION: &str = "2023-07-01";
const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

pub struct ArmVaultClient {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    endpoint: Url,
    scope: String,
    subscription_id: String,
    resource_group_name: String,
    poll_interval: Duration,
}

impl ArmVaultClient {
    pub fn new(config: &Config, credential: Arc<dyn TokenCredential>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("kv-provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build ARM HTTP client")?;

        let endpoint = Url::parse(&config.arm_endpoint)
            .with_context(|| format!("invalid ARM endpoint '{}'", config.arm_endpoint))?;
        if endpoint.cannot_be_a_base() {
            bail!("ARM endpoint '{}' cannot be a base URL", config.arm_endpoint);
        }

        Ok(Self {
            http,
            credential,
            endpoint,
            scope: config.arm_scope(),
            subscription_id: config.subscription_id.clone(),
            resource_group_name: config.resource_group_name.clone(),
            poll_interval: config.poll_interval,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        url
    }

    fn vault_url(&self, name: &KeyVaultName) -> Url {
        self.url(&[
            "subscriptions",
            self.subscription_id.as_str(),
            "resourceGroups",
            self.resource_group_name.as_str(),
            "providers",
            "Microsoft.KeyVault",
            "vaults",
            name.as_str(),
        ])
    }

    async fn bearer(&self) -> anyhow::Result<String> {
        let token = self
            .credential
            .get_token(&self.scope)
            .await
            .context("failed to acquire ARM access token")?;
        Ok(token.token)
    }

    /// Send and turn any non-2xx into an error carrying ARM's code and message.
    async fn send(
        &self,
        method: Method,
        url: Url,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> anyhow::Result<reqwest::Response> {
        let mut req = self.http.request(method.clone(), url.clone()).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("{method} {} failed", redact_query(&url)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ArmErrorResponse>(&text) {
            Ok(arm) => Err(anyhow!(
                "{method} {} returned {status}: {}: {}",
                redact_query(&url),
                arm.error.code,
                arm.error.message
            )),
            Err(_) => Err(anyhow!(
                "{method} {} returned {status}",
                redact_query(&url)
            )),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, token: &str) -> anyhow::Result<T> {
        let resp = self.send(Method::GET, url.clone(), token, None).await?;
        resp.json()
            .await
            .with_context(|| format!("unexpected body from {}", redact_query(&url)))
    }

    async fn get_vault(&self, name: &KeyVaultName, token: &str) -> anyhow::Result<Vault> {
        self.get_json(self.vault_url(name), token).await
    }

    fn next_delay(&self, headers: &HeaderMap) -> Duration {
        retry_after(headers).unwrap_or(self.poll_interval)
    }

    async fn poll_async_operation(
        &self,
        url: Url,
        token: &str,
        mut delay: Duration,
    ) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(delay).await;
            let resp = self.send(Method::GET, url.clone(), token, None).await?;
            delay = self.next_delay(resp.headers());
            let op: AsyncOperationStatus = resp
                .json()
                .await
                .context("unexpected async operation status body")?;

            match ProvisioningState::from(op.status.as_str()) {
                ProvisioningState::Succeeded => return Ok(()),
                ProvisioningState::InProgress(state) => {
                    tracing::debug!(%state, delay_ms = delay.as_millis() as u64, "vault operation still running");
                }
                terminal => {
                    let detail = op
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_default();
                    bail!("vault operation ended as {terminal:?} {detail}");
                }
            }
        }
    }

    async fn poll_location(&self, url: Url, token: &str, mut delay: Duration) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(delay).await;
            let resp = self.send(Method::GET, url.clone(), token, None).await?;
            if resp.status() != StatusCode::ACCEPTED {
                return Ok(());
            }
            delay = self.next_delay(resp.headers());
            tracing::debug!(delay_ms = delay.as_millis() as u64, "vault operation still accepted");
        }
    }

    async fn poll_provisioning_state(
        &self,
        name: &KeyVaultName,
        token: &str,
        mut vault: Vault,
    ) -> anyhow::Result<Vault> {
        loop {
            match vault.provisioning_state() {
                None | Some(ProvisioningState::Succeeded) => return Ok(vault),
                Some(ProvisioningState::InProgress(state)) => {
                    tracing::debug!(%state, "vault still provisioning");
                }
                Some(terminal) => bail!("vault provisioning ended as {terminal:?}"),
            }
            tokio::time::sleep(self.poll_interval).await;
            vault = self.get_vault(name, token).await?;
        }
    }
}

#[async_trait]
impl VaultManager for ArmVaultClient {
    async fn check_name_availability(
        &self,
        name: &KeyVaultName,
    ) -> anyhow::Result<CheckNameAvailabilityResult> {
        let token = self.bearer().await?;
        let url = self.url(&[
            "subscriptions",
            self.subscription_id.as_str(),
            "providers",
            "Microsoft.KeyVault",
            "checkNameAvailability",
        ]);
        let body = serde_json::to_value(CheckNameAvailabilityParameters {
            name: name.as_str(),
            resource_type: VAULT_RESOURCE_TYPE,
        })?;
        let resp = self.send(Method::POST, url, &token, Some(body)).await?;
        resp.json()
            .await
            .context("unexpected checkNameAvailability body")
    }

    async fn create_or_update(
        &self,
        name: &KeyVaultName,
        parameters: &VaultCreateOrUpdateParameters,
    ) -> anyhow::Result<Vault> {
        let token = self.bearer().await?;
        let body = serde_json::to_value(parameters)?;
        let resp = self
            .send(Method::PUT, self.vault_url(name), &token, Some(body))
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let delay = self.next_delay(&headers);

        if let Some(op_url) = header_url(&headers, AZURE_ASYNC_OPERATION)? {
            tracing::debug!(vault = %name, "tracking vault creation via Azure-AsyncOperation");
            self.poll_async_operation(op_url, &token, delay).await?;
            return self.get_vault(name, &token).await;
        }

        if status == StatusCode::ACCEPTED {
            let location = header_url(&headers, reqwest::header::LOCATION.as_str())?
                .context("202 from vault PUT without Location or Azure-AsyncOperation")?;
            tracing::debug!(vault = %name, "tracking vault creation via Location");
            self.poll_location(location, &token, delay).await?;
            return self.get_vault(name, &token).await;
        }

        let bytes = resp.bytes().await.context("failed to read vault PUT body")?;
        let vault = if bytes.is_empty() {
            self.get_vault(name, &token).await?
        } else {
            serde_json::from_slice(&bytes).context("unexpected vault PUT body")?
        };
        self.poll_provisioning_state(name, &token, vault).await
    }
}

fn header_url(headers: &HeaderMap, name: &str) -> anyhow::Result<Option<Url>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .with_context(|| format!("{name} header is not ASCII"))?;
    let url = Url::parse(raw).with_context(|| format!("{name} header is not a URL"))?;
    Ok(Some(url))
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Operation URLs can carry signatures in the query string.
fn redact_query(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
