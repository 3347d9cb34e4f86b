//! End-to-end tests for the `/api/create-keyvault` function.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`; ARM is
//! replaced by an in-memory `VaultManager` that claims names as it creates
//! vaults.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use kv_provisioner::api::{self, INVOCATION_ID_HEADER};
use kv_provisioner::azure::VaultManager;
use kv_provisioner::config::{Config, LogFormat};
use kv_provisioner::models::request::KeyVaultName;
use kv_provisioner::models::vault::{
    CheckNameAvailabilityResult, Vault, VaultCreateOrUpdateParameters,
};
use kv_provisioner::AppState;

const GROUP: &str = "11111111-1111-1111-1111-111111111111";

#[derive(Default)]
struct InMemoryVaults {
    claimed: Mutex<HashSet<String>>,
    created: Mutex<Vec<VaultCreateOrUpdateParameters>>,
    check_calls: Mutex<usize>,
    broken: bool,
    create_fails: bool,
    create_delay: Option<Duration>,
}

#[async_trait]
impl VaultManager for InMemoryVaults {
    async fn check_name_availability(
        &self,
        name: &KeyVaultName,
    ) -> anyhow::Result<CheckNameAvailabilityResult> {
        *self.check_calls.lock().unwrap() += 1;
        if self.broken {
            anyhow::bail!("ARM said: InternalServerError at /subscriptions/secret-sub");
        }
        let taken = self.claimed.lock().unwrap().contains(name.as_str());
        Ok(CheckNameAvailabilityResult {
            name_available: !taken,
            reason: taken.then(|| "AlreadyExists".to_string()),
            message: taken.then(|| format!("The vault name '{name}' is already in use.")),
        })
    }

    async fn create_or_update(
        &self,
        name: &KeyVaultName,
        parameters: &VaultCreateOrUpdateParameters,
    ) -> anyhow::Result<Vault> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.create_fails {
            anyhow::bail!("PUT vault returned 400 Bad Request: VaultAlreadyExists in sub-1/rg-vaults");
        }
        self.claimed.lock().unwrap().insert(name.to_string());
        self.created.lock().unwrap().push(parameters.clone());
        let vault = serde_json::from_value(json!({
            "id": format!("/subscriptions/sub-1/resourceGroups/rg-vaults/providers/Microsoft.KeyVault/vaults/{name}"),
            "name": name.as_str(),
            "type": "Microsoft.KeyVault/vaults",
            "location": parameters.location,
            "properties": {
                "tenantId": parameters.properties.tenant_id,
                "provisioningState": "Succeeded",
                "vaultUri": format!("https://{name}.vault.azure.net/"),
            }
        }))?;
        Ok(vault)
    }
}

fn test_config() -> Config {
    Config {
        port: 0,
        subscription_id: "sub-1".into(),
        tenant_id: "tenant-1".into(),
        resource_group_name: "rg-vaults".into(),
        location: "westeurope".into(),
        arm_endpoint: "http://127.0.0.1:9".into(),
        create_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        log_format: LogFormat::Pretty,
    }
}

fn app_with(vaults: Arc<InMemoryVaults>, config: Config) -> axum::Router {
    api::router(Arc::new(AppState { config, vaults }))
}

async fn call(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(INVOCATION_ID_HEADER, "inv-test-1")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let echoed = resp
        .headers()
        .get(INVOCATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body, echoed)
}

fn uri(name: &str) -> String {
    format!("/api/create-keyvault?keyvault_name={name}&owning_group_object_id={GROUP}")
}

#[tokio::test]
async fn test_success_returns_201_with_vault() {
    let vaults = Arc::new(InMemoryVaults::default());
    let app = app_with(vaults.clone(), test_config());

    let (status, body, echoed) = call(app, "POST", &uri("abc-12")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(echoed, "inv-test-1");
    assert_eq!(body["invocation_id"], "inv-test-1");
    assert_eq!(body["message"], "keyvault created");
    assert_eq!(body["keyvault_name"], "abc-12");
    assert!(body["keyvault"].is_object());
    assert_eq!(body["keyvault"]["name"], "abc-12");

    let created = vaults.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    let params = &created[0];
    assert_eq!(params.location, "westeurope");
    assert_eq!(params.properties.tenant_id, "tenant-1");
    assert_eq!(params.properties.sku.family, "A");
    assert_eq!(params.properties.sku.name, "standard");
    assert_eq!(params.properties.access_policies.len(), 1);
    let policy = &params.properties.access_policies[0];
    assert_eq!(policy.object_id, GROUP);
    assert_eq!(policy.tenant_id, "tenant-1");
    assert_eq!(policy.permissions.keys, vec!["all"]);
    assert_eq!(policy.permissions.secrets, vec!["all"]);
}

#[tokio::test]
async fn test_second_create_with_same_name_conflicts() {
    let vaults = Arc::new(InMemoryVaults::default());
    let app = app_with(vaults.clone(), test_config());

    let (first, _, _) = call(app.clone(), "POST", &uri("abc-12")).await;
    let (second, body, _) = call(app, "POST", &uri("abc-12")).await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(
        body,
        json!({
            "message": "keyvault name not available (maybe previously claimed?)",
            "invocation_id": "inv-test-1",
            "keyvault_name": "abc-12",
        })
    );
    assert_eq!(vaults.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_group_parameter() {
    let app = app_with(Arc::new(InMemoryVaults::default()), test_config());
    let (status, body, _) = call(app, "POST", "/api/create-keyvault?keyvault_name=abc-12").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({
            "message": "missing required URL parameter",
            "invocation_id": "inv-test-1",
            "missing_parameter": "owning_group_object_id",
        })
    );
}

#[tokio::test]
async fn test_missing_name_parameter() {
    let app = app_with(Arc::new(InMemoryVaults::default()), test_config());
    let (status, body, _) = call(
        app,
        "POST",
        &format!("/api/create-keyvault?owning_group_object_id={GROUP}"),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["missing_parameter"], "keyvault_name");
}

#[tokio::test]
async fn test_invalid_chars_listed_and_no_remote_call() {
    let vaults = Arc::new(InMemoryVaults::default());
    let app = app_with(vaults.clone(), test_config());

    let (status, body, _) = call(app, "POST", &uri("AB_c")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "keyvault_name contains invalid chars");
    assert_eq!(body["keyvault_name"], "AB_c");
    assert_eq!(body["invalid_chars"], json!(["A", "B", "_"]));
    assert_eq!(*vaults.check_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_name_length_out_of_range() {
    for (name, length) in [("ab", 2), ("abcdefghijklmnopqrstuvwxy", 25)] {
        let app = app_with(Arc::new(InMemoryVaults::default()), test_config());
        let (status, body, _) = call(app, "POST", &uri(name)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{name}");
        assert_eq!(
            body["message"],
            "keyvault_name should be between 3 and 24 characters"
        );
        assert_eq!(body["length"], length);
    }
}

#[tokio::test]
async fn test_remote_failure_is_opaque_500() {
    let vaults = Arc::new(InMemoryVaults {
        broken: true,
        ..Default::default()
    });
    let app = app_with(vaults, test_config());

    let (status, body, _) = call(app, "POST", &uri("abc-12")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"message": "unexpected error", "invocation_id": "inv-test-1"})
    );
    assert!(!body.to_string().contains("secret-sub"));
}

#[tokio::test]
async fn test_create_failure_is_opaque_500() {
    let vaults = Arc::new(InMemoryVaults {
        create_fails: true,
        ..Default::default()
    });
    let app = app_with(vaults.clone(), test_config());

    let (status, body, echoed) = call(app, "POST", &uri("abc-12")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(echoed, "inv-test-1");
    assert_eq!(
        body,
        json!({"message": "unexpected error", "invocation_id": "inv-test-1"})
    );
    let text = body.to_string();
    assert!(!text.contains("VaultAlreadyExists") && !text.contains("rg-vaults"));
    assert_eq!(*vaults.check_calls.lock().unwrap(), 1);
    assert!(vaults.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_creation_times_out() {
    let vaults = Arc::new(InMemoryVaults {
        create_delay: Some(Duration::from_secs(2)),
        ..Default::default()
    });
    let mut config = test_config();
    config.create_timeout = Duration::from_millis(50);
    let app = app_with(vaults, config);

    let (status, body, _) = call(app, "POST", &uri("slow-vault")).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["message"], "timed out waiting for keyvault creation");
    assert_eq!(body["keyvault_name"], "slow-vault");
}

#[tokio::test]
async fn test_get_is_not_allowed() {
    let app = app_with(Arc::new(InMemoryVaults::default()), test_config());
    let (status, _, _) = call(app, "GET", &uri("abc-12")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_invocation_id_generated_when_host_omits_it() {
    let app = app_with(Arc::new(InMemoryVaults::default()), test_config());
    let req = Request::builder()
        .method("POST")
        .uri("/api/create-keyvault?keyvault_name=abc-12")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    let header = resp
        .headers()
        .get(INVOCATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(uuid::Uuid::parse_str(&header).is_ok());

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["invocation_id"], header);
}
