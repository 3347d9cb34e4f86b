//! Azure Resource Manager wire types for `Microsoft.KeyVault/vaults`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const VAULT_RESOURCE_TYPE: &str = "Microsoft.KeyVault/vaults";

/// Body of `PUT .../vaults/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultCreateOrUpdateParameters {
    pub location: String,
    pub properties: VaultProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VaultProperties {
    pub tenant_id: String,
    pub sku: Sku,
    pub access_policies: Vec<AccessPolicyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sku {
    pub family: String,
    pub name: String,
}

impl Sku {
    /// Family A, standard tier.
    pub fn standard() -> Self {
        Self {
            family: "A".into(),
            name: "standard".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyEntry {
    pub tenant_id: String,
    pub object_id: String,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<String>,
}

impl VaultCreateOrUpdateParameters {
    /// A standard-tier vault whose only access policy grants the owning
    /// group every key and secret permission.
    pub fn for_owning_group(location: &str, tenant_id: &str, owning_group_object_id: &str) -> Self {
        Self {
            location: location.to_string(),
            properties: VaultProperties {
                tenant_id: tenant_id.to_string(),
                sku: Sku::standard(),
                access_policies: vec![AccessPolicyEntry {
                    tenant_id: tenant_id.to_string(),
                    object_id: owning_group_object_id.to_string(),
                    permissions: Permissions {
                        keys: vec!["all".into()],
                        secrets: vec!["all".into()],
                        certificates: Vec::new(),
                    },
                }],
            },
        }
    }
}

/// Body of `POST .../checkNameAvailability`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckNameAvailabilityParameters<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub resource_type: &'static str,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckNameAvailabilityResult {
    pub name_available: bool,
    /// `AccountNameInvalid` or `AlreadyExists` when unavailable.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A vault resource as returned by ARM. Unknown fields are kept so the
/// record serializes back out unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Vault {
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.properties
            .get("provisioningState")
            .and_then(Value::as_str)
            .map(ProvisioningState::from)
    }

    pub fn vault_uri(&self) -> Option<&str> {
        self.properties.get("vaultUri").and_then(Value::as_str)
    }
}

/// ARM provisioning / async-operation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Succeeded,
    Failed,
    Canceled,
    /// `Accepted`, `Provisioning`, `InProgress`, `RegisteringDns`, ...
    InProgress(String),
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProvisioningState::InProgress(_))
    }
}

impl From<&str> for ProvisioningState {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "succeeded" => ProvisioningState::Succeeded,
            "failed" => ProvisioningState::Failed,
            "canceled" | "cancelled" => ProvisioningState::Canceled,
            _ => ProvisioningState::InProgress(s.to_string()),
        }
    }
}

/// Body returned by an `Azure-AsyncOperation` status URL.
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncOperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<ArmErrorDetail>,
}

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ArmErrorResponse {
    pub error: ArmErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArmErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
