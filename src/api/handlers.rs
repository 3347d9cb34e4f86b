use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use super::InvocationId;
use crate::errors::ProvisionError;
use crate::models::request::{KeyVaultName, ProvisionParams};
use crate::models::vault::{Vault, VaultCreateOrUpdateParameters};
use crate::AppState;

pub const CREATED_MESSAGE: &str = "keyvault created";

/// A vault that finished provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionedVault {
    pub keyvault_name: KeyVaultName,
    pub keyvault: Vault,
}

impl ProvisionedVault {
    pub fn log(&self) {
        let keyvault = serde_json::to_string(&self.keyvault).unwrap_or_default();
        tracing::info!(
            keyvault_name = %self.keyvault_name,
            vault_uri = self.keyvault.vault_uri().unwrap_or_default(),
            %keyvault,
            "{}",
            CREATED_MESSAGE
        );
    }

    pub fn body(&self, invocation_id: &str) -> Value {
        json!({
            "invocation_id": invocation_id,
            "message": CREATED_MESSAGE,
            "keyvault_name": self.keyvault_name.as_str(),
            "keyvault": self.keyvault,
        })
    }
}

/// POST /api/create-keyvault?keyvault_name=..&owning_group_object_id=..
pub async fn create_keyvault(
    State(state): State<Arc<AppState>>,
    Extension(InvocationId(invocation_id)): Extension<InvocationId>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = ProvisionParams::from_query(query.as_deref());
    match provision(&state, params).await {
        Ok(created) => {
            created.log();
            (StatusCode::CREATED, Json(created.body(&invocation_id))).into_response()
        }
        Err(e) => e.with_invocation(invocation_id).into_response(),
    }
}

/// Validate, check availability, create and wait. Stops at the first failure.
pub async fn provision(
    state: &AppState,
    params: ProvisionParams,
) -> Result<ProvisionedVault, ProvisionError> {
    let request = params.validate()?;
    let name = &request.keyvault_name;
    let cfg = &state.config;

    let availability = state
        .vaults
        .check_name_availability(name)
        .await
        .context("keyvault name availability check failed")?;
    if !availability.name_available {
        return Err(ProvisionError::NameUnavailable {
            keyvault_name: name.to_string(),
            reason: availability.reason,
            detail: availability.message,
        });
    }

    let parameters = VaultCreateOrUpdateParameters::for_owning_group(
        &cfg.location,
        &cfg.tenant_id,
        &request.owning_group_object_id,
    );
    tracing::info!(
        keyvault_name = %name,
        resource_group = %cfg.resource_group_name,
        location = %cfg.location,
        owning_group_object_id = %request.owning_group_object_id,
        "creating keyvault"
    );

    let keyvault = match tokio::time::timeout(
        cfg.create_timeout,
        state.vaults.create_or_update(name, &parameters),
    )
    .await
    {
        Ok(result) => result.context("keyvault creation failed")?,
        Err(_) => {
            return Err(ProvisionError::ProvisionTimeout {
                keyvault_name: name.to_string(),
                timeout_secs: cfg.create_timeout.as_secs(),
            })
        }
    };

    Ok(ProvisionedVault {
        keyvault_name: request.keyvault_name,
        keyvault,
    })
}
