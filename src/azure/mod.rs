pub mod arm;
pub mod credential;

use async_trait::async_trait;

use crate::models::request::KeyVaultName;
use crate::models::vault::{CheckNameAvailabilityResult, Vault, VaultCreateOrUpdateParameters};

/// Remote operations on `Microsoft.KeyVault/vaults`.
/// Implementations: `arm::ArmVaultClient` (ARM REST).
#[async_trait]
pub trait VaultManager: Send + Sync {
    async fn check_name_availability(
        &self,
        name: &KeyVaultName,
    ) -> anyhow::Result<CheckNameAvailabilityResult>;

    /// Create or update the vault and wait for the operation to finish.
    async fn create_or_update(
        &self,
        name: &KeyVaultName,
        parameters: &VaultCreateOrUpdateParameters,
    ) -> anyhow::Result<Vault>;
}
